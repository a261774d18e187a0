//! etlman - run script pipelines and their schedules.
//!
//! Usage:
//!   etlman import <file>                 Import a project definition
//!   etlman list                          List projects and pipelines
//!   etlman run <pipeline-id>             Run a pipeline once
//!   etlman runs <pipeline-id>            Show recent runs of a pipeline
//!   etlman exec --language <lang> <file> Execute one script file
//!   etlman serve                         Fire scheduled pipelines until Ctrl+C

use clap::{Parser, Subcommand};
use etlman::{
    AppConfig, Dispatcher, InMemoryStorage, Language, PipelineId, PipelineRun, PipelineRunner,
    ScriptBackend, SqliteStorage, Storage, StorageError, YamlLoader, config::StorageConfig,
    get_backend, import_project_file,
};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};

/// etlman - pipeline execution core
#[derive(Parser)]
#[command(name = "etlman")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to the configuration file
    #[arg(short, long, default_value = "etlman.yaml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Import a project definition file
    Import {
        #[arg(value_name = "FILE")]
        file: PathBuf,
    },

    /// List projects, pipelines and schedules
    List,

    /// Run a pipeline once and print the step results
    Run {
        #[arg(value_name = "PIPELINE_ID")]
        pipeline_id: i64,
    },

    /// Show recent runs of a pipeline, newest first
    Runs {
        #[arg(value_name = "PIPELINE_ID")]
        pipeline_id: i64,

        /// Maximum number of runs to show
        #[arg(short, long, default_value = "10")]
        limit: usize,
    },

    /// Execute a single script file with the configured backend
    Exec {
        /// Script language (python or r)
        #[arg(short, long)]
        language: Language,

        #[arg(value_name = "SCRIPT")]
        file: PathBuf,
    },

    /// Fire scheduled pipelines until interrupted
    Serve {
        /// Project definitions to import before starting
        #[arg(long, value_name = "FILE")]
        import: Vec<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .init();

    let cli = Cli::parse();
    let config = YamlLoader::load_app_config(&cli.config)?;

    match &config.storage {
        StorageConfig::Memory => {
            warn!("Using in-memory storage; nothing is kept after this command");
            let storage = Arc::new(InMemoryStorage::new());
            execute(cli.command, &config, storage).await
        }
        StorageConfig::Sqlite { path } => {
            let storage = Arc::new(SqliteStorage::new(path).await?);
            let result = execute(cli.command, &config, Arc::clone(&storage)).await;
            storage.close().await;
            result
        }
    }
}

async fn execute<S: Storage + 'static>(
    command: Commands,
    config: &AppConfig,
    storage: Arc<S>,
) -> Result<(), Box<dyn std::error::Error>> {
    match command {
        Commands::Import { file } => {
            let imported = import_project_file(&storage, &file).await?;
            println!(
                "Imported project '{}' (id {}) with {} pipeline(s), {} schedule(s)",
                imported.project.name,
                imported.project.id,
                imported.pipelines.len(),
                imported.schedules
            );
        }
        Commands::List => list(storage.as_ref()).await?,
        Commands::Run { pipeline_id } => {
            let backend = get_backend(&config.backend)?;
            let runner = PipelineRunner::new(storage);
            let run = runner.run_by_id(pipeline_id, backend.as_ref()).await?;
            print_run(&run);
        }
        Commands::Runs { pipeline_id, limit } => {
            let runs = storage.list_runs(PipelineId::new(pipeline_id), limit).await?;
            if runs.is_empty() {
                println!("No runs for pipeline {}", pipeline_id);
            }
            for run in &runs {
                let status = if run.output.succeeded() { "ok" } else { "failed" };
                println!(
                    "Run {}  {}  {} step(s)  {}  ({} ms)",
                    run.id,
                    run.started_at.format("%Y-%m-%d %H:%M:%S"),
                    run.output.steps.len(),
                    status,
                    (run.ended_at - run.started_at).num_milliseconds()
                );
            }
        }
        Commands::Exec { language, file } => {
            let script = std::fs::read_to_string(&file)?;
            let backend = get_backend(&config.backend)?;
            let output = backend.execute(language.as_str(), &script).await?;
            print!("{}", output.stdout);
            eprint!("{}", output.stderr);
            if output.returncode != 0 {
                return Err(format!("script exited with code {}", output.returncode).into());
            }
        }
        Commands::Serve { import } => {
            let backend = get_backend(&config.backend)?;
            for file in &import {
                let imported = import_project_file(&storage, file).await?;
                info!(project = %imported.project.name, "Imported {}", file.display());
            }
            serve(config, storage, backend).await?;
        }
    }
    Ok(())
}

async fn list<S: Storage>(storage: &S) -> Result<(), StorageError> {
    let projects = storage.list_projects().await?;
    if projects.is_empty() {
        println!("No projects");
        return Ok(());
    }

    for project in &projects {
        println!("Project {}: {}", project.id, project.name);
        if !project.description.is_empty() {
            println!("  {}", project.description);
        }
        for pipeline in storage.list_pipelines(project.id).await? {
            let steps = storage.list_steps(pipeline.id).await?;
            println!("  Pipeline {}: {} ({} step(s))", pipeline.id, pipeline.name, steps.len());
            for step in &steps {
                println!("    {}. {} [{}]", step.step_order, step.name, step.language);
            }
            match storage.get_schedule(pipeline.id).await {
                Ok(schedule) => println!(
                    "    Schedule: every {} {} from {} {} {}{}",
                    schedule.interval,
                    schedule.unit,
                    schedule.start_date,
                    schedule.start_time,
                    schedule.time_zone,
                    if schedule.published { "" } else { " (unpublished)" }
                ),
                Err(StorageError::NotFound(_)) => println!("    Schedule: manual only"),
                Err(e) => return Err(e),
            }
        }
    }
    Ok(())
}

fn print_run(run: &PipelineRun) {
    println!("Run {} of pipeline {}", run.id, run.pipeline_id);
    for result in &run.output.steps {
        println!("Step {}: exit {}", result.step_id, result.returncode);
        for line in result.stdout.lines() {
            println!("  stdout: {}", line);
        }
        for line in result.stderr.lines() {
            println!("  stderr: {}", line);
        }
    }
    let failed = run.output.failed_steps().count();
    if failed > 0 {
        warn!("{} step(s) exited with a nonzero code", failed);
    }
}

/// Run the dispatcher until Ctrl+C.
async fn serve<S: Storage + 'static>(
    config: &AppConfig,
    storage: Arc<S>,
    backend: Arc<dyn ScriptBackend>,
) -> Result<(), Box<dyn std::error::Error>> {
    let dispatcher = Dispatcher::new(PipelineRunner::new(storage), backend)
        .with_tick_interval(config.dispatcher.tick_interval())
        .with_shutdown_timeout(config.dispatcher.shutdown_timeout());

    info!("Starting dispatcher (tick interval: {}s)...", config.dispatcher.tick_interval_secs);
    info!("Press Ctrl+C to stop");

    let (handle, dispatcher_task) = dispatcher.start();

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            info!("Shutting down...");
            handle.shutdown().await?;
        }
        _ = dispatcher_task => {
            info!("Dispatcher stopped");
        }
    }

    Ok(())
}
