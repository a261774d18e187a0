//! Project import from definition files.
//!
//! Writes a validated [`ProjectConfig`] through [`Storage`] and
//! [`ScheduleService`]. If any write fails the partially created project is
//! deleted, so an import either lands completely or not at all.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use thiserror::Error;

use super::error::ConfigError;
use super::types::ProjectConfig;
use super::yaml::YamlLoader;
use crate::core::pipeline::{NewPipeline, NewStep, Pipeline};
use crate::core::project::{Collaborator, NewDataInterface, NewProject, Project};
use crate::core::schedule::ScheduleDraft;
use crate::core::types::ProjectId;
use crate::scheduling::{ScheduleService, SchedulingError};
use crate::storage::{Storage, StorageError};

/// Errors that can occur while importing a project definition.
#[derive(Debug, Error)]
pub enum ImportError {
    /// The definition could not be loaded or is invalid.
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// A storage write failed; the project was rolled back.
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    /// A schedule could not be saved; the project was rolled back.
    #[error("scheduling error: {0}")]
    Scheduling(#[from] SchedulingError),
}

/// What an import created.
#[derive(Debug, Clone)]
pub struct ImportedProject {
    pub project: Project,
    pub pipelines: Vec<Pipeline>,
    /// Number of pipelines that got a schedule.
    pub schedules: usize,
}

/// Load a definition file and import it.
pub async fn import_project_file<S: Storage>(
    storage: &Arc<S>,
    path: impl AsRef<Path>,
) -> Result<ImportedProject, ImportError> {
    let config = YamlLoader::load_project_config(path)?;
    import_project(storage, &config).await
}

/// Import a validated project definition whose scripts are resolved.
pub async fn import_project<S: Storage>(
    storage: &Arc<S>,
    config: &ProjectConfig,
) -> Result<ImportedProject, ImportError> {
    let project = storage
        .create_project(
            NewProject::new(&config.name, &config.description),
            &config.owner,
        )
        .await?;

    match write_contents(storage, project.id, config).await {
        Ok((pipelines, schedules)) => {
            tracing::info!(
                project_id = %project.id,
                project = %project.name,
                pipelines = pipelines.len(),
                schedules,
                "Imported project"
            );
            Ok(ImportedProject {
                project,
                pipelines,
                schedules,
            })
        }
        Err(e) => {
            tracing::warn!(project = %project.name, error = %e, "Import failed, removing project");
            if let Err(cleanup) = storage.delete_project(project.id).await {
                tracing::warn!(project_id = %project.id, error = %cleanup, "Failed to remove partial project");
            }
            Err(e)
        }
    }
}

async fn write_contents<S: Storage>(
    storage: &Arc<S>,
    project_id: ProjectId,
    config: &ProjectConfig,
) -> Result<(Vec<Pipeline>, usize), ImportError> {
    for collaborator in &config.collaborators {
        storage
            .add_collaborator(Collaborator {
                project_id,
                user: collaborator.user.clone(),
                role: collaborator.role.clone(),
            })
            .await?;
    }

    let mut interfaces = HashMap::new();
    for interface in &config.data_interfaces {
        let created = storage
            .create_data_interface(NewDataInterface {
                project_id,
                name: interface.name.clone(),
                interface_type: interface.interface_type,
                connection_string: interface.connection_string.clone(),
                sql_query: interface.sql_query.clone(),
            })
            .await?;
        interfaces.insert(interface.name.as_str(), created.id);
    }

    let service = ScheduleService::new(Arc::clone(storage));
    let mut pipelines = Vec::with_capacity(config.pipelines.len());
    let mut schedules = 0;

    for pipeline_config in &config.pipelines {
        let mut new_pipeline = NewPipeline::new(project_id, &pipeline_config.name);
        if let Some(input) = &pipeline_config.input {
            let id = interfaces.get(input.as_str()).ok_or_else(|| {
                ConfigError::InvalidConfig(format!("unknown data interface '{}'", input))
            })?;
            new_pipeline = new_pipeline.with_input(*id);
        }
        let pipeline = storage.create_pipeline(new_pipeline).await?;

        for (index, step) in pipeline_config.steps.iter().enumerate() {
            let script = step.script.as_deref().ok_or_else(|| {
                ConfigError::MissingField(format!(
                    "script of step '{}' in pipeline '{}'",
                    step.name, pipeline_config.name
                ))
            })?;
            storage
                .create_step(NewStep::new(
                    pipeline.id,
                    &step.name,
                    step.language,
                    script,
                    step.order_at(index),
                ))
                .await?;
        }

        if let Some(schedule) = &pipeline_config.schedule {
            service
                .save_schedule(
                    ScheduleDraft::new(
                        pipeline.id,
                        schedule.start_date,
                        schedule.start_time,
                        schedule.every,
                        schedule.unit,
                    )
                    .with_time_zone(&schedule.time_zone)
                    .with_published(schedule.published),
                )
                .await?;
            schedules += 1;
        }

        tracing::debug!(pipeline_id = %pipeline.id, pipeline = %pipeline.name, "Imported pipeline");
        pipelines.push(pipeline);
    }

    Ok((pipelines, schedules))
}
