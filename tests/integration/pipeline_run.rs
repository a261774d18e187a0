//! Pipeline run integration tests.
//!
//! Runs pipelines through real child processes and persists the results in
//! SQLite.

use etlman::{
    FakeBackend, Language, PipelineRunner, RunnerError, SqliteStorage, Storage, SubprocessBackend,
};
use std::sync::Arc;

use crate::common::{create_pipeline, sh_backend, sqlite_storage};

#[cfg(unix)]
#[tokio::test]
async fn test_failed_step_then_successful_step() {
    let (storage, _dir) = sqlite_storage().await;
    let pipeline_id = create_pipeline(
        storage.as_ref(),
        "mixed",
        &[
            (Language::Python, "echo failing >&2\nexit 1\n"),
            (Language::Python, "echo ok\n"),
        ],
    )
    .await;
    let runner = PipelineRunner::new(Arc::clone(&storage));

    let run = runner.run(pipeline_id, &sh_backend()).await.unwrap();

    let codes: Vec<i32> = run.output.steps.iter().map(|s| s.returncode).collect();
    assert_eq!(codes, vec![1, 0]);
    assert_eq!(run.output.steps[0].stderr.trim(), "failing");
    assert_eq!(run.output.steps[1].stdout.trim(), "ok");

    // The stored output reads back identically
    let stored = storage.get_run(run.id).await.unwrap();
    assert_eq!(stored.output, run.output);
    assert_eq!(stored.started_at, run.started_at);

    storage.close().await;
}

#[cfg(unix)]
#[tokio::test]
async fn test_steps_run_in_step_order_not_insert_order() {
    let (storage, _dir) = sqlite_storage().await;
    let pipeline_id = create_pipeline(storage.as_ref(), "ordered", &[]).await;
    for (order, text) in [(7, "last"), (0, "first"), (3, "middle")] {
        storage
            .create_step(etlman::NewStep::new(
                pipeline_id,
                text,
                Language::R,
                format!("echo {}", text),
                order,
            ))
            .await
            .unwrap();
    }

    let run = PipelineRunner::new(Arc::clone(&storage))
        .run(pipeline_id, &sh_backend())
        .await
        .unwrap();

    let outputs: Vec<&str> = run.output.steps.iter().map(|s| s.stdout.trim()).collect();
    assert_eq!(outputs, vec!["first", "middle", "last"]);

    storage.close().await;
}

#[tokio::test]
async fn test_missing_interpreter_persists_nothing() {
    let (storage, _dir) = sqlite_storage().await;
    let pipeline_id =
        create_pipeline(storage.as_ref(), "broken", &[(Language::R, "cat(1)")]).await;
    let backend =
        SubprocessBackend::new().with_interpreter(Language::R, ["/nonexistent/Rscript"]);

    let result = PipelineRunner::new(Arc::clone(&storage))
        .run(pipeline_id, &backend)
        .await;

    assert!(matches!(result, Err(RunnerError::Backend(_))));
    assert!(storage.list_runs(pipeline_id, 10).await.unwrap().is_empty());

    storage.close().await;
}

#[tokio::test]
async fn test_runs_survive_reopen() {
    let dir = tempfile::TempDir::new().unwrap();
    let path = dir.path().join("runs.db");

    let pipeline_id = {
        let storage = Arc::new(SqliteStorage::new(&path).await.unwrap());
        let pipeline_id = create_pipeline(
            storage.as_ref(),
            "persistent",
            &[(Language::Python, "a"), (Language::R, "b")],
        )
        .await;
        let runner = PipelineRunner::new(Arc::clone(&storage));
        for _ in 0..3 {
            runner
                .run(pipeline_id, &FakeBackend::with_seed(11))
                .await
                .unwrap();
        }
        storage.close().await;
        pipeline_id
    };

    let storage = SqliteStorage::new(&path).await.unwrap();
    let runs = storage.list_runs(pipeline_id, 2).await.unwrap();
    assert_eq!(runs.len(), 2);
    assert!(runs[0].started_at >= runs[1].started_at);
    assert_eq!(runs[0].output.steps.len(), 2);
    // Same seed, same scripts: identical results every run
    assert_eq!(runs[0].output.steps, runs[1].output.steps);

    storage.close().await;
}

#[tokio::test]
async fn test_distinct_pipelines_run_concurrently() {
    let (storage, _dir) = sqlite_storage().await;
    let first = create_pipeline(storage.as_ref(), "first", &[(Language::Python, "1")]).await;
    let second = create_pipeline(storage.as_ref(), "second", &[(Language::Python, "2")]).await;
    let runner = PipelineRunner::new(Arc::clone(&storage));
    let backend = Arc::new(FakeBackend::new());

    let a = {
        let runner = runner.clone();
        let backend = Arc::clone(&backend);
        tokio::spawn(async move { runner.run(first, backend.as_ref()).await })
    };
    let b = {
        let runner = runner.clone();
        let backend = Arc::clone(&backend);
        tokio::spawn(async move { runner.run(second, backend.as_ref()).await })
    };

    assert_eq!(a.await.unwrap().unwrap().pipeline_id, first);
    assert_eq!(b.await.unwrap().unwrap().pipeline_id, second);

    storage.close().await;
}
