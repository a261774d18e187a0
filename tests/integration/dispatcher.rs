//! Dispatcher integration tests against SQLite.

use chrono::{Timelike, Utc};
use etlman::{
    Dispatcher, DispatcherState, FakeBackend, IntervalUnit, Language, PipelineRunner,
    ScheduleDraft, ScheduleService, ScriptBackend, Storage,
};
use std::sync::Arc;
use std::time::Duration;

use crate::common::{create_pipeline, sqlite_storage};

#[tokio::test]
async fn test_due_trigger_fires_once() {
    let (storage, _dir) = sqlite_storage().await;
    let pipeline_id = create_pipeline(
        storage.as_ref(),
        "daily",
        &[(Language::Python, "print('tick')")],
    )
    .await;

    // First occurrence just ahead of now, then daily
    let start = (Utc::now() + chrono::Duration::seconds(2))
        .with_nanosecond(0)
        .unwrap();
    ScheduleService::new(Arc::clone(&storage))
        .save_schedule(ScheduleDraft::new(
            pipeline_id,
            start.date_naive(),
            start.time(),
            1,
            IntervalUnit::Days,
        ))
        .await
        .unwrap();

    let backend: Arc<dyn ScriptBackend> = Arc::new(FakeBackend::new());
    let dispatcher = Dispatcher::new(PipelineRunner::new(Arc::clone(&storage)), backend)
        .with_tick_interval(Duration::from_millis(50));
    let (handle, task) = dispatcher.start();

    tokio::time::sleep(Duration::from_millis(3500)).await;
    handle.shutdown().await.unwrap();
    task.await.unwrap();

    let runs = storage.list_runs(pipeline_id, 10).await.unwrap();
    assert_eq!(runs.len(), 1);
    let trigger = &storage.list_triggers().await.unwrap()[0];
    assert!(trigger.last_run_at.is_some());

    storage.close().await;
}

#[tokio::test]
async fn test_manual_trigger_and_shutdown() {
    let (storage, _dir) = sqlite_storage().await;
    let pipeline_id = create_pipeline(
        storage.as_ref(),
        "manual",
        &[(Language::Python, "a"), (Language::R, "b")],
    )
    .await;

    let backend: Arc<dyn ScriptBackend> = Arc::new(FakeBackend::with_seed(5));
    let (handle, task) = Dispatcher::new(PipelineRunner::new(Arc::clone(&storage)), backend)
        .with_tick_interval(Duration::from_millis(50))
        .start();

    let run = handle.trigger(pipeline_id).await.unwrap();
    assert_eq!(run.output.steps.len(), 2);
    assert_eq!(storage.get_run(run.id).await.unwrap(), run);

    handle.shutdown().await.unwrap();
    task.await.unwrap();
    assert_eq!(handle.state().await, DispatcherState::Stopped);
    assert!(handle.trigger(pipeline_id).await.is_err());

    storage.close().await;
}
