//! Schedule persistence integration tests against SQLite.

use chrono::{NaiveDate, NaiveTime, TimeZone, Utc};
use etlman::{
    FakeBackend, IntervalUnit, Language, PipelineId, PipelineRunner, RUN_PIPELINE_TASK,
    ScheduleDraft, ScheduleService, SchedulingError, Storage, StorageError,
};
use std::sync::Arc;

use crate::common::{create_pipeline, sqlite_storage};

fn draft(pipeline_id: PipelineId, every: u32, unit: IntervalUnit) -> ScheduleDraft {
    ScheduleDraft::new(
        pipeline_id,
        NaiveDate::from_ymd_opt(2024, 6, 1).unwrap(),
        NaiveTime::from_hms_opt(8, 15, 0).unwrap(),
        every,
        unit,
    )
}

#[tokio::test]
async fn test_schedules_share_interval_schedule() {
    let (storage, _dir) = sqlite_storage().await;
    let a = create_pipeline(storage.as_ref(), "a", &[]).await;
    let b = create_pipeline(storage.as_ref(), "b", &[]).await;
    let service = ScheduleService::new(Arc::clone(&storage));

    service.save_schedule(draft(a, 5, IntervalUnit::Days)).await.unwrap();
    service.save_schedule(draft(b, 5, IntervalUnit::Days)).await.unwrap();

    let intervals = storage.list_interval_schedules().await.unwrap();
    assert_eq!(intervals.len(), 1);
    let triggers = storage.list_triggers().await.unwrap();
    assert_eq!(triggers.len(), 2);
    assert!(triggers.iter().all(|t| t.interval.id == intervals[0].id));

    storage.close().await;
}

#[tokio::test]
async fn test_trigger_carries_schedule_fields() {
    let (storage, _dir) = sqlite_storage().await;
    let pipeline_id = create_pipeline(storage.as_ref(), "tz", &[]).await;
    let service = ScheduleService::new(Arc::clone(&storage));

    let schedule = service
        .save_schedule(draft(pipeline_id, 2, IntervalUnit::Hours).with_time_zone("Asia/Tokyo"))
        .await
        .unwrap();

    let trigger = storage
        .get_trigger(schedule.trigger_id.unwrap())
        .await
        .unwrap();
    assert_eq!(trigger.name, format!("pipeline-{}", pipeline_id));
    assert_eq!(trigger.task, RUN_PIPELINE_TASK);
    assert_eq!(trigger.pipeline_id, pipeline_id);
    assert!(trigger.enabled);
    assert_eq!(trigger.interval.every, 2);
    assert_eq!(trigger.interval.period, IntervalUnit::Hours);
    // 08:15 JST is 23:15 UTC the day before
    assert_eq!(
        trigger.start_time,
        Utc.with_ymd_and_hms(2024, 5, 31, 23, 15, 0).unwrap()
    );

    storage.close().await;
}

#[tokio::test]
async fn test_resave_updates_in_place() {
    let (storage, _dir) = sqlite_storage().await;
    let pipeline_id = create_pipeline(storage.as_ref(), "resave", &[]).await;
    let service = ScheduleService::new(Arc::clone(&storage));

    let first = service
        .save_schedule(draft(pipeline_id, 1, IntervalUnit::Days))
        .await
        .unwrap();
    let second = service
        .save_schedule(draft(pipeline_id, 30, IntervalUnit::Minutes).with_published(false))
        .await
        .unwrap();

    assert_eq!(first.id, second.id);
    assert_eq!(first.trigger_id, second.trigger_id);
    let triggers = storage.list_triggers().await.unwrap();
    assert_eq!(triggers.len(), 1);
    assert!(!triggers[0].enabled);
    assert_eq!(triggers[0].interval.period, IntervalUnit::Minutes);

    storage.close().await;
}

#[tokio::test]
async fn test_schedule_for_missing_pipeline_writes_nothing() {
    let (storage, _dir) = sqlite_storage().await;
    let service = ScheduleService::new(Arc::clone(&storage));

    let result = service
        .save_schedule(draft(PipelineId::new(999), 5, IntervalUnit::Days))
        .await;

    assert!(matches!(
        result,
        Err(SchedulingError::Storage(StorageError::NotFound(_)))
    ));
    assert!(storage.list_triggers().await.unwrap().is_empty());
    assert!(storage.list_interval_schedules().await.unwrap().is_empty());

    storage.close().await;
}

#[tokio::test]
async fn test_nonexistent_local_time_rejected() {
    let (storage, _dir) = sqlite_storage().await;
    let pipeline_id = create_pipeline(storage.as_ref(), "dst", &[]).await;
    let service = ScheduleService::new(Arc::clone(&storage));

    // Clocks in New York jump from 02:00 to 03:00 on 2024-03-10
    let gap = ScheduleDraft::new(
        pipeline_id,
        NaiveDate::from_ymd_opt(2024, 3, 10).unwrap(),
        NaiveTime::from_hms_opt(2, 30, 0).unwrap(),
        1,
        IntervalUnit::Days,
    )
    .with_time_zone("America/New_York");

    assert!(matches!(
        service.save_schedule(gap).await,
        Err(SchedulingError::Schedule(_))
    ));
    assert!(storage.list_triggers().await.unwrap().is_empty());

    storage.close().await;
}

#[tokio::test]
async fn test_delete_pipeline_removes_schedule_trigger_and_runs() {
    let (storage, _dir) = sqlite_storage().await;
    let pipeline_id =
        create_pipeline(storage.as_ref(), "doomed", &[(Language::Python, "x")]).await;
    let service = ScheduleService::new(Arc::clone(&storage));
    service
        .save_schedule(draft(pipeline_id, 1, IntervalUnit::Days))
        .await
        .unwrap();
    let run = PipelineRunner::new(Arc::clone(&storage))
        .run(pipeline_id, &FakeBackend::new())
        .await
        .unwrap();

    storage.delete_pipeline(pipeline_id).await.unwrap();

    assert!(storage.list_steps(pipeline_id).await.unwrap().is_empty());
    assert!(storage.get_schedule(pipeline_id).await.is_err());
    assert!(storage.list_triggers().await.unwrap().is_empty());
    assert!(matches!(
        storage.get_run(run.id).await,
        Err(StorageError::NotFound(_))
    ));
    // Interval schedules are shared and stay
    assert_eq!(storage.list_interval_schedules().await.unwrap().len(), 1);

    storage.close().await;
}
