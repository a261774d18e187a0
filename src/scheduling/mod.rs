//! Pipeline scheduling.
//!
//! A [`PipelineSchedule`] is stored next to the periodic trigger a scheduler
//! consumes. [`TriggerSpec`] is the pure translation from schedule fields to
//! trigger fields; [`ScheduleService`] validates a draft and persists the
//! schedule and its trigger in one storage transaction.
//!
//! The [`Dispatcher`] is an in-process consumer of those triggers.

mod dispatcher;

pub use dispatcher::{Dispatcher, DispatcherError, DispatcherHandle, DispatcherState};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use thiserror::Error;

use crate::core::schedule::{IntervalUnit, PipelineSchedule, ScheduleDraft, ScheduleError};
use crate::core::types::PipelineId;
use crate::runner::RUN_PIPELINE_TASK;
use crate::storage::{Storage, StorageError};

/// Errors that can occur when saving a schedule.
#[derive(Debug, Error)]
pub enum SchedulingError {
    /// The schedule fields are invalid.
    #[error("invalid schedule: {0}")]
    Schedule(#[from] ScheduleError),

    /// Persisting the schedule or trigger failed; nothing was written.
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),
}

/// Fields of the periodic trigger derived from a pipeline schedule.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TriggerSpec {
    /// `pipeline-{id}`; unique per pipeline.
    pub name: String,
    /// Task invoked with the pipeline id.
    pub task: String,
    pub pipeline_id: PipelineId,
    /// First occurrence, in UTC.
    pub start_time: DateTime<Utc>,
    pub every: u32,
    pub period: IntervalUnit,
    pub enabled: bool,
}

/// Trigger name for a pipeline.
pub fn trigger_name(pipeline_id: PipelineId) -> String {
    format!("pipeline-{}", pipeline_id)
}

impl TriggerSpec {
    /// Translate a draft. Fails on a zero interval or an invalid start.
    pub fn from_draft(draft: &ScheduleDraft) -> Result<Self, ScheduleError> {
        let start_time = draft.validate()?;
        Ok(Self {
            name: trigger_name(draft.pipeline_id),
            task: RUN_PIPELINE_TASK.to_string(),
            pipeline_id: draft.pipeline_id,
            start_time,
            every: draft.interval,
            period: draft.unit,
            enabled: draft.published,
        })
    }

    /// Translate a stored schedule.
    pub fn from_schedule(schedule: &PipelineSchedule) -> Result<Self, ScheduleError> {
        Self::from_draft(&ScheduleDraft {
            pipeline_id: schedule.pipeline_id,
            start_date: schedule.start_date,
            start_time: schedule.start_time,
            time_zone: schedule.time_zone.clone(),
            interval: schedule.interval,
            unit: schedule.unit,
            published: schedule.published,
        })
    }
}

/// Saves pipeline schedules together with their triggers.
pub struct ScheduleService<S: Storage> {
    storage: Arc<S>,
}

impl<S: Storage> ScheduleService<S> {
    /// Create a service over shared storage.
    pub fn new(storage: Arc<S>) -> Self {
        Self { storage }
    }

    /// Validate `draft` and atomically store the schedule, its interval
    /// schedule and its trigger.
    pub async fn save_schedule(
        &self,
        draft: ScheduleDraft,
    ) -> Result<PipelineSchedule, SchedulingError> {
        let spec = TriggerSpec::from_draft(&draft)?;
        let schedule = self.storage.save_schedule(&draft, &spec).await?;

        tracing::info!(
            pipeline_id = %schedule.pipeline_id,
            trigger = %spec.name,
            every = spec.every,
            period = %spec.period,
            start_time = %spec.start_time,
            enabled = spec.enabled,
            "Saved pipeline schedule"
        );
        Ok(schedule)
    }

    /// Enable or disable a pipeline's trigger by re-saving its schedule.
    pub async fn set_published(
        &self,
        pipeline_id: PipelineId,
        published: bool,
    ) -> Result<PipelineSchedule, SchedulingError> {
        let current = self.storage.get_schedule(pipeline_id).await?;
        self.save_schedule(ScheduleDraft {
            pipeline_id,
            start_date: current.start_date,
            start_time: current.start_time,
            time_zone: current.time_zone,
            interval: current.interval,
            unit: current.unit,
            published,
        })
        .await
    }
}
