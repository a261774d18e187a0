//! Storage abstraction for projects, pipelines, schedules and runs.
//!
//! The [`Storage`] trait is implemented by [`InMemoryStorage`] and, with the
//! `sqlite` feature, by [`SqliteStorage`]. Both enforce the same invariants:
//!
//! - `(pipeline, step_order)` is unique; violations fail with
//!   [`StorageError::DuplicateKey`].
//! - A data interface is the input of at most one pipeline.
//! - Deleting a project or pipeline removes everything it owns, including
//!   the pipeline's schedule, its periodic trigger and its run history.
//! - [`Storage::save_schedule`] writes the schedule, the interval schedule
//!   and the trigger as one unit, and only when the trigger matches the
//!   schedule.
//! - Runs are append-only.

mod memory;
#[cfg(any(feature = "sqlite", test))]
mod sqlite;

pub use memory::InMemoryStorage;
#[cfg(any(feature = "sqlite", test))]
pub use sqlite::SqliteStorage;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::core::pipeline::{NewPipeline, NewStep, Pipeline, Step};
use crate::core::project::{Collaborator, DataInterface, NewDataInterface, NewProject, Project};
use crate::core::run::{NewPipelineRun, PipelineRun};
use crate::core::schedule::{IntervalSchedule, PeriodicTrigger, PipelineSchedule, ScheduleDraft};
use crate::core::types::{DataInterfaceId, PipelineId, ProjectId, RunId, StepId, TriggerId};
use crate::scheduling::{TriggerSpec, trigger_name};

/// Errors that can occur during storage operations.
#[derive(Debug, Error)]
pub enum StorageError {
    /// The requested item was not found.
    #[error("not found: {0}")]
    NotFound(String),

    /// A duplicate key was detected.
    #[error("duplicate key: {0}")]
    DuplicateKey(String),

    /// Storage lock was poisoned.
    #[error("storage lock poisoned")]
    LockPoisoned,

    /// Serialization/deserialization error.
    #[error("serialization error: {0}")]
    SerializationError(String),

    /// Generic storage error.
    #[error("storage error: {0}")]
    Other(String),
}

/// Storage trait for persisting pipeline definitions and their history.
#[async_trait]
pub trait Storage: Send + Sync {
    // Project operations

    /// Create a project and record `owner` as its admin collaborator.
    async fn create_project(&self, project: NewProject, owner: &str)
    -> Result<Project, StorageError>;

    /// Get a project by ID.
    async fn get_project(&self, id: ProjectId) -> Result<Project, StorageError>;

    /// List all projects, oldest first.
    async fn list_projects(&self) -> Result<Vec<Project>, StorageError>;

    /// Delete a project and everything it owns.
    async fn delete_project(&self, id: ProjectId) -> Result<(), StorageError>;

    /// Add a collaborator to a project.
    async fn add_collaborator(&self, collaborator: Collaborator) -> Result<(), StorageError>;

    /// List the collaborators of a project.
    async fn list_collaborators(&self, project: ProjectId)
    -> Result<Vec<Collaborator>, StorageError>;

    /// Whether `user` collaborates on `project`.
    async fn is_collaborator(&self, project: ProjectId, user: &str) -> Result<bool, StorageError>;

    // Data interface operations

    /// Create a data interface.
    async fn create_data_interface(
        &self,
        interface: NewDataInterface,
    ) -> Result<DataInterface, StorageError>;

    /// Get a data interface by ID.
    async fn get_data_interface(&self, id: DataInterfaceId)
    -> Result<DataInterface, StorageError>;

    /// List the data interfaces of a project.
    async fn list_data_interfaces(
        &self,
        project: ProjectId,
    ) -> Result<Vec<DataInterface>, StorageError>;

    // Pipeline operations

    /// Create a pipeline. Fails with `DuplicateKey` if its input is already
    /// used by another pipeline.
    async fn create_pipeline(&self, pipeline: NewPipeline) -> Result<Pipeline, StorageError>;

    /// Get a pipeline by ID.
    async fn get_pipeline(&self, id: PipelineId) -> Result<Pipeline, StorageError>;

    /// List the pipelines of a project.
    async fn list_pipelines(&self, project: ProjectId) -> Result<Vec<Pipeline>, StorageError>;

    /// Delete a pipeline with its steps, schedule, trigger and runs.
    async fn delete_pipeline(&self, id: PipelineId) -> Result<(), StorageError>;

    // Step operations

    /// Create a step. Fails with `DuplicateKey` if the order is taken.
    async fn create_step(&self, step: NewStep) -> Result<Step, StorageError>;

    /// Update a step. Fails with `DuplicateKey` if the new order is taken.
    async fn update_step(&self, step: Step) -> Result<(), StorageError>;

    /// Delete a step.
    async fn delete_step(&self, id: StepId) -> Result<(), StorageError>;

    /// List the steps of a pipeline in ascending `step_order`.
    async fn list_steps(&self, pipeline: PipelineId) -> Result<Vec<Step>, StorageError>;

    /// Order to use when appending a step: one past the highest, or 0.
    async fn next_step_order(&self, pipeline: PipelineId) -> Result<u32, StorageError>;

    // Schedule operations

    /// Upsert a pipeline schedule, get or create the interval schedule and
    /// upsert the pipeline's trigger, all or nothing.
    ///
    /// Fails with `Other` when `trigger` is not the translation of `draft`.
    async fn save_schedule(
        &self,
        draft: &ScheduleDraft,
        trigger: &TriggerSpec,
    ) -> Result<PipelineSchedule, StorageError>;

    /// Get the schedule of a pipeline.
    async fn get_schedule(&self, pipeline: PipelineId) -> Result<PipelineSchedule, StorageError>;

    /// List every stored interval schedule.
    async fn list_interval_schedules(&self) -> Result<Vec<IntervalSchedule>, StorageError>;

    /// Get a trigger by ID.
    async fn get_trigger(&self, id: TriggerId) -> Result<PeriodicTrigger, StorageError>;

    /// List every trigger.
    async fn list_triggers(&self) -> Result<Vec<PeriodicTrigger>, StorageError>;

    /// Record that a trigger fired.
    async fn record_trigger_run(
        &self,
        id: TriggerId,
        at: DateTime<Utc>,
    ) -> Result<(), StorageError>;

    // Run operations

    /// Persist a completed run.
    async fn save_run(&self, run: NewPipelineRun) -> Result<PipelineRun, StorageError>;

    /// Get a run by ID.
    async fn get_run(&self, id: RunId) -> Result<PipelineRun, StorageError>;

    /// List runs for a pipeline, ordered by start time descending.
    /// Returns at most `limit` runs.
    async fn list_runs(
        &self,
        pipeline: PipelineId,
        limit: usize,
    ) -> Result<Vec<PipelineRun>, StorageError>;
}

/// Reject a trigger that contradicts the schedule it is saved with.
fn check_trigger_spec(draft: &ScheduleDraft, trigger: &TriggerSpec) -> Result<(), StorageError> {
    let start_time = draft
        .validate()
        .map_err(|e| StorageError::Other(format!("invalid schedule: {}", e)))?;

    let mismatch = if trigger.pipeline_id != draft.pipeline_id {
        Some("pipeline")
    } else if trigger.name != trigger_name(draft.pipeline_id) {
        Some("name")
    } else if trigger.every != draft.interval || trigger.period != draft.unit {
        Some("interval")
    } else if trigger.start_time != start_time {
        Some("start time")
    } else if trigger.enabled != draft.published {
        Some("enabled flag")
    } else {
        None
    };

    match mismatch {
        Some(field) => Err(StorageError::Other(format!(
            "trigger {} does not match the schedule of pipeline {}",
            field, draft.pipeline_id
        ))),
        None => Ok(()),
    }
}
