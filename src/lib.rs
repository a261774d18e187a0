//! etlman - pipeline execution core.
//!
//! A pipeline is an ordered list of script steps. The [`PipelineRunner`]
//! executes every step through a [`ScriptBackend`], records each exit code
//! and captured output, and persists one [`PipelineRun`]. Pipeline schedules
//! are saved together with the periodic trigger a [`Dispatcher`] fires.

pub mod backend;
pub mod config;
pub mod core;
pub mod runner;
pub mod scheduling;
pub mod storage;
pub mod testing;

pub use backend::{
    BackendError, BackendKind, FakeBackend, OsFamily, ScriptBackend, ScriptOutput,
    SubprocessBackend, get_backend,
};
pub use config::{AppConfig, ConfigError, ImportError, YamlLoader, import_project_file};
pub use crate::core::pipeline::{Language, NewPipeline, NewStep, Pipeline, Step};
pub use crate::core::project::{Collaborator, DataInterface, NewDataInterface, NewProject, Project};
pub use crate::core::run::{PipelineRun, RunOutput, StepResult};
pub use crate::core::schedule::{
    IntervalSchedule, IntervalUnit, PeriodicTrigger, PipelineSchedule, ScheduleDraft,
    ScheduleError,
};
pub use crate::core::types::{
    DataInterfaceId, IntervalScheduleId, PipelineId, ProjectId, RunId, ScheduleId, StepId,
    TriggerId,
};
pub use runner::{PipelineRunner, RUN_PIPELINE_TASK, RunnerError};
pub use scheduling::{
    Dispatcher, DispatcherError, DispatcherHandle, DispatcherState, ScheduleService,
    SchedulingError, TriggerSpec,
};
#[cfg(feature = "sqlite")]
pub use storage::SqliteStorage;
pub use storage::{InMemoryStorage, Storage, StorageError};
