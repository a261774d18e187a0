//! Pipeline runner.
//!
//! Runs every step of a pipeline in ascending `step_order`, one at a time,
//! and persists a single [`PipelineRun`] with the collected results. A step
//! that exits nonzero is recorded and the next step still runs. Errors from
//! the backend itself (unsupported language, spawn failure, timeout) abort
//! the run before anything is persisted.

use chrono::Utc;
use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use thiserror::Error;

use crate::backend::{BackendError, ScriptBackend};
use crate::core::pipeline::Step;
use crate::core::run::{NewPipelineRun, PipelineRun, RunOutput, StepResult};
use crate::core::types::PipelineId;
use crate::storage::{Storage, StorageError};

/// Task name periodic triggers use to start a pipeline run.
pub const RUN_PIPELINE_TASK: &str = "run_pipeline";

/// Errors that can occur while running a pipeline.
#[derive(Debug, Error)]
pub enum RunnerError {
    /// A step could not be executed.
    #[error("backend error: {0}")]
    Backend(#[from] BackendError),

    /// Loading the pipeline or persisting the run failed.
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    /// The pipeline already has a run in progress on this runner.
    #[error("pipeline {0} is already running")]
    AlreadyRunning(PipelineId),
}

/// Execute steps sequentially and collect their results in order.
///
/// `steps` must already be sorted by `step_order`. Nonzero exit codes are
/// returned as data; only a [`BackendError`] stops execution.
pub async fn execute_steps(
    pipeline_id: PipelineId,
    steps: &[Step],
    backend: &dyn ScriptBackend,
) -> Result<RunOutput, BackendError> {
    let mut output = RunOutput::new(pipeline_id);

    for step in steps {
        tracing::debug!(
            pipeline_id = %pipeline_id,
            step_id = %step.id,
            step_order = step.step_order,
            language = %step.language,
            backend = backend.name(),
            "Executing step"
        );

        let result = backend
            .execute(step.language.as_str(), &step.script)
            .await
            .inspect_err(|e| {
                tracing::warn!(
                    pipeline_id = %pipeline_id,
                    step_id = %step.id,
                    error = %e,
                    "Step could not be executed"
                );
            })?;

        if result.returncode != 0 {
            tracing::info!(
                pipeline_id = %pipeline_id,
                step_id = %step.id,
                returncode = result.returncode,
                "Step exited with nonzero code, continuing"
            );
        }

        output.steps.push(StepResult {
            step_id: step.id,
            returncode: result.returncode,
            stdout: result.stdout,
            stderr: result.stderr,
        });
    }

    Ok(output)
}

/// Removes a pipeline from the in-flight set when the run ends.
struct InFlightGuard {
    in_flight: Arc<Mutex<HashSet<PipelineId>>>,
    pipeline_id: PipelineId,
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        let mut set = self.in_flight.lock().unwrap_or_else(|e| e.into_inner());
        set.remove(&self.pipeline_id);
    }
}

/// Runs pipelines against a storage backend.
///
/// Cloning is cheap and clones share the in-flight set, so a second run of
/// the same pipeline through any clone fails with
/// [`RunnerError::AlreadyRunning`] while the first is in progress.
pub struct PipelineRunner<S: Storage> {
    storage: Arc<S>,
    in_flight: Arc<Mutex<HashSet<PipelineId>>>,
}

impl<S: Storage> Clone for PipelineRunner<S> {
    fn clone(&self) -> Self {
        Self {
            storage: Arc::clone(&self.storage),
            in_flight: Arc::clone(&self.in_flight),
        }
    }
}

impl<S: Storage> PipelineRunner<S> {
    /// Create a runner over shared storage.
    pub fn new(storage: Arc<S>) -> Self {
        Self {
            storage,
            in_flight: Arc::new(Mutex::new(HashSet::new())),
        }
    }

    /// Get the storage.
    pub fn storage(&self) -> &Arc<S> {
        &self.storage
    }

    /// Check if a pipeline has a run in progress.
    pub fn is_running(&self, pipeline_id: PipelineId) -> bool {
        self.in_flight
            .lock()
            .map(|set| set.contains(&pipeline_id))
            .unwrap_or(false)
    }

    fn claim(&self, pipeline_id: PipelineId) -> Result<InFlightGuard, RunnerError> {
        let mut set = self.in_flight.lock().unwrap_or_else(|e| e.into_inner());
        if !set.insert(pipeline_id) {
            return Err(RunnerError::AlreadyRunning(pipeline_id));
        }
        Ok(InFlightGuard {
            in_flight: Arc::clone(&self.in_flight),
            pipeline_id,
        })
    }

    /// Run all steps of a pipeline and persist the run.
    pub async fn run(
        &self,
        pipeline_id: PipelineId,
        backend: &dyn ScriptBackend,
    ) -> Result<PipelineRun, RunnerError> {
        let _guard = self.claim(pipeline_id)?;

        let pipeline = self.storage.get_pipeline(pipeline_id).await?;
        let steps = self.storage.list_steps(pipeline.id).await?;

        tracing::info!(
            pipeline_id = %pipeline.id,
            pipeline = %pipeline.name,
            steps = steps.len(),
            "Starting pipeline run"
        );

        let started_at = Utc::now();
        let output = execute_steps(pipeline.id, &steps, backend).await?;
        let ended_at = Utc::now();

        let run = self
            .storage
            .save_run(NewPipelineRun {
                pipeline_id: pipeline.id,
                started_at,
                ended_at,
                output,
            })
            .await?;

        let failed = run.output.failed_steps().count();
        tracing::info!(
            pipeline_id = %pipeline.id,
            run_id = %run.id,
            failed_steps = failed,
            duration_ms = (ended_at - started_at).num_milliseconds(),
            "Pipeline run finished"
        );

        Ok(run)
    }

    /// Entry point for the [`RUN_PIPELINE_TASK`] task: run a pipeline given
    /// the raw id carried in the trigger arguments.
    pub async fn run_by_id(
        &self,
        pipeline_id: i64,
        backend: &dyn ScriptBackend,
    ) -> Result<PipelineRun, RunnerError> {
        self.run(PipelineId::new(pipeline_id), backend).await
    }
}
