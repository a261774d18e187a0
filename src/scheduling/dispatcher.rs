//! In-process trigger dispatcher.
//!
//! Ticks on a fixed interval, finds enabled triggers with an occurrence in
//! the window since the previous tick, and starts a run for each of them on
//! its own task. Missed occurrences collapse into a single run. The
//! [`DispatcherHandle`] can trigger runs on demand, pause and resume the
//! tick, and shut the loop down after in-flight runs finish.

use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{RwLock, mpsc, oneshot};
use tokio::task::JoinHandle;

use crate::backend::ScriptBackend;
use crate::core::run::PipelineRun;
use crate::core::schedule::PeriodicTrigger;
use crate::core::types::PipelineId;
use crate::runner::{PipelineRunner, RUN_PIPELINE_TASK, RunnerError};
use crate::storage::{Storage, StorageError};

/// Buffer size for the command channel between handle and dispatcher.
const COMMAND_CHANNEL_BUFFER: usize = 32;

/// Errors that can occur in the dispatcher.
#[derive(Debug, Error)]
pub enum DispatcherError {
    /// The run failed or was rejected.
    #[error("runner error: {0}")]
    Runner(#[from] RunnerError),

    /// Storage error.
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    /// Channel error.
    #[error("channel error: {0}")]
    ChannelError(String),
}

/// State of the dispatcher loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatcherState {
    Stopped,
    Running,
    /// Ticks are skipped; manual triggers still run.
    Paused,
}

type RunResponse = oneshot::Sender<Result<PipelineRun, DispatcherError>>;

enum Command {
    Trigger {
        pipeline_id: PipelineId,
        response: RunResponse,
    },
    Pause {
        response: oneshot::Sender<()>,
    },
    Resume {
        response: oneshot::Sender<()>,
    },
    Shutdown {
        response: oneshot::Sender<()>,
    },
}

/// Handle for controlling a running dispatcher.
#[derive(Clone)]
pub struct DispatcherHandle {
    command_tx: mpsc::Sender<Command>,
    state: Arc<RwLock<DispatcherState>>,
}

impl DispatcherHandle {
    async fn send<T>(
        &self,
        build: impl FnOnce(oneshot::Sender<T>) -> Command,
        operation: &str,
    ) -> Result<T, DispatcherError> {
        let (response_tx, response_rx) = oneshot::channel();
        self.command_tx.send(build(response_tx)).await.map_err(|_| {
            DispatcherError::ChannelError(format!("failed to send {} command", operation))
        })?;
        response_rx.await.map_err(|_| {
            DispatcherError::ChannelError(format!("failed to receive {} response", operation))
        })
    }

    /// Run a pipeline now and wait for the finished run.
    pub async fn trigger(&self, pipeline_id: PipelineId) -> Result<PipelineRun, DispatcherError> {
        self.send(
            |response| Command::Trigger {
                pipeline_id,
                response,
            },
            "trigger",
        )
        .await?
    }

    /// Stop firing scheduled triggers.
    pub async fn pause(&self) -> Result<(), DispatcherError> {
        self.send(|response| Command::Pause { response }, "pause")
            .await
    }

    /// Resume firing scheduled triggers. Occurrences during the pause are skipped.
    pub async fn resume(&self) -> Result<(), DispatcherError> {
        self.send(|response| Command::Resume { response }, "resume")
            .await
    }

    /// Stop the loop after in-flight runs finish or the shutdown timeout passes.
    pub async fn shutdown(&self) -> Result<(), DispatcherError> {
        self.send(|response| Command::Shutdown { response }, "shutdown")
            .await
    }

    /// Get the current state.
    pub async fn state(&self) -> DispatcherState {
        *self.state.read().await
    }

    /// Check if the dispatcher is paused.
    pub async fn is_paused(&self) -> bool {
        *self.state.read().await == DispatcherState::Paused
    }
}

/// Fires periodic triggers through a [`PipelineRunner`].
pub struct Dispatcher<S: Storage> {
    runner: PipelineRunner<S>,
    backend: Arc<dyn ScriptBackend>,
    tick_interval: Duration,
    shutdown_timeout: Duration,
    running: Arc<RwLock<HashMap<PipelineId, JoinHandle<()>>>>,
}

impl<S: Storage + 'static> Dispatcher<S> {
    /// Create a dispatcher running pipelines with `backend`.
    pub fn new(runner: PipelineRunner<S>, backend: Arc<dyn ScriptBackend>) -> Self {
        Self {
            runner,
            backend,
            tick_interval: Duration::from_secs(1),
            shutdown_timeout: Duration::from_secs(30),
            running: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Set the tick interval.
    pub fn with_tick_interval(mut self, interval: Duration) -> Self {
        self.tick_interval = interval;
        self
    }

    /// Set the graceful shutdown timeout.
    pub fn with_shutdown_timeout(mut self, timeout: Duration) -> Self {
        self.shutdown_timeout = timeout;
        self
    }

    /// Start the loop and return a handle for controlling it.
    pub fn start(self) -> (DispatcherHandle, JoinHandle<()>) {
        let (command_tx, command_rx) = mpsc::channel(COMMAND_CHANNEL_BUFFER);
        let state = Arc::new(RwLock::new(DispatcherState::Running));

        let handle = DispatcherHandle {
            command_tx,
            state: Arc::clone(&state),
        };
        let task = tokio::spawn(async move {
            self.run(command_rx, state).await;
        });
        (handle, task)
    }

    async fn run(self, mut command_rx: mpsc::Receiver<Command>, state: Arc<RwLock<DispatcherState>>) {
        let mut interval = tokio::time::interval(self.tick_interval);
        let mut last_check = Utc::now();
        tracing::info!(tick = ?self.tick_interval, backend = self.backend.name(), "Dispatcher started");

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    if *state.read().await == DispatcherState::Running {
                        let now = Utc::now();
                        self.check_triggers(last_check, now).await;
                        last_check = now;
                    }
                    self.cleanup_finished().await;
                }

                command = command_rx.recv() => {
                    let Some(command) = command else {
                        // Every handle was dropped
                        self.await_running().await;
                        *state.write().await = DispatcherState::Stopped;
                        break;
                    };
                    match command {
                        Command::Trigger { pipeline_id, response } => {
                            self.spawn_run(pipeline_id, Some(response)).await;
                        }
                        Command::Pause { response } => {
                            *state.write().await = DispatcherState::Paused;
                            let _ = response.send(());
                        }
                        Command::Resume { response } => {
                            *state.write().await = DispatcherState::Running;
                            last_check = Utc::now();
                            tracing::info!("Dispatcher resumed, skipping occurrences during pause");
                            let _ = response.send(());
                        }
                        Command::Shutdown { response } => {
                            *state.write().await = DispatcherState::Stopped;
                            self.await_running().await;
                            let _ = response.send(());
                            break;
                        }
                    }
                }
            }
        }
    }

    /// Fire every enabled trigger with an occurrence in `(last_check, now]`.
    async fn check_triggers(&self, last_check: DateTime<Utc>, now: DateTime<Utc>) {
        let triggers = match self.runner.storage().list_triggers().await {
            Ok(triggers) => triggers,
            Err(e) => {
                tracing::warn!(error = %e, "Failed to list triggers");
                return;
            }
        };

        for trigger in triggers.iter().filter(|t| t.is_due(last_check, now)) {
            self.fire(trigger, now).await;
        }
    }

    async fn fire(&self, trigger: &PeriodicTrigger, now: DateTime<Utc>) {
        if trigger.task != RUN_PIPELINE_TASK {
            tracing::warn!(trigger = %trigger.name, task = %trigger.task, "Unknown task, skipping");
            return;
        }
        if self.runner.is_running(trigger.pipeline_id) {
            tracing::warn!(
                trigger = %trigger.name,
                pipeline_id = %trigger.pipeline_id,
                "Previous run still in progress, skipping occurrence"
            );
            return;
        }

        tracing::info!(trigger = %trigger.name, pipeline_id = %trigger.pipeline_id, "Firing trigger");
        if let Err(e) = self
            .runner
            .storage()
            .record_trigger_run(trigger.id, now)
            .await
        {
            tracing::warn!(trigger = %trigger.name, error = %e, "Failed to record trigger run");
        }
        self.spawn_run(trigger.pipeline_id, None).await;
    }

    async fn spawn_run(&self, pipeline_id: PipelineId, response: Option<RunResponse>) {
        let runner = self.runner.clone();
        let backend = Arc::clone(&self.backend);

        let handle = tokio::spawn(async move {
            let result = runner
                .run(pipeline_id, backend.as_ref())
                .await
                .map_err(DispatcherError::from);
            if let Err(e) = &result {
                tracing::warn!(pipeline_id = %pipeline_id, error = %e, "Pipeline run failed");
            }
            if let Some(response) = response {
                let _ = response.send(result);
            }
        });

        let mut running = self.running.write().await;
        running.retain(|_, h| !h.is_finished());
        // A rejected duplicate must not replace the handle of the live run
        running.entry(pipeline_id).or_insert(handle);
    }

    async fn cleanup_finished(&self) {
        let mut running = self.running.write().await;
        running.retain(|_, handle| !handle.is_finished());
    }

    /// Wait for in-flight runs, up to the shutdown timeout.
    async fn await_running(&self) {
        let deadline = tokio::time::Instant::now() + self.shutdown_timeout;

        loop {
            let mut running = self.running.write().await;
            running.retain(|_, handle| !handle.is_finished());
            let remaining = running.len();
            drop(running);

            if remaining == 0 {
                tracing::info!("Dispatcher stopped");
                return;
            }
            if tokio::time::Instant::now() >= deadline {
                tracing::warn!(
                    remaining,
                    timeout = ?self.shutdown_timeout,
                    "Shutdown timeout exceeded with runs still in progress"
                );
                return;
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
    }
}
