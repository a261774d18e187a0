//! Testing utilities for users of the etlman library.
//!
//! - [`ScriptedBackend`]: a backend returning canned results per script and
//!   recording every call
//! - [`TestHarness`]: in-memory storage plus a runner, with helpers to set up
//!   pipelines and assert on run outcomes

use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;

use crate::backend::{BackendError, ScriptBackend, ScriptOutput};
use crate::core::pipeline::{Language, NewPipeline, NewStep, Pipeline};
use crate::core::project::{NewProject, Project};
use crate::core::run::PipelineRun;
use crate::core::types::{PipelineId, ProjectId};
use crate::runner::{PipelineRunner, RunnerError};
use crate::storage::{InMemoryStorage, Storage};

/// A backend with canned responses keyed by script text.
///
/// Scripts without a response succeed with code 0 and empty output.
///
/// # Example
///
/// ```
/// use etlman::testing::ScriptedBackend;
///
/// let backend = ScriptedBackend::new()
///     .respond("exit 3", 3, "", "bad input")
///     .fail_on("missing interpreter");
/// ```
#[derive(Default)]
pub struct ScriptedBackend {
    responses: HashMap<String, ScriptOutput>,
    failing: HashSet<String>,
    delay: Option<Duration>,
    calls: Mutex<Vec<(String, String)>>,
}

impl ScriptedBackend {
    /// Create a backend where every script succeeds.
    pub fn new() -> Self {
        Self::default()
    }

    /// Return this result whenever `script` is executed.
    pub fn respond(
        mut self,
        script: impl Into<String>,
        returncode: i32,
        stdout: impl Into<String>,
        stderr: impl Into<String>,
    ) -> Self {
        self.responses.insert(
            script.into(),
            ScriptOutput {
                returncode,
                stdout: stdout.into(),
                stderr: stderr.into(),
            },
        );
        self
    }

    /// Fail with a backend error whenever `script` is executed.
    pub fn fail_on(mut self, script: impl Into<String>) -> Self {
        self.failing.insert(script.into());
        self
    }

    /// Sleep before answering each call.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Recorded `(language, script)` pairs, in call order.
    pub async fn calls(&self) -> Vec<(String, String)> {
        self.calls.lock().await.clone()
    }

    /// Number of calls so far.
    pub async fn call_count(&self) -> usize {
        self.calls.lock().await.len()
    }
}

#[async_trait]
impl ScriptBackend for ScriptedBackend {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn execute(&self, language: &str, script: &str) -> Result<ScriptOutput, BackendError> {
        self.calls
            .lock()
            .await
            .push((language.to_string(), script.to_string()));

        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }

        if self.failing.contains(script) {
            return Err(BackendError::Io(std::io::Error::other(format!(
                "scripted failure for {:?}",
                script
            ))));
        }

        Ok(self.responses.get(script).cloned().unwrap_or(ScriptOutput {
            returncode: 0,
            stdout: String::new(),
            stderr: String::new(),
        }))
    }
}

/// In-memory storage and a runner for exercising pipelines in tests.
///
/// # Example
///
/// ```ignore
/// use etlman::testing::{ScriptedBackend, TestHarness};
/// use etlman::Language;
///
/// let harness = TestHarness::new();
/// let project = harness.project("demo").await;
/// let pipeline = harness
///     .pipeline(project.id, "load", &[(Language::Python, "print(1)")])
///     .await;
///
/// let run = harness
///     .run_and_assert_success(pipeline.id, &ScriptedBackend::new())
///     .await;
/// assert_eq!(run.output.steps.len(), 1);
/// ```
pub struct TestHarness {
    storage: Arc<InMemoryStorage>,
    runner: PipelineRunner<InMemoryStorage>,
}

impl TestHarness {
    /// Create a harness over fresh in-memory storage.
    pub fn new() -> Self {
        let storage = Arc::new(InMemoryStorage::new());
        Self {
            runner: PipelineRunner::new(Arc::clone(&storage)),
            storage,
        }
    }

    pub fn storage(&self) -> &Arc<InMemoryStorage> {
        &self.storage
    }

    pub fn runner(&self) -> &PipelineRunner<InMemoryStorage> {
        &self.runner
    }

    /// Create a project owned by `"tester"`.
    pub async fn project(&self, name: &str) -> Project {
        self.storage
            .create_project(NewProject::new(name, ""), "tester")
            .await
            .expect("failed to create project")
    }

    /// Create a pipeline whose steps are appended in the order given.
    pub async fn pipeline(
        &self,
        project_id: ProjectId,
        name: &str,
        steps: &[(Language, &str)],
    ) -> Pipeline {
        let pipeline = self
            .storage
            .create_pipeline(NewPipeline::new(project_id, name))
            .await
            .expect("failed to create pipeline");

        for (language, script) in steps {
            let order = self
                .storage
                .next_step_order(pipeline.id)
                .await
                .expect("failed to get next step order");
            self.storage
                .create_step(NewStep::new(
                    pipeline.id,
                    format!("{} step {}", name, order),
                    *language,
                    *script,
                    order,
                ))
                .await
                .expect("failed to create step");
        }
        pipeline
    }

    /// Run a pipeline with `backend`.
    pub async fn run(
        &self,
        pipeline_id: PipelineId,
        backend: &dyn ScriptBackend,
    ) -> Result<PipelineRun, RunnerError> {
        self.runner.run(pipeline_id, backend).await
    }

    /// Run and assert that every step exited with code 0.
    pub async fn run_and_assert_success(
        &self,
        pipeline_id: PipelineId,
        backend: &dyn ScriptBackend,
    ) -> PipelineRun {
        let run = self.run(pipeline_id, backend).await.expect("run failed");
        assert!(
            run.output.succeeded(),
            "Expected all steps to succeed, but these failed: {:?}",
            run.output
                .failed_steps()
                .map(|s| (s.step_id, s.returncode))
                .collect::<Vec<_>>()
        );
        run
    }

    /// Run and assert that at least one step exited nonzero.
    pub async fn run_and_assert_failure(
        &self,
        pipeline_id: PipelineId,
        backend: &dyn ScriptBackend,
    ) -> PipelineRun {
        let run = self.run(pipeline_id, backend).await.expect("run failed");
        assert!(
            !run.output.succeeded(),
            "Expected a step to fail, but all succeeded"
        );
        run
    }
}

impl Default for TestHarness {
    fn default() -> Self {
        Self::new()
    }
}
