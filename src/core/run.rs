//! Pipeline run records.
//!
//! A run's output is persisted as JSON with the shape
//! `{"pipeline_id": 1, "steps": [{"step_id": 1, "returncode": 0, "stdout": "", "stderr": ""}]}`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::types::{PipelineId, RunId, StepId};

/// Result of executing one step.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepResult {
    pub step_id: StepId,
    pub returncode: i32,
    pub stdout: String,
    pub stderr: String,
}

impl StepResult {
    /// Whether the script exited with code zero.
    pub fn succeeded(&self) -> bool {
        self.returncode == 0
    }
}

/// Aggregated output of one pipeline run, in execution order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunOutput {
    pub pipeline_id: PipelineId,
    pub steps: Vec<StepResult>,
}

impl RunOutput {
    /// Create an empty output for a pipeline.
    pub fn new(pipeline_id: PipelineId) -> Self {
        Self {
            pipeline_id,
            steps: Vec::new(),
        }
    }

    /// True when every step exited with code zero (vacuously true for no steps).
    pub fn succeeded(&self) -> bool {
        self.steps.iter().all(StepResult::succeeded)
    }

    /// Steps that exited with a nonzero code.
    pub fn failed_steps(&self) -> impl Iterator<Item = &StepResult> {
        self.steps.iter().filter(|s| !s.succeeded())
    }
}

/// A persisted pipeline run. Immutable once stored.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PipelineRun {
    pub id: RunId,
    pub pipeline_id: PipelineId,
    pub started_at: DateTime<Utc>,
    pub ended_at: DateTime<Utc>,
    pub output: RunOutput,
}

/// A completed run that has not been stored yet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewPipelineRun {
    pub pipeline_id: PipelineId,
    pub started_at: DateTime<Utc>,
    pub ended_at: DateTime<Utc>,
    pub output: RunOutput,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn result(id: i64, code: i32) -> StepResult {
        StepResult {
            step_id: StepId::new(id),
            returncode: code,
            stdout: format!("out {}", id),
            stderr: String::new(),
        }
    }

    #[test]
    fn test_output_serializes_to_documented_schema() {
        let output = RunOutput {
            pipeline_id: PipelineId::new(3),
            steps: vec![result(10, 0)],
        };

        let value = serde_json::to_value(&output).unwrap();
        assert_eq!(
            value,
            json!({
                "pipeline_id": 3,
                "steps": [{"step_id": 10, "returncode": 0, "stdout": "out 10", "stderr": ""}]
            })
        );
    }

    #[test]
    fn test_succeeded_and_failed_steps() {
        let mut output = RunOutput::new(PipelineId::new(1));
        assert!(output.succeeded());

        output.steps.push(result(1, 1));
        output.steps.push(result(2, 0));
        assert!(!output.succeeded());

        let failed: Vec<_> = output.failed_steps().map(|s| s.step_id).collect();
        assert_eq!(failed, vec![StepId::new(1)]);
    }
}
