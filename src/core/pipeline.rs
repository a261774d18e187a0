//! Pipelines and their ordered script steps.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

use super::types::{DataInterfaceId, PipelineId, ProjectId, StepId};

/// A language identifier that is not in the supported set.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown language: {0}")]
pub struct UnknownLanguage(pub String);

/// Interpreter language of a step script.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Language {
    Python,
    R,
}

impl Language {
    /// Identifier used in storage, configuration and backend calls.
    pub fn as_str(&self) -> &'static str {
        match self {
            Language::Python => "python",
            Language::R => "r",
        }
    }

    /// File suffix for temporary script files.
    pub fn file_suffix(&self) -> &'static str {
        match self {
            Language::Python => ".py",
            Language::R => ".R",
        }
    }
}

impl fmt::Display for Language {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Language {
    type Err = UnknownLanguage;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "python" => Ok(Language::Python),
            "r" => Ok(Language::R),
            _ => Err(UnknownLanguage(s.to_string())),
        }
    }
}

/// A pipeline: an ordered sequence of steps belonging to a project.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Pipeline {
    pub id: PipelineId,
    pub project_id: ProjectId,
    pub name: String,
    /// Optional one-to-one data source.
    pub input: Option<DataInterfaceId>,
    pub created_at: DateTime<Utc>,
}

/// Fields needed to create a pipeline.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewPipeline {
    pub project_id: ProjectId,
    pub name: String,
    pub input: Option<DataInterfaceId>,
}

impl NewPipeline {
    /// Create a pipeline draft without an input.
    pub fn new(project_id: ProjectId, name: impl Into<String>) -> Self {
        Self {
            project_id,
            name: name.into(),
            input: None,
        }
    }

    /// Attach a data interface as the pipeline input.
    pub fn with_input(mut self, input: DataInterfaceId) -> Self {
        self.input = Some(input);
        self
    }
}

/// One script at one position of a pipeline.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Step {
    pub id: StepId,
    pub pipeline_id: PipelineId,
    pub name: String,
    pub language: Language,
    pub script: String,
    /// Position within the pipeline; unique per pipeline.
    pub step_order: u32,
}

/// Fields needed to create a step.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewStep {
    pub pipeline_id: PipelineId,
    pub name: String,
    pub language: Language,
    pub script: String,
    pub step_order: u32,
}

impl NewStep {
    /// Create a step draft.
    pub fn new(
        pipeline_id: PipelineId,
        name: impl Into<String>,
        language: Language,
        script: impl Into<String>,
        step_order: u32,
    ) -> Self {
        Self {
            pipeline_id,
            name: name.into(),
            language,
            script: script.into(),
            step_order,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_supported_languages() {
        assert_eq!("python".parse::<Language>().unwrap(), Language::Python);
        assert_eq!("R".parse::<Language>().unwrap(), Language::R);
    }

    #[test]
    fn test_parse_unknown_language() {
        let err = "cobol".parse::<Language>().unwrap_err();
        assert_eq!(err, UnknownLanguage("cobol".to_string()));
    }

    #[test]
    fn test_language_serializes_lowercase() {
        assert_eq!(serde_json::to_string(&Language::R).unwrap(), "\"r\"");
    }

    #[test]
    fn test_new_pipeline_with_input() {
        let draft = NewPipeline::new(ProjectId::new(1), "nightly").with_input(DataInterfaceId::new(9));
        assert_eq!(draft.input, Some(DataInterfaceId::new(9)));
    }
}
