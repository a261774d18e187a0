//! Configuration types.
//!
//! [`AppConfig`] is the application configuration (`etlman.yaml`).
//! [`ProjectConfig`] describes a project to import: its data interfaces,
//! pipelines, steps and schedules.

use chrono::{NaiveDate, NaiveTime};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

use crate::core::pipeline::Language;
use crate::core::project::InterfaceType;
use crate::core::schedule::IntervalUnit;

/// Application configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub backend: BackendConfig,
    pub storage: StorageConfig,
    pub dispatcher: DispatcherConfig,
}

/// Script backend selection and settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BackendConfig {
    /// `subprocess` or `fake`.
    pub kind: String,
    /// Kill scripts running longer than this. No limit when unset.
    pub script_timeout_secs: Option<u64>,
    /// Seed for the fake backend.
    pub fake_seed: u64,
    /// Interpreter command per language, replacing the built-in table.
    pub interpreters: HashMap<String, Vec<String>>,
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            kind: "subprocess".to_string(),
            script_timeout_secs: None,
            fake_seed: 0,
            interpreters: HashMap::new(),
        }
    }
}

/// Database file used when no storage is configured.
const DEFAULT_DATABASE_PATH: &str = "etlman.db";

/// Storage configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum StorageConfig {
    /// In-memory storage (non-persistent).
    #[serde(rename = "memory")]
    Memory,
    /// SQLite storage (default).
    #[serde(rename = "sqlite")]
    Sqlite {
        /// Path to the database file.
        path: String,
    },
}

impl Default for StorageConfig {
    fn default() -> Self {
        StorageConfig::Sqlite {
            path: DEFAULT_DATABASE_PATH.to_string(),
        }
    }
}

/// Dispatcher settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DispatcherConfig {
    /// How often due triggers are checked.
    pub tick_interval_secs: u64,
    /// How long shutdown waits for in-flight runs.
    pub shutdown_timeout_secs: u64,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            tick_interval_secs: 1,
            shutdown_timeout_secs: 30,
        }
    }
}

impl DispatcherConfig {
    pub fn tick_interval(&self) -> Duration {
        Duration::from_secs(self.tick_interval_secs)
    }

    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_secs(self.shutdown_timeout_secs)
    }
}

/// A project definition file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProjectConfig {
    pub name: String,
    #[serde(default)]
    pub description: String,
    /// Recorded as the project's admin.
    pub owner: String,
    /// Additional collaborators.
    #[serde(default)]
    pub collaborators: Vec<CollaboratorConfig>,
    #[serde(default)]
    pub data_interfaces: Vec<DataInterfaceConfig>,
    #[serde(default)]
    pub pipelines: Vec<PipelineConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CollaboratorConfig {
    pub user: String,
    #[serde(default = "default_role")]
    pub role: String,
}

fn default_role() -> String {
    "member".to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DataInterfaceConfig {
    /// Unique within the project; pipelines refer to it by this name.
    pub name: String,
    #[serde(rename = "type", default = "default_interface_type")]
    pub interface_type: InterfaceType,
    pub connection_string: String,
    pub sql_query: String,
}

fn default_interface_type() -> InterfaceType {
    InterfaceType::Database
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    pub name: String,
    /// Name of the data interface feeding this pipeline.
    pub input: Option<String>,
    #[serde(default)]
    pub steps: Vec<StepConfig>,
    pub schedule: Option<ScheduleConfig>,
}

/// A step. Exactly one of `script` and `script_file` must be set.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepConfig {
    pub name: String,
    pub language: Language,
    /// Inline script text.
    pub script: Option<String>,
    /// Script path, relative to the definition file.
    pub script_file: Option<PathBuf>,
    /// Position in the pipeline. Defaults to the step's index in the list.
    pub order: Option<u32>,
}

impl StepConfig {
    /// Effective step order given the step's index.
    pub fn order_at(&self, index: usize) -> u32 {
        self.order.unwrap_or(index as u32)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScheduleConfig {
    /// Local start date, `YYYY-MM-DD`.
    pub start_date: NaiveDate,
    /// Local start time, `HH:MM:SS`.
    pub start_time: NaiveTime,
    #[serde(default = "default_time_zone")]
    pub time_zone: String,
    pub every: u32,
    pub unit: IntervalUnit,
    #[serde(default = "default_true")]
    pub published: bool,
}

fn default_time_zone() -> String {
    "UTC".to_string()
}

fn default_true() -> bool {
    true
}
