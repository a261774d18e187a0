//! Configuration loading and parsing.
//!
//! YAML application configuration and project definition files.

mod builder;
mod error;
mod types;
mod yaml;

pub use builder::{ImportError, ImportedProject, import_project, import_project_file};
pub use error::ConfigError;
pub use types::{
    AppConfig, BackendConfig, CollaboratorConfig, DataInterfaceConfig, DispatcherConfig,
    PipelineConfig, ProjectConfig, ScheduleConfig, StepConfig, StorageConfig,
};
pub use yaml::YamlLoader;
