//! YAML configuration parsing.
//!
//! Parses the application configuration and project definition files.

use std::collections::HashSet;
use std::path::Path;

use super::error::ConfigError;
use super::types::{AppConfig, ProjectConfig};
use crate::backend::BackendKind;
use crate::core::pipeline::Language;
use crate::core::schedule::ScheduleDraft;
use crate::core::types::PipelineId;

/// YAML configuration loader.
pub struct YamlLoader;

impl YamlLoader {
    /// Load the application configuration. A missing file yields defaults.
    pub fn load_app_config(path: impl AsRef<Path>) -> Result<AppConfig, ConfigError> {
        let path = path.as_ref();
        if !path.exists() {
            tracing::debug!(path = %path.display(), "No config file, using defaults");
            return Ok(AppConfig::default());
        }

        let content = read_file(path)?;
        let config: AppConfig =
            serde_yaml::from_str(&content).map_err(|source| ConfigError::YamlFileError {
                path: path.to_path_buf(),
                source,
            })?;
        Self::validate_app_config(&config)?;
        Ok(config)
    }

    /// Parse the application configuration from a YAML string.
    pub fn parse_app_config(yaml: &str) -> Result<AppConfig, ConfigError> {
        let config: AppConfig = serde_yaml::from_str(yaml)?;
        Self::validate_app_config(&config)?;
        Ok(config)
    }

    fn validate_app_config(config: &AppConfig) -> Result<(), ConfigError> {
        config.backend.kind.parse::<BackendKind>()?;
        for (language, argv) in &config.backend.interpreters {
            language
                .parse::<Language>()
                .map_err(|e| ConfigError::InvalidConfig(format!("interpreters: {}", e)))?;
            if argv.is_empty() {
                return Err(ConfigError::InvalidConfig(format!(
                    "interpreters: empty command for {}",
                    language
                )));
            }
        }
        if config.dispatcher.tick_interval_secs == 0 {
            return Err(ConfigError::InvalidConfig(
                "dispatcher.tick_interval_secs cannot be zero".into(),
            ));
        }
        if config.backend.script_timeout_secs == Some(0) {
            return Err(ConfigError::InvalidConfig(
                "backend.script_timeout_secs cannot be zero".into(),
            ));
        }
        Ok(())
    }

    /// Load a project definition and read its script files.
    ///
    /// `script_file` paths are resolved relative to the definition file.
    pub fn load_project_config(path: impl AsRef<Path>) -> Result<ProjectConfig, ConfigError> {
        let path = path.as_ref();
        let content = read_file(path)?;
        let mut config: ProjectConfig =
            serde_yaml::from_str(&content).map_err(|source| ConfigError::YamlFileError {
                path: path.to_path_buf(),
                source,
            })?;
        Self::validate_project_config(&config)?;

        let base_dir = path.parent().unwrap_or(Path::new("."));
        Self::resolve_scripts(&mut config, base_dir)?;
        Ok(config)
    }

    /// Parse a project definition from a YAML string.
    ///
    /// Script files are not read; see [`YamlLoader::resolve_scripts`].
    pub fn parse_project_config(yaml: &str) -> Result<ProjectConfig, ConfigError> {
        let config: ProjectConfig = serde_yaml::from_str(yaml)?;
        Self::validate_project_config(&config)?;
        Ok(config)
    }

    /// Replace every `script_file` with the file's contents.
    pub fn resolve_scripts(config: &mut ProjectConfig, base_dir: &Path) -> Result<(), ConfigError> {
        for pipeline in &mut config.pipelines {
            for step in &mut pipeline.steps {
                if let Some(file) = step.script_file.take() {
                    let full = base_dir.join(&file);
                    step.script = Some(read_file(&full)?);
                }
            }
        }
        Ok(())
    }

    /// Validate a project definition.
    fn validate_project_config(config: &ProjectConfig) -> Result<(), ConfigError> {
        if config.name.trim().is_empty() {
            return Err(ConfigError::MissingField("name".into()));
        }
        if config.owner.trim().is_empty() {
            return Err(ConfigError::MissingField("owner".into()));
        }

        let mut users = HashSet::from([config.owner.as_str()]);
        for collaborator in &config.collaborators {
            if !users.insert(collaborator.user.as_str()) {
                return Err(ConfigError::InvalidConfig(format!(
                    "duplicate collaborator: {}",
                    collaborator.user
                )));
            }
        }

        let mut interfaces = HashSet::new();
        for interface in &config.data_interfaces {
            if !interfaces.insert(interface.name.as_str()) {
                return Err(ConfigError::InvalidConfig(format!(
                    "duplicate data interface: {}",
                    interface.name
                )));
            }
        }

        let mut used_inputs = HashSet::new();
        for pipeline in &config.pipelines {
            if pipeline.name.trim().is_empty() {
                return Err(ConfigError::MissingField("pipelines.name".into()));
            }

            if let Some(input) = &pipeline.input {
                if !interfaces.contains(input.as_str()) {
                    return Err(ConfigError::InvalidConfig(format!(
                        "pipeline '{}' uses unknown data interface '{}'",
                        pipeline.name, input
                    )));
                }
                if !used_inputs.insert(input.as_str()) {
                    return Err(ConfigError::InvalidConfig(format!(
                        "data interface '{}' is the input of more than one pipeline",
                        input
                    )));
                }
            }

            let mut orders = HashSet::new();
            for (index, step) in pipeline.steps.iter().enumerate() {
                match (&step.script, &step.script_file) {
                    (Some(_), None) | (None, Some(_)) => {}
                    _ => {
                        return Err(ConfigError::InvalidConfig(format!(
                            "step '{}' in pipeline '{}' needs exactly one of script and script_file",
                            step.name, pipeline.name
                        )));
                    }
                }
                let order = step.order_at(index);
                if !orders.insert(order) {
                    return Err(ConfigError::InvalidConfig(format!(
                        "pipeline '{}' has more than one step with order {}",
                        pipeline.name, order
                    )));
                }
            }

            if let Some(schedule) = &pipeline.schedule {
                ScheduleDraft {
                    pipeline_id: PipelineId::new(0),
                    start_date: schedule.start_date,
                    start_time: schedule.start_time,
                    time_zone: schedule.time_zone.clone(),
                    interval: schedule.every,
                    unit: schedule.unit,
                    published: schedule.published,
                }
                .validate()
                .map_err(|e| {
                    ConfigError::InvalidConfig(format!(
                        "schedule of pipeline '{}': {}",
                        pipeline.name, e
                    ))
                })?;
            }
        }

        Ok(())
    }
}

fn read_file(path: &Path) -> Result<String, ConfigError> {
    std::fs::read_to_string(path).map_err(|source| ConfigError::FileReadError {
        path: path.to_path_buf(),
        source,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::StorageConfig;
    use crate::core::schedule::IntervalUnit;
    use std::io::Write;
    use tempfile::TempDir;

    const PROJECT: &str = r#"
name: sales
description: Daily sales load
owner: alice
collaborators:
  - user: bob
data_interfaces:
  - name: orders
    connection_string: postgres://db/sales
    sql_query: SELECT * FROM orders
pipelines:
  - name: load orders
    input: orders
    steps:
      - name: extract
        language: python
        script: print("extract")
      - name: report
        language: r
        script: cat("report")
    schedule:
      start_date: 2024-03-01
      start_time: "06:30:00"
      time_zone: Europe/Berlin
      every: 1
      unit: days
"#;

    #[test]
    fn test_parse_full_app_config() {
        let yaml = r#"
backend:
  kind: fake
  script_timeout_secs: 600
  fake_seed: 9
  interpreters:
    python: ["python3", "-u"]
storage:
  type: sqlite
  path: etlman.db
dispatcher:
  tick_interval_secs: 5
"#;
        let config = YamlLoader::parse_app_config(yaml).unwrap();
        assert_eq!(config.backend.kind, "fake");
        assert_eq!(config.backend.script_timeout_secs, Some(600));
        assert_eq!(config.backend.fake_seed, 9);
        assert_eq!(config.backend.interpreters["python"], vec!["python3", "-u"]);
        assert_eq!(
            config.storage,
            StorageConfig::Sqlite {
                path: "etlman.db".into()
            }
        );
        assert_eq!(config.dispatcher.tick_interval_secs, 5);
        assert_eq!(config.dispatcher.shutdown_timeout_secs, 30);
    }

    #[test]
    fn test_empty_app_config_uses_defaults() {
        let config = YamlLoader::parse_app_config("{}").unwrap();
        assert_eq!(config.backend.kind, "subprocess");
        assert_eq!(config.backend.script_timeout_secs, None);
        assert_eq!(
            config.storage,
            StorageConfig::Sqlite {
                path: "etlman.db".into()
            }
        );
        assert_eq!(config.dispatcher.tick_interval_secs, 1);
    }

    #[test]
    fn test_memory_storage_selected_explicitly() {
        let config = YamlLoader::parse_app_config("storage:\n  type: memory\n").unwrap();
        assert_eq!(config.storage, StorageConfig::Memory);
    }

    #[test]
    fn test_missing_app_config_file_uses_defaults() {
        let dir = TempDir::new().unwrap();
        let config = YamlLoader::load_app_config(dir.path().join("etlman.yaml")).unwrap();
        assert_eq!(config.storage, StorageConfig::default());
        assert!(matches!(config.storage, StorageConfig::Sqlite { .. }));
    }

    #[test]
    fn test_unknown_backend_rejected_at_load() {
        let result = YamlLoader::parse_app_config("backend:\n  kind: celery\n");
        match result {
            Err(ConfigError::UnsupportedBackend(kind)) => assert_eq!(kind, "celery"),
            other => panic!("Expected UnsupportedBackend, got {:?}", other),
        }

        let dir = TempDir::new().unwrap();
        let path = dir.path().join("etlman.yaml");
        std::fs::write(&path, "backend:\n  kind: celery\n").unwrap();
        assert!(matches!(
            YamlLoader::load_app_config(&path),
            Err(ConfigError::UnsupportedBackend(_))
        ));
    }

    #[test]
    fn test_unknown_interpreter_language_rejected_at_load() {
        let yaml = "backend:\n  interpreters:\n    julia: [\"julia\"]\n";
        assert!(matches!(
            YamlLoader::parse_app_config(yaml),
            Err(ConfigError::InvalidConfig(_))
        ));
    }

    #[test]
    fn test_zero_tick_interval_rejected() {
        let result = YamlLoader::parse_app_config("dispatcher:\n  tick_interval_secs: 0\n");
        assert!(matches!(result, Err(ConfigError::InvalidConfig(_))));
    }

    #[test]
    fn test_malformed_app_config_file_reports_path() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("etlman.yaml");
        std::fs::write(&path, "backend: [unclosed").unwrap();

        match YamlLoader::load_app_config(&path) {
            Err(ConfigError::YamlFileError { path: p, .. }) => assert_eq!(p, path),
            other => panic!("Expected YamlFileError, got {:?}", other),
        }
    }

    #[test]
    fn test_parse_project_config() {
        let config = YamlLoader::parse_project_config(PROJECT).unwrap();
        assert_eq!(config.name, "sales");
        assert_eq!(config.collaborators[0].role, "member");

        let pipeline = &config.pipelines[0];
        assert_eq!(pipeline.input.as_deref(), Some("orders"));
        assert_eq!(pipeline.steps[1].language, Language::R);
        assert_eq!(pipeline.steps[1].order_at(1), 1);

        let schedule = pipeline.schedule.as_ref().unwrap();
        assert_eq!(schedule.unit, IntervalUnit::Days);
        assert!(schedule.published);
    }

    #[test]
    fn test_unknown_language_rejected() {
        let yaml = r#"
name: p
owner: alice
pipelines:
  - name: x
    steps:
      - name: s
        language: cobol
        script: DISPLAY 'HI'
"#;
        assert!(YamlLoader::parse_project_config(yaml).is_err());
    }

    #[test]
    fn test_duplicate_step_order_rejected() {
        let yaml = r#"
name: p
owner: alice
pipelines:
  - name: x
    steps:
      - name: a
        language: python
        script: "1"
        order: 1
      - name: b
        language: python
        script: "2"
"#;
        let result = YamlLoader::parse_project_config(yaml);
        match result {
            Err(ConfigError::InvalidConfig(msg)) => assert!(msg.contains("order 1")),
            other => panic!("Expected InvalidConfig, got {:?}", other),
        }
    }

    #[test]
    fn test_unknown_input_rejected() {
        let yaml = r#"
name: p
owner: alice
pipelines:
  - name: x
    input: nowhere
"#;
        assert!(matches!(
            YamlLoader::parse_project_config(yaml),
            Err(ConfigError::InvalidConfig(_))
        ));
    }

    #[test]
    fn test_shared_input_rejected() {
        let yaml = r#"
name: p
owner: alice
data_interfaces:
  - name: src
    connection_string: sqlite://x
    sql_query: SELECT 1
pipelines:
  - name: a
    input: src
  - name: b
    input: src
"#;
        assert!(matches!(
            YamlLoader::parse_project_config(yaml),
            Err(ConfigError::InvalidConfig(_))
        ));
    }

    #[test]
    fn test_invalid_schedule_rejected() {
        let bad_zone = PROJECT.replace("Europe/Berlin", "Europe/Atlantis");
        assert!(matches!(
            YamlLoader::parse_project_config(&bad_zone),
            Err(ConfigError::InvalidConfig(_))
        ));

        let zero = PROJECT.replace("every: 1", "every: 0");
        assert!(matches!(
            YamlLoader::parse_project_config(&zero),
            Err(ConfigError::InvalidConfig(_))
        ));
    }

    #[test]
    fn test_step_needs_exactly_one_script_source() {
        let yaml = r#"
name: p
owner: alice
pipelines:
  - name: x
    steps:
      - name: a
        language: python
"#;
        assert!(matches!(
            YamlLoader::parse_project_config(yaml),
            Err(ConfigError::InvalidConfig(_))
        ));
    }

    #[test]
    fn test_missing_owner_rejected() {
        let yaml = "name: p\nowner: \"\"\n";
        match YamlLoader::parse_project_config(yaml) {
            Err(ConfigError::MissingField(field)) => assert_eq!(field, "owner"),
            other => panic!("Expected MissingField, got {:?}", other),
        }
    }

    #[test]
    fn test_load_project_reads_script_files() {
        let dir = TempDir::new().unwrap();
        std::fs::create_dir(dir.path().join("scripts")).unwrap();
        let mut script = std::fs::File::create(dir.path().join("scripts/load.py")).unwrap();
        writeln!(script, "print('from file')").unwrap();

        let path = dir.path().join("project.yaml");
        std::fs::write(
            &path,
            r#"
name: p
owner: alice
pipelines:
  - name: x
    steps:
      - name: load
        language: python
        script_file: scripts/load.py
"#,
        )
        .unwrap();

        let config = YamlLoader::load_project_config(&path).unwrap();
        let step = &config.pipelines[0].steps[0];
        assert_eq!(step.script.as_deref(), Some("print('from file')\n"));
        assert!(step.script_file.is_none());
    }

    #[test]
    fn test_load_project_missing_script_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("project.yaml");
        std::fs::write(
            &path,
            r#"
name: p
owner: alice
pipelines:
  - name: x
    steps:
      - name: load
        language: python
        script_file: missing.py
"#,
        )
        .unwrap();

        assert!(matches!(
            YamlLoader::load_project_config(&path),
            Err(ConfigError::FileReadError { .. })
        ));
    }
}
