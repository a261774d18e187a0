//! Project import integration tests.
//!
//! Imports definition files from disk into SQLite and runs the result.

use etlman::{
    ConfigError, ImportError, IntervalUnit, Language, PipelineRunner, Storage,
    import_project_file,
};
use std::sync::Arc;
use tempfile::TempDir;

use crate::common::sqlite_storage;

fn write_definition(dir: &TempDir, yaml: &str) -> std::path::PathBuf {
    let path = dir.path().join("project.yaml");
    std::fs::write(&path, yaml).unwrap();
    path
}

#[cfg(unix)]
#[tokio::test]
async fn test_import_then_run_from_script_files() {
    let (storage, _db_dir) = sqlite_storage().await;
    let dir = TempDir::new().unwrap();
    std::fs::create_dir(dir.path().join("scripts")).unwrap();
    std::fs::write(dir.path().join("scripts/extract.sh"), "echo extracted\n").unwrap();

    let path = write_definition(
        &dir,
        r#"
name: inventory
owner: carol
data_interfaces:
  - name: stock
    connection_string: mysql://warehouse/stock
    sql_query: SELECT sku, qty FROM stock
pipelines:
  - name: refresh
    input: stock
    steps:
      - name: extract
        language: python
        script_file: scripts/extract.sh
      - name: check
        language: r
        script: |
          echo checking >&2
          exit 2
    schedule:
      start_date: 2024-02-01
      start_time: "03:00:00"
      time_zone: Europe/London
      every: 12
      unit: hours
      published: false
"#,
    );

    let imported = import_project_file(&storage, &path).await.unwrap();
    assert_eq!(imported.project.name, "inventory");
    assert_eq!(imported.schedules, 1);
    let pipeline = &imported.pipelines[0];

    let steps = storage.list_steps(pipeline.id).await.unwrap();
    assert_eq!(steps.len(), 2);
    assert_eq!(steps[0].script, "echo extracted\n");
    assert_eq!(steps[1].language, Language::R);

    let schedule = storage.get_schedule(pipeline.id).await.unwrap();
    assert_eq!(schedule.unit, IntervalUnit::Hours);
    assert!(!schedule.published);
    let trigger = storage
        .get_trigger(schedule.trigger_id.unwrap())
        .await
        .unwrap();
    assert!(!trigger.enabled);

    let run = PipelineRunner::new(Arc::clone(&storage))
        .run(pipeline.id, &crate::common::sh_backend())
        .await
        .unwrap();
    assert_eq!(run.output.steps[0].stdout.trim(), "extracted");
    assert_eq!(run.output.steps[1].returncode, 2);
    assert_eq!(run.output.steps[1].stderr.trim(), "checking");

    storage.close().await;
}

#[tokio::test]
async fn test_invalid_definition_imports_nothing() {
    let (storage, _db_dir) = sqlite_storage().await;
    let dir = TempDir::new().unwrap();
    let path = write_definition(
        &dir,
        r#"
name: bad
owner: carol
pipelines:
  - name: twice
    steps:
      - name: a
        language: python
        script: print(1)
        order: 0
      - name: b
        language: python
        script: print(2)
        order: 0
"#,
    );

    let result = import_project_file(&storage, &path).await;

    assert!(matches!(
        result,
        Err(ImportError::Config(ConfigError::InvalidConfig(_)))
    ));
    assert!(storage.list_projects().await.unwrap().is_empty());

    storage.close().await;
}

#[tokio::test]
async fn test_missing_definition_file() {
    let (storage, _db_dir) = sqlite_storage().await;

    let result = import_project_file(&storage, "/nonexistent/project.yaml").await;

    assert!(matches!(
        result,
        Err(ImportError::Config(ConfigError::FileReadError { .. }))
    ));

    storage.close().await;
}
