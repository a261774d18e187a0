//! Common test utilities shared across integration tests.

use etlman::{
    Language, NewPipeline, NewProject, NewStep, PipelineId, SqliteStorage, Storage,
    SubprocessBackend,
};
use std::sync::Arc;
use tempfile::TempDir;

/// Backend that runs both languages through `sh`, so the process plumbing
/// is exercised without Python or R installed.
pub fn sh_backend() -> SubprocessBackend {
    SubprocessBackend::new()
        .with_interpreter(Language::Python, ["sh"])
        .with_interpreter(Language::R, ["sh"])
}

/// SQLite storage in a fresh temporary directory.
///
/// Keep the returned directory alive for as long as the storage is used.
pub async fn sqlite_storage() -> (Arc<SqliteStorage>, TempDir) {
    let dir = TempDir::new().unwrap();
    let storage = SqliteStorage::new(dir.path().join("etlman.db"))
        .await
        .unwrap();
    (Arc::new(storage), dir)
}

/// Create a project and a pipeline with the given scripts, ordered 0, 1, ...
pub async fn create_pipeline<S: Storage>(
    storage: &S,
    name: &str,
    scripts: &[(Language, &str)],
) -> PipelineId {
    let project = storage
        .create_project(NewProject::new(format!("{} project", name), ""), "tester")
        .await
        .unwrap();
    let pipeline = storage
        .create_pipeline(NewPipeline::new(project.id, name))
        .await
        .unwrap();
    for (order, (language, script)) in scripts.iter().enumerate() {
        storage
            .create_step(NewStep::new(
                pipeline.id,
                format!("step {}", order),
                *language,
                *script,
                order as u32,
            ))
            .await
            .unwrap();
    }
    pipeline.id
}
