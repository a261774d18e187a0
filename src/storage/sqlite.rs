//! SQLite storage implementation.
//!
//! Provides persistent storage using SQLite database. Foreign keys are
//! enabled on every connection so deletes cascade the way the schema
//! declares.

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, NaiveTime, SecondsFormat, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use std::path::Path;
use std::str::FromStr;

use super::{Storage, StorageError};
use crate::core::pipeline::{Language, NewPipeline, NewStep, Pipeline, Step};
use crate::core::project::{
    Collaborator, DataInterface, InterfaceType, NewDataInterface, NewProject, Project, ROLE_ADMIN,
};
use crate::core::run::{NewPipelineRun, PipelineRun, RunOutput};
use crate::core::schedule::{
    IntervalSchedule, IntervalUnit, PeriodicTrigger, PipelineSchedule, ScheduleDraft,
};
use crate::core::types::{
    DataInterfaceId, IntervalScheduleId, PipelineId, ProjectId, RunId, ScheduleId, StepId,
    TriggerId,
};
use crate::scheduling::TriggerSpec;

/// SQLite storage backend.
///
/// Provides persistent storage with automatic schema migration.
pub struct SqliteStorage {
    pool: SqlitePool,
}

impl SqliteStorage {
    /// Create a new SQLite storage with the given database path.
    ///
    /// Creates the database file if it doesn't exist and runs migrations.
    pub async fn new(path: impl AsRef<Path>) -> Result<Self, StorageError> {
        let path_str = path.as_ref().to_string_lossy();
        let options = SqliteConnectOptions::from_str(&format!("sqlite:{}", path_str))
            .map_err(|e| StorageError::Other(e.to_string()))?
            .create_if_missing(true)
            .foreign_keys(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await
            .map_err(|e| StorageError::Other(e.to_string()))?;

        let storage = Self { pool };
        storage.run_migrations().await?;
        Ok(storage)
    }

    /// Create an in-memory SQLite database (useful for testing).
    pub async fn in_memory() -> Result<Self, StorageError> {
        let options = SqliteConnectOptions::from_str("sqlite::memory:")
            .map_err(|e| StorageError::Other(e.to_string()))?
            .foreign_keys(true);

        // A single connection that is never recycled: each connection to
        // `:memory:` is a separate database.
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(options)
            .await
            .map_err(|e| StorageError::Other(e.to_string()))?;

        let storage = Self { pool };
        storage.run_migrations().await?;
        Ok(storage)
    }

    /// Run database migrations.
    async fn run_migrations(&self) -> Result<(), StorageError> {
        let schema = include_str!("../../migrations/001_initial_schema.sql");
        sqlx::raw_sql(schema)
            .execute(&self.pool)
            .await
            .map_err(|e| StorageError::Other(format!("migration failed: {}", e)))?;
        Ok(())
    }

    /// Close the database connection pool.
    pub async fn close(&self) {
        self.pool.close().await;
    }

    async fn ensure_pipeline(&self, id: PipelineId) -> Result<(), StorageError> {
        let found: Option<i64> = sqlx::query_scalar("SELECT id FROM pipelines WHERE id = ?")
            .bind(id.get())
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| StorageError::Other(e.to_string()))?;
        found
            .map(|_| ())
            .ok_or_else(|| StorageError::NotFound(format!("pipeline: {}", id)))
    }
}

// Helper functions for column conversion
fn time_to_string(time: DateTime<Utc>) -> String {
    time.to_rfc3339_opts(SecondsFormat::Nanos, true)
}

fn string_to_time(s: &str) -> Result<DateTime<Utc>, StorageError> {
    DateTime::parse_from_rfc3339(s)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| StorageError::SerializationError(format!("invalid timestamp '{}': {}", s, e)))
}

fn parse_column<T>(value: &str, column: &str) -> Result<T, StorageError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    value
        .parse()
        .map_err(|e| StorageError::SerializationError(format!("{}: {}", column, e)))
}

/// Map a failed write: unique violations become `DuplicateKey`, missing
/// parents become `NotFound`.
fn write_error(e: sqlx::Error, key: String) -> StorageError {
    match e {
        sqlx::Error::Database(db) if db.is_unique_violation() => StorageError::DuplicateKey(key),
        sqlx::Error::Database(db) if db.is_foreign_key_violation() => {
            StorageError::NotFound(format!("referenced row for {}", key))
        }
        e => StorageError::Other(e.to_string()),
    }
}

type ProjectRow = (i64, String, String, String);
type InterfaceRow = (i64, i64, String, String, String, String);
type PipelineRow = (i64, i64, String, Option<i64>, String);
type StepRow = (i64, i64, String, String, String, i64);
type ScheduleRow = (i64, i64, String, String, String, i64, String, bool, Option<i64>);
type TriggerRow = (
    i64,
    String,
    String,
    i64,
    i64,
    i64,
    String,
    String,
    bool,
    Option<String>,
);
type RunRow = (i64, i64, String, String, String);

const TRIGGER_COLUMNS: &str = "SELECT t.id, t.name, t.task, t.pipeline_id, t.interval_id, i.every, i.period, t.start_time, t.enabled, t.last_run_at \
     FROM periodic_triggers t JOIN interval_schedules i ON i.id = t.interval_id";

fn project_from_row(row: ProjectRow) -> Result<Project, StorageError> {
    Ok(Project {
        id: ProjectId::new(row.0),
        name: row.1,
        description: row.2,
        created_at: string_to_time(&row.3)?,
    })
}

fn interface_from_row(row: InterfaceRow) -> Result<DataInterface, StorageError> {
    Ok(DataInterface {
        id: DataInterfaceId::new(row.0),
        project_id: ProjectId::new(row.1),
        name: row.2,
        interface_type: parse_column::<InterfaceType>(&row.3, "interface_type")?,
        connection_string: row.4,
        sql_query: row.5,
    })
}

fn pipeline_from_row(row: PipelineRow) -> Result<Pipeline, StorageError> {
    Ok(Pipeline {
        id: PipelineId::new(row.0),
        project_id: ProjectId::new(row.1),
        name: row.2,
        input: row.3.map(DataInterfaceId::new),
        created_at: string_to_time(&row.4)?,
    })
}

fn step_from_row(row: StepRow) -> Result<Step, StorageError> {
    Ok(Step {
        id: StepId::new(row.0),
        pipeline_id: PipelineId::new(row.1),
        name: row.2,
        language: parse_column::<Language>(&row.3, "language")?,
        script: row.4,
        step_order: row.5 as u32,
    })
}

fn schedule_from_row(row: ScheduleRow) -> Result<PipelineSchedule, StorageError> {
    Ok(PipelineSchedule {
        id: ScheduleId::new(row.0),
        pipeline_id: PipelineId::new(row.1),
        start_date: parse_column::<NaiveDate>(&row.2, "start_date")?,
        start_time: parse_column::<NaiveTime>(&row.3, "start_time")?,
        time_zone: row.4,
        interval: row.5 as u32,
        unit: parse_column::<IntervalUnit>(&row.6, "unit")?,
        published: row.7,
        trigger_id: row.8.map(TriggerId::new),
    })
}

fn trigger_from_row(row: TriggerRow) -> Result<PeriodicTrigger, StorageError> {
    Ok(PeriodicTrigger {
        id: TriggerId::new(row.0),
        name: row.1,
        task: row.2,
        pipeline_id: PipelineId::new(row.3),
        interval: IntervalSchedule {
            id: IntervalScheduleId::new(row.4),
            every: row.5 as u32,
            period: parse_column::<IntervalUnit>(&row.6, "period")?,
        },
        start_time: string_to_time(&row.7)?,
        enabled: row.8,
        last_run_at: row.9.as_deref().map(string_to_time).transpose()?,
    })
}

fn run_from_row(row: RunRow) -> Result<PipelineRun, StorageError> {
    let output: RunOutput = serde_json::from_str(&row.4)
        .map_err(|e| StorageError::SerializationError(format!("run output: {}", e)))?;
    Ok(PipelineRun {
        id: RunId::new(row.0),
        pipeline_id: PipelineId::new(row.1),
        started_at: string_to_time(&row.2)?,
        ended_at: string_to_time(&row.3)?,
        output,
    })
}

#[async_trait]
impl Storage for SqliteStorage {
    async fn create_project(
        &self,
        project: NewProject,
        owner: &str,
    ) -> Result<Project, StorageError> {
        let created_at = Utc::now();
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| StorageError::Other(e.to_string()))?;

        let id: i64 = sqlx::query_scalar(
            "INSERT INTO projects (name, description, created_at) VALUES (?, ?, ?) RETURNING id",
        )
        .bind(&project.name)
        .bind(&project.description)
        .bind(time_to_string(created_at))
        .fetch_one(&mut *tx)
        .await
        .map_err(|e| write_error(e, format!("project: {}", project.name)))?;

        sqlx::query("INSERT INTO collaborators (project_id, username, role) VALUES (?, ?, ?)")
            .bind(id)
            .bind(owner)
            .bind(ROLE_ADMIN)
            .execute(&mut *tx)
            .await
            .map_err(|e| write_error(e, format!("collaborator: {}/{}", id, owner)))?;

        tx.commit()
            .await
            .map_err(|e| StorageError::Other(e.to_string()))?;

        Ok(Project {
            id: ProjectId::new(id),
            name: project.name,
            description: project.description,
            created_at,
        })
    }

    async fn get_project(&self, id: ProjectId) -> Result<Project, StorageError> {
        let row: ProjectRow =
            sqlx::query_as("SELECT id, name, description, created_at FROM projects WHERE id = ?")
                .bind(id.get())
                .fetch_optional(&self.pool)
                .await
                .map_err(|e| StorageError::Other(e.to_string()))?
                .ok_or_else(|| StorageError::NotFound(format!("project: {}", id)))?;
        project_from_row(row)
    }

    async fn list_projects(&self) -> Result<Vec<Project>, StorageError> {
        let rows: Vec<ProjectRow> =
            sqlx::query_as("SELECT id, name, description, created_at FROM projects ORDER BY id")
                .fetch_all(&self.pool)
                .await
                .map_err(|e| StorageError::Other(e.to_string()))?;
        rows.into_iter().map(project_from_row).collect()
    }

    async fn delete_project(&self, id: ProjectId) -> Result<(), StorageError> {
        let result = sqlx::query("DELETE FROM projects WHERE id = ?")
            .bind(id.get())
            .execute(&self.pool)
            .await
            .map_err(|e| StorageError::Other(e.to_string()))?;

        if result.rows_affected() == 0 {
            return Err(StorageError::NotFound(format!("project: {}", id)));
        }
        Ok(())
    }

    async fn add_collaborator(&self, collaborator: Collaborator) -> Result<(), StorageError> {
        sqlx::query("INSERT INTO collaborators (project_id, username, role) VALUES (?, ?, ?)")
            .bind(collaborator.project_id.get())
            .bind(&collaborator.user)
            .bind(&collaborator.role)
            .execute(&self.pool)
            .await
            .map_err(|e| {
                write_error(
                    e,
                    format!(
                        "collaborator: {}/{}",
                        collaborator.project_id, collaborator.user
                    ),
                )
            })?;
        Ok(())
    }

    async fn list_collaborators(
        &self,
        project: ProjectId,
    ) -> Result<Vec<Collaborator>, StorageError> {
        let rows: Vec<(i64, String, String)> = sqlx::query_as(
            "SELECT project_id, username, role FROM collaborators WHERE project_id = ? ORDER BY username",
        )
        .bind(project.get())
        .fetch_all(&self.pool)
        .await
        .map_err(|e| StorageError::Other(e.to_string()))?;

        Ok(rows
            .into_iter()
            .map(|row| Collaborator {
                project_id: ProjectId::new(row.0),
                user: row.1,
                role: row.2,
            })
            .collect())
    }

    async fn is_collaborator(&self, project: ProjectId, user: &str) -> Result<bool, StorageError> {
        let count: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM collaborators WHERE project_id = ? AND username = ?",
        )
        .bind(project.get())
        .bind(user)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| StorageError::Other(e.to_string()))?;
        Ok(count > 0)
    }

    async fn create_data_interface(
        &self,
        interface: NewDataInterface,
    ) -> Result<DataInterface, StorageError> {
        let id: i64 = sqlx::query_scalar(
            r#"
            INSERT INTO data_interfaces (project_id, name, interface_type, connection_string, sql_query)
            VALUES (?, ?, ?, ?, ?)
            RETURNING id
            "#,
        )
        .bind(interface.project_id.get())
        .bind(&interface.name)
        .bind(interface.interface_type.as_str())
        .bind(&interface.connection_string)
        .bind(&interface.sql_query)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| write_error(e, format!("data interface: {}", interface.name)))?;

        Ok(DataInterface {
            id: DataInterfaceId::new(id),
            project_id: interface.project_id,
            name: interface.name,
            interface_type: interface.interface_type,
            connection_string: interface.connection_string,
            sql_query: interface.sql_query,
        })
    }

    async fn get_data_interface(
        &self,
        id: DataInterfaceId,
    ) -> Result<DataInterface, StorageError> {
        let row: InterfaceRow = sqlx::query_as(
            "SELECT id, project_id, name, interface_type, connection_string, sql_query FROM data_interfaces WHERE id = ?",
        )
        .bind(id.get())
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| StorageError::Other(e.to_string()))?
        .ok_or_else(|| StorageError::NotFound(format!("data interface: {}", id)))?;
        interface_from_row(row)
    }

    async fn list_data_interfaces(
        &self,
        project: ProjectId,
    ) -> Result<Vec<DataInterface>, StorageError> {
        let rows: Vec<InterfaceRow> = sqlx::query_as(
            "SELECT id, project_id, name, interface_type, connection_string, sql_query FROM data_interfaces WHERE project_id = ? ORDER BY id",
        )
        .bind(project.get())
        .fetch_all(&self.pool)
        .await
        .map_err(|e| StorageError::Other(e.to_string()))?;
        rows.into_iter().map(interface_from_row).collect()
    }

    async fn create_pipeline(&self, pipeline: NewPipeline) -> Result<Pipeline, StorageError> {
        let created_at = Utc::now();
        let id: i64 = sqlx::query_scalar(
            "INSERT INTO pipelines (project_id, name, input_id, created_at) VALUES (?, ?, ?, ?) RETURNING id",
        )
        .bind(pipeline.project_id.get())
        .bind(&pipeline.name)
        .bind(pipeline.input.map(|i| i.get()))
        .bind(time_to_string(created_at))
        .fetch_one(&self.pool)
        .await
        .map_err(|e| match write_error(e, format!("pipeline: {}", pipeline.name)) {
            StorageError::DuplicateKey(_) => StorageError::DuplicateKey(format!(
                "pipeline input: {}",
                pipeline.input.map(|i| i.to_string()).unwrap_or_default()
            )),
            other => other,
        })?;

        Ok(Pipeline {
            id: PipelineId::new(id),
            project_id: pipeline.project_id,
            name: pipeline.name,
            input: pipeline.input,
            created_at,
        })
    }

    async fn get_pipeline(&self, id: PipelineId) -> Result<Pipeline, StorageError> {
        let row: PipelineRow = sqlx::query_as(
            "SELECT id, project_id, name, input_id, created_at FROM pipelines WHERE id = ?",
        )
        .bind(id.get())
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| StorageError::Other(e.to_string()))?
        .ok_or_else(|| StorageError::NotFound(format!("pipeline: {}", id)))?;
        pipeline_from_row(row)
    }

    async fn list_pipelines(&self, project: ProjectId) -> Result<Vec<Pipeline>, StorageError> {
        let rows: Vec<PipelineRow> = sqlx::query_as(
            "SELECT id, project_id, name, input_id, created_at FROM pipelines WHERE project_id = ? ORDER BY id",
        )
        .bind(project.get())
        .fetch_all(&self.pool)
        .await
        .map_err(|e| StorageError::Other(e.to_string()))?;
        rows.into_iter().map(pipeline_from_row).collect()
    }

    async fn delete_pipeline(&self, id: PipelineId) -> Result<(), StorageError> {
        let result = sqlx::query("DELETE FROM pipelines WHERE id = ?")
            .bind(id.get())
            .execute(&self.pool)
            .await
            .map_err(|e| StorageError::Other(e.to_string()))?;

        if result.rows_affected() == 0 {
            return Err(StorageError::NotFound(format!("pipeline: {}", id)));
        }
        Ok(())
    }

    async fn create_step(&self, step: NewStep) -> Result<Step, StorageError> {
        self.ensure_pipeline(step.pipeline_id).await?;
        let id: i64 = sqlx::query_scalar(
            r#"
            INSERT INTO steps (pipeline_id, name, language, script, step_order)
            VALUES (?, ?, ?, ?, ?)
            RETURNING id
            "#,
        )
        .bind(step.pipeline_id.get())
        .bind(&step.name)
        .bind(step.language.as_str())
        .bind(&step.script)
        .bind(i64::from(step.step_order))
        .fetch_one(&self.pool)
        .await
        .map_err(|e| {
            write_error(
                e,
                format!("step order: {}/{}", step.pipeline_id, step.step_order),
            )
        })?;

        Ok(Step {
            id: StepId::new(id),
            pipeline_id: step.pipeline_id,
            name: step.name,
            language: step.language,
            script: step.script,
            step_order: step.step_order,
        })
    }

    async fn update_step(&self, step: Step) -> Result<(), StorageError> {
        let result = sqlx::query(
            r#"
            UPDATE steps SET pipeline_id = ?, name = ?, language = ?, script = ?, step_order = ?
            WHERE id = ?
            "#,
        )
        .bind(step.pipeline_id.get())
        .bind(&step.name)
        .bind(step.language.as_str())
        .bind(&step.script)
        .bind(i64::from(step.step_order))
        .bind(step.id.get())
        .execute(&self.pool)
        .await
        .map_err(|e| {
            write_error(
                e,
                format!("step order: {}/{}", step.pipeline_id, step.step_order),
            )
        })?;

        if result.rows_affected() == 0 {
            return Err(StorageError::NotFound(format!("step: {}", step.id)));
        }
        Ok(())
    }

    async fn delete_step(&self, id: StepId) -> Result<(), StorageError> {
        let result = sqlx::query("DELETE FROM steps WHERE id = ?")
            .bind(id.get())
            .execute(&self.pool)
            .await
            .map_err(|e| StorageError::Other(e.to_string()))?;

        if result.rows_affected() == 0 {
            return Err(StorageError::NotFound(format!("step: {}", id)));
        }
        Ok(())
    }

    async fn list_steps(&self, pipeline: PipelineId) -> Result<Vec<Step>, StorageError> {
        let rows: Vec<StepRow> = sqlx::query_as(
            "SELECT id, pipeline_id, name, language, script, step_order FROM steps WHERE pipeline_id = ? ORDER BY step_order",
        )
        .bind(pipeline.get())
        .fetch_all(&self.pool)
        .await
        .map_err(|e| StorageError::Other(e.to_string()))?;
        rows.into_iter().map(step_from_row).collect()
    }

    async fn next_step_order(&self, pipeline: PipelineId) -> Result<u32, StorageError> {
        self.ensure_pipeline(pipeline).await?;
        let max: Option<i64> =
            sqlx::query_scalar("SELECT MAX(step_order) FROM steps WHERE pipeline_id = ?")
                .bind(pipeline.get())
                .fetch_one(&self.pool)
                .await
                .map_err(|e| StorageError::Other(e.to_string()))?;
        match max {
            None => Ok(0),
            Some(max) => u32::try_from(max)
                .ok()
                .and_then(|max| max.checked_add(1))
                .ok_or_else(|| {
                    StorageError::Other(format!("pipeline {} has no step order left", pipeline))
                }),
        }
    }

    async fn save_schedule(
        &self,
        draft: &ScheduleDraft,
        trigger: &TriggerSpec,
    ) -> Result<PipelineSchedule, StorageError> {
        super::check_trigger_spec(draft, trigger)?;
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| StorageError::Other(e.to_string()))?;

        // Dropping `tx` on any early return rolls everything back.
        let exists: Option<i64> = sqlx::query_scalar("SELECT id FROM pipelines WHERE id = ?")
            .bind(draft.pipeline_id.get())
            .fetch_optional(&mut *tx)
            .await
            .map_err(|e| StorageError::Other(e.to_string()))?;
        if exists.is_none() {
            return Err(StorageError::NotFound(format!(
                "pipeline: {}",
                draft.pipeline_id
            )));
        }

        sqlx::query(
            "INSERT INTO interval_schedules (every, period) VALUES (?, ?) ON CONFLICT (every, period) DO NOTHING",
        )
        .bind(i64::from(trigger.every))
        .bind(trigger.period.as_str())
        .execute(&mut *tx)
        .await
        .map_err(|e| StorageError::Other(e.to_string()))?;

        let interval_id: i64 =
            sqlx::query_scalar("SELECT id FROM interval_schedules WHERE every = ? AND period = ?")
                .bind(i64::from(trigger.every))
                .bind(trigger.period.as_str())
                .fetch_one(&mut *tx)
                .await
                .map_err(|e| StorageError::Other(e.to_string()))?;

        let trigger_id: i64 = sqlx::query_scalar(
            r#"
            INSERT INTO periodic_triggers (name, task, pipeline_id, interval_id, start_time, enabled)
            VALUES (?, ?, ?, ?, ?, ?)
            ON CONFLICT (name) DO UPDATE SET
                task = excluded.task,
                pipeline_id = excluded.pipeline_id,
                interval_id = excluded.interval_id,
                start_time = excluded.start_time,
                enabled = excluded.enabled
            RETURNING id
            "#,
        )
        .bind(&trigger.name)
        .bind(&trigger.task)
        .bind(trigger.pipeline_id.get())
        .bind(interval_id)
        .bind(time_to_string(trigger.start_time))
        .bind(trigger.enabled)
        .fetch_one(&mut *tx)
        .await
        .map_err(|e| write_error(e, format!("trigger: {}", trigger.name)))?;

        let schedule_id: i64 = sqlx::query_scalar(
            r#"
            INSERT INTO pipeline_schedules
                (pipeline_id, start_date, start_time, time_zone, interval, unit, published, trigger_id)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT (pipeline_id) DO UPDATE SET
                start_date = excluded.start_date,
                start_time = excluded.start_time,
                time_zone = excluded.time_zone,
                interval = excluded.interval,
                unit = excluded.unit,
                published = excluded.published,
                trigger_id = excluded.trigger_id
            RETURNING id
            "#,
        )
        .bind(draft.pipeline_id.get())
        .bind(draft.start_date.to_string())
        .bind(draft.start_time.to_string())
        .bind(&draft.time_zone)
        .bind(i64::from(draft.interval))
        .bind(draft.unit.as_str())
        .bind(draft.published)
        .bind(trigger_id)
        .fetch_one(&mut *tx)
        .await
        .map_err(|e| write_error(e, format!("schedule for pipeline: {}", draft.pipeline_id)))?;

        tx.commit()
            .await
            .map_err(|e| StorageError::Other(e.to_string()))?;

        Ok(PipelineSchedule {
            id: ScheduleId::new(schedule_id),
            pipeline_id: draft.pipeline_id,
            start_date: draft.start_date,
            start_time: draft.start_time,
            time_zone: draft.time_zone.clone(),
            interval: draft.interval,
            unit: draft.unit,
            published: draft.published,
            trigger_id: Some(TriggerId::new(trigger_id)),
        })
    }

    async fn get_schedule(&self, pipeline: PipelineId) -> Result<PipelineSchedule, StorageError> {
        let row: ScheduleRow = sqlx::query_as(
            r#"
            SELECT id, pipeline_id, start_date, start_time, time_zone, interval, unit, published, trigger_id
            FROM pipeline_schedules WHERE pipeline_id = ?
            "#,
        )
        .bind(pipeline.get())
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| StorageError::Other(e.to_string()))?
        .ok_or_else(|| StorageError::NotFound(format!("schedule for pipeline: {}", pipeline)))?;
        schedule_from_row(row)
    }

    async fn list_interval_schedules(&self) -> Result<Vec<IntervalSchedule>, StorageError> {
        let rows: Vec<(i64, i64, String)> =
            sqlx::query_as("SELECT id, every, period FROM interval_schedules ORDER BY id")
                .fetch_all(&self.pool)
                .await
                .map_err(|e| StorageError::Other(e.to_string()))?;

        rows.into_iter()
            .map(|row| {
                Ok(IntervalSchedule {
                    id: IntervalScheduleId::new(row.0),
                    every: row.1 as u32,
                    period: parse_column::<IntervalUnit>(&row.2, "period")?,
                })
            })
            .collect()
    }

    async fn get_trigger(&self, id: TriggerId) -> Result<PeriodicTrigger, StorageError> {
        let row: TriggerRow = sqlx::query_as(&format!("{} WHERE t.id = ?", TRIGGER_COLUMNS))
            .bind(id.get())
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| StorageError::Other(e.to_string()))?
            .ok_or_else(|| StorageError::NotFound(format!("trigger: {}", id)))?;
        trigger_from_row(row)
    }

    async fn list_triggers(&self) -> Result<Vec<PeriodicTrigger>, StorageError> {
        let rows: Vec<TriggerRow> = sqlx::query_as(&format!("{} ORDER BY t.id", TRIGGER_COLUMNS))
            .fetch_all(&self.pool)
            .await
            .map_err(|e| StorageError::Other(e.to_string()))?;
        rows.into_iter().map(trigger_from_row).collect()
    }

    async fn record_trigger_run(
        &self,
        id: TriggerId,
        at: DateTime<Utc>,
    ) -> Result<(), StorageError> {
        let result = sqlx::query("UPDATE periodic_triggers SET last_run_at = ? WHERE id = ?")
            .bind(time_to_string(at))
            .bind(id.get())
            .execute(&self.pool)
            .await
            .map_err(|e| StorageError::Other(e.to_string()))?;

        if result.rows_affected() == 0 {
            return Err(StorageError::NotFound(format!("trigger: {}", id)));
        }
        Ok(())
    }

    async fn save_run(&self, run: NewPipelineRun) -> Result<PipelineRun, StorageError> {
        self.ensure_pipeline(run.pipeline_id).await?;
        let output = serde_json::to_string(&run.output)
            .map_err(|e| StorageError::SerializationError(e.to_string()))?;

        let id: i64 = sqlx::query_scalar(
            r#"
            INSERT INTO pipeline_runs (pipeline_id, started_at, ended_at, output)
            VALUES (?, ?, ?, ?)
            RETURNING id
            "#,
        )
        .bind(run.pipeline_id.get())
        .bind(time_to_string(run.started_at))
        .bind(time_to_string(run.ended_at))
        .bind(&output)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| write_error(e, format!("run for pipeline: {}", run.pipeline_id)))?;

        Ok(PipelineRun {
            id: RunId::new(id),
            pipeline_id: run.pipeline_id,
            started_at: run.started_at,
            ended_at: run.ended_at,
            output: run.output,
        })
    }

    async fn get_run(&self, id: RunId) -> Result<PipelineRun, StorageError> {
        let row: RunRow = sqlx::query_as(
            "SELECT id, pipeline_id, started_at, ended_at, output FROM pipeline_runs WHERE id = ?",
        )
        .bind(id.get())
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| StorageError::Other(e.to_string()))?
        .ok_or_else(|| StorageError::NotFound(format!("run: {}", id)))?;
        run_from_row(row)
    }

    async fn list_runs(
        &self,
        pipeline: PipelineId,
        limit: usize,
    ) -> Result<Vec<PipelineRun>, StorageError> {
        let rows: Vec<RunRow> = sqlx::query_as(
            "SELECT id, pipeline_id, started_at, ended_at, output FROM pipeline_runs WHERE pipeline_id = ? ORDER BY started_at DESC, id DESC LIMIT ?",
        )
        .bind(pipeline.get())
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| StorageError::Other(e.to_string()))?;
        rows.into_iter().map(run_from_row).collect()
    }
}
