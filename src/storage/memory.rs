//! In-memory storage implementation.
//!
//! Provides a thread-safe in-memory backend for testing and development.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use std::sync::RwLock;

use super::{Storage, StorageError};
use crate::core::pipeline::{NewPipeline, NewStep, Pipeline, Step};
use crate::core::project::{
    Collaborator, DataInterface, NewDataInterface, NewProject, Project, ROLE_ADMIN,
};
use crate::core::run::{NewPipelineRun, PipelineRun};
use crate::core::schedule::{IntervalSchedule, PeriodicTrigger, PipelineSchedule, ScheduleDraft};
use crate::core::types::{
    DataInterfaceId, IntervalScheduleId, PipelineId, ProjectId, RunId, ScheduleId, StepId,
    TriggerId,
};
use crate::scheduling::TriggerSpec;

/// Last assigned key per table.
#[derive(Debug, Default)]
struct Sequences {
    project: i64,
    data_interface: i64,
    pipeline: i64,
    step: i64,
    interval: i64,
    trigger: i64,
    schedule: i64,
    run: i64,
}

fn next(seq: &mut i64) -> i64 {
    *seq += 1;
    *seq
}

#[derive(Debug, Default)]
struct Tables {
    seq: Sequences,
    projects: BTreeMap<ProjectId, Project>,
    collaborators: Vec<Collaborator>,
    data_interfaces: BTreeMap<DataInterfaceId, DataInterface>,
    pipelines: BTreeMap<PipelineId, Pipeline>,
    steps: BTreeMap<StepId, Step>,
    intervals: BTreeMap<IntervalScheduleId, IntervalSchedule>,
    triggers: BTreeMap<TriggerId, PeriodicTrigger>,
    schedules: BTreeMap<PipelineId, PipelineSchedule>,
    runs: BTreeMap<RunId, PipelineRun>,
}

impl Tables {
    fn order_taken(&self, pipeline: PipelineId, order: u32, except: Option<StepId>) -> bool {
        self.steps.values().any(|s| {
            s.pipeline_id == pipeline && s.step_order == order && Some(s.id) != except
        })
    }

    fn remove_pipeline(&mut self, id: PipelineId) {
        self.pipelines.remove(&id);
        self.steps.retain(|_, s| s.pipeline_id != id);
        self.schedules.remove(&id);
        self.triggers.retain(|_, t| t.pipeline_id != id);
        self.runs.retain(|_, r| r.pipeline_id != id);
    }
}

/// In-memory storage backend.
///
/// All tables sit behind one `RwLock`, so every operation, including the
/// multi-record schedule save and cascading deletes, is a single critical
/// section. Data is not persisted across restarts.
pub struct InMemoryStorage {
    tables: RwLock<Tables>,
}

impl InMemoryStorage {
    /// Create a new empty in-memory storage.
    pub fn new() -> Self {
        Self {
            tables: RwLock::new(Tables::default()),
        }
    }

    fn read(&self) -> Result<std::sync::RwLockReadGuard<'_, Tables>, StorageError> {
        self.tables.read().map_err(|_| StorageError::LockPoisoned)
    }

    fn write(&self) -> Result<std::sync::RwLockWriteGuard<'_, Tables>, StorageError> {
        self.tables.write().map_err(|_| StorageError::LockPoisoned)
    }
}

impl Default for InMemoryStorage {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Storage for InMemoryStorage {
    async fn create_project(
        &self,
        project: NewProject,
        owner: &str,
    ) -> Result<Project, StorageError> {
        let mut tables = self.write()?;
        let id = ProjectId::new(next(&mut tables.seq.project));
        let project = Project {
            id,
            name: project.name,
            description: project.description,
            created_at: Utc::now(),
        };
        tables.projects.insert(id, project.clone());
        tables.collaborators.push(Collaborator {
            project_id: id,
            user: owner.to_string(),
            role: ROLE_ADMIN.to_string(),
        });
        Ok(project)
    }

    async fn get_project(&self, id: ProjectId) -> Result<Project, StorageError> {
        let tables = self.read()?;
        tables
            .projects
            .get(&id)
            .cloned()
            .ok_or_else(|| StorageError::NotFound(format!("project: {}", id)))
    }

    async fn list_projects(&self) -> Result<Vec<Project>, StorageError> {
        let tables = self.read()?;
        Ok(tables.projects.values().cloned().collect())
    }

    async fn delete_project(&self, id: ProjectId) -> Result<(), StorageError> {
        let mut tables = self.write()?;
        tables
            .projects
            .remove(&id)
            .ok_or_else(|| StorageError::NotFound(format!("project: {}", id)))?;

        let owned: Vec<PipelineId> = tables
            .pipelines
            .values()
            .filter(|p| p.project_id == id)
            .map(|p| p.id)
            .collect();
        for pipeline in owned {
            tables.remove_pipeline(pipeline);
        }
        tables.collaborators.retain(|c| c.project_id != id);
        tables.data_interfaces.retain(|_, d| d.project_id != id);
        Ok(())
    }

    async fn add_collaborator(&self, collaborator: Collaborator) -> Result<(), StorageError> {
        let mut tables = self.write()?;
        if !tables.projects.contains_key(&collaborator.project_id) {
            return Err(StorageError::NotFound(format!(
                "project: {}",
                collaborator.project_id
            )));
        }
        if tables
            .collaborators
            .iter()
            .any(|c| c.project_id == collaborator.project_id && c.user == collaborator.user)
        {
            return Err(StorageError::DuplicateKey(format!(
                "collaborator: {}/{}",
                collaborator.project_id, collaborator.user
            )));
        }
        tables.collaborators.push(collaborator);
        Ok(())
    }

    async fn list_collaborators(
        &self,
        project: ProjectId,
    ) -> Result<Vec<Collaborator>, StorageError> {
        let tables = self.read()?;
        Ok(tables
            .collaborators
            .iter()
            .filter(|c| c.project_id == project)
            .cloned()
            .collect())
    }

    async fn is_collaborator(&self, project: ProjectId, user: &str) -> Result<bool, StorageError> {
        let tables = self.read()?;
        Ok(tables
            .collaborators
            .iter()
            .any(|c| c.project_id == project && c.user == user))
    }

    async fn create_data_interface(
        &self,
        interface: NewDataInterface,
    ) -> Result<DataInterface, StorageError> {
        let mut tables = self.write()?;
        if !tables.projects.contains_key(&interface.project_id) {
            return Err(StorageError::NotFound(format!(
                "project: {}",
                interface.project_id
            )));
        }
        let id = DataInterfaceId::new(next(&mut tables.seq.data_interface));
        let interface = DataInterface {
            id,
            project_id: interface.project_id,
            name: interface.name,
            interface_type: interface.interface_type,
            connection_string: interface.connection_string,
            sql_query: interface.sql_query,
        };
        tables.data_interfaces.insert(id, interface.clone());
        Ok(interface)
    }

    async fn get_data_interface(
        &self,
        id: DataInterfaceId,
    ) -> Result<DataInterface, StorageError> {
        let tables = self.read()?;
        tables
            .data_interfaces
            .get(&id)
            .cloned()
            .ok_or_else(|| StorageError::NotFound(format!("data interface: {}", id)))
    }

    async fn list_data_interfaces(
        &self,
        project: ProjectId,
    ) -> Result<Vec<DataInterface>, StorageError> {
        let tables = self.read()?;
        Ok(tables
            .data_interfaces
            .values()
            .filter(|d| d.project_id == project)
            .cloned()
            .collect())
    }

    async fn create_pipeline(&self, pipeline: NewPipeline) -> Result<Pipeline, StorageError> {
        let mut tables = self.write()?;
        if !tables.projects.contains_key(&pipeline.project_id) {
            return Err(StorageError::NotFound(format!(
                "project: {}",
                pipeline.project_id
            )));
        }
        if let Some(input) = pipeline.input {
            if !tables.data_interfaces.contains_key(&input) {
                return Err(StorageError::NotFound(format!("data interface: {}", input)));
            }
            if tables.pipelines.values().any(|p| p.input == Some(input)) {
                return Err(StorageError::DuplicateKey(format!(
                    "pipeline input: {}",
                    input
                )));
            }
        }

        let id = PipelineId::new(next(&mut tables.seq.pipeline));
        let pipeline = Pipeline {
            id,
            project_id: pipeline.project_id,
            name: pipeline.name,
            input: pipeline.input,
            created_at: Utc::now(),
        };
        tables.pipelines.insert(id, pipeline.clone());
        Ok(pipeline)
    }

    async fn get_pipeline(&self, id: PipelineId) -> Result<Pipeline, StorageError> {
        let tables = self.read()?;
        tables
            .pipelines
            .get(&id)
            .cloned()
            .ok_or_else(|| StorageError::NotFound(format!("pipeline: {}", id)))
    }

    async fn list_pipelines(&self, project: ProjectId) -> Result<Vec<Pipeline>, StorageError> {
        let tables = self.read()?;
        Ok(tables
            .pipelines
            .values()
            .filter(|p| p.project_id == project)
            .cloned()
            .collect())
    }

    async fn delete_pipeline(&self, id: PipelineId) -> Result<(), StorageError> {
        let mut tables = self.write()?;
        if !tables.pipelines.contains_key(&id) {
            return Err(StorageError::NotFound(format!("pipeline: {}", id)));
        }
        tables.remove_pipeline(id);
        Ok(())
    }

    async fn create_step(&self, step: NewStep) -> Result<Step, StorageError> {
        let mut tables = self.write()?;
        if !tables.pipelines.contains_key(&step.pipeline_id) {
            return Err(StorageError::NotFound(format!(
                "pipeline: {}",
                step.pipeline_id
            )));
        }
        if tables.order_taken(step.pipeline_id, step.step_order, None) {
            return Err(StorageError::DuplicateKey(format!(
                "step order: {}/{}",
                step.pipeline_id, step.step_order
            )));
        }

        let id = StepId::new(next(&mut tables.seq.step));
        let step = Step {
            id,
            pipeline_id: step.pipeline_id,
            name: step.name,
            language: step.language,
            script: step.script,
            step_order: step.step_order,
        };
        tables.steps.insert(id, step.clone());
        Ok(step)
    }

    async fn update_step(&self, step: Step) -> Result<(), StorageError> {
        let mut tables = self.write()?;
        if !tables.steps.contains_key(&step.id) {
            return Err(StorageError::NotFound(format!("step: {}", step.id)));
        }
        if !tables.pipelines.contains_key(&step.pipeline_id) {
            return Err(StorageError::NotFound(format!(
                "pipeline: {}",
                step.pipeline_id
            )));
        }
        if tables.order_taken(step.pipeline_id, step.step_order, Some(step.id)) {
            return Err(StorageError::DuplicateKey(format!(
                "step order: {}/{}",
                step.pipeline_id, step.step_order
            )));
        }
        tables.steps.insert(step.id, step);
        Ok(())
    }

    async fn delete_step(&self, id: StepId) -> Result<(), StorageError> {
        let mut tables = self.write()?;
        tables
            .steps
            .remove(&id)
            .ok_or_else(|| StorageError::NotFound(format!("step: {}", id)))?;
        Ok(())
    }

    async fn list_steps(&self, pipeline: PipelineId) -> Result<Vec<Step>, StorageError> {
        let tables = self.read()?;
        let mut steps: Vec<_> = tables
            .steps
            .values()
            .filter(|s| s.pipeline_id == pipeline)
            .cloned()
            .collect();
        steps.sort_by_key(|s| s.step_order);
        Ok(steps)
    }

    async fn next_step_order(&self, pipeline: PipelineId) -> Result<u32, StorageError> {
        let tables = self.read()?;
        if !tables.pipelines.contains_key(&pipeline) {
            return Err(StorageError::NotFound(format!("pipeline: {}", pipeline)));
        }
        let max = tables
            .steps
            .values()
            .filter(|s| s.pipeline_id == pipeline)
            .map(|s| s.step_order)
            .max();
        match max {
            None => Ok(0),
            Some(max) => max.checked_add(1).ok_or_else(|| {
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
        let mut tables = self.write()?;
        // Checks first: nothing below can fail once mutation starts.
        if !tables.pipelines.contains_key(&draft.pipeline_id) {
            return Err(StorageError::NotFound(format!(
                "pipeline: {}",
                draft.pipeline_id
            )));
        }

        let found = tables
            .intervals
            .values()
            .find(|i| i.every == trigger.every && i.period == trigger.period)
            .copied();
        let interval = match found {
            Some(existing) => existing,
            None => {
                let interval = IntervalSchedule {
                    id: IntervalScheduleId::new(next(&mut tables.seq.interval)),
                    every: trigger.every,
                    period: trigger.period,
                };
                tables.intervals.insert(interval.id, interval);
                interval
            }
        };

        let existing = tables
            .triggers
            .values()
            .find(|t| t.name == trigger.name)
            .map(|t| (t.id, t.last_run_at));
        let (trigger_id, last_run_at) = match existing {
            Some(found) => found,
            None => (TriggerId::new(next(&mut tables.seq.trigger)), None),
        };
        tables.triggers.insert(
            trigger_id,
            PeriodicTrigger {
                id: trigger_id,
                name: trigger.name.clone(),
                task: trigger.task.clone(),
                pipeline_id: trigger.pipeline_id,
                interval,
                start_time: trigger.start_time,
                enabled: trigger.enabled,
                last_run_at,
            },
        );

        let existing = tables.schedules.get(&draft.pipeline_id).map(|s| s.id);
        let schedule_id = match existing {
            Some(id) => id,
            None => ScheduleId::new(next(&mut tables.seq.schedule)),
        };
        let schedule = PipelineSchedule {
            id: schedule_id,
            pipeline_id: draft.pipeline_id,
            start_date: draft.start_date,
            start_time: draft.start_time,
            time_zone: draft.time_zone.clone(),
            interval: draft.interval,
            unit: draft.unit,
            published: draft.published,
            trigger_id: Some(trigger_id),
        };
        tables.schedules.insert(draft.pipeline_id, schedule.clone());
        Ok(schedule)
    }

    async fn get_schedule(&self, pipeline: PipelineId) -> Result<PipelineSchedule, StorageError> {
        let tables = self.read()?;
        tables
            .schedules
            .get(&pipeline)
            .cloned()
            .ok_or_else(|| StorageError::NotFound(format!("schedule for pipeline: {}", pipeline)))
    }

    async fn list_interval_schedules(&self) -> Result<Vec<IntervalSchedule>, StorageError> {
        let tables = self.read()?;
        Ok(tables.intervals.values().copied().collect())
    }

    async fn get_trigger(&self, id: TriggerId) -> Result<PeriodicTrigger, StorageError> {
        let tables = self.read()?;
        tables
            .triggers
            .get(&id)
            .cloned()
            .ok_or_else(|| StorageError::NotFound(format!("trigger: {}", id)))
    }

    async fn list_triggers(&self) -> Result<Vec<PeriodicTrigger>, StorageError> {
        let tables = self.read()?;
        Ok(tables.triggers.values().cloned().collect())
    }

    async fn record_trigger_run(
        &self,
        id: TriggerId,
        at: DateTime<Utc>,
    ) -> Result<(), StorageError> {
        let mut tables = self.write()?;
        let trigger = tables
            .triggers
            .get_mut(&id)
            .ok_or_else(|| StorageError::NotFound(format!("trigger: {}", id)))?;
        trigger.last_run_at = Some(at);
        Ok(())
    }

    async fn save_run(&self, run: NewPipelineRun) -> Result<PipelineRun, StorageError> {
        let mut tables = self.write()?;
        if !tables.pipelines.contains_key(&run.pipeline_id) {
            return Err(StorageError::NotFound(format!(
                "pipeline: {}",
                run.pipeline_id
            )));
        }
        let id = RunId::new(next(&mut tables.seq.run));
        let run = PipelineRun {
            id,
            pipeline_id: run.pipeline_id,
            started_at: run.started_at,
            ended_at: run.ended_at,
            output: run.output,
        };
        tables.runs.insert(id, run.clone());
        Ok(run)
    }

    async fn get_run(&self, id: RunId) -> Result<PipelineRun, StorageError> {
        let tables = self.read()?;
        tables
            .runs
            .get(&id)
            .cloned()
            .ok_or_else(|| StorageError::NotFound(format!("run: {}", id)))
    }

    async fn list_runs(
        &self,
        pipeline: PipelineId,
        limit: usize,
    ) -> Result<Vec<PipelineRun>, StorageError> {
        let tables = self.read()?;
        let mut result: Vec<_> = tables
            .runs
            .values()
            .filter(|r| r.pipeline_id == pipeline)
            .cloned()
            .collect();
        // Most recent first; ids break ties
        result.sort_by(|a, b| b.started_at.cmp(&a.started_at).then(b.id.cmp(&a.id)));
        result.truncate(limit);
        Ok(result)
    }
}
