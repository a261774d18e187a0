//! Core data model: projects, pipelines, steps, schedules and runs.

pub mod pipeline;
pub mod project;
pub mod run;
pub mod schedule;
pub mod types;
