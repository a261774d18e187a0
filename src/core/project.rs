//! Projects, their collaborators, and the data interfaces they own.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use super::types::{DataInterfaceId, ProjectId};

/// Role recorded for the user who creates a project.
pub const ROLE_ADMIN: &str = "admin";

/// A project groups data interfaces and pipelines.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Project {
    pub id: ProjectId,
    pub name: String,
    pub description: String,
    pub created_at: DateTime<Utc>,
}

/// Fields needed to create a project.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewProject {
    pub name: String,
    pub description: String,
}

impl NewProject {
    /// Create a new project draft.
    pub fn new(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
        }
    }
}

/// Membership of a user in a project.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Collaborator {
    pub project_id: ProjectId,
    /// Username; authentication lives outside this crate.
    pub user: String,
    /// Free-form role label, e.g. [`ROLE_ADMIN`].
    pub role: String,
}

/// Kind of external data source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InterfaceType {
    Database,
}

impl InterfaceType {
    /// Identifier used in storage and configuration files.
    pub fn as_str(&self) -> &'static str {
        match self {
            InterfaceType::Database => "database",
        }
    }
}

impl fmt::Display for InterfaceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for InterfaceType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "database" => Ok(InterfaceType::Database),
            other => Err(format!("unknown interface type: {}", other)),
        }
    }
}

/// An external data source a pipeline may read from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DataInterface {
    pub id: DataInterfaceId,
    pub project_id: ProjectId,
    pub name: String,
    pub interface_type: InterfaceType,
    pub connection_string: String,
    pub sql_query: String,
}

/// Fields needed to create a data interface.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewDataInterface {
    pub project_id: ProjectId,
    pub name: String,
    pub interface_type: InterfaceType,
    pub connection_string: String,
    pub sql_query: String,
}

impl NewDataInterface {
    /// Create a database interface draft.
    pub fn database(
        project_id: ProjectId,
        name: impl Into<String>,
        connection_string: impl Into<String>,
        sql_query: impl Into<String>,
    ) -> Self {
        Self {
            project_id,
            name: name.into(),
            interface_type: InterfaceType::Database,
            connection_string: connection_string.into(),
            sql_query: sql_query.into(),
        }
    }
}
