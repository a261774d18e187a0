//! Core identifier types.
//!
//! Every persisted entity is keyed by an integer assigned by storage. The
//! newtypes keep a step id from being passed where a pipeline id is expected,
//! while still serializing as plain integers in the run-output schema.

use serde::{Deserialize, Serialize};
use std::fmt;

macro_rules! define_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(i64);

        impl $name {
            /// Wrap a raw storage key.
            pub const fn new(id: i64) -> Self {
                Self(id)
            }

            /// Get the underlying integer value.
            pub const fn get(&self) -> i64 {
                self.0
            }
        }

        impl From<i64> for $name {
            fn from(id: i64) -> Self {
                Self::new(id)
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }
    };
}

define_id!(
    /// Unique identifier for a project.
    ProjectId
);
define_id!(
    /// Unique identifier for a data interface.
    DataInterfaceId
);
define_id!(
    /// Unique identifier for a pipeline.
    PipelineId
);
define_id!(
    /// Unique identifier for a step within a pipeline.
    StepId
);
define_id!(
    /// Unique identifier for a pipeline schedule.
    ScheduleId
);
define_id!(
    /// Unique identifier for a reusable interval schedule.
    IntervalScheduleId
);
define_id!(
    /// Unique identifier for a periodic trigger.
    TriggerId
);
define_id!(
    /// Unique identifier for a pipeline run record.
    RunId
);
