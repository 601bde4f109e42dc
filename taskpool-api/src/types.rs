use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::errors::PoolError;

// Type aliases for common types
pub type Args = Vec<serde_json::Value>;
pub type TaskResult<T = serde_json::Value> = Result<T, PoolError>;

/// Unique identifier of a submitted task.
///
/// Generated at submission time from a random v4 UUID, so identifiers do not
/// collide within a process lifetime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TaskId(Uuid);

impl TaskId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for TaskId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<Uuid> for TaskId {
    fn from(value: Uuid) -> Self {
        Self(value)
    }
}
