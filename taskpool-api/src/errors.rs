//! # Pool Error Types
//!
//! This module defines the error type surfaced by the task pool. Task-level
//! failures (execution errors, timeouts, worker crashes) are absorbed by the
//! pool's retry logic; only terminal failures reach the caller, carrying the
//! number of attempts that were made.
//!
//! ## Usage Example
//!
//! ```rust
//! use taskpool_api::errors::PoolError;
//!
//! fn describe(error: &PoolError) -> &'static str {
//!     match error {
//!         PoolError::TaskExecution { .. } => "the task returned an error",
//!         PoolError::TaskTimeout { .. } => "the task ran past its deadline",
//!         PoolError::WorkerCrash { .. } => "the worker died under the task",
//!         PoolError::PoolDestroyed => "the pool was torn down",
//!         _ => "submission or configuration problem",
//!     }
//! }
//! ```

use std::time::Duration;

use thiserror::Error;

/// Core error type for the task pool.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PoolError {
    /// The task callable returned an error on its final attempt.
    #[error("task `{task}` failed after {attempts} attempt(s): {message}")]
    TaskExecution {
        task: String,
        attempts: u32,
        message: String,
    },

    /// The task exceeded its deadline on its final attempt.
    ///
    /// The worker that was running it has been killed and replaced.
    #[error("task `{task}` timed out after {timeout:?} ({attempts} attempt(s))")]
    TaskTimeout {
        task: String,
        attempts: u32,
        timeout: Duration,
    },

    /// The worker died while holding the task on its final attempt.
    #[error("worker crashed while running task `{task}` ({attempts} attempt(s)): {reason}")]
    WorkerCrash {
        task: String,
        attempts: u32,
        reason: String,
    },

    /// The pool was destroyed before the task could complete.
    #[error("pool destroyed")]
    PoolDestroyed,

    /// Manager and worker disagreed about the dispatch protocol.
    ///
    /// Never retried; indicates a logic bug rather than a task failure.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// No task function is registered under this name.
    #[error("unknown task type: {0}")]
    UnknownTask(String),

    /// Two task functions were registered under the same name.
    #[error("duplicate task type: {0}")]
    DuplicateTask(String),

    #[error("invalid pool configuration: {0}")]
    InvalidConfig(String),

    #[error("failed to spawn worker: {0}")]
    WorkerSpawn(String),

    /// The pool was constructed outside of a tokio runtime.
    #[error("no tokio runtime available: {0}")]
    NoRuntime(String),

    #[error("failed to decode task result: {0}")]
    Decode(String),
}

impl PoolError {
    /// Number of attempts recorded on a terminal task failure.
    pub fn attempts(&self) -> Option<u32> {
        match self {
            PoolError::TaskExecution { attempts, .. }
            | PoolError::TaskTimeout { attempts, .. }
            | PoolError::WorkerCrash { attempts, .. } => Some(*attempts),
            _ => None,
        }
    }

    /// Whether the error came from running the task rather than from
    /// submission, configuration or teardown.
    pub fn is_task_failure(&self) -> bool {
        self.attempts().is_some()
    }
}
