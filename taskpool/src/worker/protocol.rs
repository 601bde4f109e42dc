//! Dispatch protocol between the pool manager and its workers.
//!
//! Workers never touch pool state; everything crosses the boundary as one
//! of these messages. Requests travel on a per-worker flume channel, replies
//! and exit notices on a single channel shared by all workers.

use std::fmt;
use std::sync::Arc;

use serde_json::Value;
use taskpool_api::{Args, TaskId};

/// Hex-encoded content hash of a serialized function source.
pub type FunctionHash = Arc<str>;

/// Pool-local worker identifier. Never reused within a pool's lifetime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct WorkerId(pub u64);

impl fmt::Display for WorkerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "worker-{}", self.0)
    }
}

/// Manager → worker.
#[derive(Debug, Clone)]
pub enum WorkerRequest {
    /// Install a function in the worker's local registry.
    RegisterFunction {
        task_id: TaskId,
        source: Arc<str>,
        hash: FunctionHash,
    },

    /// Run a previously registered function.
    ExecuteTask {
        task_id: TaskId,
        hash: FunctionHash,
        args: Args,
    },

    /// Exit once idle.
    Shutdown,
}

/// Worker → manager.
#[derive(Debug, Clone, PartialEq)]
pub enum WorkerReply {
    FunctionRegistered {
        task_id: TaskId,
        hash: FunctionHash,
    },

    TaskResult {
        task_id: TaskId,
        result: Value,
    },

    /// The task's callable returned an error. The worker stays healthy.
    TaskError {
        task_id: TaskId,
        message: String,
    },

    /// The worker could not honour a request (unregistered hash, unknown
    /// function, corrupted source).
    ProtocolError {
        task_id: TaskId,
        detail: String,
    },
}

impl WorkerReply {
    pub fn task_id(&self) -> TaskId {
        match self {
            WorkerReply::FunctionRegistered { task_id, .. }
            | WorkerReply::TaskResult { task_id, .. }
            | WorkerReply::TaskError { task_id, .. }
            | WorkerReply::ProtocolError { task_id, .. } => *task_id,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            WorkerReply::FunctionRegistered { .. } => "function_registered",
            WorkerReply::TaskResult { .. } => "task_result",
            WorkerReply::TaskError { .. } => "task_error",
            WorkerReply::ProtocolError { .. } => "protocol_error",
        }
    }
}

/// Everything the manager hears from its workers.
#[derive(Debug)]
pub enum WorkerEvent {
    Reply {
        worker: WorkerId,
        reply: WorkerReply,
    },

    /// The worker thread has ended. `reason` describes a crash (a panic or
    /// a runtime that failed to start); `None` means an orderly exit.
    Exited {
        worker: WorkerId,
        reason: Option<String>,
    },
}
