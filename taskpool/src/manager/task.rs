//! Task bookkeeping owned by the pool manager.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use taskpool_api::{Args, PoolError, TaskFn, TaskId};
use tokio::sync::oneshot;
use tracing::{debug, warn};

use crate::config::TaskPolicy;

/// Where a task's outcome goes.
pub(crate) enum Completion {
    /// A caller is awaiting a [`TaskHandle`](crate::TaskHandle).
    Reply(oneshot::Sender<Result<Value, PoolError>>),
    /// Nobody is listening; failures are only logged.
    FireAndForget,
}

/// One submitted unit of work.
///
/// Owned by the manager from submission until it reaches a terminal state.
/// While a worker runs it, the task sits in the manager's active map and the
/// worker only knows its id.
pub(crate) struct Task {
    pub id: TaskId,
    pub function: Arc<dyn TaskFn>,
    pub args: Args,
    pub timeout: Duration,
    pub max_retries: u32,
    /// Retries performed so far; the current attempt is `retries + 1`.
    pub retries: u32,
    completion: Completion,
}

impl fmt::Debug for Task {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Task")
            .field("id", &self.id)
            .field("function", &self.function.name())
            .field("retries", &self.retries)
            .field("max_retries", &self.max_retries)
            .field("fire_and_forget", &self.is_fire_and_forget())
            .finish()
    }
}

impl Task {
    pub fn new(
        function: Arc<dyn TaskFn>,
        args: Args,
        policy: TaskPolicy,
        completion: Completion,
    ) -> Self {
        Self {
            id: TaskId::new(),
            function,
            args,
            timeout: policy.timeout,
            max_retries: policy.max_retries,
            retries: 0,
            completion,
        }
    }

    pub fn name(&self) -> &str {
        self.function.name()
    }

    pub fn is_fire_and_forget(&self) -> bool {
        matches!(self.completion, Completion::FireAndForget)
    }

    /// Whether another attempt is allowed after the current one failed.
    pub fn can_retry(&self) -> bool {
        self.retries < self.max_retries
    }

    pub fn attempts(&self) -> u32 {
        self.retries + 1
    }

    pub fn resolve(self, value: Value) {
        if let Completion::Reply(reply) = self.completion {
            // The caller may have dropped its handle; that is not an error.
            let _ = reply.send(Ok(value));
        }
    }

    pub fn reject(self, error: PoolError) {
        match self.completion {
            Completion::Reply(reply) => {
                let _ = reply.send(Err(error));
            }
            Completion::FireAndForget if error == PoolError::PoolDestroyed => {
                debug!(task = %self.id, function = self.function.name(), "fire-and-forget task dropped by destroy");
            }
            Completion::FireAndForget => {
                warn!(task = %self.id, function = self.function.name(), %error, "fire-and-forget task failed");
            }
        }
    }
}

/// Why a single attempt of a task did not produce a result.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Failure {
    Execution(String),
    Timeout(Duration),
    Crash(String),
}

impl Failure {
    /// Terminal error reported once the retry budget is spent.
    pub fn into_error(self, task: &str, attempts: u32) -> PoolError {
        let task = task.to_string();
        match self {
            Failure::Execution(message) => PoolError::TaskExecution { task, attempts, message },
            Failure::Timeout(timeout) => PoolError::TaskTimeout { task, attempts, timeout },
            Failure::Crash(reason) => PoolError::WorkerCrash { task, attempts, reason },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use taskpool_api::FnTask;

    fn echo() -> Arc<dyn TaskFn> {
        Arc::new(FnTask::new("echo", |args: Args| async move {
            Ok::<_, anyhow::Error>(json!(args))
        }))
    }

    fn policy(max_retries: u32) -> TaskPolicy {
        TaskPolicy { timeout: Duration::from_secs(1), max_retries }
    }

    #[test]
    fn test_retry_budget() {
        let mut task = Task::new(echo(), vec![], policy(2), Completion::FireAndForget);
        assert!(task.can_retry());
        task.retries = 2;
        assert!(!task.can_retry());
        assert_eq!(task.attempts(), 3);
        assert!(task.is_fire_and_forget());
    }

    #[tokio::test]
    async fn test_resolve_and_reject_reach_caller() {
        let (tx, rx) = oneshot::channel();
        let task = Task::new(echo(), vec![json!(1)], policy(0), Completion::Reply(tx));
        task.resolve(json!(1));
        assert_eq!(rx.await.unwrap(), Ok(json!(1)));

        let (tx, rx) = oneshot::channel();
        let task = Task::new(echo(), vec![], policy(0), Completion::Reply(tx));
        task.reject(PoolError::PoolDestroyed);
        assert_eq!(rx.await.unwrap(), Err(PoolError::PoolDestroyed));
    }

    #[test]
    fn test_reject_with_dropped_handle_is_silent() {
        let (tx, rx) = oneshot::channel();
        drop(rx);
        Task::new(echo(), vec![], policy(0), Completion::Reply(tx))
            .reject(PoolError::PoolDestroyed);
    }

    #[test]
    fn test_failure_into_error() {
        let err = Failure::Execution("boom".into()).into_error("fail", 3);
        assert_eq!(err.to_string(), "task `fail` failed after 3 attempt(s): boom");
        assert_eq!(err.attempts(), Some(3));

        let err = Failure::Timeout(Duration::from_millis(100)).into_error("slow", 1);
        assert!(matches!(err, PoolError::TaskTimeout { attempts: 1, .. }));

        let err = Failure::Crash("worker panicked: kaboom".into()).into_error("explode", 2);
        assert!(err.to_string().contains("kaboom"));
    }
}
