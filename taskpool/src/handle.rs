use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};

use serde::de::DeserializeOwned;
use serde_json::Value;
use taskpool_api::{PoolError, TaskId, TaskResult};
use tokio::sync::oneshot;

/// Completion handle for a task submitted with [`Pool::run`](crate::Pool::run).
///
/// The task is already queued when the handle is returned; awaiting it only
/// waits for the outcome. Dropping the handle does not cancel the task.
#[derive(Debug)]
#[must_use = "dropping a TaskHandle discards the task's result"]
pub struct TaskHandle {
    id: TaskId,
    rx: oneshot::Receiver<TaskResult>,
}

impl TaskHandle {
    pub(crate) fn new(id: TaskId, rx: oneshot::Receiver<TaskResult>) -> Self {
        Self { id, rx }
    }

    /// A handle that is already resolved with `error`.
    pub(crate) fn failed(error: PoolError) -> Self {
        let (tx, rx) = oneshot::channel();
        let _ = tx.send(Err(error));
        Self::new(TaskId::new(), rx)
    }

    pub fn id(&self) -> TaskId {
        self.id
    }

    /// Wait for the result and deserialize it into `T`.
    pub async fn decode<T: DeserializeOwned>(self) -> Result<T, PoolError> {
        let value = self.await?;
        serde_json::from_value(value).map_err(|e| PoolError::Decode(e.to_string()))
    }
}

impl Future for TaskHandle {
    type Output = Result<Value, PoolError>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.rx).poll(cx).map(|result| match result {
            Ok(outcome) => outcome,
            // the manager dropped the task without answering: it is gone
            Err(_) => Err(PoolError::PoolDestroyed),
        })
    }
}
