//! # Worker Thread Main
//!
//! Body of a worker OS thread. The thread owns a current-thread tokio
//! runtime and a local function registry keyed by content hash, and serves
//! one request at a time until it is told to shut down, its request channel
//! closes, or the manager fires its kill switch.
//!
//! ## Kill semantics
//! The kill switch is raced against every request and against the running
//! task. When it fires the in-flight future is dropped at its next poll and
//! the runtime is shut down in the background, abandoning any blocking work.
//! Code that never yields back to the runtime cannot be interrupted; its
//! thread simply outlives the worker slot.

use std::collections::HashMap;
use std::io;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use taskpool_api::{FunctionSource, TaskFn, TaskId, TaskRegistry};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, error, trace};

use super::protocol::{FunctionHash, WorkerEvent, WorkerId, WorkerReply, WorkerRequest};

/// Why a worker's serve loop ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ExitReason {
    Shutdown,
    Killed,
    /// The manager dropped the request channel.
    Disconnected,
}

/// Everything a worker thread is started with.
pub(crate) struct WorkerContext {
    pub id: WorkerId,
    pub registry: Arc<TaskRegistry>,
    pub requests: flume::Receiver<WorkerRequest>,
    pub kill: oneshot::Receiver<()>,
    pub events: mpsc::UnboundedSender<WorkerEvent>,
    pub dispatch: tracing::Dispatch,
}

/// Main function for the worker thread
pub(crate) fn worker_thread_main(ctx: WorkerContext) {
    let WorkerContext {
        id,
        registry,
        requests,
        mut kill,
        events,
        dispatch,
    } = ctx;
    let _dispatch_guard = tracing::dispatcher::set_default(&dispatch);

    let mut local = LocalFunctions::new(id, registry, events.clone());
    let result = std::panic::catch_unwind(AssertUnwindSafe(|| -> io::Result<ExitReason> {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()?;
        let reason = runtime.block_on(local.serve(&requests, &mut kill));
        runtime.shutdown_background();
        Ok(reason)
    }));

    let reason = match result {
        Ok(Ok(exit)) => {
            debug!(worker = %id, ?exit, "worker thread exiting");
            None
        }
        Ok(Err(e)) => {
            error!(worker = %id, error = %e, "worker runtime failed to start");
            Some(format!("worker runtime failed to start: {e}"))
        }
        Err(payload) => {
            let message = panic_message(payload.as_ref());
            error!(worker = %id, panic = %message, "worker thread panicked");
            Some(format!("worker panicked: {message}"))
        }
    };

    // Notify the manager that this worker is gone
    let _ = events.send(WorkerEvent::Exited { worker: id, reason });
}

/// Extract a readable message from a panic payload.
pub(crate) fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else {
        "unknown panic".to_string()
    }
}

/// Worker-side registry: functions this worker has been sent, keyed by hash.
///
/// Entries live as long as the worker; nothing is evicted.
struct LocalFunctions {
    id: WorkerId,
    registry: Arc<TaskRegistry>,
    functions: HashMap<FunctionHash, Arc<dyn TaskFn>>,
    events: mpsc::UnboundedSender<WorkerEvent>,
}

impl LocalFunctions {
    fn new(
        id: WorkerId,
        registry: Arc<TaskRegistry>,
        events: mpsc::UnboundedSender<WorkerEvent>,
    ) -> Self {
        Self {
            id,
            registry,
            functions: HashMap::new(),
            events,
        }
    }

    async fn serve(
        &mut self,
        requests: &flume::Receiver<WorkerRequest>,
        kill: &mut oneshot::Receiver<()>,
    ) -> ExitReason {
        loop {
            let request = tokio::select! {
                biased;
                _ = &mut *kill => return ExitReason::Killed,
                request = requests.recv_async() => match request {
                    Ok(request) => request,
                    Err(_) => return ExitReason::Disconnected,
                },
            };

            match request {
                WorkerRequest::RegisterFunction { task_id, source, hash } => {
                    let reply = self.register(task_id, &source, hash);
                    self.reply(reply);
                }
                WorkerRequest::ExecuteTask { task_id, hash, args } => {
                    let Some(handler) = self.functions.get(&hash).cloned() else {
                        self.reply(WorkerReply::ProtocolError {
                            task_id,
                            detail: format!("execute_task for unregistered function {hash}"),
                        });
                        continue;
                    };

                    trace!(worker = %self.id, task = %task_id, function = handler.name(), "executing");
                    let outcome = tokio::select! {
                        biased;
                        _ = &mut *kill => return ExitReason::Killed,
                        outcome = handler.call(args) => outcome,
                    };

                    let reply = match outcome {
                        Ok(result) => WorkerReply::TaskResult { task_id, result },
                        Err(err) => WorkerReply::TaskError {
                            task_id,
                            message: format!("{err:#}"),
                        },
                    };
                    self.reply(reply);
                }
                WorkerRequest::Shutdown => return ExitReason::Shutdown,
            }
        }
    }

    fn register(&mut self, task_id: TaskId, source: &str, hash: FunctionHash) -> WorkerReply {
        if self.functions.contains_key(&hash) {
            return WorkerReply::FunctionRegistered { task_id, hash };
        }
        if FunctionSource::digest(source) != *hash {
            return WorkerReply::ProtocolError {
                task_id,
                detail: format!("content hash mismatch for function {hash}"),
            };
        }

        let resolved = FunctionSource::from_json(source)
            .and_then(|source| self.registry.resolve(&source));
        match resolved {
            Ok(handler) => {
                debug!(worker = %self.id, function = handler.name(), %hash, "function registered");
                self.functions.insert(hash.clone(), handler);
                WorkerReply::FunctionRegistered { task_id, hash }
            }
            Err(e) => WorkerReply::ProtocolError {
                task_id,
                detail: e.to_string(),
            },
        }
    }

    fn reply(&self, reply: WorkerReply) {
        // A closed channel means the manager is gone; the request channel
        // will report that on the next receive.
        let _ = self.events.send(WorkerEvent::Reply {
            worker: self.id,
            reply,
        });
    }
}
