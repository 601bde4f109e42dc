//! # Worker Module
//!
//! A worker is an isolated execution context: one OS thread with its own
//! runtime and its own function registry, reachable only through the
//! dispatch protocol. This module holds the manager's view of a worker.
//!
//! ## Key Concepts
//! - Worker lifecycle: spawn, idle/busy transitions, termination
//! - Registration tracking: which function hashes this worker already holds
//! - Hard kill: termination never waits for the running task
//!
//! ## Thread Safety
//! - `Worker` itself is owned by the pool manager and never shared
//! - The thread communicates only through channels

pub(crate) mod protocol;
mod runner;

use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;
use std::io;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use taskpool_api::{PoolError, TaskId, TaskRegistry};
use tokio::sync::{mpsc, oneshot};

use crate::logging::current_subscriber;
use self::protocol::{FunctionHash, WorkerEvent, WorkerId, WorkerRequest};
use self::runner::{worker_thread_main, WorkerContext};

/// States a worker can be in
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerState {
    /// Waiting for a task
    Idle,
    /// Holding exactly one task
    Busy,
    /// Kill signal sent; the worker is no longer part of the pool
    Terminating,
}

/// Manager-side handle to a worker thread
pub(crate) struct Worker {
    id: WorkerId,
    state: WorkerState,
    current_task: Option<TaskId>,
    task_started_at: Option<Instant>,
    /// Function hashes this worker has acknowledged
    known_functions: HashSet<FunctionHash>,
    requests: flume::Sender<WorkerRequest>,
    kill_tx: Option<oneshot::Sender<()>>,
    thread: Option<WorkerExit>,
}

/// A worker's OS thread.
///
/// `exited` resolves once the thread body has returned, so the manager can
/// wait for it without blocking the runtime.
pub(crate) struct WorkerExit {
    handle: JoinHandle<()>,
    done: oneshot::Receiver<()>,
}

impl WorkerExit {
    /// Spawn `body` on `builder`, signalling completion when it returns.
    pub fn spawn<F>(builder: thread::Builder, body: F) -> io::Result<Self>
    where
        F: FnOnce() + Send + 'static,
    {
        let (done_tx, done) = oneshot::channel::<()>();
        let handle = builder.spawn(move || {
            let _done = done_tx;
            body();
        })?;
        Ok(Self { handle, done })
    }

    pub async fn exited(&mut self) {
        let _ = (&mut self.done).await;
    }

    pub fn has_exited(&mut self) -> bool {
        matches!(self.done.try_recv(), Err(oneshot::error::TryRecvError::Closed))
    }

    pub fn join(self) -> thread::Result<()> {
        self.handle.join()
    }
}

impl fmt::Debug for Worker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Worker")
            .field("id", &self.id)
            .field("state", &self.state)
            .field("current_task", &self.current_task)
            .field("known_functions", &self.known_functions.len())
            .finish()
    }
}

impl Worker {
    /// Spawn a worker thread named `{thread_name_prefix}-{id}`.
    pub fn spawn(
        id: WorkerId,
        thread_name_prefix: &str,
        registry: Arc<TaskRegistry>,
        events: mpsc::UnboundedSender<WorkerEvent>,
    ) -> Result<Self, PoolError> {
        let (requests, requests_rx) = flume::unbounded();
        let (kill_tx, kill_rx) = oneshot::channel();

        let ctx = WorkerContext {
            id,
            registry,
            requests: requests_rx,
            kill: kill_rx,
            events,
            dispatch: current_subscriber(),
        };

        let builder = thread::Builder::new().name(format!("{}-{}", thread_name_prefix, id.0));
        let thread = WorkerExit::spawn(builder, move || worker_thread_main(ctx))
            .map_err(|e| PoolError::WorkerSpawn(format!("{id}: {e}")))?;

        Ok(Self {
            id,
            state: WorkerState::Idle,
            current_task: None,
            task_started_at: None,
            known_functions: HashSet::new(),
            requests,
            kill_tx: Some(kill_tx),
            thread: Some(thread),
        })
    }

    pub fn id(&self) -> WorkerId {
        self.id
    }

    pub fn state(&self) -> WorkerState {
        self.state
    }

    pub fn current_task(&self) -> Option<TaskId> {
        self.current_task
    }

    /// Mark the worker busy with `task_id`, starting its deadline clock.
    pub fn assign(&mut self, task_id: TaskId, now: Instant) {
        self.state = WorkerState::Busy;
        self.current_task = Some(task_id);
        self.task_started_at = Some(now);
    }

    /// Return the worker to idle and hand back the task it held.
    pub fn release(&mut self) -> Option<TaskId> {
        self.state = WorkerState::Idle;
        self.task_started_at = None;
        self.current_task.take()
    }

    /// When the current task was assigned, if any.
    pub fn busy_since(&self) -> Option<Instant> {
        self.task_started_at
    }

    /// Time spent on the current task, if any.
    pub fn busy_for(&self, now: Instant) -> Option<Duration> {
        self.task_started_at
            .map(|started| now.saturating_duration_since(started))
    }

    pub fn knows(&self, hash: &FunctionHash) -> bool {
        self.known_functions.contains(hash)
    }

    pub fn mark_registered(&mut self, hash: FunctionHash) {
        self.known_functions.insert(hash);
    }

    /// Queue a request for the worker thread.
    ///
    /// Fails only when the thread has already gone away.
    pub fn send(&self, request: WorkerRequest) -> Result<(), PoolError> {
        self.requests
            .send(request)
            .map_err(|_| PoolError::Protocol(format!("{} is no longer receiving", self.id)))
    }

    /// Kill the worker without waiting for its current task.
    ///
    /// Returns the thread so the caller can decide whether to wait for it.
    pub fn terminate(&mut self) -> Option<WorkerExit> {
        self.state = WorkerState::Terminating;
        if let Some(kill_tx) = self.kill_tx.take() {
            let _ = kill_tx.send(());
        }
        self.thread.take()
    }

    /// Ask an idle worker to exit after its current request.
    pub fn shutdown(&mut self) -> Option<WorkerExit> {
        let _ = self.requests.send(WorkerRequest::Shutdown);
        self.state = WorkerState::Terminating;
        self.thread.take()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use taskpool_api::{Args, FunctionSource};

    use self::protocol::WorkerReply;

    fn registry() -> Arc<TaskRegistry> {
        let registry = TaskRegistry::builder()
            .blocking_fn("echo", |args: Args| Ok(json!(args)))
            .task_fn("hang", |_args: Args| async move {
                futures::future::pending::<()>().await;
                Ok::<_, anyhow::Error>(json!(null))
            })
            .task_fn("explode", |_args: Args| async move {
                if true {
                    panic!("kaboom");
                }
                Ok::<_, anyhow::Error>(json!(null))
            })
            .build()
            .unwrap();
        Arc::new(registry)
    }

    fn source(name: &str) -> (Arc<str>, FunctionHash) {
        let text = FunctionSource::new(name).to_json().unwrap();
        let hash: FunctionHash = Arc::from(FunctionSource::digest(&text));
        (Arc::from(text), hash)
    }

    async fn run_on(worker: &Worker, name: &str, task_id: TaskId) {
        let (source, hash) = source(name);
        worker
            .send(WorkerRequest::RegisterFunction { task_id, source, hash: hash.clone() })
            .unwrap();
        worker
            .send(WorkerRequest::ExecuteTask { task_id, hash, args: vec![json!(1)] })
            .unwrap();
    }

    #[tokio::test]
    async fn test_worker_round_trip_and_shutdown() {
        let (events_tx, mut events) = mpsc::unbounded_channel();
        let mut worker = Worker::spawn(WorkerId(1), "test-worker", registry(), events_tx).unwrap();
        assert_eq!(worker.state(), WorkerState::Idle);

        let task_id = TaskId::new();
        worker.assign(task_id, Instant::now());
        assert_eq!(worker.state(), WorkerState::Busy);
        run_on(&worker, "echo", task_id).await;

        let mut replies = Vec::new();
        while replies.len() < 2 {
            match events.recv().await.unwrap() {
                WorkerEvent::Reply { worker: id, reply } => {
                    assert_eq!(id, WorkerId(1));
                    replies.push(reply);
                }
                other => panic!("unexpected event {other:?}"),
            }
        }
        assert_eq!(replies[0].kind(), "function_registered");
        assert_eq!(replies[1], WorkerReply::TaskResult { task_id, result: json!([1]) });
        assert_eq!(worker.release(), Some(task_id));

        let handle = worker.shutdown().unwrap();
        handle.join().unwrap();
        match events.recv().await.unwrap() {
            WorkerEvent::Exited { reason, .. } => assert!(reason.is_none()),
            other => panic!("unexpected event {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_terminate_kills_hung_task() {
        let (events_tx, mut events) = mpsc::unbounded_channel();
        let mut worker = Worker::spawn(WorkerId(2), "test-worker", registry(), events_tx).unwrap();

        run_on(&worker, "hang", TaskId::new()).await;
        // wait for the registration ack so the hang is in flight
        assert!(matches!(events.recv().await, Some(WorkerEvent::Reply { .. })));

        let handle = worker.terminate().unwrap();
        assert_eq!(worker.state(), WorkerState::Terminating);
        handle.join().unwrap();
        assert!(matches!(
            events.recv().await,
            Some(WorkerEvent::Exited { reason: None, .. })
        ));
    }

    #[tokio::test]
    async fn test_panic_reports_crash() {
        let (events_tx, mut events) = mpsc::unbounded_channel();
        let mut worker = Worker::spawn(WorkerId(3), "test-worker", registry(), events_tx).unwrap();

        run_on(&worker, "explode", TaskId::new()).await;
        loop {
            match events.recv().await.unwrap() {
                WorkerEvent::Reply { .. } => continue,
                WorkerEvent::Exited { reason, .. } => {
                    assert!(reason.unwrap().contains("kaboom"));
                    break;
                }
            }
        }
        if let Some(handle) = worker.terminate() {
            handle.join().unwrap();
        }
        assert!(worker.send(WorkerRequest::Shutdown).is_err());
    }

    #[tokio::test]
    async fn test_exit_signals_when_thread_returns() {
        let (release_tx, release_rx) = std::sync::mpsc::channel::<()>();
        let mut exit = WorkerExit::spawn(thread::Builder::new(), move || {
            let _ = release_rx.recv();
        })
        .unwrap();
        assert!(!exit.has_exited());

        release_tx.send(()).unwrap();
        exit.exited().await;
        assert!(exit.has_exited());
        exit.join().unwrap();
    }

    #[test]
    fn test_busy_for_tracks_assignment() {
        let (events_tx, _events) = mpsc::unbounded_channel();
        let mut worker = Worker::spawn(WorkerId(4), "test-worker", registry(), events_tx).unwrap();
        let start = Instant::now();
        assert!(worker.busy_for(start).is_none());

        worker.assign(TaskId::new(), start);
        let later = start + Duration::from_millis(250);
        assert_eq!(worker.busy_for(later), Some(Duration::from_millis(250)));

        worker.release();
        assert!(worker.busy_for(later).is_none());

        let (_, hash) = source("echo");
        assert!(!worker.knows(&hash));
        worker.mark_registered(hash.clone());
        assert!(worker.knows(&hash));

        if let Some(handle) = worker.shutdown() {
            handle.join().unwrap();
        }
    }
}
