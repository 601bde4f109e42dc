//! # Pool Manager
//!
//! The single owner of all scheduling state: the worker set and its idle
//! partition, the task queue, the active-task map and the function cache.
//! It runs as one tokio task and reacts to three kinds of input, one at a
//! time, so none of that state needs a lock:
//!
//! - commands from [`Pool`](crate::Pool) handles (submit, destroy)
//! - events from worker threads (protocol replies, exits)
//! - ticks of the timeout sweeper
//!
//! After every input the manager publishes a fresh [`PoolStats`] snapshot.

pub(crate) mod cache;
pub(crate) mod queue;
pub(crate) mod task;

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::{Duration, Instant};

use taskpool_api::{PoolError, PoolStats, TaskId, TaskRegistry};
use tokio::sync::{mpsc, oneshot, watch};
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn, Instrument};

use crate::config::PoolConfig;
use crate::worker::protocol::{WorkerEvent, WorkerId, WorkerReply, WorkerRequest};
use crate::worker::{Worker, WorkerExit, WorkerState};
use crate::{log_scheduler, log_task, log_worker, pool_span};

use self::cache::FunctionCache;
use self::queue::TaskQueue;
use self::task::{Failure, Task};

/// Requests from pool handles to the manager
pub(crate) enum Command {
    Submit(Task),
    Destroy(oneshot::Sender<()>),
}

#[derive(Debug, Default)]
struct Counters {
    registrations_sent: u64,
    tasks_completed: u64,
    tasks_failed: u64,
    tasks_retried: u64,
    workers_replaced: u64,
}

pub(crate) struct PoolManager {
    config: PoolConfig,
    registry: Arc<TaskRegistry>,

    workers: HashMap<WorkerId, Worker>,
    /// Idle workers in the order they became idle
    idle: VecDeque<WorkerId>,
    queue: TaskQueue,
    active: HashMap<TaskId, Task>,
    cache: FunctionCache,

    /// Handed to every spawned worker; the receiving end lives in `run`
    events_tx: mpsc::UnboundedSender<WorkerEvent>,
    stats_tx: watch::Sender<PoolStats>,
    next_worker_id: u64,
    counters: Counters,
}

impl PoolManager {
    /// Build the manager and eagerly spawn `min_pool_size` workers.
    pub fn new(
        config: PoolConfig,
        registry: Arc<TaskRegistry>,
        stats_tx: watch::Sender<PoolStats>,
    ) -> Result<(Self, mpsc::UnboundedReceiver<WorkerEvent>), PoolError> {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let mut manager = Self {
            config,
            registry,
            workers: HashMap::new(),
            idle: VecDeque::new(),
            queue: TaskQueue::new(),
            active: HashMap::new(),
            cache: FunctionCache::new(),
            events_tx,
            stats_tx,
            next_worker_id: 0,
            counters: Counters::default(),
        };

        for _ in 0..manager.config.min_pool_size {
            if let Err(e) = manager.spawn_worker() {
                let _ = manager.terminate_all();
                return Err(e);
            }
        }
        manager.publish_stats();
        info!(
            workers = manager.workers.len(),
            max_pool_size = manager.config.max_pool_size,
            "task pool started"
        );

        Ok((manager, events_rx))
    }

    /// Event loop. Returns once the pool has been destroyed, either by an
    /// explicit command or because every pool handle was dropped.
    pub async fn run(
        mut self,
        mut commands: mpsc::UnboundedReceiver<Command>,
        mut events: mpsc::UnboundedReceiver<WorkerEvent>,
    ) {
        let mut sweeper = tokio::time::interval(self.config.sweep_interval);
        sweeper.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // the first tick completes immediately
        sweeper.tick().await;

        loop {
            let deadline = self.next_deadline();
            let wake_at = deadline.unwrap_or_else(|| Instant::now() + self.config.sweep_interval);
            tokio::select! {
                command = commands.recv() => match command {
                    Some(Command::Submit(task)) => self.submit(task),
                    Some(Command::Destroy(reply)) => {
                        self.destroy().await;
                        let _ = reply.send(());
                        return;
                    }
                    None => {
                        debug!("all pool handles dropped");
                        self.destroy().await;
                        return;
                    }
                },
                Some(event) = events.recv() => self.handle_event(event),
                _ = sweeper.tick() => self.sweep_timeouts(Instant::now()),
                _ = tokio::time::sleep_until(tokio::time::Instant::from_std(wake_at)), if deadline.is_some() => {
                    self.sweep_timeouts(Instant::now())
                }
            }
            self.publish_stats();
        }
    }

    fn submit(&mut self, task: Task) {
        log_task!(task.id, "queued", function = task.name());
        self.queue.push_back(task);
        self.run_next();
    }

    /// Assign queued tasks to idle workers, growing the pool up to
    /// `max_pool_size` when nobody is idle.
    fn run_next(&mut self) {
        while !self.queue.is_empty() {
            if self.idle.is_empty() && self.workers.len() < self.config.max_pool_size {
                if let Err(e) = self.spawn_worker() {
                    error!(error = %e, "could not grow the pool");
                }
            }
            let Some(worker_id) = self.idle.pop_front() else {
                log_scheduler!("saturated", queued = self.queue.len());
                return;
            };
            let Some(task) = self.queue.pop_front() else {
                self.idle.push_front(worker_id);
                return;
            };
            self.dispatch(worker_id, task);
        }
    }

    /// Hand `task` to an idle worker, registering its function first if the
    /// worker has not seen it yet.
    fn dispatch(&mut self, worker_id: WorkerId, task: Task) {
        let (hash, source) = match self.cache.intern(task.function.as_ref()) {
            Ok(entry) => entry,
            Err(e) => {
                self.idle.push_front(worker_id);
                self.fail_without_retry(task, e);
                return;
            }
        };
        let Some(worker) = self.workers.get_mut(&worker_id) else {
            self.queue.push_front(task);
            return;
        };

        worker.assign(task.id, Instant::now());
        let request = if worker.knows(&hash) {
            WorkerRequest::ExecuteTask {
                task_id: task.id,
                hash,
                args: task.args.clone(),
            }
        } else {
            self.counters.registrations_sent += 1;
            WorkerRequest::RegisterFunction {
                task_id: task.id,
                source,
                hash,
            }
        };
        log_scheduler!("dispatch", task = %task.id, worker = %worker_id, attempt = task.attempts());

        let sent = worker.send(request);
        self.active.insert(task.id, task);
        if let Err(e) = sent {
            warn!(worker = %worker_id, error = %e, "worker unreachable at dispatch");
            self.retire_worker(worker_id, Failure::Crash(e.to_string()));
        }
    }

    fn handle_event(&mut self, event: WorkerEvent) {
        match event {
            WorkerEvent::Reply { worker, reply } => self.handle_reply(worker, reply),
            WorkerEvent::Exited { worker, reason } => {
                // orderly exits are always initiated by the manager, which
                // removes the worker first
                if self.workers.contains_key(&worker) {
                    let reason = reason.unwrap_or_else(|| "worker exited unexpectedly".to_string());
                    log_worker!(worker, "crashed", %reason);
                    self.retire_worker(worker, Failure::Crash(reason));
                    self.run_next();
                }
            }
        }
    }

    fn handle_reply(&mut self, worker_id: WorkerId, reply: WorkerReply) {
        let task_id = reply.task_id();
        let Some(worker) = self.workers.get_mut(&worker_id) else {
            // late reply from a worker that was already killed
            debug!(worker = %worker_id, task = %task_id, kind = reply.kind(), "dropping reply from retired worker");
            return;
        };
        if worker.current_task() != Some(task_id) || !self.active.contains_key(&task_id) {
            warn!(worker = %worker_id, task = %task_id, kind = reply.kind(), "reply for a task the worker does not hold");
            return;
        }

        if let WorkerReply::FunctionRegistered { hash, .. } = reply {
            worker.mark_registered(hash.clone());
            let Some(task) = self.active.get(&task_id) else { return };
            let request = WorkerRequest::ExecuteTask {
                task_id,
                hash,
                args: task.args.clone(),
            };
            if let Err(e) = worker.send(request) {
                self.retire_worker(worker_id, Failure::Crash(e.to_string()));
                self.run_next();
            }
            return;
        }

        worker.release();
        self.idle.push_back(worker_id);
        let Some(task) = self.active.remove(&task_id) else { return };

        match reply {
            WorkerReply::TaskResult { result, .. } => {
                log_task!(task_id, "completed", attempts = task.attempts());
                self.counters.tasks_completed += 1;
                task.resolve(result);
            }
            WorkerReply::TaskError { message, .. } => {
                log_task!(task_id, "failed", attempt = task.attempts(), %message);
                self.retry_or_reject(task, Failure::Execution(message));
            }
            WorkerReply::ProtocolError { detail, .. } => {
                warn!(worker = %worker_id, task = %task_id, %detail, "protocol error");
                self.fail_without_retry(task, PoolError::Protocol(detail));
            }
            WorkerReply::FunctionRegistered { .. } => {}
        }
        self.run_next();
    }

    /// Earliest instant at which a running task overruns its timeout.
    fn next_deadline(&self) -> Option<Instant> {
        self.workers
            .values()
            .filter_map(|w| {
                let task = self.active.get(&w.current_task()?)?;
                w.busy_since()?.checked_add(task.timeout)
            })
            .min()
    }

    /// Kill every worker whose task has reached its deadline.
    fn sweep_timeouts(&mut self, now: Instant) {
        let expired: Vec<(WorkerId, Duration)> = self
            .workers
            .values()
            .filter(|w| w.state() == WorkerState::Busy)
            .filter_map(|w| {
                let task = self.active.get(&w.current_task()?)?;
                let elapsed = w.busy_for(now)?;
                (elapsed >= task.timeout).then_some((w.id(), task.timeout))
            })
            .collect();
        if expired.is_empty() {
            return;
        }

        for (worker_id, timeout) in expired {
            log_worker!(worker_id, "timed_out", ?timeout);
            self.retire_worker(worker_id, Failure::Timeout(timeout));
        }
        self.run_next();
    }

    /// Remove a worker from the pool, kill its thread, restore the minimum
    /// pool size and retry whatever task it held.
    fn retire_worker(&mut self, worker_id: WorkerId, failure: Failure) {
        let Some(mut worker) = self.workers.remove(&worker_id) else {
            return;
        };
        self.idle.retain(|id| *id != worker_id);
        // detached: a thread stuck in non-yielding code cannot be joined
        drop(worker.terminate());

        self.replenish();

        if let Some(task) = worker.current_task().and_then(|id| self.active.remove(&id)) {
            self.retry_or_reject(task, failure);
        }
    }

    fn retry_or_reject(&mut self, mut task: Task, failure: Failure) {
        if task.can_retry() {
            task.retries += 1;
            self.counters.tasks_retried += 1;
            log_task!(task.id, "retrying", attempt = task.attempts(), ?failure);
            self.queue.push_front(task);
        } else {
            self.counters.tasks_failed += 1;
            let error = failure.into_error(task.name(), task.attempts());
            log_task!(task.id, "rejected", %error);
            task.reject(error);
        }
    }

    fn fail_without_retry(&mut self, task: Task, error: PoolError) {
        self.counters.tasks_failed += 1;
        task.reject(error);
    }

    fn replenish(&mut self) {
        let missing = self.config.min_pool_size.saturating_sub(self.workers.len());
        if missing == 0 {
            return;
        }
        let span = pool_span!("replenish", missing);
        let _guard = span.enter();
        for _ in 0..missing {
            match self.spawn_worker() {
                Ok(_) => self.counters.workers_replaced += 1,
                Err(e) => {
                    error!(error = %e, "could not replace worker");
                    break;
                }
            }
        }
    }

    fn spawn_worker(&mut self) -> Result<WorkerId, PoolError> {
        self.next_worker_id += 1;
        let id = WorkerId(self.next_worker_id);
        let worker = Worker::spawn(
            id,
            &self.config.thread_name_prefix,
            Arc::clone(&self.registry),
            self.events_tx.clone(),
        )?;
        self.workers.insert(id, worker);
        self.idle.push_back(id);
        log_worker!(id, "spawned", total = self.workers.len());
        Ok(id)
    }

    /// Stop every worker and hand back the threads to join. Idle workers
    /// are asked to exit; busy ones are killed.
    fn terminate_all(&mut self) -> Vec<WorkerExit> {
        self.idle.clear();
        self.workers
            .drain()
            .filter_map(|(_, mut worker)| match worker.state() {
                WorkerState::Idle => worker.shutdown(),
                _ => worker.terminate(),
            })
            .collect()
    }

    /// Reject everything outstanding, kill all workers and clear state.
    async fn destroy(&mut self) {
        let span = pool_span!("destroy", workers = self.workers.len(), queued = self.queue.len(), active = self.active.len());
        async {
            for task in self.queue.drain() {
                task.reject(PoolError::PoolDestroyed);
            }
            for (_, task) in self.active.drain() {
                task.reject(PoolError::PoolDestroyed);
            }

            let exits = self.terminate_all();
            self.cache.clear();
            self.publish_stats();

            let stuck = join_with_timeout(exits, self.config.shutdown_timeout).await;
            if stuck > 0 {
                warn!(stuck, "worker threads did not exit in time and were detached");
            }
            info!("task pool destroyed");
        }
        .instrument(span)
        .await
    }

    fn snapshot(&self) -> PoolStats {
        let busy = self
            .workers
            .values()
            .filter(|w| w.state() == WorkerState::Busy)
            .count();
        PoolStats {
            total_workers: self.workers.len(),
            idle_workers: self.idle.len(),
            busy_workers: busy,
            queued_tasks: self.queue.len(),
            active_tasks: self.active.len(),
            function_cache_size: self.cache.len(),
            registrations_sent: self.counters.registrations_sent,
            tasks_completed: self.counters.tasks_completed,
            tasks_failed: self.counters.tasks_failed,
            tasks_retried: self.counters.tasks_retried,
            workers_replaced: self.counters.workers_replaced,
        }
    }

    fn publish_stats(&self) {
        self.stats_tx.send_replace(self.snapshot());
    }
}

/// Wait up to `timeout` for worker threads to finish, joining those that do.
/// Returns how many were left running.
async fn join_with_timeout(mut exits: Vec<WorkerExit>, timeout: Duration) -> usize {
    let all_exited = async {
        for exit in exits.iter_mut() {
            exit.exited().await;
        }
    };
    if tokio::time::timeout(timeout, all_exited).await.is_err() {
        debug!(timeout = ?timeout, "shutdown timeout reached");
    }

    let mut stuck = 0;
    for mut exit in exits {
        if exit.has_exited() {
            // a panicking worker already reported itself
            let _ = exit.join();
        } else {
            stuck += 1;
        }
    }
    stuck
}
