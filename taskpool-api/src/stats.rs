use serde::Serialize;

/// Point-in-time snapshot of a pool.
///
/// The first six fields describe the pool's current shape; the remaining
/// counters are monotonic over the pool's lifetime.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct PoolStats {
    pub total_workers: usize,
    pub idle_workers: usize,
    pub busy_workers: usize,
    pub queued_tasks: usize,
    pub active_tasks: usize,
    pub function_cache_size: usize,

    /// `register_function` messages sent to workers.
    pub registrations_sent: u64,
    pub tasks_completed: u64,
    /// Tasks rejected after exhausting their retries.
    pub tasks_failed: u64,
    pub tasks_retried: u64,
    /// Workers spawned to restore the minimum pool size.
    pub workers_replaced: u64,
}

impl PoolStats {
    /// Whether the worker partition is consistent: every worker is either
    /// idle or holds exactly one active task.
    pub fn is_balanced(&self) -> bool {
        self.total_workers == self.idle_workers + self.busy_workers
            && self.busy_workers == self.active_tasks
    }
}
