use std::time::Duration;

use taskpool_api::{PoolError, TaskOptions};

pub const DEFAULT_MIN_POOL_SIZE: usize = 2;
pub const DEFAULT_MAX_POOL_SIZE: usize = 8;
pub const DEFAULT_TASK_TIMEOUT: Duration = Duration::from_secs(300);
pub const DEFAULT_MAX_RETRIES: u32 = 1;
pub const DEFAULT_SWEEP_INTERVAL: Duration = Duration::from_secs(5);
pub const DEFAULT_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(5);
pub const DEFAULT_THREAD_NAME_PREFIX: &str = "taskpool-worker";

// --- Pool Configuration ---

/// Configuration for a [`Pool`](crate::Pool).
#[derive(Clone, Debug)]
pub struct PoolConfig {
    /// Workers created eagerly; the pool replaces crashed workers to stay at
    /// or above this size.
    pub min_pool_size: usize,

    /// Upper bound on live workers, and therefore on concurrently running tasks.
    pub max_pool_size: usize,

    /// Default deadline for a single task attempt.
    pub task_timeout: Duration,

    /// Default number of retries after a failed first attempt.
    pub max_retries: u32,

    /// Period of the timeout sweeper. Running tasks are also checked at
    /// their own deadline, so this only bounds how long a sweep can lag.
    pub sweep_interval: Duration,

    /// How long `destroy` waits for worker threads to exit before detaching them.
    pub shutdown_timeout: Duration,

    /// Prefix for worker OS thread names.
    pub thread_name_prefix: String,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            min_pool_size: DEFAULT_MIN_POOL_SIZE,
            max_pool_size: DEFAULT_MAX_POOL_SIZE,
            task_timeout: DEFAULT_TASK_TIMEOUT,
            max_retries: DEFAULT_MAX_RETRIES,
            sweep_interval: DEFAULT_SWEEP_INTERVAL,
            shutdown_timeout: DEFAULT_SHUTDOWN_TIMEOUT,
            thread_name_prefix: DEFAULT_THREAD_NAME_PREFIX.to_string(),
        }
    }
}

/// Effective timeout and retry budget of one task.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TaskPolicy {
    pub timeout: Duration,
    pub max_retries: u32,
}

impl PoolConfig {
    /// Check the pool-size invariant `0 < min_pool_size <= max_pool_size`
    /// and that every duration is non-zero.
    pub fn validate(&self) -> Result<(), PoolError> {
        if self.min_pool_size == 0 {
            return Err(PoolError::InvalidConfig(
                "min_pool_size must be at least 1".to_string(),
            ));
        }
        if self.min_pool_size > self.max_pool_size {
            return Err(PoolError::InvalidConfig(format!(
                "min_pool_size ({}) exceeds max_pool_size ({})",
                self.min_pool_size, self.max_pool_size
            )));
        }
        for (field, value) in [
            ("task_timeout", self.task_timeout),
            ("sweep_interval", self.sweep_interval),
            ("shutdown_timeout", self.shutdown_timeout),
        ] {
            if value.is_zero() {
                return Err(PoolError::InvalidConfig(format!("{field} must be non-zero")));
            }
        }
        Ok(())
    }

    /// Merge per-task options with the pool defaults.
    /// Options that are set win; the rest fall back to this config.
    pub fn task_policy(&self, options: &TaskOptions) -> Result<TaskPolicy, PoolError> {
        let timeout = options.timeout.unwrap_or(self.task_timeout);
        if timeout.is_zero() {
            return Err(PoolError::InvalidConfig(
                "task timeout must be positive".to_string(),
            ));
        }
        Ok(TaskPolicy {
            timeout,
            max_retries: options.max_retries.unwrap_or(self.max_retries),
        })
    }
}
