//! # Pool Handle
//!
//! [`Pool`] is the public face of the task pool. It validates submissions,
//! builds the task record and forwards it to the pool manager; all scheduling
//! happens on the manager's side.
//!
//! ## Usage Example
//!
//! ```rust
//! use taskpool::{args, task_fn, Pool, PoolConfig, TaskRegistry};
//!
//! #[task_fn]
//! fn add(a: i64, b: i64) -> i64 {
//!     a + b
//! }
//!
//! # #[tokio::main]
//! # async fn main() -> anyhow::Result<()> {
//! let registry = TaskRegistry::builder().task(AddTask).build()?;
//! let pool = Pool::new(PoolConfig::default(), registry)?;
//!
//! let sum: i64 = pool.run("add", args![2, 3]).decode().await?;
//! assert_eq!(sum, 5);
//!
//! pool.destroy().await?;
//! # Ok(())
//! # }
//! ```

use std::fmt;
use std::sync::Arc;

use taskpool_api::{Args, PoolError, PoolStats, TaskId, TaskOptions, TaskRegistry};
use tokio::runtime::Handle;
use tokio::sync::{mpsc, oneshot, watch};

use crate::config::PoolConfig;
use crate::handle::TaskHandle;
use crate::manager::task::{Completion, Task};
use crate::manager::{Command, PoolManager};

/// Bounded, self-healing pool of worker threads.
///
/// Cloning is cheap and every clone drives the same pool. The pool lives
/// until [`destroy`](Pool::destroy) is called or the last clone is dropped.
#[derive(Clone)]
pub struct Pool {
    inner: Arc<PoolInner>,
}

struct PoolInner {
    config: PoolConfig,
    registry: Arc<TaskRegistry>,
    commands: mpsc::UnboundedSender<Command>,
    stats: watch::Receiver<PoolStats>,
}

impl fmt::Debug for Pool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Pool")
            .field("config", &self.inner.config)
            .field("registry", &self.inner.registry)
            .field("stats", &self.stats())
            .finish()
    }
}

impl Pool {
    /// Create a pool on the current tokio runtime.
    ///
    /// `min_pool_size` workers are started before this returns.
    pub fn new(config: PoolConfig, registry: TaskRegistry) -> Result<Self, PoolError> {
        let handle = Handle::try_current().map_err(|e| PoolError::NoRuntime(e.to_string()))?;
        Self::with_handle(config, registry, handle)
    }

    /// Create a pool whose manager runs on `handle`.
    pub fn with_handle(
        config: PoolConfig,
        registry: TaskRegistry,
        handle: Handle,
    ) -> Result<Self, PoolError> {
        config.validate()?;
        let registry = Arc::new(registry);

        let (stats_tx, stats) = watch::channel(PoolStats::default());
        let (commands, commands_rx) = mpsc::unbounded_channel();
        let (manager, events_rx) = PoolManager::new(config.clone(), Arc::clone(&registry), stats_tx)?;
        handle.spawn(manager.run(commands_rx, events_rx));

        Ok(Self {
            inner: Arc::new(PoolInner {
                config,
                registry,
                commands,
                stats,
            }),
        })
    }

    /// Submit `task` with the pool's default timeout and retry budget.
    pub fn run(&self, task: &str, args: Args) -> TaskHandle {
        self.run_with_options(task, TaskOptions::default(), args)
    }

    /// Submit `task`, overriding the pool policy with `options`.
    ///
    /// Submission errors (unknown task type, invalid options, destroyed pool)
    /// surface when the returned handle is awaited.
    pub fn run_with_options(&self, task: &str, options: TaskOptions, args: Args) -> TaskHandle {
        let (tx, rx) = oneshot::channel();
        match self.submit(task, options, args, Completion::Reply(tx)) {
            Ok(id) => TaskHandle::new(id, rx),
            Err(e) => TaskHandle::failed(e),
        }
    }

    /// Submit `task` without a result channel.
    ///
    /// Only submission errors are returned; failures while running are
    /// logged and otherwise dropped.
    pub fn fire_and_forget(&self, task: &str, args: Args) -> Result<TaskId, PoolError> {
        self.fire_and_forget_with_options(task, TaskOptions::default(), args)
    }

    pub fn fire_and_forget_with_options(
        &self,
        task: &str,
        options: TaskOptions,
        args: Args,
    ) -> Result<TaskId, PoolError> {
        self.submit(task, options, args, Completion::FireAndForget)
    }

    /// Latest snapshot published by the manager.
    pub fn stats(&self) -> PoolStats {
        *self.inner.stats.borrow()
    }

    pub fn config(&self) -> &PoolConfig {
        &self.inner.config
    }

    pub fn registry(&self) -> &TaskRegistry {
        &self.inner.registry
    }

    /// Reject every queued and running task with [`PoolError::PoolDestroyed`],
    /// kill all workers and stop the manager.
    ///
    /// Calling it again, from this or any other clone, returns
    /// [`PoolError::PoolDestroyed`].
    pub async fn destroy(&self) -> Result<(), PoolError> {
        let (tx, rx) = oneshot::channel();
        self.inner
            .commands
            .send(Command::Destroy(tx))
            .map_err(|_| PoolError::PoolDestroyed)?;
        rx.await.map_err(|_| PoolError::PoolDestroyed)
    }

    fn submit(
        &self,
        task: &str,
        options: TaskOptions,
        args: Args,
        completion: Completion,
    ) -> Result<TaskId, PoolError> {
        let function = self.inner.registry.lookup(task)?;
        let policy = self.inner.config.task_policy(&options)?;
        let task = Task::new(function, args, policy, completion);
        let id = task.id;
        self.inner
            .commands
            .send(Command::Submit(task))
            .map_err(|_| PoolError::PoolDestroyed)?;
        Ok(id)
    }
}
