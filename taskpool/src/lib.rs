// Taskpool
//
// A bounded, self-healing pool of worker threads. Tasks are registered by
// name in a `TaskRegistry`, submitted with JSON arguments, and run on
// isolated workers with a per-task timeout and retry budget.

pub mod config;
pub mod handle;
pub mod logging;
pub mod pool;

mod manager;
mod worker;

pub use config::{PoolConfig, TaskPolicy};
pub use handle::TaskHandle;
pub use pool::Pool;

// Re-export the task vocabulary
pub use taskpool_api::{
    args, decode_arg, encode_result, expect_arity, task_fn, Args, BlockingFnTask, FnTask,
    FunctionSource, PoolError, PoolStats, TaskFn, TaskId, TaskOptions, TaskRegistry,
    TaskRegistryBuilder, TaskResult,
};

/// Crates reached by `#[task_fn]` output when the caller depends on this
/// crate alone. Not a public API.
#[doc(hidden)]
pub mod __private {
    pub use taskpool_api;
}
