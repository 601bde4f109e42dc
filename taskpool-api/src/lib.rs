//! # Taskpool API
//!
//! Vocabulary shared by the task pool and its callers: what a task function
//! is, how it is registered, how a submission can override the pool policy,
//! and what can go wrong.
//!
//! ## Core Components
//!
//! - **Task functions** ([`TaskFn`]): named units of work that take positional
//!   JSON arguments and return a JSON value
//! - **Registry** ([`TaskRegistry`]): the frozen name → handler table every
//!   worker is started with
//! - **Function sources** ([`FunctionSource`]): the serialized,
//!   content-hashed form of a task function used by the dispatch protocol
//! - **Errors** ([`PoolError`]) and **statistics** ([`PoolStats`])
//!
//! ## Usage Example
//!
//! ```rust
//! use taskpool_api::{args, task_fn, TaskRegistry};
//!
//! #[task_fn]
//! fn add(a: i64, b: i64) -> i64 {
//!     a + b
//! }
//!
//! let registry = TaskRegistry::builder().task(AddTask).build().unwrap();
//! assert_eq!(registry.names(), vec!["add"]);
//! assert_eq!(args![2, 3].len(), 2);
//! ```
//!
//! ## Module Organization
//!
//! - [`task`]: the task function trait, closure adapters and argument helpers
//! - [`registry`]: registry and builder
//! - [`errors`]: error type
//! - [`stats`]: pool statistics snapshot
//! - [`types`]: common type definitions

// lets `#[task_fn]` output name this crate from the inside
extern crate self as taskpool_api;

pub mod errors;
pub mod registry;
pub mod stats;
pub mod task;
pub mod types;

pub use errors::PoolError;
pub use registry::{TaskRegistry, TaskRegistryBuilder};
pub use stats::PoolStats;
pub use task::{
    decode_arg, encode_result, expect_arity, BlockingFnTask, FnTask, FunctionSource, TaskFn,
    TaskOptions,
};
pub use types::{Args, TaskId, TaskResult};

// Re-export the attribute macro
pub use taskpool_derive::task_fn;

/// Crates referenced by macro-generated code. Not a public API.
#[doc(hidden)]
pub mod __private {
    pub use anyhow;
    pub use async_trait;
    pub use serde_json;
}

/// Build an [`Args`] vector from serializable expressions.
///
/// ```rust
/// let args = taskpool_api::args![1, "two", [3, 4]];
/// assert_eq!(args[1], serde_json::json!("two"));
/// ```
#[macro_export]
macro_rules! args {
    () => {
        ::std::vec::Vec::<$crate::__private::serde_json::Value>::new()
    };
    ($($arg:expr),+ $(,)?) => {
        ::std::vec![$($crate::__private::serde_json::json!($arg)),+]
    };
}
