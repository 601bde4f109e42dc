//! # Task Registry
//!
//! The registry maps task names to their handlers. It is built once, frozen,
//! and shared read-only with every worker, which is how a worker turns a
//! received [`FunctionSource`] back into something it can call.
//!
//! ```rust
//! use serde_json::json;
//! use taskpool_api::{decode_arg, Args, TaskRegistry};
//!
//! let registry = TaskRegistry::builder()
//!     .task_fn("add", |args: Args| async move {
//!         let a: i64 = decode_arg(&args, 0)?;
//!         let b: i64 = decode_arg(&args, 1)?;
//!         Ok::<_, anyhow::Error>(json!(a + b))
//!     })
//!     .build()
//!     .unwrap();
//!
//! assert!(registry.contains("add"));
//! ```

use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::sync::Arc;

use serde_json::Value;

use crate::errors::PoolError;
use crate::task::{BlockingFnTask, FnTask, FunctionSource, TaskFn};
use crate::types::Args;

/// Immutable table of task functions keyed by name.
#[derive(Clone, Default)]
pub struct TaskRegistry {
    handlers: HashMap<String, Arc<dyn TaskFn>>,
}

impl fmt::Debug for TaskRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskRegistry")
            .field("tasks", &self.names())
            .finish()
    }
}

impl TaskRegistry {
    pub fn builder() -> TaskRegistryBuilder {
        TaskRegistryBuilder::default()
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn TaskFn>> {
        self.handlers.get(name).cloned()
    }

    /// Look up a handler by name, failing with [`PoolError::UnknownTask`].
    pub fn lookup(&self, name: &str) -> Result<Arc<dyn TaskFn>, PoolError> {
        self.get(name)
            .ok_or_else(|| PoolError::UnknownTask(name.to_string()))
    }

    /// Reconstruct a live handler from its serialized descriptor.
    ///
    /// The handler's current descriptor must match exactly; a stale signature
    /// is a protocol error rather than a silent mismatch.
    pub fn resolve(&self, source: &FunctionSource) -> Result<Arc<dyn TaskFn>, PoolError> {
        let handler = self.lookup(&source.name)?;
        if handler.source() != *source {
            return Err(PoolError::Protocol(format!(
                "function `{}` does not match the registered signature",
                source.name
            )));
        }
        Ok(handler)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.handlers.contains_key(name)
    }

    /// Registered names in sorted order.
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.handlers.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}

/// Builder collecting task functions before the registry is frozen.
#[derive(Default)]
pub struct TaskRegistryBuilder {
    handlers: Vec<Arc<dyn TaskFn>>,
}

impl TaskRegistryBuilder {
    /// Add any [`TaskFn`] implementation, including `#[task_fn]` handlers.
    pub fn task<T: TaskFn>(mut self, task: T) -> Self {
        self.handlers.push(Arc::new(task));
        self
    }

    /// Add an async closure under `name`.
    pub fn task_fn<F, Fut>(self, name: impl Into<String>, f: F) -> Self
    where
        F: Fn(Args) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<Value>> + Send + 'static,
    {
        self.task(FnTask::new(name, f))
    }

    /// Add a synchronous closure under `name`.
    pub fn blocking_fn<F>(self, name: impl Into<String>, f: F) -> Self
    where
        F: Fn(Args) -> anyhow::Result<Value> + Send + Sync + 'static,
    {
        self.task(BlockingFnTask::new(name, f))
    }

    /// Freeze the registry. Fails if two handlers share a name.
    pub fn build(self) -> Result<TaskRegistry, PoolError> {
        let mut handlers = HashMap::with_capacity(self.handlers.len());
        for handler in self.handlers {
            let name = handler.name().to_string();
            if handlers.insert(name.clone(), handler).is_some() {
                return Err(PoolError::DuplicateTask(name));
            }
        }
        Ok(TaskRegistry { handlers })
    }
}
