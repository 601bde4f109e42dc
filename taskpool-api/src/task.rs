//! # Task Functions
//!
//! A task function is the unit of work the pool knows how to run. Because
//! closures cannot be shipped between isolated workers, every callable is
//! registered up front under a stable name and identified on the wire by its
//! [`FunctionSource`], a small serializable descriptor whose content hash keys
//! the function caches on both sides of the dispatch protocol.
//!
//! Three ways to produce a [`TaskFn`]:
//! - implement the trait by hand,
//! - wrap a closure with [`FnTask`] (async) or [`BlockingFnTask`] (sync),
//! - annotate a plain function with `#[task_fn]`.

use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};

use crate::errors::PoolError;
use crate::types::Args;

/// A registrable unit of work.
///
/// Implementations must be stateless with respect to individual calls: the
/// same instance is shared by every worker and may run concurrently.
#[async_trait]
pub trait TaskFn: Send + Sync + 'static {
    /// Registry name used by callers to submit this task.
    fn name(&self) -> &str;

    /// Serializable descriptor sent to workers on registration.
    fn source(&self) -> FunctionSource {
        FunctionSource::new(self.name())
    }

    /// Run the task with the given positional arguments.
    async fn call(&self, args: Args) -> anyhow::Result<Value>;
}

impl fmt::Debug for dyn TaskFn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskFn").field("name", &self.name()).finish()
    }
}

/// Serialized, content-addressable form of a task function.
///
/// Two descriptors with the same name but different signatures hash
/// differently, so a worker never runs a handler it registered for an older
/// shape of the function.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FunctionSource {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub signature: Option<String>,
}

impl FunctionSource {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            signature: None,
        }
    }

    pub fn with_signature(mut self, signature: impl Into<String>) -> Self {
        self.signature = Some(signature.into());
        self
    }

    /// Serialize to the JSON text that is hashed and sent to workers.
    pub fn to_json(&self) -> Result<String, PoolError> {
        serde_json::to_string(self)
            .map_err(|e| PoolError::Protocol(format!("cannot serialize function source: {e}")))
    }

    pub fn from_json(text: &str) -> Result<Self, PoolError> {
        serde_json::from_str(text)
            .map_err(|e| PoolError::Protocol(format!("malformed function source: {e}")))
    }

    /// Hex-encoded SHA-256 of a serialized function source.
    pub fn digest(serialized: &str) -> String {
        let mut hasher = Sha256::new();
        hasher.update(serialized.as_bytes());
        hex::encode(hasher.finalize())
    }
}

/// Per-task overrides of the pool-wide policy.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TaskOptions {
    /// Deadline for a single attempt. Must be non-zero when set.
    pub timeout: Option<Duration>,
    /// Number of retries after the first attempt.
    pub max_retries: Option<u32>,
}

impl TaskOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = Some(max_retries);
        self
    }
}

/// Async closure adapter.
pub struct FnTask<F> {
    name: String,
    f: F,
}

impl<F, Fut> FnTask<F>
where
    F: Fn(Args) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<Value>> + Send + 'static,
{
    pub fn new(name: impl Into<String>, f: F) -> Self {
        Self { name: name.into(), f }
    }
}

#[async_trait]
impl<F, Fut> TaskFn for FnTask<F>
where
    F: Fn(Args) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<Value>> + Send + 'static,
{
    fn name(&self) -> &str {
        &self.name
    }

    async fn call(&self, args: Args) -> anyhow::Result<Value> {
        (self.f)(args).await
    }
}

/// Synchronous closure adapter.
///
/// The closure runs on the blocking pool of the worker's runtime, so a
/// timed-out call can be abandoned even though it cannot be interrupted.
/// A panic inside the closure is re-raised on the worker thread.
pub struct BlockingFnTask<F> {
    name: String,
    f: Arc<F>,
}

impl<F> BlockingFnTask<F>
where
    F: Fn(Args) -> anyhow::Result<Value> + Send + Sync + 'static,
{
    pub fn new(name: impl Into<String>, f: F) -> Self {
        Self {
            name: name.into(),
            f: Arc::new(f),
        }
    }
}

#[async_trait]
impl<F> TaskFn for BlockingFnTask<F>
where
    F: Fn(Args) -> anyhow::Result<Value> + Send + Sync + 'static,
{
    fn name(&self) -> &str {
        &self.name
    }

    async fn call(&self, args: Args) -> anyhow::Result<Value> {
        let f = Arc::clone(&self.f);
        match tokio::task::spawn_blocking(move || f(args)).await {
            Ok(result) => result,
            Err(err) if err.is_panic() => std::panic::resume_unwind(err.into_panic()),
            Err(err) => Err(anyhow::anyhow!("blocking task `{}` was cancelled: {err}", self.name)),
        }
    }
}

/// Fail unless exactly `expected` arguments were supplied.
pub fn expect_arity(task: &str, args: &Args, expected: usize) -> anyhow::Result<()> {
    if args.len() != expected {
        anyhow::bail!(
            "task `{task}` expects {expected} argument(s), got {}",
            args.len()
        );
    }
    Ok(())
}

/// Decode the positional argument at `index`.
pub fn decode_arg<T: DeserializeOwned>(args: &Args, index: usize) -> anyhow::Result<T> {
    let value = args
        .get(index)
        .ok_or_else(|| anyhow::anyhow!("missing argument #{index}"))?;
    T::deserialize(value).map_err(|e| anyhow::anyhow!("argument #{index} has the wrong shape: {e}"))
}

/// Encode a task's return value.
pub fn encode_result<T: Serialize>(value: T) -> anyhow::Result<Value> {
    serde_json::to_value(value).map_err(|e| anyhow::anyhow!("cannot serialize task result: {e}"))
}
