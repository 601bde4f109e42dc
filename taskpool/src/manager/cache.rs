use std::collections::HashMap;
use std::sync::Arc;

use taskpool_api::{FunctionSource, PoolError, TaskFn};

use crate::worker::protocol::FunctionHash;

/// Pool-wide function cache: content hash → serialized function source.
///
/// Serializing and hashing happen once per task function for the pool's
/// lifetime. Whether a particular worker still needs a registration is
/// tracked per worker, not here.
#[derive(Debug, Default)]
pub(crate) struct FunctionCache {
    by_name: HashMap<String, FunctionHash>,
    sources: HashMap<FunctionHash, Arc<str>>,
}

impl FunctionCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Hash and serialized source of `function`, computing them on first use.
    pub fn intern(&mut self, function: &dyn TaskFn) -> Result<(FunctionHash, Arc<str>), PoolError> {
        if let Some(hash) = self.by_name.get(function.name()) {
            if let Some(source) = self.sources.get(hash) {
                return Ok((hash.clone(), source.clone()));
            }
        }

        let source = function.source().to_json()?;
        let hash: FunctionHash = Arc::from(FunctionSource::digest(&source));
        let source: Arc<str> = Arc::from(source);
        self.by_name.insert(function.name().to_string(), hash.clone());
        self.sources.insert(hash.clone(), source.clone());
        Ok((hash, source))
    }

    /// Number of distinct function sources.
    pub fn len(&self) -> usize {
        self.sources.len()
    }

    pub fn clear(&mut self) {
        self.by_name.clear();
        self.sources.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use taskpool_api::{Args, FnTask};

    fn function(name: &str) -> Arc<dyn TaskFn> {
        Arc::new(FnTask::new(name, |_args: Args| async move {
            Ok::<_, anyhow::Error>(json!(null))
        }))
    }

    #[test]
    fn test_intern_is_stable() {
        let mut cache = FunctionCache::new();
        let add = function("add");

        let (first, source) = cache.intern(add.as_ref()).unwrap();
        let (second, _) = cache.intern(add.as_ref()).unwrap();
        assert_eq!(first, second);
        assert_eq!(cache.len(), 1);
        assert_eq!(&*source, r#"{"name":"add"}"#);
        assert_eq!(&*first, FunctionSource::digest(&source));
    }

    #[test]
    fn test_distinct_functions_get_distinct_entries() {
        let mut cache = FunctionCache::new();
        let (add, _) = cache.intern(function("add").as_ref()).unwrap();
        let (mul, _) = cache.intern(function("mul").as_ref()).unwrap();
        assert_ne!(add, mul);
        assert_eq!(cache.len(), 2);

        cache.clear();
        assert_eq!(cache.len(), 0);
        let (again, _) = cache.intern(function("add").as_ref()).unwrap();
        assert_eq!(again, add);
    }
}
