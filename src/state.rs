//! State shared across calls by stateful retry and circuit breakers.
//!
//! A stateful call is identified by a key. The key selects a [`RetryContext`] in a
//! [`RetryContextCache`] so that attempts made by separate calls add up.

use crate::invocation::{MethodKey, Value};
use crate::policy::RetryContext;
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex, PoisonError};

/// Default capacity of [`MapRetryContextCache`].
pub const DEFAULT_CONTEXT_CAPACITY: usize = 4096;

/// A retry context shared between the calls that use the same key.
pub type SharedContext = Arc<Mutex<RetryContext>>;

/// Derives the stateful retry key from call arguments.
pub trait MethodArgumentsKeyGenerator: Send + Sync + fmt::Debug {
    /// Return `None` to run the call once without retry state.
    fn key(&self, arguments: &[Value]) -> Option<String>;
}

/// Detects arguments that have never been seen, forcing a fresh retry context.
pub trait NewMethodArgumentsIdentifier: Send + Sync + fmt::Debug {
    fn is_new(&self, arguments: &[Value]) -> bool;
}

/// Key selecting a shared retry context.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RetryState {
    key: String,
    force_refresh: bool,
}

impl RetryState {
    pub fn new(key: impl Into<String>) -> Self {
        Self { key: key.into(), force_refresh: false }
    }

    /// Discard any existing context for this key.
    pub fn force_refresh(mut self, force: bool) -> Self {
        self.force_refresh = force;
        self
    }

    /// Default key: the method signature plus the JSON rendering of the arguments.
    pub fn default_key(method: &MethodKey, arguments: &[Value]) -> String {
        let rendered = serde_json::to_string(arguments).unwrap_or_default();
        format!("{}:{}", method, rendered)
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn is_force_refresh(&self) -> bool {
        self.force_refresh
    }
}

/// The retry context cache refused a new key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CapacityExceeded {
    pub capacity: usize,
}

/// Storage for stateful retry contexts.
pub trait RetryContextCache: Send + Sync + fmt::Debug {
    fn get(&self, key: &str) -> Option<SharedContext>;

    /// Store `context` under `key`, replacing any existing entry.
    fn put(&self, key: &str, context: SharedContext) -> Result<(), CapacityExceeded>;

    fn remove(&self, key: &str);

    /// Return the context under `key`, storing one built by `make` when absent.
    ///
    /// Implementations shared between threads should override this so the lookup and the
    /// insert happen under one lock; otherwise concurrent first calls can each store a context.
    fn get_or_insert(
        &self,
        key: &str,
        make: &dyn Fn() -> SharedContext,
    ) -> Result<SharedContext, CapacityExceeded> {
        if let Some(existing) = self.get(key) {
            return Ok(existing);
        }
        let context = make();
        self.put(key, context.clone())?;
        Ok(context)
    }

    fn contains(&self, key: &str) -> bool {
        self.get(key).is_some()
    }
}

/// Bounded in-memory [`RetryContextCache`].
#[derive(Debug, Clone)]
pub struct MapRetryContextCache {
    capacity: usize,
    inner: Arc<Mutex<HashMap<String, SharedContext>>>,
}

impl Default for MapRetryContextCache {
    fn default() -> Self {
        Self::with_capacity(DEFAULT_CONTEXT_CAPACITY)
    }
}

impl MapRetryContextCache {
    pub fn with_capacity(capacity: usize) -> Self {
        Self { capacity, inner: Arc::new(Mutex::new(HashMap::new())) }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, SharedContext>> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl RetryContextCache for MapRetryContextCache {
    fn get(&self, key: &str) -> Option<SharedContext> {
        self.lock().get(key).cloned()
    }

    fn put(&self, key: &str, context: SharedContext) -> Result<(), CapacityExceeded> {
        let mut map = self.lock();
        if !map.contains_key(key) && map.len() >= self.capacity {
            return Err(CapacityExceeded { capacity: self.capacity });
        }
        map.insert(key.to_string(), context);
        Ok(())
    }

    fn remove(&self, key: &str) {
        self.lock().remove(key);
    }

    fn get_or_insert(
        &self,
        key: &str,
        make: &dyn Fn() -> SharedContext,
    ) -> Result<SharedContext, CapacityExceeded> {
        let mut map = self.lock();
        if let Some(existing) = map.get(key) {
            return Ok(existing.clone());
        }
        if map.len() >= self.capacity {
            return Err(CapacityExceeded { capacity: self.capacity });
        }
        let context = make();
        map.insert(key.to_string(), context.clone());
        Ok(context)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn ctx() -> SharedContext {
        Arc::new(Mutex::new(RetryContext::new(0)))
    }

    #[test]
    fn default_key_includes_method_and_arguments() {
        let method = MethodKey::new("Ledger", "post", ["Entry"]);
        let key = RetryState::default_key(&method, &[json!({"id": 7})]);
        assert_eq!(key, r#"Ledger::post(Entry):[{"id":7}]"#);
    }

    #[test]
    fn cache_rejects_new_keys_when_full() {
        let cache = MapRetryContextCache::with_capacity(2);
        cache.put("a", ctx()).unwrap();
        cache.put("b", ctx()).unwrap();
        assert_eq!(cache.put("c", ctx()), Err(CapacityExceeded { capacity: 2 }));
        cache.put("a", ctx()).expect("replacing an existing key is allowed");
        cache.remove("b");
        cache.put("c", ctx()).unwrap();
        assert!(cache.contains("c"));
        assert!(!cache.contains("b"));
        assert_eq!(cache.len(), 2);
    }

    #[test]
    fn concurrent_get_or_insert_stores_one_context() {
        use std::sync::Barrier;

        let cache = MapRetryContextCache::default();
        let barrier = Barrier::new(16);
        let contexts: Vec<SharedContext> = std::thread::scope(|scope| {
            let handles: Vec<_> = (0..16)
                .map(|_| {
                    scope.spawn(|| {
                        barrier.wait();
                        cache.get_or_insert("circuit:payments", &ctx).unwrap()
                    })
                })
                .collect();
            handles.into_iter().map(|h| h.join().unwrap()).collect()
        });

        let stored = cache.get("circuit:payments").unwrap();
        assert!(contexts.iter().all(|c| Arc::ptr_eq(c, &stored)));
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn get_or_insert_respects_capacity() {
        let cache = MapRetryContextCache::with_capacity(1);
        let first = cache.get_or_insert("a", &ctx).unwrap();
        assert!(Arc::ptr_eq(&first, &cache.get_or_insert("a", &ctx).unwrap()));
        assert_eq!(
            cache.get_or_insert("b", &ctx).map(|_| ()),
            Err(CapacityExceeded { capacity: 1 })
        );
    }

    #[test]
    fn clones_share_storage() {
        let cache = MapRetryContextCache::default();
        let other = cache.clone();
        cache.put("k", ctx()).unwrap();
        assert!(other.contains("k"));
        assert_eq!(other.capacity(), DEFAULT_CONTEXT_CAPACITY);
    }

    #[test]
    fn force_refresh_flag() {
        let state = RetryState::new("k").force_refresh(true);
        assert!(state.is_force_refresh());
        assert_eq!(state.key(), "k");
    }
}
