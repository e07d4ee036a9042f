//! Registry of named interceptors.
//!
//! A descriptor that names an interceptor bypasses strategy construction; the dispatcher looks the
//! name up here instead.

use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};

use crate::interceptor::MethodInterceptor;
use tracing::warn;

/// Errors from interceptor registries.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RegistryError {
    /// No interceptor is registered under the requested name.
    #[error("interceptor '{name}' not found")]
    NotFound {
        /// Name that could not be located.
        name: String,
    },
}

/// Maps names to pre-built interceptors.
pub trait InterceptorRegistry: Send + Sync + std::fmt::Debug {
    /// Register an interceptor by name; the last registration wins.
    fn register(&self, name: String, interceptor: Arc<dyn MethodInterceptor>);
    /// Look up an interceptor, erroring if missing.
    fn resolve(&self, name: &str) -> Result<Arc<dyn MethodInterceptor>, RegistryError>;
    /// Registered names, sorted.
    fn names(&self) -> Vec<String>;
}

/// In-memory implementation backed by an RwLock.
#[derive(Default, Clone, Debug)]
pub struct InMemoryInterceptorRegistry {
    inner: Arc<RwLock<HashMap<String, Arc<dyn MethodInterceptor>>>>,
}

impl InMemoryInterceptorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Chainable [`register`](InterceptorRegistry::register).
    pub fn with(self, name: impl Into<String>, interceptor: Arc<dyn MethodInterceptor>) -> Self {
        self.register(name.into(), interceptor);
        self
    }
}

impl InterceptorRegistry for InMemoryInterceptorRegistry {
    fn register(&self, name: String, interceptor: Arc<dyn MethodInterceptor>) {
        let mut map = self.inner.write().unwrap_or_else(PoisonError::into_inner);
        if map.contains_key(&name) {
            warn!(target: "lifeline::registry", name = %name, "interceptor name replaced; last registration wins");
        }
        map.insert(name, interceptor);
    }

    fn resolve(&self, name: &str) -> Result<Arc<dyn MethodInterceptor>, RegistryError> {
        let guard = self.inner.read().unwrap_or_else(PoisonError::into_inner);
        guard.get(name).cloned().ok_or_else(|| RegistryError::NotFound { name: name.to_string() })
    }

    fn names(&self) -> Vec<String> {
        let map = self.inner.read().unwrap_or_else(PoisonError::into_inner);
        let mut names: Vec<String> = map.keys().cloned().collect();
        names.sort();
        names
    }
}
