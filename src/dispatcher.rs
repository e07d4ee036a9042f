//! Entry point: resolve the strategy for a method once, then route every call through it.
//!
//! Resolution happens on the first call to a method and the result is cached for the lifetime of
//! the dispatcher, including the "no metadata" outcome. The default cache holds one mutex across
//! the check and the construction, so concurrent first calls to the same method observe a single
//! strategy instance. Resolution errors are returned to the caller and are not cached.
//!
//! Example
//! ```rust
//! use lifeline::prelude::*;
//! use serde_json::json;
//! use std::sync::Arc;
//!
//! static IO: FailureType = FailureType::root("IoFailure");
//!
//! struct Inventory;
//! impl Target for Inventory {
//!     fn type_name(&self) -> &str { "Inventory" }
//! }
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() {
//! let reserve = MethodKey::new("Inventory", "reserve", ["Sku"]);
//! let dispatcher = RetryDispatcher::builder(
//!     DeclaredDescriptors::new().on_method(reserve.clone(), RetryDescriptor::default().include(&IO)),
//! )
//! .sleeper(InstantSleeper)
//! .build();
//!
//! let call = MethodCall::new(
//!     reserve,
//!     Arc::new(Inventory),
//!     vec![json!("sku-1")],
//!     |args: Vec<Value>| async move { Ok(json!({ "reserved": args[0] })) },
//! );
//! let out = dispatcher.dispatch(&call).await.unwrap();
//! assert_eq!(out, json!({ "reserved": "sku-1" }));
//! # }
//! ```

use crate::assembler::{ResolvedStrategy, StrategyAssembler};
use crate::clock::{Clock, MonotonicClock};
use crate::descriptor::DescriptorProvider;
use crate::error::DispatchError;
use crate::interceptor::MethodInterceptor;
use crate::invocation::{Invocation, MethodKey, Target, Value};
use crate::recovery::{RecoverHandlerRegistry, TypeIntrospector};
use crate::registry::{InMemoryInterceptorRegistry, InterceptorRegistry};
use crate::sleeper::{Sleeper, TokioSleeper};
use crate::state::{
    MapRetryContextCache, MethodArgumentsKeyGenerator, NewMethodArgumentsIdentifier,
    RetryContextCache,
};
use crate::template::{RetryExecutor, RetryTemplate};
use async_trait::async_trait;
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex, PoisonError};
use tracing::{debug, trace};

/// Per-method storage for resolved strategies.
pub trait ResolutionCache: Send + Sync + fmt::Debug {
    /// Return the cached strategy for `method`, running `resolve` on a miss.
    ///
    /// Implementations must not run `resolve` twice for the same method, and must not cache an
    /// `Err`.
    fn get_or_resolve(
        &self,
        method: &MethodKey,
        resolve: &mut dyn FnMut() -> Result<ResolvedStrategy, DispatchError>,
    ) -> Result<Arc<ResolvedStrategy>, DispatchError>;

    /// Number of resolved methods.
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Default [`ResolutionCache`]: a map behind a single mutex.
#[derive(Debug, Default)]
pub struct MapResolutionCache {
    inner: Mutex<HashMap<MethodKey, Arc<ResolvedStrategy>>>,
}

impl MapResolutionCache {
    pub fn new() -> Self {
        Self::default()
    }
}

impl ResolutionCache for MapResolutionCache {
    fn get_or_resolve(
        &self,
        method: &MethodKey,
        resolve: &mut dyn FnMut() -> Result<ResolvedStrategy, DispatchError>,
    ) -> Result<Arc<ResolvedStrategy>, DispatchError> {
        let mut map = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(strategy) = map.get(method) {
            trace!(target: "lifeline::dispatcher", method = %method, "strategy cache hit");
            return Ok(strategy.clone());
        }
        let strategy = Arc::new(resolve()?);
        map.insert(method.clone(), strategy.clone());
        Ok(strategy)
    }

    fn len(&self) -> usize {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner).len()
    }
}

/// Resolves and caches retry strategies per method and routes calls through them.
#[derive(Debug, Clone)]
pub struct RetryDispatcher {
    descriptors: Arc<dyn DescriptorProvider>,
    assembler: StrategyAssembler,
    cache: Arc<dyn ResolutionCache>,
}

impl RetryDispatcher {
    /// Start configuring a dispatcher around a descriptor provider.
    pub fn builder<P>(descriptors: P) -> RetryDispatcherBuilder
    where
        P: DescriptorProvider + 'static,
    {
        RetryDispatcherBuilder::new(Arc::new(descriptors))
    }

    /// The strategy governing `invocation`'s method, resolving it on first use.
    pub fn resolve(
        &self,
        invocation: &dyn Invocation,
    ) -> Result<Arc<ResolvedStrategy>, DispatchError> {
        let method = invocation.method();
        self.cache
            .get_or_resolve(method, &mut || self.resolve_uncached(method, invocation.target()))
    }

    fn resolve_uncached(
        &self,
        method: &MethodKey,
        target: Arc<dyn Target>,
    ) -> Result<ResolvedStrategy, DispatchError> {
        let Some(descriptor) = self.descriptors.describe(method) else {
            debug!(target: "lifeline::dispatcher", method = %method, "no retry metadata");
            return Ok(ResolvedStrategy::None);
        };
        let circuit = if descriptor.is_stateful() && descriptor.interceptor_name().is_none() {
            self.descriptors.describe_circuit(method)
        } else {
            None
        };
        let strategy = self.assembler.assemble(method, target, &descriptor, circuit.as_ref())?;
        debug!(
            target: "lifeline::dispatcher",
            method = %method,
            strategy = %strategy.kind(),
            "strategy resolved"
        );
        Ok(strategy)
    }

    /// Run `invocation` under the strategy resolved for its method.
    pub async fn dispatch(&self, invocation: &dyn Invocation) -> Result<Value, DispatchError> {
        let strategy = self.resolve(invocation)?;
        match strategy.interceptor() {
            Some(interceptor) => interceptor.invoke(invocation).await,
            None => invocation.proceed().await.map_err(DispatchError::from),
        }
    }

    /// Number of methods resolved so far.
    pub fn cached_methods(&self) -> usize {
        self.cache.len()
    }

    pub fn registry(&self) -> &Arc<dyn InterceptorRegistry> {
        &self.assembler.registry
    }

    pub fn retry_contexts(&self) -> &Arc<dyn RetryContextCache> {
        &self.assembler.contexts
    }
}

#[async_trait]
impl MethodInterceptor for RetryDispatcher {
    async fn invoke(&self, invocation: &dyn Invocation) -> Result<Value, DispatchError> {
        self.dispatch(invocation).await
    }
}

/// Builder for [`RetryDispatcher`]. Everything but the descriptor provider is optional.
#[derive(Debug)]
pub struct RetryDispatcherBuilder {
    descriptors: Arc<dyn DescriptorProvider>,
    registry: Option<Arc<dyn InterceptorRegistry>>,
    introspector: Option<Arc<dyn TypeIntrospector>>,
    sleeper: Option<Arc<dyn Sleeper>>,
    clock: Option<Arc<dyn Clock>>,
    resolution_cache: Option<Arc<dyn ResolutionCache>>,
    retry_contexts: Option<Arc<dyn RetryContextCache>>,
    key_generator: Option<Arc<dyn MethodArgumentsKeyGenerator>>,
    new_arguments: Option<Arc<dyn NewMethodArgumentsIdentifier>>,
    executor: Option<Arc<dyn RetryExecutor>>,
}

impl RetryDispatcherBuilder {
    pub fn new(descriptors: Arc<dyn DescriptorProvider>) -> Self {
        Self {
            descriptors,
            registry: None,
            introspector: None,
            sleeper: None,
            clock: None,
            resolution_cache: None,
            retry_contexts: None,
            key_generator: None,
            new_arguments: None,
            executor: None,
        }
    }

    /// Registry consulted for named interceptors.
    pub fn registry<R: InterceptorRegistry + 'static>(mut self, registry: R) -> Self {
        self.registry = Some(Arc::new(registry));
        self
    }

    /// Source of recovery handlers.
    pub fn introspector<T: TypeIntrospector + 'static>(mut self, introspector: T) -> Self {
        self.introspector = Some(Arc::new(introspector));
        self
    }

    /// Sleeper used by every backoff policy the dispatcher builds.
    pub fn sleeper<S: Sleeper + 'static>(mut self, sleeper: S) -> Self {
        self.sleeper = Some(Arc::new(sleeper));
        self
    }

    /// Clock used by the built-in executor for circuit windows.
    pub fn clock<C: Clock + 'static>(mut self, clock: C) -> Self {
        self.clock = Some(Arc::new(clock));
        self
    }

    pub fn resolution_cache<C: ResolutionCache + 'static>(mut self, cache: C) -> Self {
        self.resolution_cache = Some(Arc::new(cache));
        self
    }

    /// Storage for stateful retry and circuit contexts.
    pub fn retry_context_cache<C: RetryContextCache + 'static>(mut self, cache: C) -> Self {
        self.retry_contexts = Some(Arc::new(cache));
        self
    }

    pub fn key_generator<K: MethodArgumentsKeyGenerator + 'static>(mut self, generator: K) -> Self {
        self.key_generator = Some(Arc::new(generator));
        self
    }

    pub fn new_arguments_identifier<N: NewMethodArgumentsIdentifier + 'static>(
        mut self,
        identifier: N,
    ) -> Self {
        self.new_arguments = Some(Arc::new(identifier));
        self
    }

    /// Replace the built-in [`RetryTemplate`].
    pub fn executor<E: RetryExecutor + 'static>(mut self, executor: E) -> Self {
        self.executor = Some(Arc::new(executor));
        self
    }

    pub fn build(self) -> RetryDispatcher {
        let contexts: Arc<dyn RetryContextCache> = self
            .retry_contexts
            .unwrap_or_else(|| Arc::new(MapRetryContextCache::default()));
        let clock: Arc<dyn Clock> =
            self.clock.unwrap_or_else(|| Arc::new(MonotonicClock::default()));
        let executor: Arc<dyn RetryExecutor> = self
            .executor
            .unwrap_or_else(|| Arc::new(RetryTemplate::new(contexts.clone(), clock)));
        let assembler = StrategyAssembler {
            registry: self
                .registry
                .unwrap_or_else(|| Arc::new(InMemoryInterceptorRegistry::default())),
            introspector: self
                .introspector
                .unwrap_or_else(|| Arc::new(RecoverHandlerRegistry::default())),
            sleeper: self.sleeper.unwrap_or_else(|| Arc::new(TokioSleeper)),
            executor,
            contexts,
            key_generator: self.key_generator,
            new_arguments: self.new_arguments,
        };
        RetryDispatcher {
            descriptors: self.descriptors,
            assembler,
            cache: self.resolution_cache.unwrap_or_else(|| Arc::new(MapResolutionCache::new())),
        }
    }
}
