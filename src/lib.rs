#![forbid(unsafe_code)]

//! # Lifeline
//!
//! Declarative retry for intercepted method calls: decide, once per method, whether calls run
//! unchanged, retry within the call, retry across calls, run behind a circuit breaker, or go
//! through a named interceptor. Then route every call through that decision.
//!
//! ## Features
//!
//! - **Per-method resolution** from [`RetryDescriptor`] / [`CircuitDescriptor`] metadata, cached
//!   for the lifetime of the [`RetryDispatcher`]
//! - **Failure classification** with include/exclude lists over a [`FailureType`] hierarchy
//! - **Backoff selection**: fixed, uniform random, exponential, randomized exponential
//! - **Stateful retry** keyed by call arguments, and **circuit breakers** keyed by label
//! - **Recovery handlers** discovered per target type
//! - **Pluggable** sleeper, clock, caches, key generation and retry executor
//!
//! ## Quick Start
//!
//! ```rust
//! use lifeline::prelude::*;
//! use serde_json::json;
//! use std::sync::Arc;
//! use std::sync::atomic::{AtomicUsize, Ordering};
//!
//! static TIMEOUT: FailureType = FailureType::root("TimeoutFailure");
//!
//! struct Quotes;
//! impl Target for Quotes {
//!     fn type_name(&self) -> &str { "Quotes" }
//! }
//!
//! #[tokio::main]
//! async fn main() {
//!     let fetch = MethodKey::new("Quotes", "fetch", ["Symbol"]);
//!     let dispatcher = RetryDispatcher::builder(
//!         DeclaredDescriptors::new()
//!             .on_method(fetch.clone(), RetryDescriptor::default().max_attempts(3)),
//!     )
//!     .sleeper(InstantSleeper)
//!     .build();
//!
//!     let attempts = Arc::new(AtomicUsize::new(0));
//!     let seen = attempts.clone();
//!     let call = MethodCall::new(fetch, Arc::new(Quotes), vec![json!("ACME")], move |_: Vec<Value>| {
//!         let seen = seen.clone();
//!         async move {
//!             if seen.fetch_add(1, Ordering::SeqCst) == 0 {
//!                 Err(Failure::new(&TIMEOUT, "slow quote feed"))
//!             } else {
//!                 Ok(json!(101.5))
//!             }
//!         }
//!     });
//!
//!     assert_eq!(dispatcher.dispatch(&call).await.unwrap(), json!(101.5));
//!     assert_eq!(attempts.load(Ordering::SeqCst), 2);
//! }
//! ```

pub mod assembler;
pub mod backoff;
pub mod circuit_breaker;
pub mod clock;
pub mod descriptor;
pub mod dispatcher;
pub mod error;
pub mod failure;
pub mod interceptor;
pub mod invocation;
pub mod policy;
pub mod prelude;
pub mod recovery;
pub mod registry;
pub mod sleeper;
pub mod state;
pub mod template;

// Re-exports
pub use assembler::{ResolvedStrategy, StrategyAssembler, StrategyKind};
pub use backoff::{select_backoff, BackoffKind, BackoffPolicy, DEFAULT_MAX_INTERVAL, MAX_BACKOFF};
pub use circuit_breaker::{CircuitBreakerPolicy, CircuitState};
pub use clock::{Clock, ManualClock, MonotonicClock};
pub use descriptor::{
    BackoffDescriptor, CircuitDescriptor, DeclaredDescriptors, DescriptorProvider,
    RetryDescriptor,
};
pub use dispatcher::{MapResolutionCache, ResolutionCache, RetryDispatcher, RetryDispatcherBuilder};
pub use error::{BuildError, DispatchError};
pub use failure::{Failure, FailureType};
pub use interceptor::{
    CircuitBreakerInterceptor, MethodInterceptor, StatefulRetryInterceptor,
    StatelessRetryInterceptor,
};
pub use invocation::{Invocation, MethodCall, MethodKey, Target, Value};
pub use policy::{
    build_retry_policy, FailureClassifier, RetryContext, RetryPolicy, SimpleRetryPolicy,
};
pub use recovery::{
    locate_recoverer, MethodRecoverer, RecoverHandler, RecoverHandlerRegistry, RecovererBinding,
    TypeIntrospector,
};
pub use registry::{InMemoryInterceptorRegistry, InterceptorRegistry, RegistryError};
pub use sleeper::{InstantSleeper, Sleeper, TokioSleeper, TrackingSleeper};
pub use state::{
    MapRetryContextCache, MethodArgumentsKeyGenerator, NewMethodArgumentsIdentifier,
    RetryContextCache, RetryState,
};
pub use template::{RetryExecutor, RetryPlan, RetryTemplate};
