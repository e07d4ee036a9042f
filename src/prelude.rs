//! Convenient re-exports for common Lifeline types.
pub use crate::{
    assembler::{ResolvedStrategy, StrategyKind},
    backoff::{BackoffKind, BackoffPolicy},
    circuit_breaker::CircuitState,
    descriptor::{
        BackoffDescriptor, CircuitDescriptor, DeclaredDescriptors, DescriptorProvider,
        RetryDescriptor,
    },
    dispatcher::{RetryDispatcher, RetryDispatcherBuilder},
    error::DispatchError,
    failure::{Failure, FailureType},
    interceptor::MethodInterceptor,
    invocation::{Invocation, MethodCall, MethodKey, Target, Value},
    recovery::{MethodRecoverer, RecoverHandler, RecoverHandlerRegistry},
    registry::{InMemoryInterceptorRegistry, InterceptorRegistry},
    sleeper::{InstantSleeper, Sleeper, TokioSleeper},
    state::{MethodArgumentsKeyGenerator, NewMethodArgumentsIdentifier},
};
