//! Turns a retry descriptor into the strategy that governs a method.
//!
//! Precedence, first match wins:
//! 1. An interceptor name on the descriptor selects that registered interceptor.
//! 2. A stateless descriptor builds a stateless retry interceptor.
//! 3. A stateful descriptor with circuit metadata builds a circuit breaker. Its policy comes from
//!    the circuit metadata, it never backs off, and its label defaults to the method signature.
//! 4. Any other stateful descriptor builds a stateful retry interceptor.

use crate::backoff::{select_backoff, BackoffPolicy};
use crate::circuit_breaker::CircuitBreakerPolicy;
use crate::descriptor::{CircuitDescriptor, RetryDescriptor};
use crate::error::DispatchError;
use crate::interceptor::{
    CircuitBreakerInterceptor, MethodInterceptor, StatefulRetryInterceptor,
    StatelessRetryInterceptor,
};
use crate::invocation::{MethodKey, Target};
use crate::policy::{build_retry_policy, SimpleRetryPolicy};
use crate::recovery::{locate_recoverer, TypeIntrospector};
use crate::registry::InterceptorRegistry;
use crate::sleeper::Sleeper;
use crate::state::{MethodArgumentsKeyGenerator, NewMethodArgumentsIdentifier, RetryContextCache};
use crate::template::RetryExecutor;
use std::fmt;
use std::sync::Arc;

/// Which kind of strategy a method resolved to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StrategyKind {
    None,
    Stateless,
    Stateful,
    CircuitBreaker,
    Explicit,
}

impl fmt::Display for StrategyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            StrategyKind::None => "none",
            StrategyKind::Stateless => "stateless",
            StrategyKind::Stateful => "stateful",
            StrategyKind::CircuitBreaker => "circuit-breaker",
            StrategyKind::Explicit => "explicit",
        };
        f.write_str(name)
    }
}

/// The strategy resolved for a method.
#[derive(Debug)]
pub enum ResolvedStrategy {
    /// No retry metadata; calls proceed unchanged.
    None,
    Stateless(StatelessRetryInterceptor),
    Stateful(StatefulRetryInterceptor),
    CircuitBreaker(CircuitBreakerInterceptor),
    /// A registered interceptor selected by name.
    Explicit { name: String, interceptor: Arc<dyn MethodInterceptor> },
}

impl ResolvedStrategy {
    pub fn kind(&self) -> StrategyKind {
        match self {
            ResolvedStrategy::None => StrategyKind::None,
            ResolvedStrategy::Stateless(_) => StrategyKind::Stateless,
            ResolvedStrategy::Stateful(_) => StrategyKind::Stateful,
            ResolvedStrategy::CircuitBreaker(_) => StrategyKind::CircuitBreaker,
            ResolvedStrategy::Explicit { .. } => StrategyKind::Explicit,
        }
    }

    /// The interceptor calls are delegated to, or `None` when they proceed unchanged.
    pub fn interceptor(&self) -> Option<&dyn MethodInterceptor> {
        match self {
            ResolvedStrategy::None => None,
            ResolvedStrategy::Stateless(i) => Some(i),
            ResolvedStrategy::Stateful(i) => Some(i),
            ResolvedStrategy::CircuitBreaker(i) => Some(i),
            ResolvedStrategy::Explicit { interceptor, .. } => Some(interceptor.as_ref()),
        }
    }

    pub fn is_none(&self) -> bool {
        matches!(self, ResolvedStrategy::None)
    }
}

/// Collaborators shared by every strategy a dispatcher builds.
#[derive(Debug, Clone)]
pub struct StrategyAssembler {
    pub(crate) registry: Arc<dyn InterceptorRegistry>,
    pub(crate) introspector: Arc<dyn TypeIntrospector>,
    pub(crate) sleeper: Arc<dyn Sleeper>,
    pub(crate) executor: Arc<dyn RetryExecutor>,
    pub(crate) contexts: Arc<dyn RetryContextCache>,
    pub(crate) key_generator: Option<Arc<dyn MethodArgumentsKeyGenerator>>,
    pub(crate) new_arguments: Option<Arc<dyn NewMethodArgumentsIdentifier>>,
}

impl StrategyAssembler {
    /// Build the strategy for `method`. `circuit` is only consulted for stateful descriptors.
    pub fn assemble(
        &self,
        method: &MethodKey,
        target: Arc<dyn Target>,
        descriptor: &RetryDescriptor,
        circuit: Option<&CircuitDescriptor>,
    ) -> Result<ResolvedStrategy, DispatchError> {
        if let Some(name) = descriptor.interceptor_name() {
            let interceptor = self.registry.resolve(name)?;
            return Ok(ResolvedStrategy::Explicit { name: name.to_string(), interceptor });
        }

        let recoverer = locate_recoverer(target, method, self.introspector.as_ref());

        if !descriptor.is_stateful() {
            let policy = build_retry_policy(
                descriptor.get_max_attempts(),
                descriptor.includes(),
                descriptor.excludes(),
            )?;
            let backoff = select_backoff(descriptor.get_backoff(), self.sleeper.clone());
            return Ok(ResolvedStrategy::Stateless(StatelessRetryInterceptor::new(
                policy,
                backoff,
                recoverer,
                self.executor.clone(),
            )));
        }

        if let Some(circuit) = circuit {
            let delegate = SimpleRetryPolicy::classified(
                circuit.get_max_attempts(),
                circuit.includes(),
                circuit.excludes(),
            )?;
            let label = match circuit.get_label() {
                Some(label) => label.to_string(),
                None => method.signature(),
            };
            let breaker = CircuitBreakerPolicy::new(
                delegate,
                circuit.get_open_timeout(),
                circuit.get_reset_timeout(),
                label,
            );
            return Ok(ResolvedStrategy::CircuitBreaker(CircuitBreakerInterceptor::new(
                breaker,
                BackoffPolicy::none(self.sleeper.clone()),
                recoverer,
                self.executor.clone(),
                self.contexts.clone(),
            )));
        }

        let policy = build_retry_policy(
            descriptor.get_max_attempts(),
            descriptor.includes(),
            descriptor.excludes(),
        )?;
        let backoff = select_backoff(descriptor.get_backoff(), self.sleeper.clone());
        let interceptor =
            StatefulRetryInterceptor::new(policy, backoff, recoverer, self.executor.clone())
                .with_key_generator(self.key_generator.clone())
                .with_new_arguments_identifier(self.new_arguments.clone());
        Ok(ResolvedStrategy::Stateful(interceptor))
    }
}
