//! Interceptors: the strategy objects a dispatcher delegates calls to.
//!
//! Each built-in interceptor owns its policy, backoff and optional recoverer, and hands them to a
//! [`RetryExecutor`] as a [`RetryPlan`] on every call. Named interceptors registered by the
//! embedding system implement [`MethodInterceptor`] directly.

use crate::backoff::BackoffPolicy;
use crate::circuit_breaker::{CircuitBreakerPolicy, CircuitState};
use crate::error::DispatchError;
use crate::invocation::{Invocation, Value};
use crate::policy::RetryPolicy;
use crate::recovery::RecovererBinding;
use crate::state::{
    MethodArgumentsKeyGenerator, NewMethodArgumentsIdentifier, RetryContextCache, RetryState,
};
use crate::template::{RetryExecutor, RetryPlan};
use async_trait::async_trait;
use std::fmt;
use std::sync::{Arc, PoisonError};
use tracing::warn;

/// Wraps an intercepted call.
#[async_trait]
pub trait MethodInterceptor: Send + Sync + fmt::Debug {
    async fn invoke(&self, invocation: &dyn Invocation) -> Result<Value, DispatchError>;
}

/// Retries within a single call.
#[derive(Debug)]
pub struct StatelessRetryInterceptor {
    policy: RetryPolicy,
    backoff: BackoffPolicy,
    recoverer: Option<RecovererBinding>,
    executor: Arc<dyn RetryExecutor>,
}

impl StatelessRetryInterceptor {
    pub fn new(
        policy: RetryPolicy,
        backoff: BackoffPolicy,
        recoverer: Option<RecovererBinding>,
        executor: Arc<dyn RetryExecutor>,
    ) -> Self {
        Self { policy, backoff, recoverer, executor }
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    pub fn backoff(&self) -> &BackoffPolicy {
        &self.backoff
    }

    pub fn recoverer(&self) -> Option<&RecovererBinding> {
        self.recoverer.as_ref()
    }
}

#[async_trait]
impl MethodInterceptor for StatelessRetryInterceptor {
    async fn invoke(&self, invocation: &dyn Invocation) -> Result<Value, DispatchError> {
        let plan = RetryPlan {
            policy: &self.policy,
            backoff: &self.backoff,
            recoverer: self.recoverer.as_ref(),
            state: None,
        };
        self.executor.execute(plan, invocation).await
    }
}

/// Correlates attempts across calls by a key derived from the arguments.
#[derive(Debug)]
pub struct StatefulRetryInterceptor {
    policy: RetryPolicy,
    backoff: BackoffPolicy,
    recoverer: Option<RecovererBinding>,
    executor: Arc<dyn RetryExecutor>,
    key_generator: Option<Arc<dyn MethodArgumentsKeyGenerator>>,
    new_arguments: Option<Arc<dyn NewMethodArgumentsIdentifier>>,
}

impl StatefulRetryInterceptor {
    pub fn new(
        policy: RetryPolicy,
        backoff: BackoffPolicy,
        recoverer: Option<RecovererBinding>,
        executor: Arc<dyn RetryExecutor>,
    ) -> Self {
        Self { policy, backoff, recoverer, executor, key_generator: None, new_arguments: None }
    }

    pub fn with_key_generator(
        mut self,
        generator: Option<Arc<dyn MethodArgumentsKeyGenerator>>,
    ) -> Self {
        self.key_generator = generator;
        self
    }

    pub fn with_new_arguments_identifier(
        mut self,
        identifier: Option<Arc<dyn NewMethodArgumentsIdentifier>>,
    ) -> Self {
        self.new_arguments = identifier;
        self
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    pub fn backoff(&self) -> &BackoffPolicy {
        &self.backoff
    }

    pub fn recoverer(&self) -> Option<&RecovererBinding> {
        self.recoverer.as_ref()
    }

    pub fn key_generator(&self) -> Option<&Arc<dyn MethodArgumentsKeyGenerator>> {
        self.key_generator.as_ref()
    }

    pub fn new_arguments_identifier(&self) -> Option<&Arc<dyn NewMethodArgumentsIdentifier>> {
        self.new_arguments.as_ref()
    }
}

#[async_trait]
impl MethodInterceptor for StatefulRetryInterceptor {
    async fn invoke(&self, invocation: &dyn Invocation) -> Result<Value, DispatchError> {
        let arguments = invocation.arguments();
        let key = match &self.key_generator {
            None => RetryState::default_key(invocation.method(), arguments),
            Some(generator) => match generator.key(arguments) {
                Some(key) => key,
                None => {
                    warn!(
                        target: "lifeline::interceptor",
                        method = %invocation.method(),
                        "no retry key for arguments; proceeding without retry state"
                    );
                    return invocation.proceed().await.map_err(DispatchError::from);
                }
            },
        };
        let refresh = self.new_arguments.as_ref().is_some_and(|id| id.is_new(arguments));
        let plan = RetryPlan {
            policy: &self.policy,
            backoff: &self.backoff,
            recoverer: self.recoverer.as_ref(),
            state: Some(RetryState::new(key).force_refresh(refresh)),
        };
        self.executor.execute(plan, invocation).await
    }
}

/// Guards a labelled circuit shared by every call through it.
#[derive(Debug)]
pub struct CircuitBreakerInterceptor {
    policy: RetryPolicy,
    backoff: BackoffPolicy,
    recoverer: Option<RecovererBinding>,
    executor: Arc<dyn RetryExecutor>,
    contexts: Arc<dyn RetryContextCache>,
    label: String,
}

impl CircuitBreakerInterceptor {
    /// `backoff` should be [`BackoffPolicy::none`]; circuits reject rather than wait.
    pub fn new(
        breaker: CircuitBreakerPolicy,
        backoff: BackoffPolicy,
        recoverer: Option<RecovererBinding>,
        executor: Arc<dyn RetryExecutor>,
        contexts: Arc<dyn RetryContextCache>,
    ) -> Self {
        let label = breaker.label().to_string();
        Self {
            policy: RetryPolicy::CircuitBreaker(breaker),
            backoff,
            recoverer,
            executor,
            contexts,
            label,
        }
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    pub fn backoff(&self) -> &BackoffPolicy {
        &self.backoff
    }

    pub fn recoverer(&self) -> Option<&RecovererBinding> {
        self.recoverer.as_ref()
    }

    /// Key of the shared circuit context.
    pub fn state_key(&self) -> String {
        format!("circuit:{}", self.label)
    }

    /// Circuit state as of the last call through it.
    pub fn state(&self) -> CircuitState {
        match self.contexts.get(&self.state_key()) {
            Some(context) => {
                let guard = context.lock().unwrap_or_else(PoisonError::into_inner);
                CircuitBreakerPolicy::state_of(&guard)
            }
            None => CircuitState::Closed,
        }
    }
}

#[async_trait]
impl MethodInterceptor for CircuitBreakerInterceptor {
    async fn invoke(&self, invocation: &dyn Invocation) -> Result<Value, DispatchError> {
        let plan = RetryPlan {
            policy: &self.policy,
            backoff: &self.backoff,
            recoverer: self.recoverer.as_ref(),
            state: Some(RetryState::new(self.state_key())),
        };
        self.executor.execute(plan, invocation).await
    }
}
