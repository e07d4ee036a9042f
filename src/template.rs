//! Retry execution.
//!
//! [`RetryExecutor`] is the seam between the strategies a dispatcher resolves and the loop that
//! actually re-invokes the call. [`RetryTemplate`] is the built-in executor:
//! - **Stateless** (`plan.state == None`): attempts run inside one call, with backoff between
//!   them. On exhaustion the recoverer runs if bound, else the last failure propagates.
//! - **Stateful** (`plan.state == Some(..)`): each call makes one attempt. Failures are recorded
//!   in the context cache under the state key and rethrown. Once the policy refuses another
//!   attempt, the next call with that key recovers, or fails with `RetryExhausted`
//!   (`CircuitOpen` for circuit policies).
//!
//! Invariants:
//! - Attempts for one sequence never exceed the policy's `max_attempts`.
//! - Backoff runs only between attempts, never after the last one.
//! - Circuit contexts are never evicted; other stateful contexts are evicted on success and on
//!   exhaustion.

use crate::backoff::BackoffPolicy;
use crate::clock::Clock;
use crate::error::DispatchError;
use crate::invocation::{Invocation, Value};
use crate::policy::{RetryContext, RetryPolicy};
use crate::recovery::{MethodRecoverer, RecovererBinding};
use crate::state::{RetryContextCache, RetryState, SharedContext};
use async_trait::async_trait;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tracing::debug;

/// Everything an executor needs to run one call.
#[derive(Debug)]
pub struct RetryPlan<'a> {
    pub policy: &'a RetryPolicy,
    pub backoff: &'a BackoffPolicy,
    pub recoverer: Option<&'a RecovererBinding>,
    pub state: Option<RetryState>,
}

/// Runs a call under a retry plan.
#[async_trait]
pub trait RetryExecutor: Send + Sync + fmt::Debug {
    async fn execute(
        &self,
        plan: RetryPlan<'_>,
        invocation: &dyn Invocation,
    ) -> Result<Value, DispatchError>;
}

/// Built-in [`RetryExecutor`].
#[derive(Debug, Clone)]
pub struct RetryTemplate {
    contexts: Arc<dyn RetryContextCache>,
    clock: Arc<dyn Clock>,
}

fn lock(context: &SharedContext) -> MutexGuard<'_, RetryContext> {
    context.lock().unwrap_or_else(PoisonError::into_inner)
}

impl RetryTemplate {
    pub fn new(contexts: Arc<dyn RetryContextCache>, clock: Arc<dyn Clock>) -> Self {
        Self { contexts, clock }
    }

    pub fn contexts(&self) -> &Arc<dyn RetryContextCache> {
        &self.contexts
    }

    async fn execute_stateless(
        &self,
        plan: &RetryPlan<'_>,
        invocation: &dyn Invocation,
    ) -> Result<Value, DispatchError> {
        let mut context = RetryContext::new(self.clock.now_millis());
        loop {
            match invocation.proceed().await {
                Ok(value) => return Ok(value),
                Err(failure) => {
                    context.register_failure(failure);
                    if !plan.policy.can_retry(&mut context, self.clock.now_millis()) {
                        break;
                    }
                    debug!(
                        target: "lifeline::template",
                        method = %invocation.method(),
                        attempt = context.attempts(),
                        "retrying"
                    );
                    plan.backoff.backoff(context.attempts()).await;
                }
            }
        }

        let attempts = context.attempts();
        let Some(last) = context.last_failure() else {
            return invocation.proceed().await.map_err(DispatchError::from);
        };
        debug!(target: "lifeline::template", method = %invocation.method(), attempts, "retries exhausted");
        match plan.recoverer {
            Some(recoverer) => recoverer.recover(invocation.arguments(), last).map_err(Into::into),
            None => Err(DispatchError::Failure(last.clone())),
        }
    }

    async fn execute_stateful(
        &self,
        plan: &RetryPlan<'_>,
        state: &RetryState,
        invocation: &dyn Invocation,
    ) -> Result<Value, DispatchError> {
        let key = state.key();
        let global = plan.policy.is_global();
        let fresh = || Arc::new(Mutex::new(RetryContext::new(self.clock.now_millis())));
        let stored = if state.is_force_refresh() {
            let shared = fresh();
            self.contexts.put(key, shared.clone()).map(|()| shared)
        } else {
            self.contexts.get_or_insert(key, &fresh)
        };
        let shared =
            stored.map_err(|e| DispatchError::ContextCacheFull { capacity: e.capacity })?;

        let allowed = plan.policy.can_retry(&mut lock(&shared), self.clock.now_millis());
        if !allowed {
            let snapshot = lock(&shared).clone();
            if !global {
                self.contexts.remove(key);
            }
            return self.stateful_exhausted(plan, &snapshot, invocation).await;
        }

        match invocation.proceed().await {
            Ok(value) => {
                if !global {
                    self.contexts.remove(key);
                }
                Ok(value)
            }
            Err(failure) => {
                let (retry_again, attempts) = {
                    let mut context = lock(&shared);
                    context.register_failure(failure.clone());
                    let again = plan.policy.can_retry(&mut context, self.clock.now_millis());
                    (again, context.attempts())
                };
                debug!(
                    target: "lifeline::template",
                    method = %invocation.method(),
                    key = %key,
                    attempts,
                    retry_again,
                    "stateful attempt failed"
                );
                if retry_again {
                    plan.backoff.backoff(attempts).await;
                }
                Err(DispatchError::Failure(failure))
            }
        }
    }

    async fn stateful_exhausted(
        &self,
        plan: &RetryPlan<'_>,
        context: &RetryContext,
        invocation: &dyn Invocation,
    ) -> Result<Value, DispatchError> {
        if let (Some(recoverer), Some(last)) = (plan.recoverer, context.last_failure()) {
            return recoverer.recover(invocation.arguments(), last).map_err(Into::into);
        }
        if let RetryPolicy::CircuitBreaker(breaker) = plan.policy {
            return Err(DispatchError::CircuitOpen { label: breaker.label().to_string() });
        }
        match context.last_failure() {
            Some(last) => Err(DispatchError::RetryExhausted {
                attempts: context.attempts(),
                last: last.clone(),
            }),
            // max_attempts >= 1 means an exhausted context always holds a failure.
            None => invocation.proceed().await.map_err(DispatchError::from),
        }
    }
}

#[async_trait]
impl RetryExecutor for RetryTemplate {
    async fn execute(
        &self,
        plan: RetryPlan<'_>,
        invocation: &dyn Invocation,
    ) -> Result<Value, DispatchError> {
        match &plan.state {
            None => self.execute_stateless(&plan, invocation).await,
            Some(state) => self.execute_stateful(&plan, state, invocation).await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backoff::BackoffKind;
    use crate::circuit_breaker::CircuitBreakerPolicy;
    use crate::clock::ManualClock;
    use crate::failure::{Failure, FailureType};
    use crate::invocation::{MethodCall, MethodKey, Target};
    use crate::policy::{build_retry_policy, SimpleRetryPolicy};
    use crate::recovery::{locate_recoverer, RecoverHandler, RecoverHandlerRegistry};
    use crate::sleeper::TrackingSleeper;
    use crate::state::MapRetryContextCache;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    static IO: FailureType = FailureType::root("IoFailure");
    static PARSE: FailureType = FailureType::root("ParseFailure");

    struct Svc;

    impl Target for Svc {
        fn type_name(&self) -> &str {
            "Svc"
        }
    }

    fn template() -> (RetryTemplate, MapRetryContextCache, ManualClock) {
        let cache = MapRetryContextCache::default();
        let clock = ManualClock::new();
        (RetryTemplate::new(Arc::new(cache.clone()), Arc::new(clock.clone())), cache, clock)
    }

    fn fixed(sleeper: &TrackingSleeper, millis: u64) -> BackoffPolicy {
        BackoffPolicy::new(
            BackoffKind::Fixed { period: Duration::from_millis(millis) },
            Arc::new(sleeper.clone()),
        )
    }

    /// Call that fails with `kind` for the first `failures` attempts, then returns the count.
    fn flaky(
        counter: Arc<AtomicUsize>,
        failures: usize,
        kind: &'static FailureType,
    ) -> impl Invocation {
        MethodCall::new(
            MethodKey::new("Svc", "call", ["u32"]),
            Arc::new(Svc),
            vec![json!(1)],
            move |_args: Vec<Value>| {
                let counter = counter.clone();
                async move {
                    let n = counter.fetch_add(1, Ordering::SeqCst);
                    if n < failures {
                        Err(Failure::new(kind, format!("attempt {}", n)))
                    } else {
                        Ok(json!(n))
                    }
                }
            },
        )
    }

    #[tokio::test]
    async fn stateless_retries_until_success() {
        let (template, _, _) = template();
        let sleeper = TrackingSleeper::new();
        let policy = build_retry_policy(5, &[], &[]).unwrap();
        let backoff = fixed(&sleeper, 10);
        let counter = Arc::new(AtomicUsize::new(0));
        let call = flaky(counter.clone(), 2, &IO);

        let plan = RetryPlan { policy: &policy, backoff: &backoff, recoverer: None, state: None };
        let result = template.execute(plan, &call).await.unwrap();

        assert_eq!(result, json!(2));
        assert_eq!(counter.load(Ordering::SeqCst), 3);
        assert_eq!(sleeper.calls(), 2, "sleep only between attempts");
    }

    #[tokio::test]
    async fn stateless_exhaustion_propagates_last_failure() {
        let (template, _, _) = template();
        let sleeper = TrackingSleeper::new();
        let policy = build_retry_policy(3, &[], &[]).unwrap();
        let backoff = fixed(&sleeper, 10);
        let counter = Arc::new(AtomicUsize::new(0));
        let call = flaky(counter.clone(), usize::MAX, &IO);

        let plan = RetryPlan { policy: &policy, backoff: &backoff, recoverer: None, state: None };
        let err = template.execute(plan, &call).await.unwrap_err();

        assert_eq!(counter.load(Ordering::SeqCst), 3);
        assert_eq!(sleeper.calls(), 2);
        assert_eq!(err.failure().map(|f| f.message()), Some("attempt 2"));
    }

    #[tokio::test]
    async fn stateless_non_retryable_failure_stops_immediately() {
        let (template, _, _) = template();
        let sleeper = TrackingSleeper::new();
        let policy = build_retry_policy(5, &[&IO], &[]).unwrap();
        let backoff = fixed(&sleeper, 10);
        let counter = Arc::new(AtomicUsize::new(0));
        let call = flaky(counter.clone(), usize::MAX, &PARSE);

        let plan = RetryPlan { policy: &policy, backoff: &backoff, recoverer: None, state: None };
        let err = template.execute(plan, &call).await.unwrap_err();

        assert_eq!(counter.load(Ordering::SeqCst), 1);
        assert_eq!(sleeper.calls(), 0);
        assert_eq!(err.failure().unwrap().kind(), &PARSE);
    }

    #[tokio::test]
    async fn stateless_exhaustion_recovers_when_bound() {
        let (template, _, _) = template();
        let sleeper = TrackingSleeper::new();
        let policy = build_retry_policy(2, &[], &[]).unwrap();
        let backoff = fixed(&sleeper, 10);
        let introspector = RecoverHandlerRegistry::new()
            .handler("Svc", RecoverHandler::new("fallback", &IO, |_, _| Ok(json!("fallback"))));
        let recoverer =
            locate_recoverer(Arc::new(Svc), &MethodKey::new("Svc", "call", ["u32"]), &introspector)
                .unwrap();
        let call = flaky(Arc::new(AtomicUsize::new(0)), usize::MAX, &IO);

        let plan = RetryPlan {
            policy: &policy,
            backoff: &backoff,
            recoverer: Some(&recoverer),
            state: None,
        };
        assert_eq!(template.execute(plan, &call).await.unwrap(), json!("fallback"));
    }

    #[tokio::test]
    async fn stateful_makes_one_attempt_per_call_then_exhausts() {
        let (template, cache, _) = template();
        let sleeper = TrackingSleeper::new();
        let policy = build_retry_policy(2, &[], &[]).unwrap();
        let backoff = fixed(&sleeper, 10);
        let counter = Arc::new(AtomicUsize::new(0));
        let call = flaky(counter.clone(), usize::MAX, &IO);

        for expected in 1..=2 {
            let plan = RetryPlan {
                policy: &policy,
                backoff: &backoff,
                recoverer: None,
                state: Some(RetryState::new("order-1")),
            };
            let err = template.execute(plan, &call).await.unwrap_err();
            assert!(matches!(err, DispatchError::Failure(_)));
            assert_eq!(counter.load(Ordering::SeqCst), expected);
        }
        assert!(cache.contains("order-1"));

        let plan = RetryPlan {
            policy: &policy,
            backoff: &backoff,
            recoverer: None,
            state: Some(RetryState::new("order-1")),
        };
        let err = template.execute(plan, &call).await.unwrap_err();
        assert!(err.is_retry_exhausted(), "got {:?}", err);
        assert_eq!(counter.load(Ordering::SeqCst), 2, "exhausted key must not call through");
        assert!(!cache.contains("order-1"), "exhausted context is evicted");
    }

    #[tokio::test]
    async fn stateful_success_evicts_context() {
        let (template, cache, _) = template();
        let sleeper = TrackingSleeper::new();
        let policy = build_retry_policy(3, &[], &[]).unwrap();
        let backoff = fixed(&sleeper, 10);
        let call = flaky(Arc::new(AtomicUsize::new(0)), 1, &IO);

        let state = RetryState::new("k");
        let plan = RetryPlan {
            policy: &policy,
            backoff: &backoff,
            recoverer: None,
            state: Some(state.clone()),
        };
        assert!(template.execute(plan, &call).await.is_err());
        let plan =
            RetryPlan { policy: &policy, backoff: &backoff, recoverer: None, state: Some(state) };
        assert_eq!(template.execute(plan, &call).await.unwrap(), json!(1));
        assert!(cache.is_empty());
    }

    #[tokio::test]
    async fn force_refresh_discards_previous_attempts() {
        let (template, _, _) = template();
        let sleeper = TrackingSleeper::new();
        let policy = build_retry_policy(1, &[], &[]).unwrap();
        let backoff = fixed(&sleeper, 10);
        let counter = Arc::new(AtomicUsize::new(0));
        let call = flaky(counter.clone(), usize::MAX, &IO);

        let run = |state: RetryState| {
            let plan = RetryPlan {
                policy: &policy,
                backoff: &backoff,
                recoverer: None,
                state: Some(state),
            };
            template.execute(plan, &call)
        };
        assert!(matches!(run(RetryState::new("k")).await, Err(DispatchError::Failure(_))));
        assert!(run(RetryState::new("k")).await.unwrap_err().is_retry_exhausted());
        assert!(matches!(
            run(RetryState::new("k").force_refresh(true)).await,
            Err(DispatchError::Failure(_))
        ));
        assert_eq!(counter.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn full_context_cache_is_reported() {
        let cache = MapRetryContextCache::with_capacity(0);
        let template = RetryTemplate::new(Arc::new(cache), Arc::new(ManualClock::new()));
        let sleeper = TrackingSleeper::new();
        let policy = build_retry_policy(3, &[], &[]).unwrap();
        let backoff = fixed(&sleeper, 10);
        let call = flaky(Arc::new(AtomicUsize::new(0)), 0, &IO);
        let plan = RetryPlan {
            policy: &policy,
            backoff: &backoff,
            recoverer: None,
            state: Some(RetryState::new("k")),
        };
        let err = template.execute(plan, &call).await.unwrap_err();
        assert!(matches!(err, DispatchError::ContextCacheFull { capacity: 0 }));
    }

    #[tokio::test]
    async fn circuit_opens_then_closes_after_reset() {
        let (template, cache, clock) = template();
        let sleeper = TrackingSleeper::new();
        let policy = RetryPolicy::CircuitBreaker(CircuitBreakerPolicy::new(
            SimpleRetryPolicy::classified(2, &[], &[]).unwrap(),
            Duration::from_millis(5000),
            Duration::from_millis(20000),
            "svc-circuit",
        ));
        let backoff = BackoffPolicy::none(Arc::new(sleeper.clone()));
        let counter = Arc::new(AtomicUsize::new(0));
        let call = flaky(counter.clone(), 2, &IO);
        let state = RetryState::new("svc-circuit");

        let run = || {
            let plan = RetryPlan {
                policy: &policy,
                backoff: &backoff,
                recoverer: None,
                state: Some(state.clone()),
            };
            template.execute(plan, &call)
        };

        assert!(matches!(run().await, Err(DispatchError::Failure(_))));
        assert!(matches!(run().await, Err(DispatchError::Failure(_))));
        let err = run().await.unwrap_err();
        assert!(err.is_circuit_open(), "got {:?}", err);
        assert_eq!(counter.load(Ordering::SeqCst), 2);
        assert!(cache.contains("svc-circuit"), "circuit state is global");

        clock.advance(Duration::from_millis(20_001));
        assert_eq!(run().await.unwrap(), json!(2));
        assert_eq!(sleeper.calls(), 0, "circuit breakers never back off");
        assert!(cache.contains("svc-circuit"));
    }
}
