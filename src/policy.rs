//! Retry policies: how many attempts, and which failures deserve another one.
//!
//! Semantics:
//! - `max_attempts` counts total attempts (initial try + retries).
//! - With no include and no exclude entries every failure is retryable.
//! - Otherwise each failure is classified by its nearest listed ancestor: an include entry makes
//!   it retryable, an exclude entry does not. A type listed in both sets is excluded.
//! - A failure matching no entry is classified by its cause, then the cause's cause.
//! - Failures matching nothing at all are retryable only when the include list is empty.

use crate::circuit_breaker::CircuitBreakerPolicy;
use crate::error::BuildError;
use crate::failure::{Failure, FailureType};

/// Decides whether a failure is retryable.
#[derive(Debug, Clone, PartialEq)]
pub struct FailureClassifier {
    entries: Vec<(&'static FailureType, bool)>,
    default: bool,
    traverse_causes: bool,
}

impl FailureClassifier {
    /// Classifier that retries everything.
    pub fn retry_all() -> Self {
        Self { entries: Vec::new(), default: true, traverse_causes: false }
    }

    /// Classifier built from include/exclude lists.
    pub fn from_lists(
        includes: &[&'static FailureType],
        excludes: &[&'static FailureType],
    ) -> Self {
        let entries = includes
            .iter()
            .map(|t| (*t, true))
            .chain(excludes.iter().map(|t| (*t, false)))
            .collect();
        Self { entries, default: includes.is_empty(), traverse_causes: true }
    }

    /// Result for failures that match no entry.
    pub fn default_value(&self) -> bool {
        self.default
    }

    fn lookup(&self, kind: &FailureType) -> Option<bool> {
        kind.ancestors().find_map(|ancestor| {
            self.entries.iter().rev().find(|(t, _)| **t == *ancestor).map(|(_, retry)| *retry)
        })
    }

    pub fn classify(&self, failure: &Failure) -> bool {
        for link in failure.chain() {
            if let Some(retry) = self.lookup(link.kind()) {
                return retry;
            }
            if !self.traverse_causes {
                break;
            }
        }
        self.default
    }
}

/// Attempt bookkeeping for one retry sequence (one call when stateless, one key when stateful).
#[derive(Debug, Clone, Default)]
pub struct RetryContext {
    attempts: usize,
    last_failure: Option<Failure>,
    started_millis: u64,
    circuit_open: bool,
}

impl RetryContext {
    pub fn new(now_millis: u64) -> Self {
        Self { started_millis: now_millis, ..Self::default() }
    }

    /// Attempts that ended in failure.
    pub fn attempts(&self) -> usize {
        self.attempts
    }

    pub fn last_failure(&self) -> Option<&Failure> {
        self.last_failure.as_ref()
    }

    pub fn started_millis(&self) -> u64 {
        self.started_millis
    }

    pub fn is_circuit_open(&self) -> bool {
        self.circuit_open
    }

    pub fn register_failure(&mut self, failure: Failure) {
        self.attempts += 1;
        self.last_failure = Some(failure);
    }

    pub(crate) fn restart(&mut self, now_millis: u64) {
        self.attempts = 0;
        self.last_failure = None;
        self.started_millis = now_millis;
    }

    pub(crate) fn set_started(&mut self, now_millis: u64) {
        self.started_millis = now_millis;
    }

    pub(crate) fn set_circuit_open(&mut self, open: bool) {
        self.circuit_open = open;
    }
}

/// Attempt cap plus failure classification.
#[derive(Debug, Clone, PartialEq)]
pub struct SimpleRetryPolicy {
    max_attempts: usize,
    classifier: FailureClassifier,
}

impl SimpleRetryPolicy {
    /// Build a policy; `max_attempts` must be > 0.
    pub fn new(max_attempts: usize, classifier: FailureClassifier) -> Result<Self, BuildError> {
        if max_attempts == 0 {
            return Err(BuildError::InvalidMaxAttempts(0));
        }
        Ok(Self { max_attempts, classifier })
    }

    /// Build from include/exclude lists, retrying everything when both are empty.
    pub fn classified(
        max_attempts: usize,
        includes: &[&'static FailureType],
        excludes: &[&'static FailureType],
    ) -> Result<Self, BuildError> {
        let classifier = if includes.is_empty() && excludes.is_empty() {
            FailureClassifier::retry_all()
        } else {
            FailureClassifier::from_lists(includes, excludes)
        };
        Self::new(max_attempts, classifier)
    }

    pub fn max_attempts(&self) -> usize {
        self.max_attempts
    }

    pub fn classifier(&self) -> &FailureClassifier {
        &self.classifier
    }

    pub fn is_retryable(&self, failure: &Failure) -> bool {
        self.classifier.classify(failure)
    }

    /// True while the last failure (if any) is retryable and attempts remain.
    pub fn can_retry(&self, context: &RetryContext) -> bool {
        let retryable = context.last_failure().map_or(true, |f| self.is_retryable(f));
        retryable && context.attempts() < self.max_attempts
    }
}

/// The policy a strategy runs under.
#[derive(Debug, Clone)]
pub enum RetryPolicy {
    Simple(SimpleRetryPolicy),
    CircuitBreaker(CircuitBreakerPolicy),
}

impl RetryPolicy {
    /// Whether another attempt may start. Circuit policies update the context's window state.
    pub fn can_retry(&self, context: &mut RetryContext, now_millis: u64) -> bool {
        match self {
            RetryPolicy::Simple(policy) => policy.can_retry(context),
            RetryPolicy::CircuitBreaker(breaker) => !breaker.is_open(context, now_millis),
        }
    }

    pub fn max_attempts(&self) -> usize {
        match self {
            RetryPolicy::Simple(policy) => policy.max_attempts(),
            RetryPolicy::CircuitBreaker(breaker) => breaker.delegate().max_attempts(),
        }
    }

    /// Whether the retry context outlives individual successes (shared circuit state).
    pub fn is_global(&self) -> bool {
        matches!(self, RetryPolicy::CircuitBreaker(_))
    }
}

/// Build the retry policy for a descriptor's attempt cap and include/exclude lists.
pub fn build_retry_policy(
    max_attempts: usize,
    includes: &[&'static FailureType],
    excludes: &[&'static FailureType],
) -> Result<RetryPolicy, BuildError> {
    SimpleRetryPolicy::classified(max_attempts, includes, excludes).map(RetryPolicy::Simple)
}
