//! Circuit-breaker retry policy.
//!
//! The breaker wraps a [`SimpleRetryPolicy`] and shares one [`RetryContext`] across every call
//! through the circuit:
//! - **Closed**: calls run. Failures are registered against the wrapped policy.
//! - **Open**: the wrapped policy can no longer retry and the failures landed within
//!   `open_timeout` of the window start. Calls are rejected (or recovered).
//! - After `reset_timeout` has elapsed since the circuit opened, the next call closes it and
//!   starts a fresh window.
//! - A window older than `open_timeout` whose wrapped policy can still retry starts afresh, so
//!   sporadic failures never accumulate into an open circuit.

use crate::policy::{RetryContext, SimpleRetryPolicy};
use std::time::Duration;
use tracing::info;

/// Current state of a circuit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    /// Normal operating mode.
    Closed,
    /// Calls are short-circuited until the reset timeout elapses.
    Open,
}

/// Circuit breaker policy guarding a labelled circuit.
#[derive(Debug, Clone, PartialEq)]
pub struct CircuitBreakerPolicy {
    delegate: SimpleRetryPolicy,
    open_timeout: Duration,
    reset_timeout: Duration,
    label: String,
}

impl CircuitBreakerPolicy {
    pub fn new(
        delegate: SimpleRetryPolicy,
        open_timeout: Duration,
        reset_timeout: Duration,
        label: impl Into<String>,
    ) -> Self {
        Self { delegate, open_timeout, reset_timeout, label: label.into() }
    }

    pub fn delegate(&self) -> &SimpleRetryPolicy {
        &self.delegate
    }

    pub fn open_timeout(&self) -> Duration {
        self.open_timeout
    }

    pub fn reset_timeout(&self) -> Duration {
        self.reset_timeout
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    /// Decide whether the circuit is open at `now_millis`, updating the shared context.
    pub fn is_open(&self, context: &mut RetryContext, now_millis: u64) -> bool {
        let elapsed = Duration::from_millis(now_millis.saturating_sub(context.started_millis()));
        let mut retryable = self.delegate.can_retry(context);

        if !retryable {
            if context.is_circuit_open() {
                if elapsed > self.reset_timeout {
                    info!(target: "lifeline::circuit_breaker", label = %self.label, "closing circuit");
                    context.restart(now_millis);
                    retryable = self.delegate.can_retry(context);
                }
            } else if elapsed < self.open_timeout {
                info!(
                    target: "lifeline::circuit_breaker",
                    label = %self.label,
                    failures = context.attempts(),
                    "opening circuit"
                );
                context.set_started(now_millis);
            } else {
                // Failures spread over more than the open window: start a new window.
                context.restart(now_millis);
                retryable = self.delegate.can_retry(context);
            }
        } else if elapsed > self.open_timeout {
            context.restart(now_millis);
        }

        context.set_circuit_open(!retryable);
        !retryable
    }

    /// State as recorded by the last [`is_open`](Self::is_open) decision.
    pub fn state_of(context: &RetryContext) -> CircuitState {
        if context.is_circuit_open() {
            CircuitState::Open
        } else {
            CircuitState::Closed
        }
    }
}
