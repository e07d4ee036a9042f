//! Error types for strategy resolution and dispatch.
use crate::failure::Failure;
use crate::registry::RegistryError;
use std::fmt;

/// Errors produced while turning a descriptor into a policy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BuildError {
    /// `max_attempts` must be > 0.
    InvalidMaxAttempts(usize),
}

impl fmt::Display for BuildError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BuildError::InvalidMaxAttempts(n) => {
                write!(f, "max_attempts must be > 0 (got {})", n)
            }
        }
    }
}

impl std::error::Error for BuildError {}

/// Unified error returned by [`RetryDispatcher::dispatch`](crate::RetryDispatcher::dispatch).
///
/// Configuration errors (`InterceptorNotFound`, `InvalidDescriptor`) are raised while resolving
/// a strategy and are never cached; the next call resolves again.
#[derive(thiserror::Error, Debug, Clone)]
pub enum DispatchError {
    /// The intercepted call failed and the failure was not retried further.
    #[error("{0}")]
    Failure(#[source] Failure),
    /// A stateful retry ran out of attempts and no recoverer was bound.
    #[error("retry exhausted after {attempts} attempts; last failure: {last}")]
    RetryExhausted {
        /// Attempts recorded for the retry key.
        attempts: usize,
        /// Most recent failure recorded for the key.
        #[source]
        last: Failure,
    },
    /// The circuit is open and no recoverer was bound.
    #[error("circuit '{label}' is open")]
    CircuitOpen {
        /// Circuit label.
        label: String,
    },
    /// A descriptor names an interceptor that the registry does not know.
    #[error("no interceptor registered under '{name}'")]
    InterceptorNotFound {
        /// Name requested by the descriptor.
        name: String,
    },
    /// A descriptor could not be turned into a policy.
    #[error("invalid retry descriptor: {0}")]
    InvalidDescriptor(#[from] BuildError),
    /// The retry context cache refused a new stateful key.
    #[error("retry context cache is full (capacity {capacity})")]
    ContextCacheFull {
        /// Configured capacity.
        capacity: usize,
    },
}

impl From<Failure> for DispatchError {
    fn from(failure: Failure) -> Self {
        DispatchError::Failure(failure)
    }
}

impl From<RegistryError> for DispatchError {
    fn from(err: RegistryError) -> Self {
        match err {
            RegistryError::NotFound { name } => DispatchError::InterceptorNotFound { name },
        }
    }
}

impl DispatchError {
    /// Borrow the business failure carried by this error, if any.
    pub fn failure(&self) -> Option<&Failure> {
        match self {
            Self::Failure(f) => Some(f),
            Self::RetryExhausted { last, .. } => Some(last),
            _ => None,
        }
    }

    /// Take the business failure out of this error, if any.
    pub fn into_failure(self) -> Option<Failure> {
        match self {
            Self::Failure(f) => Some(f),
            Self::RetryExhausted { last, .. } => Some(last),
            _ => None,
        }
    }

    /// True for errors caused by configuration rather than by the intercepted call.
    pub fn is_configuration(&self) -> bool {
        matches!(self, Self::InterceptorNotFound { .. } | Self::InvalidDescriptor(_))
    }

    pub fn is_circuit_open(&self) -> bool {
        matches!(self, Self::CircuitOpen { .. })
    }

    pub fn is_retry_exhausted(&self) -> bool {
        matches!(self, Self::RetryExhausted { .. })
    }
}
