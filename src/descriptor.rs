//! Declarative retry metadata and the provider that looks it up per method.
//!
//! Descriptors are plain values. A [`DescriptorProvider`] answers "what retry metadata applies to
//! this method", consulting method-level declarations before declaring-type-level ones.
//! [`DeclaredDescriptors`] is an explicit registration table that does exactly that.
//!
//! Example
//! ```rust
//! use lifeline::{BackoffDescriptor, DeclaredDescriptors, DescriptorProvider, MethodKey, RetryDescriptor};
//! use std::time::Duration;
//!
//! let place = MethodKey::new("OrderService", "place", ["Order"]);
//! let descriptors = DeclaredDescriptors::new()
//!     .on_type("OrderService", RetryDescriptor::default().max_attempts(5))
//!     .on_method(
//!         place.clone(),
//!         RetryDescriptor::default()
//!             .backoff(BackoffDescriptor::default().delay(Duration::from_millis(100))),
//!     );
//!
//! assert_eq!(descriptors.describe(&place).unwrap().get_max_attempts(), 3);
//! let cancel = MethodKey::new("OrderService", "cancel", ["OrderId"]);
//! assert_eq!(descriptors.describe(&cancel).unwrap().get_max_attempts(), 5);
//! ```

use crate::failure::FailureType;
use crate::invocation::MethodKey;
use std::collections::HashMap;
use std::fmt;
use std::time::Duration;

/// Default total attempts for retry and circuit descriptors.
pub const DEFAULT_MAX_ATTEMPTS: usize = 3;
/// Delay used when `delay` is left unset.
pub const DEFAULT_BACKOFF_VALUE: Duration = Duration::from_millis(1000);
/// Window in which exhausting the circuit policy opens the circuit.
pub const DEFAULT_OPEN_TIMEOUT: Duration = Duration::from_millis(5000);
/// Time an open circuit waits before closing again.
pub const DEFAULT_RESET_TIMEOUT: Duration = Duration::from_millis(20000);

/// Backoff parameters. Zero means "unset" for `delay`, `max_delay` and `multiplier`.
#[derive(Debug, Clone, PartialEq)]
pub struct BackoffDescriptor {
    delay: Duration,
    legacy_value: Duration,
    max_delay: Duration,
    multiplier: f64,
    random: bool,
}

impl Default for BackoffDescriptor {
    fn default() -> Self {
        Self {
            delay: Duration::ZERO,
            legacy_value: DEFAULT_BACKOFF_VALUE,
            max_delay: Duration::ZERO,
            multiplier: 0.0,
            random: false,
        }
    }
}

impl BackoffDescriptor {
    pub fn delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// Older spelling of the delay, used only when `delay` is zero.
    pub fn value(mut self, value: Duration) -> Self {
        self.legacy_value = value;
        self
    }

    pub fn max_delay(mut self, max_delay: Duration) -> Self {
        self.max_delay = max_delay;
        self
    }

    pub fn multiplier(mut self, multiplier: f64) -> Self {
        self.multiplier = multiplier;
        self
    }

    pub fn random(mut self, random: bool) -> Self {
        self.random = random;
        self
    }

    pub fn get_delay(&self) -> Duration {
        self.delay
    }

    pub fn get_value(&self) -> Duration {
        self.legacy_value
    }

    pub fn get_max_delay(&self) -> Duration {
        self.max_delay
    }

    pub fn get_multiplier(&self) -> f64 {
        self.multiplier
    }

    pub fn is_random(&self) -> bool {
        self.random
    }
}

/// Retry metadata attached to a method or its declaring type.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryDescriptor {
    max_attempts: usize,
    include: Vec<&'static FailureType>,
    value: Vec<&'static FailureType>,
    exclude: Vec<&'static FailureType>,
    stateful: bool,
    interceptor: Option<String>,
    backoff: BackoffDescriptor,
}

impl Default for RetryDescriptor {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            include: Vec::new(),
            value: Vec::new(),
            exclude: Vec::new(),
            stateful: false,
            interceptor: None,
            backoff: BackoffDescriptor::default(),
        }
    }
}

impl RetryDescriptor {
    /// Total attempts (initial call + retries).
    pub fn max_attempts(mut self, attempts: usize) -> Self {
        self.max_attempts = attempts;
        self
    }

    /// Failure types (and subtypes) that should be retried.
    pub fn include(mut self, kind: &'static FailureType) -> Self {
        self.include.push(kind);
        self
    }

    /// Legacy alias for `include`. When present it takes precedence over `include` entries.
    pub fn value(mut self, kind: &'static FailureType) -> Self {
        self.value.push(kind);
        self
    }

    /// Failure types (and subtypes) that must not be retried.
    pub fn exclude(mut self, kind: &'static FailureType) -> Self {
        self.exclude.push(kind);
        self
    }

    /// Correlate retries across separate calls instead of looping within one call.
    pub fn stateful(mut self, stateful: bool) -> Self {
        self.stateful = stateful;
        self
    }

    /// Delegate to a named interceptor from the registry instead of building one.
    pub fn interceptor(mut self, name: impl Into<String>) -> Self {
        self.interceptor = Some(name.into());
        self
    }

    pub fn backoff(mut self, backoff: BackoffDescriptor) -> Self {
        self.backoff = backoff;
        self
    }

    pub fn get_max_attempts(&self) -> usize {
        self.max_attempts
    }

    /// Retryable types: the legacy `value` entries, else `include` entries.
    pub fn includes(&self) -> &[&'static FailureType] {
        legacy_or_include(&self.value, &self.include)
    }

    pub fn excludes(&self) -> &[&'static FailureType] {
        &self.exclude
    }

    pub fn is_stateful(&self) -> bool {
        self.stateful
    }

    /// Interceptor name, ignoring blank strings.
    pub fn interceptor_name(&self) -> Option<&str> {
        self.interceptor.as_deref().map(str::trim).filter(|n| !n.is_empty())
    }

    pub fn get_backoff(&self) -> &BackoffDescriptor {
        &self.backoff
    }
}

/// Circuit-breaker metadata, meaningful only alongside a stateful [`RetryDescriptor`].
#[derive(Debug, Clone, PartialEq)]
pub struct CircuitDescriptor {
    max_attempts: usize,
    include: Vec<&'static FailureType>,
    value: Vec<&'static FailureType>,
    exclude: Vec<&'static FailureType>,
    open_timeout: Duration,
    reset_timeout: Duration,
    label: Option<String>,
}

impl Default for CircuitDescriptor {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            include: Vec::new(),
            value: Vec::new(),
            exclude: Vec::new(),
            open_timeout: DEFAULT_OPEN_TIMEOUT,
            reset_timeout: DEFAULT_RESET_TIMEOUT,
            label: None,
        }
    }
}

impl CircuitDescriptor {
    /// Failures tolerated inside the open window before the circuit opens.
    pub fn max_attempts(mut self, attempts: usize) -> Self {
        self.max_attempts = attempts;
        self
    }

    pub fn include(mut self, kind: &'static FailureType) -> Self {
        self.include.push(kind);
        self
    }

    /// Legacy alias for `include`, with the same precedence as [`RetryDescriptor::value`].
    pub fn value(mut self, kind: &'static FailureType) -> Self {
        self.value.push(kind);
        self
    }

    pub fn exclude(mut self, kind: &'static FailureType) -> Self {
        self.exclude.push(kind);
        self
    }

    pub fn open_timeout(mut self, timeout: Duration) -> Self {
        self.open_timeout = timeout;
        self
    }

    pub fn reset_timeout(mut self, timeout: Duration) -> Self {
        self.reset_timeout = timeout;
        self
    }

    pub fn label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }

    pub fn get_max_attempts(&self) -> usize {
        self.max_attempts
    }

    pub fn includes(&self) -> &[&'static FailureType] {
        legacy_or_include(&self.value, &self.include)
    }

    pub fn excludes(&self) -> &[&'static FailureType] {
        &self.exclude
    }

    pub fn get_open_timeout(&self) -> Duration {
        self.open_timeout
    }

    pub fn get_reset_timeout(&self) -> Duration {
        self.reset_timeout
    }

    /// Label, ignoring blank strings.
    pub fn get_label(&self) -> Option<&str> {
        self.label.as_deref().map(str::trim).filter(|l| !l.is_empty())
    }
}

fn legacy_or_include<'a>(
    value: &'a [&'static FailureType],
    include: &'a [&'static FailureType],
) -> &'a [&'static FailureType] {
    if value.is_empty() {
        include
    } else {
        value
    }
}

/// Source of retry metadata for a method.
///
/// `describe` consults method-level metadata first and falls back to the declaring type.
/// `describe_circuit` reads method-level metadata only.
pub trait DescriptorProvider: Send + Sync + fmt::Debug {
    fn describe(&self, method: &MethodKey) -> Option<RetryDescriptor>;

    fn describe_circuit(&self, method: &MethodKey) -> Option<CircuitDescriptor>;
}

/// Explicit registration table implementing [`DescriptorProvider`].
#[derive(Debug, Clone, Default)]
pub struct DeclaredDescriptors {
    methods: HashMap<MethodKey, RetryDescriptor>,
    types: HashMap<String, RetryDescriptor>,
    method_circuits: HashMap<MethodKey, CircuitDescriptor>,
}

impl DeclaredDescriptors {
    pub fn new() -> Self {
        Self::default()
    }

    /// Declare retry metadata on a single method.
    pub fn on_method(mut self, method: MethodKey, descriptor: RetryDescriptor) -> Self {
        self.methods.insert(method, descriptor);
        self
    }

    /// Declare retry metadata on every method of a type.
    pub fn on_type(mut self, type_name: impl Into<String>, descriptor: RetryDescriptor) -> Self {
        self.types.insert(type_name.into(), descriptor);
        self
    }

    /// Declare a circuit breaker on a method. A circuit implies stateful retry, so a stateful
    /// retry descriptor is declared on the method as well unless one is already present.
    pub fn circuit_on_method(mut self, method: MethodKey, circuit: CircuitDescriptor) -> Self {
        self.methods
            .entry(method.clone())
            .or_insert_with(|| RetryDescriptor::default().stateful(true));
        self.method_circuits.insert(method, circuit);
        self
    }

    /// Declare circuit metadata on a type. Circuits are only built from method-level metadata,
    /// so every method of the type gets a stateful retry carrying the circuit's attempt limit
    /// and failure lists. Existing type-level retry metadata is kept.
    pub fn circuit_on_type(
        mut self,
        type_name: impl Into<String>,
        circuit: CircuitDescriptor,
    ) -> Self {
        self.types.entry(type_name.into()).or_insert_with(|| {
            let retry = RetryDescriptor {
                max_attempts: circuit.max_attempts,
                include: circuit.includes().to_vec(),
                exclude: circuit.exclude.clone(),
                ..RetryDescriptor::default()
            };
            retry.stateful(true)
        });
        self
    }
}

impl DescriptorProvider for DeclaredDescriptors {
    fn describe(&self, method: &MethodKey) -> Option<RetryDescriptor> {
        self.methods
            .get(method)
            .or_else(|| self.types.get(method.declaring_type()))
            .cloned()
    }

    fn describe_circuit(&self, method: &MethodKey) -> Option<CircuitDescriptor> {
        self.method_circuits.get(method).cloned()
    }
}
