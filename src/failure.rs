//! Failure values and the type hierarchy used to classify them.
//!
//! Retry descriptors name failure *types*, not failure values: a descriptor that includes
//! `IO_FAILURE` also covers every type declared as extending it. Types are declared once as
//! `static` items so that hierarchy links are plain `&'static` references.
//!
//! Example
//! ```rust
//! use lifeline::{Failure, FailureType};
//!
//! static IO_FAILURE: FailureType = FailureType::root("IoFailure");
//! static CONNECT_FAILURE: FailureType = FailureType::extends("ConnectFailure", &IO_FAILURE);
//!
//! assert!(CONNECT_FAILURE.is_a(&IO_FAILURE));
//! assert!(!IO_FAILURE.is_a(&CONNECT_FAILURE));
//!
//! let failure = Failure::new(&CONNECT_FAILURE, "connection refused");
//! assert_eq!(failure.kind().name(), "ConnectFailure");
//! ```

use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

/// A named failure type with an optional parent.
///
/// Equality is identity: two `static` declarations are distinct types even when they share a
/// name. Hashing uses the name, which is consistent with that.
#[derive(Debug)]
pub struct FailureType {
    name: &'static str,
    parent: Option<&'static FailureType>,
}

impl FailureType {
    /// Declare a failure type with no parent.
    pub const fn root(name: &'static str) -> Self {
        Self { name, parent: None }
    }

    /// Declare a failure type extending `parent`.
    pub const fn extends(name: &'static str, parent: &'static FailureType) -> Self {
        Self { name, parent: Some(parent) }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn parent(&self) -> Option<&'static FailureType> {
        self.parent
    }

    /// Iterate over this type followed by each ancestor, nearest first.
    pub fn ancestors(&self) -> Ancestors<'_> {
        Ancestors { next: Some(self) }
    }

    /// True when `self` equals `other` or extends it, directly or transitively.
    pub fn is_a(&self, other: &FailureType) -> bool {
        self.ancestors().any(|t| t == other)
    }

    /// Number of parent links between `self` and `ancestor`, if `ancestor` is in the chain.
    pub fn distance_to(&self, ancestor: &FailureType) -> Option<usize> {
        self.ancestors().position(|t| t == ancestor)
    }
}

impl PartialEq for FailureType {
    fn eq(&self, other: &Self) -> bool {
        std::ptr::eq(self, other)
    }
}

impl Eq for FailureType {}

impl Hash for FailureType {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.name.hash(state);
    }
}

impl fmt::Display for FailureType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name)
    }
}

/// Iterator returned by [`FailureType::ancestors`].
#[derive(Debug, Clone)]
pub struct Ancestors<'a> {
    next: Option<&'a FailureType>,
}

impl<'a> Iterator for Ancestors<'a> {
    type Item = &'a FailureType;

    fn next(&mut self) -> Option<Self::Item> {
        let current = self.next?;
        self.next = current.parent.map(|p| p as &FailureType);
        Some(current)
    }
}

/// A failure raised by an intercepted call.
#[derive(Debug, Clone)]
pub struct Failure {
    kind: &'static FailureType,
    message: String,
    cause: Option<Arc<Failure>>,
}

impl Failure {
    pub fn new(kind: &'static FailureType, message: impl Into<String>) -> Self {
        Self { kind, message: message.into(), cause: None }
    }

    /// Attach the failure that caused this one.
    pub fn caused_by(mut self, cause: Failure) -> Self {
        self.cause = Some(Arc::new(cause));
        self
    }

    pub fn kind(&self) -> &'static FailureType {
        self.kind
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn cause(&self) -> Option<&Failure> {
        self.cause.as_deref()
    }

    /// This failure followed by its causes, outermost first.
    pub fn chain(&self) -> impl Iterator<Item = &Failure> {
        std::iter::successors(Some(self), |f| f.cause())
    }
}

impl fmt::Display for Failure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.kind, self.message)
    }
}

impl std::error::Error for Failure {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.cause.as_deref().map(|c| c as &(dyn std::error::Error + 'static))
    }
}
