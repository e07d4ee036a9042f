//! Intercepted calls: the method being called, the instance it is called on, and a way to
//! proceed with the original call.

use crate::failure::Failure;
use crate::recovery::MethodRecoverer;
use async_trait::async_trait;
use std::fmt;
use std::future::Future;
use std::sync::Arc;

/// Argument and return values carried through an interception.
pub type Value = serde_json::Value;

/// Identifies a callable member: declaring type plus signature. Used as the resolution cache key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MethodKey {
    declaring_type: Arc<str>,
    name: Arc<str>,
    parameters: Arc<[Arc<str>]>,
}

impl MethodKey {
    /// Build a key from a declaring type, method name and parameter type names.
    pub fn new<P, S>(declaring_type: &str, name: &str, parameters: P) -> Self
    where
        P: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self {
            declaring_type: Arc::from(declaring_type),
            name: Arc::from(name),
            parameters: parameters.into_iter().map(|p| Arc::from(p.as_ref())).collect(),
        }
    }

    pub fn declaring_type(&self) -> &str {
        &self.declaring_type
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn parameters(&self) -> impl Iterator<Item = &str> {
        self.parameters.iter().map(|p| p.as_ref())
    }

    /// Full signature such as `OrderService::place(Order, bool)`; used as the default
    /// circuit label.
    pub fn signature(&self) -> String {
        self.to_string()
    }
}

impl fmt::Display for MethodKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}::{}(", self.declaring_type, self.name)?;
        for (i, p) in self.parameters.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            f.write_str(p)?;
        }
        f.write_str(")")
    }
}

/// The instance a method is invoked on.
pub trait Target: Send + Sync {
    /// Name of the concrete type, used to look up recovery handlers.
    fn type_name(&self) -> &str;

    /// Return `Some` when this instance handles recovery itself.
    fn as_recoverer(self: Arc<Self>) -> Option<Arc<dyn MethodRecoverer>> {
        None
    }
}

/// A single intercepted call.
#[async_trait]
pub trait Invocation: Send + Sync {
    fn method(&self) -> &MethodKey;

    fn target(&self) -> Arc<dyn Target>;

    fn arguments(&self) -> &[Value];

    /// Run the original call. Retry strategies may call this more than once.
    async fn proceed(&self) -> Result<Value, Failure>;
}

/// [`Invocation`] backed by a closure over the call arguments.
pub struct MethodCall<F> {
    method: MethodKey,
    target: Arc<dyn Target>,
    arguments: Vec<Value>,
    call: F,
}

impl<F, Fut> MethodCall<F>
where
    F: Fn(Vec<Value>) -> Fut + Send + Sync,
    Fut: Future<Output = Result<Value, Failure>> + Send,
{
    pub fn new(method: MethodKey, target: Arc<dyn Target>, arguments: Vec<Value>, call: F) -> Self {
        Self { method, target, arguments, call }
    }
}

impl<F> fmt::Debug for MethodCall<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MethodCall")
            .field("method", &self.method)
            .field("target", &self.target.type_name())
            .field("arguments", &self.arguments)
            .finish()
    }
}

#[async_trait]
impl<F, Fut> Invocation for MethodCall<F>
where
    F: Fn(Vec<Value>) -> Fut + Send + Sync,
    Fut: Future<Output = Result<Value, Failure>> + Send,
{
    fn method(&self) -> &MethodKey {
        &self.method
    }

    fn target(&self) -> Arc<dyn Target> {
        self.target.clone()
    }

    fn arguments(&self) -> &[Value] {
        &self.arguments
    }

    async fn proceed(&self) -> Result<Value, Failure> {
        (self.call)(self.arguments.clone()).await
    }
}
