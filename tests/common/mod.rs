#![allow(dead_code)]

use lifeline::prelude::*;
use lifeline::CircuitDescriptor;
use serde_json::json;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

pub static IO: FailureType = FailureType::root("IoFailure");
pub static CONNECT: FailureType = FailureType::extends("ConnectFailure", &IO);
pub static PARSE: FailureType = FailureType::root("ParseFailure");

/// Target whose type name is fixed at construction.
pub struct Named(pub &'static str);

impl Target for Named {
    fn type_name(&self) -> &str {
        self.0
    }
}

/// Descriptor provider that counts lookups.
#[derive(Debug, Clone)]
pub struct CountingProvider {
    inner: DeclaredDescriptors,
    pub describes: Arc<AtomicUsize>,
}

impl CountingProvider {
    pub fn new(inner: DeclaredDescriptors) -> Self {
        Self { inner, describes: Arc::new(AtomicUsize::new(0)) }
    }

    pub fn count(&self) -> usize {
        self.describes.load(Ordering::SeqCst)
    }
}

impl DescriptorProvider for CountingProvider {
    fn describe(&self, method: &MethodKey) -> Option<RetryDescriptor> {
        self.describes.fetch_add(1, Ordering::SeqCst);
        self.inner.describe(method)
    }

    fn describe_circuit(&self, method: &MethodKey) -> Option<CircuitDescriptor> {
        self.inner.describe_circuit(method)
    }
}

/// A call that fails with `kind` for its first `failures` attempts, then returns the attempt
/// index. `counter` records every attempt.
pub fn flaky_call(
    method: MethodKey,
    target: Arc<dyn Target>,
    args: Vec<Value>,
    counter: Arc<AtomicUsize>,
    failures: usize,
    kind: &'static FailureType,
) -> impl Invocation {
    MethodCall::new(method, target, args, move |_: Vec<Value>| {
        let counter = counter.clone();
        async move {
            let n = counter.fetch_add(1, Ordering::SeqCst);
            if n < failures {
                Err(Failure::new(kind, format!("attempt {}", n)))
            } else {
                Ok(json!(n))
            }
        }
    })
}

/// A call that always succeeds with `value`.
pub fn ok_call(method: MethodKey, target: Arc<dyn Target>, value: Value) -> impl Invocation {
    MethodCall::new(method, target, Vec::new(), move |_: Vec<Value>| {
        let value = value.clone();
        async move { Ok(value) }
    })
}
