//! Recoverer discovery.
//!
//! A target either handles recovery itself ([`Target::as_recoverer`]) or its type declares
//! recovery handlers that a [`TypeIntrospector`] can list, inherited ones included. Discovery only
//! certifies that a candidate exists and packages it as a [`RecovererBinding`]; choosing the
//! handler for a particular failure happens when the binding is invoked.

use crate::failure::{Failure, FailureType};
use crate::invocation::{MethodKey, Target, Value};
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::Arc;
use tracing::debug;

/// Produces a substitute result once retries are exhausted.
pub trait MethodRecoverer: Send + Sync {
    fn recover(&self, arguments: &[Value], failure: &Failure) -> Result<Value, Failure>;
}

type HandlerFn = dyn Fn(&[Value], &Failure) -> Result<Value, Failure> + Send + Sync;

/// A recovery handler declared on a type.
#[derive(Clone)]
pub struct RecoverHandler {
    name: String,
    handles: Option<&'static FailureType>,
    handler: Arc<HandlerFn>,
}

impl RecoverHandler {
    /// Handler for `kind` and its subtypes.
    pub fn new<F>(name: impl Into<String>, kind: &'static FailureType, handler: F) -> Self
    where
        F: Fn(&[Value], &Failure) -> Result<Value, Failure> + Send + Sync + 'static,
    {
        Self { name: name.into(), handles: Some(kind), handler: Arc::new(handler) }
    }

    /// Handler for any failure; ranks below every typed handler.
    pub fn for_any<F>(name: impl Into<String>, handler: F) -> Self
    where
        F: Fn(&[Value], &Failure) -> Result<Value, Failure> + Send + Sync + 'static,
    {
        Self { name: name.into(), handles: None, handler: Arc::new(handler) }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn handles(&self) -> Option<&'static FailureType> {
        self.handles
    }
}

impl fmt::Debug for RecoverHandler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RecoverHandler")
            .field("name", &self.name)
            .field("handles", &self.handles.map(FailureType::name))
            .finish()
    }
}

/// Lists the recovery handlers visible on a type, inherited ones included.
pub trait TypeIntrospector: Send + Sync + fmt::Debug {
    fn recover_handlers(&self, type_name: &str) -> Vec<RecoverHandler>;
}

/// Explicit registration table implementing [`TypeIntrospector`].
#[derive(Debug, Clone, Default)]
pub struct RecoverHandlerRegistry {
    handlers: HashMap<String, Vec<RecoverHandler>>,
    parents: HashMap<String, String>,
}

impl RecoverHandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Declare a handler on `type_name`.
    pub fn handler(mut self, type_name: impl Into<String>, handler: RecoverHandler) -> Self {
        self.handlers.entry(type_name.into()).or_default().push(handler);
        self
    }

    /// Record that `child` inherits the handlers of `parent`.
    pub fn extends(mut self, child: impl Into<String>, parent: impl Into<String>) -> Self {
        self.parents.insert(child.into(), parent.into());
        self
    }
}

impl TypeIntrospector for RecoverHandlerRegistry {
    fn recover_handlers(&self, type_name: &str) -> Vec<RecoverHandler> {
        let mut found = Vec::new();
        let mut seen = HashSet::new();
        let mut current = Some(type_name);
        while let Some(name) = current {
            if !seen.insert(name) {
                break;
            }
            if let Some(declared) = self.handlers.get(name) {
                found.extend(declared.iter().cloned());
            }
            current = self.parents.get(name).map(String::as_str);
        }
        found
    }
}

/// Where a binding sends recovery requests.
#[derive(Clone)]
pub enum RecoveryDispatch {
    /// The target recovers by itself.
    Native(Arc<dyn MethodRecoverer>),
    /// Handlers declared on the target's type.
    Handlers { method: MethodKey, handlers: Vec<RecoverHandler> },
}

/// A target together with the recovery path found for it.
#[derive(Clone)]
pub struct RecovererBinding {
    target: Arc<dyn Target>,
    dispatch: RecoveryDispatch,
}

impl fmt::Debug for RecovererBinding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut s = f.debug_struct("RecovererBinding");
        s.field("target", &self.target.type_name());
        match &self.dispatch {
            RecoveryDispatch::Native(_) => s.field("dispatch", &"<native>"),
            RecoveryDispatch::Handlers { method, handlers } => {
                s.field("method", method).field("handlers", handlers)
            }
        };
        s.finish()
    }
}

impl RecovererBinding {
    pub fn target(&self) -> &Arc<dyn Target> {
        &self.target
    }

    pub fn dispatch(&self) -> &RecoveryDispatch {
        &self.dispatch
    }

    pub fn is_native(&self) -> bool {
        matches!(self.dispatch, RecoveryDispatch::Native(_))
    }

    fn best_handler<'a>(
        handlers: &'a [RecoverHandler],
        failure: &Failure,
    ) -> Option<&'a RecoverHandler> {
        let typed = handlers
            .iter()
            .filter_map(|h| {
                let kind = h.handles?;
                failure.kind().distance_to(kind).map(|d| (d, h))
            })
            .min_by_key(|(d, _)| *d)
            .map(|(_, h)| h);
        typed.or_else(|| handlers.iter().find(|h| h.handles.is_none()))
    }
}

impl MethodRecoverer for RecovererBinding {
    fn recover(&self, arguments: &[Value], failure: &Failure) -> Result<Value, Failure> {
        match &self.dispatch {
            RecoveryDispatch::Native(recoverer) => recoverer.recover(arguments, failure),
            RecoveryDispatch::Handlers { method, handlers } => {
                match Self::best_handler(handlers, failure) {
                    Some(handler) => {
                        debug!(
                            target: "lifeline::recovery",
                            method = %method,
                            handler = %handler.name,
                            "recovering"
                        );
                        (handler.handler)(arguments, failure)
                    }
                    None => Err(failure.clone()),
                }
            }
        }
    }
}

/// Find the recovery path for `target`, if it has one.
pub fn locate_recoverer(
    target: Arc<dyn Target>,
    method: &MethodKey,
    introspector: &dyn TypeIntrospector,
) -> Option<RecovererBinding> {
    if let Some(native) = target.clone().as_recoverer() {
        debug!(target: "lifeline::recovery", method = %method, "target recovers natively");
        return Some(RecovererBinding { target, dispatch: RecoveryDispatch::Native(native) });
    }
    let handlers = introspector.recover_handlers(target.type_name());
    if handlers.is_empty() {
        return None;
    }
    debug!(
        target: "lifeline::recovery",
        method = %method,
        handlers = handlers.len(),
        "recovery handlers found"
    );
    Some(RecovererBinding {
        target,
        dispatch: RecoveryDispatch::Handlers { method: method.clone(), handlers },
    })
}
