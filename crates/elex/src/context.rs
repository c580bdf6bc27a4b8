//! The host-supplied variable environment.

use std::sync::{
    Arc,
    atomic::{AtomicBool, Ordering},
};

use ahash::AHashMap;

use crate::{error::EvalResult, value::Value};

/// Shared cooperative-cancellation flag.
///
/// Cancellation is modelled as an atomic boolean the context can own; the
/// interpreter polls it before each significant node visit. Setting the flag
/// never interrupts a native call in progress.
#[derive(Debug, Clone, Default)]
pub struct CancelHandle(Arc<AtomicBool>);

impl CancelHandle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }

    /// Clears the flag so the handle can gate another evaluation.
    pub fn reset(&self) {
        self.0.store(false, Ordering::Relaxed);
    }
}

/// Variable environment an evaluation runs against.
///
/// `has`/`get`/`set` form the minimum capability set. The remaining methods
/// are optional capabilities the interpreter probes at runtime; the defaults
/// decline them.
pub trait Context {
    fn has(&self, name: &str) -> bool;

    fn get(&self, name: &str) -> Option<Value>;

    /// Stores a global. Returns `false` when the context is read-only or
    /// rejects the name, in which case the interpreter raises a variable
    /// error.
    fn set(&mut self, name: &str, value: Value) -> bool;

    /// Resolves a namespace prefix ahead of the engine registries.
    fn resolve_namespace(&self, _prefix: &str) -> Option<Value> {
        None
    }

    /// Supplies the shared cancellation flag for this evaluation.
    fn cancellation(&self) -> Option<CancelHandle> {
        None
    }

    /// Called for an unresolved top-level function call, letting the context
    /// act as a method provider. `None` declines the name.
    fn call_method(&mut self, _name: &str, _args: &[Value]) -> Option<EvalResult<Value>> {
        None
    }
}

/// A plain map-backed context.
#[derive(Debug, Default)]
pub struct MapContext {
    vars: AHashMap<String, Value>,
    cancel: Option<CancelHandle>,
}

impl MapContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// Attaches a cancellation handle shared with the host.
    #[must_use]
    pub fn with_cancellation(mut self, handle: CancelHandle) -> Self {
        self.cancel = Some(handle);
        self
    }

    /// Builder-style insertion.
    #[must_use]
    pub fn with(mut self, name: impl Into<String>, value: Value) -> Self {
        self.vars.insert(name.into(), value);
        self
    }

    pub fn insert(&mut self, name: impl Into<String>, value: Value) {
        self.vars.insert(name.into(), value);
    }
}

impl Context for MapContext {
    fn has(&self, name: &str) -> bool {
        self.vars.contains_key(name)
    }

    fn get(&self, name: &str) -> Option<Value> {
        self.vars.get(name).cloned()
    }

    fn set(&mut self, name: &str, value: Value) -> bool {
        self.vars.insert(name.to_owned(), value);
        true
    }

    fn cancellation(&self) -> Option<CancelHandle> {
        self.cancel.clone()
    }
}
