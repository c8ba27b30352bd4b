//! Per-message execution scope.
//!
//! Every dispatched message gets exactly one `Scope`, created by the bus's
//! `ContextProvider` before the first handler runs and dropped after the
//! last one returns, whether the handlers succeeded or not. Resources a
//! handler should share with the other handlers for the same message (a
//! database transaction, a unit of work, a request id) live here.

use std::any::{Any, TypeId};
use std::collections::HashMap;

/// Typed bag of per-message resources, with release hooks run on drop.
#[derive(Default)]
pub struct Scope {
    values: HashMap<TypeId, Box<dyn Any + Send + Sync>>,
    on_release: Vec<Box<dyn FnOnce() + Send>>,
}

impl Scope {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store a value, replacing any previous value of the same type.
    pub fn insert<T: Any + Send + Sync>(&mut self, value: T) {
        self.values.insert(TypeId::of::<T>(), Box::new(value));
    }

    /// Builder form of `insert`.
    pub fn with<T: Any + Send + Sync>(mut self, value: T) -> Self {
        self.insert(value);
        self
    }

    pub fn get<T: Any + Send + Sync>(&self) -> Option<&T> {
        self.values
            .get(&TypeId::of::<T>())
            .and_then(|v| v.downcast_ref::<T>())
    }

    pub fn contains<T: Any + Send + Sync>(&self) -> bool {
        self.values.contains_key(&TypeId::of::<T>())
    }

    /// Register a hook to run when the scope is released.
    /// Hooks run in reverse registration order.
    pub fn on_release(&mut self, hook: impl FnOnce() + Send + 'static) {
        self.on_release.push(Box::new(hook));
    }
}

impl Drop for Scope {
    fn drop(&mut self) {
        while let Some(hook) = self.on_release.pop() {
            hook();
        }
    }
}

/// Factory producing one `Scope` per dispatched message.
pub trait ContextProvider: Send + Sync {
    fn create_scope(&self) -> Scope;
}

impl<F> ContextProvider for F
where
    F: Fn() -> Scope + Send + Sync,
{
    fn create_scope(&self) -> Scope {
        self()
    }
}

/// Provider handing out empty scopes.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoContext;

impl ContextProvider for NoContext {
    fn create_scope(&self) -> Scope {
        Scope::new()
    }
}
