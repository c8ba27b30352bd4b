//! In-memory subscription registry.

use std::collections::HashMap;

use super::binding::HandlerBinding;
use crate::event::Event;
use crate::handler::EventHandler;
use crate::scope::Scope;

/// Maps event discriminators to their handler bindings, in registration order.
///
/// Process-local and not synchronized; the bus shares it behind a lock.
///
/// ## Example
///
/// ```
/// use syncpoint_bus::{Event, HandlerError, Scope, EventHandler, SubscriptionRegistry};
///
/// struct OrderPlaced;
/// impl Event for OrderPlaced {
///     const NAME: &'static str = "OrderPlaced";
///     fn payload(&self) -> &str { "" }
/// }
///
/// #[derive(Default)]
/// struct SendReceipt;
/// impl EventHandler for SendReceipt {
///     fn handle(&self, _message: &str, _scope: &Scope) -> Result<(), HandlerError> {
///         Ok(())
///     }
/// }
///
/// let mut registry = SubscriptionRegistry::new();
/// registry.add_subscription::<OrderPlaced, SendReceipt>();
/// assert!(registry.has_subscriptions("OrderPlaced"));
///
/// registry.remove_subscription::<OrderPlaced, SendReceipt>();
/// assert!(!registry.has_subscriptions("OrderPlaced"));
/// ```
#[derive(Debug, Default, Clone)]
pub struct SubscriptionRegistry {
    handlers: HashMap<&'static str, Vec<HandlerBinding>>,
}

impl SubscriptionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// True if at least one handler is bound to `event_name`.
    pub fn has_subscriptions(&self, event_name: &str) -> bool {
        self.handlers
            .get(event_name)
            .is_some_and(|bindings| !bindings.is_empty())
    }

    /// Handlers bound to `event_name`, in registration order.
    pub fn handlers(&self, event_name: &str) -> &[HandlerBinding] {
        self.handlers
            .get(event_name)
            .map(Vec::as_slice)
            .unwrap_or_default()
    }

    /// Subscribe handler type `H` to event `E`. Registering the same pair
    /// twice keeps the original binding and its position.
    pub fn add_subscription<E, H>(&mut self)
    where
        E: Event,
        H: EventHandler + Default + 'static,
    {
        self.add_binding(HandlerBinding::of::<E, H>());
    }

    /// Subscribe handler type `H` to event `E`, resolving each instance
    /// from the message scope.
    pub fn add_subscription_with<E, H, F>(&mut self, factory: F)
    where
        E: Event,
        H: EventHandler + 'static,
        F: Fn(&Scope) -> H + Send + Sync + 'static,
    {
        self.add_binding(HandlerBinding::new::<E, H, F>(factory));
    }

    /// Add a prebuilt binding. Returns `false` if the pair was already bound.
    pub fn add_binding(&mut self, binding: HandlerBinding) -> bool {
        let bindings = self.handlers.entry(binding.event_name()).or_default();
        if bindings.iter().any(|b| b.same_subscription(&binding)) {
            return false;
        }
        bindings.push(binding);
        true
    }

    /// Unsubscribe handler type `H` from event `E`. Absent pairs are ignored.
    /// Returns `true` if a binding was removed.
    pub fn remove_subscription<E, H>(&mut self) -> bool
    where
        E: Event,
        H: 'static,
    {
        let Some(bindings) = self.handlers.get_mut(E::NAME) else {
            return false;
        };
        let before = bindings.len();
        bindings.retain(|b| !b.is_handler::<H>());
        let removed = bindings.len() != before;

        if bindings.is_empty() {
            self.handlers.remove(E::NAME);
        }
        removed
    }

    /// Discriminators with at least one handler, sorted.
    pub fn event_names(&self) -> Vec<&'static str> {
        let mut names: Vec<&'static str> = self.handlers.keys().copied().collect();
        names.sort_unstable();
        names
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }

    /// Remove every binding.
    pub fn clear(&mut self) {
        self.handlers.clear();
    }
}
