//! Pairing of an event discriminator with a handler factory.

use std::any::{type_name, TypeId};
use std::fmt;
use std::sync::Arc;

use crate::event::Event;
use crate::handler::EventHandler;
use crate::scope::Scope;

type HandlerFactory = dyn Fn(&Scope) -> Box<dyn EventHandler> + Send + Sync;

/// One subscription: "when `event_name` arrives, build a handler of type
/// `H` from the message scope and run it".
///
/// Bindings are identified by `(event_name, handler type)`. Cloning is
/// cheap; the factory is shared.
#[derive(Clone)]
pub struct HandlerBinding {
    event_name: &'static str,
    handler_id: TypeId,
    handler_name: &'static str,
    factory: Arc<HandlerFactory>,
}

impl HandlerBinding {
    /// Bind handler type `H` to event `E`, building each instance with `factory`.
    pub fn new<E, H, F>(factory: F) -> Self
    where
        E: Event,
        H: EventHandler + 'static,
        F: Fn(&Scope) -> H + Send + Sync + 'static,
    {
        Self {
            event_name: E::NAME,
            handler_id: TypeId::of::<H>(),
            handler_name: type_name::<H>(),
            factory: Arc::new(move |scope: &Scope| Box::new(factory(scope)) as Box<dyn EventHandler>),
        }
    }

    /// Bind handler type `H` to event `E`, building each instance with `H::default()`.
    pub fn of<E, H>() -> Self
    where
        E: Event,
        H: EventHandler + Default + 'static,
    {
        Self::new::<E, H, _>(|_| H::default())
    }

    /// The event discriminator this binding answers to.
    pub fn event_name(&self) -> &'static str {
        self.event_name
    }

    /// Type name of the handler, for logs and errors.
    pub fn handler_name(&self) -> &'static str {
        self.handler_name
    }

    /// True if this binding was made for handler type `H`.
    pub fn is_handler<H: 'static>(&self) -> bool {
        self.handler_id == TypeId::of::<H>()
    }

    /// True if both bindings pair the same event with the same handler type.
    pub fn same_subscription(&self, other: &HandlerBinding) -> bool {
        self.event_name == other.event_name && self.handler_id == other.handler_id
    }

    /// Build a handler instance for one message.
    pub fn resolve(&self, scope: &Scope) -> Box<dyn EventHandler> {
        (self.factory)(scope)
    }
}

impl fmt::Debug for HandlerBinding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HandlerBinding")
            .field("event_name", &self.event_name)
            .field("handler", &self.handler_name)
            .finish()
    }
}
