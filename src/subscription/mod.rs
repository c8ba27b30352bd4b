//! Subscriptions - which handlers run for which event.
//!
//! The bus never knows handler types at compile time. Hosts bind
//! `(event, handler type)` pairs into a `SubscriptionRegistry`; dispatch
//! looks the bindings up by the event's discriminator string and asks each
//! binding to build its handler from the message scope.

mod binding;
mod registry;

pub use binding::HandlerBinding;
pub use registry::SubscriptionRegistry;
