//! Transactional publish/subscribe event bus over a message queue.
//!
//! A `TransactionalEventBus` polls one queue under syncpoint, turns each
//! message into a `ReceivedEnvelope`, fans it out to the handlers
//! subscribed to its discriminator, and commits the read only if at least
//! one handler ran. Messages nobody handles stay on the queue.

pub mod bus;
mod config;
mod error;
mod event;
mod handler;
mod scope;
mod subscription;
pub mod transport;

pub use bus::{
    EnvelopeSerializer, JsonSerializer, ListenerHandle, ListenerStats, PollOutcome,
    TransactionalEventBus,
};
pub use config::{
    BusConfig, ConfigError, ConnectionConfig, IdentifierEncoding, UnhandledPolicy,
    DEFAULT_RECONNECT_ATTEMPTS, DEFAULT_WAIT_INTERVAL_MS,
};
pub use error::BusError;
pub use event::{Event, ReceivedEnvelope};
pub use handler::{EventHandler, HandlerError};
pub use scope::{ContextProvider, NoContext, Scope};
pub use subscription::{HandlerBinding, SubscriptionRegistry};
