//! Transactional event bus.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │              TransactionalEventBus (per queue)               │
//! │  subscribe / unsubscribe / close  ──►  SubscriptionRegistry │
//! │  publish(event)   ── own session, put, commit               │
//! │  run / poll_once  ── get (syncpoint) → decode → dispatch    │
//! │                      → commit iff a handler ran             │
//! └─────────────────────────────────────────────────────────────┘
//!                            │
//!                            ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │          QueueManager → QueueSession (transport)            │
//! │  get(wait, syncpoint) / put / commit / backout              │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Usage
//!
//! ```ignore
//! let bus = Arc::new(TransactionalEventBus::new(config, queue_manager)?
//!     .with_context_provider(|| Scope::new().with(db_pool.clone())));
//!
//! bus.subscribe::<ReceivedEnvelope, RecordOrder>();
//! let listener = bus.start_listener();
//!
//! bus.publish(&OrderPlaced::new(order))?;
//!
//! let stats = listener.stop()?;
//! ```

mod event_bus;
mod listener;
mod serializer;

pub use event_bus::{PollOutcome, TransactionalEventBus};
pub use listener::{ListenerHandle, ListenerStats};
pub use serializer::{EnvelopeSerializer, JsonSerializer};
