//! Queue transport - the transactional message queue the bus runs on.
//!
//! The bus never talks to a broker directly. It connects through a
//! `QueueManager`, which hands out `QueueSession`s: a connection plus an
//! open unit of work. Reads and writes made under syncpoint are
//! provisional until the session commits.
//!
//! ```text
//! ┌───────────────────────────────┐
//! │ QueueManager::connect()       │──► QueueSession
//! └───────────────────────────────┘      get(queue, wait, syncpoint)
//!                                        put(queue, message)
//!                                        commit() / backout()
//! ```
//!
//! An empty queue is not an error to the bus: it surfaces as reason code
//! `2033` and the listener simply polls again.

mod in_memory;
mod queue;

pub use in_memory::{InMemoryQueueManager, InMemorySession, Operation};
pub use queue::{
    reason, GetOptions, PutOptions, QueueManager, QueueMessage, QueueSession, TransportError,
};
