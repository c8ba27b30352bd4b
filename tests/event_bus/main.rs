//! Transactional event bus integration tests.
//!
//! Drives the bus against `InMemoryQueueManager` and checks what reached
//! the transport:
//! - Dispatch and the commit-only-if-handled decision
//! - Publishing on independent sessions
//! - Unhandled-message policies
//! - Background listener lifecycle, reconnects and fatal errors

mod dispatch;
