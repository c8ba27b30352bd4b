//! Core transport traits for a transactional message queue.

use std::error::Error;
use std::fmt;
use std::time::Duration;

use crate::config::ConnectionConfig;

/// Well-known reason codes reported by the queue manager.
pub mod reason {
    /// The queue manager connection was lost.
    pub const CONNECTION_BROKEN: i32 = 2009;
    /// The queue manager is not available for connection.
    pub const Q_MGR_NOT_AVAILABLE: i32 = 2059;
    /// No message arrived within the wait interval.
    pub const NO_MSG_AVAILABLE: i32 = 2033;
    /// The named queue does not exist.
    pub const UNKNOWN_OBJECT_NAME: i32 = 2085;
    /// The queue manager is quiescing.
    pub const Q_MGR_QUIESCING: i32 = 2161;
    /// The queue manager is shutting down.
    pub const Q_MGR_STOPPING: i32 = 2162;
    /// The connection is quiescing.
    pub const CONNECTION_QUIESCING: i32 = 2202;
    /// Generic failure with no more specific code.
    pub const UNEXPECTED_ERROR: i32 = 2195;
}

/// A message as it sits on (or comes off) the queue.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct QueueMessage {
    /// Raw message body.
    pub payload: Vec<u8>,
    /// Transport-assigned message identifier. Empty on put lets the
    /// queue manager generate one.
    pub message_id: Vec<u8>,
    /// Correlation identifier supplied by the sender.
    pub correlation_id: Vec<u8>,
    /// Number of times this message was read and then backed out.
    pub backout_count: u32,
    /// Named message properties.
    pub properties: Vec<(String, String)>,
}

impl QueueMessage {
    /// Create a message with the given body.
    pub fn new(payload: impl Into<Vec<u8>>) -> Self {
        Self {
            payload: payload.into(),
            ..Self::default()
        }
    }

    /// Set the correlation identifier.
    pub fn with_correlation_id(mut self, correlation_id: impl Into<Vec<u8>>) -> Self {
        self.correlation_id = correlation_id.into();
        self
    }

    /// Add a named property.
    pub fn with_property(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.properties.push((key.into(), value.into()));
        self
    }

    /// Look up a property by name.
    pub fn property(&self, key: &str) -> Option<&str> {
        self.properties
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    /// The body as text, replacing invalid UTF-8 sequences.
    pub fn payload_text(&self) -> String {
        String::from_utf8_lossy(&self.payload).into_owned()
    }
}

/// Options for a receive.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct GetOptions {
    /// How long to block waiting for a message.
    pub wait: Duration,
    /// Read under syncpoint: the message is only removed on commit.
    pub syncpoint: bool,
}

impl GetOptions {
    /// A waiting, syncpoint-scoped receive.
    pub fn syncpoint(wait: Duration) -> Self {
        Self {
            wait,
            syncpoint: true,
        }
    }
}

/// Options for a put.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PutOptions {
    /// Put under syncpoint: the message only becomes visible on commit.
    pub syncpoint: bool,
}

impl Default for PutOptions {
    fn default() -> Self {
        Self { syncpoint: true }
    }
}

/// Error reported by the queue transport, identified by a reason code.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TransportError {
    pub reason: i32,
    pub message: String,
}

impl TransportError {
    pub fn new(reason: i32, message: impl Into<String>) -> Self {
        Self {
            reason,
            message: message.into(),
        }
    }

    /// The empty-queue condition. Expected, never fatal.
    pub fn no_message() -> Self {
        Self::new(reason::NO_MSG_AVAILABLE, "no message available")
    }

    /// True when the receive simply timed out on an empty queue.
    pub fn is_no_message(&self) -> bool {
        self.reason == reason::NO_MSG_AVAILABLE
    }

    /// True when the connection itself is gone and a new session may succeed.
    pub fn is_connection_broken(&self) -> bool {
        matches!(
            self.reason,
            reason::CONNECTION_BROKEN
                | reason::Q_MGR_NOT_AVAILABLE
                | reason::Q_MGR_QUIESCING
                | reason::Q_MGR_STOPPING
                | reason::CONNECTION_QUIESCING
        )
    }
}

impl fmt::Display for TransportError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "queue transport error {}: {}", self.reason, self.message)
    }
}

impl Error for TransportError {}

/// Factory for transactional sessions against a queue manager.
///
/// Implementations might include:
/// - `InMemoryQueueManager` - For testing and single-process scenarios
/// - an IBM MQ client binding
/// - any broker with get-under-syncpoint semantics
pub trait QueueManager: Send + Sync {
    type Session: QueueSession;

    /// Open a connection and start a transaction scope.
    fn connect(
        &self,
        queue_manager: &str,
        connection: &ConnectionConfig,
    ) -> Result<Self::Session, TransportError>;
}

/// A connection with an open unit of work.
///
/// Dropping a session without calling `commit` backs out everything done
/// under syncpoint since the last commit or backout.
pub trait QueueSession: Send {
    /// Receive the next message, blocking up to `options.wait`.
    ///
    /// An empty queue is reported as `Err` with reason `2033`.
    fn get(&mut self, queue: &str, options: GetOptions) -> Result<QueueMessage, TransportError>;

    /// Put a message on a queue.
    fn put(
        &mut self,
        queue: &str,
        message: QueueMessage,
        options: PutOptions,
    ) -> Result<(), TransportError>;

    /// Make all syncpoint work since the last commit/backout permanent.
    fn commit(&mut self) -> Result<(), TransportError>;

    /// Undo all syncpoint work since the last commit/backout.
    fn backout(&mut self) -> Result<(), TransportError>;
}
