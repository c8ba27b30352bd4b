//! Bus configuration.
//!
//! Supplied once when the bus is constructed and applied explicitly each
//! time a session is connected. Deserializable from JSON so hosts can keep
//! it alongside the rest of their settings.

use std::error::Error;
use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Default receive wait, in milliseconds.
pub const DEFAULT_WAIT_INTERVAL_MS: u64 = 500;

/// Default number of consecutive reconnects before a broken connection is fatal.
pub const DEFAULT_RECONNECT_ATTEMPTS: u32 = 3;

/// Client connection parameters for the queue manager.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectionConfig {
    pub host: String,
    pub port: u16,
    pub channel: String,
    #[serde(default)]
    pub user: String,
    #[serde(default)]
    pub password: String,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 1414,
            channel: "SYSTEM.DEF.SVRCONN".to_string(),
            user: String::new(),
            password: String::new(),
        }
    }
}

impl fmt::Debug for ConnectionConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionConfig")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("channel", &self.channel)
            .field("user", &self.user)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// What to do with a message nobody subscribes to.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "policy", rename_all = "snake_case")]
pub enum UnhandledPolicy {
    /// Leave it on the queue. It will be received again, forever.
    #[default]
    Redeliver,
    /// Commit the read and drop the message once it has been backed out
    /// `after` times.
    Discard { after: u32 },
    /// Move the message to `queue` once it has been backed out `after` times.
    DeadLetter { queue: String, after: u32 },
}

/// How transport identifiers are turned into text on the envelope.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IdentifierEncoding {
    /// Decode the raw bytes as UTF-8, replacing invalid sequences.
    #[default]
    Text,
    /// Standard base64 of the raw bytes. Lossless.
    Base64,
}

/// Configuration for a `TransactionalEventBus`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BusConfig {
    pub queue_manager: String,
    pub queue: String,
    #[serde(default)]
    pub connection: ConnectionConfig,
    #[serde(default = "default_wait_interval_ms")]
    pub wait_interval_ms: u64,
    #[serde(default = "default_reconnect_attempts")]
    pub reconnect_attempts: u32,
    #[serde(default)]
    pub unhandled: UnhandledPolicy,
    #[serde(default)]
    pub identifier_encoding: IdentifierEncoding,
    /// Message property carrying the event discriminator. When unset every
    /// received message dispatches as a `ReceivedEnvelope`.
    #[serde(default)]
    pub event_type_property: Option<String>,
}

fn default_wait_interval_ms() -> u64 {
    DEFAULT_WAIT_INTERVAL_MS
}

fn default_reconnect_attempts() -> u32 {
    DEFAULT_RECONNECT_ATTEMPTS
}

impl BusConfig {
    /// Configuration for the given queue manager and queue, defaults elsewhere.
    pub fn new(queue_manager: impl Into<String>, queue: impl Into<String>) -> Self {
        Self {
            queue_manager: queue_manager.into(),
            queue: queue.into(),
            connection: ConnectionConfig::default(),
            wait_interval_ms: DEFAULT_WAIT_INTERVAL_MS,
            reconnect_attempts: DEFAULT_RECONNECT_ATTEMPTS,
            unhandled: UnhandledPolicy::default(),
            identifier_encoding: IdentifierEncoding::default(),
            event_type_property: None,
        }
    }

    /// Parse and validate a JSON document.
    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        let config: Self =
            serde_json::from_str(json).map_err(|e| ConfigError::Parse(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn with_connection(mut self, connection: ConnectionConfig) -> Self {
        self.connection = connection;
        self
    }

    /// Receive wait. Stored in whole milliseconds: sub-millisecond
    /// remainders are dropped, so anything under 1 ms fails `validate()`.
    pub fn with_wait_interval(mut self, wait: Duration) -> Self {
        self.wait_interval_ms = u64::try_from(wait.as_millis()).unwrap_or(u64::MAX);
        self
    }

    pub fn with_reconnect_attempts(mut self, attempts: u32) -> Self {
        self.reconnect_attempts = attempts;
        self
    }

    pub fn with_unhandled(mut self, policy: UnhandledPolicy) -> Self {
        self.unhandled = policy;
        self
    }

    pub fn with_identifier_encoding(mut self, encoding: IdentifierEncoding) -> Self {
        self.identifier_encoding = encoding;
        self
    }

    pub fn with_event_type_property(mut self, property: impl Into<String>) -> Self {
        self.event_type_property = Some(property.into());
        self
    }

    /// The receive wait interval.
    pub fn wait_interval(&self) -> Duration {
        Duration::from_millis(self.wait_interval_ms)
    }

    /// Check the configuration is usable before connecting.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.queue_manager.trim().is_empty() {
            return Err(ConfigError::Missing("queue_manager"));
        }
        if self.queue.trim().is_empty() {
            return Err(ConfigError::Missing("queue"));
        }
        if self.connection.host.trim().is_empty() {
            return Err(ConfigError::Missing("connection.host"));
        }
        if self.connection.port == 0 {
            return Err(ConfigError::Invalid("connection.port must be non-zero".into()));
        }
        if self.wait_interval_ms == 0 {
            return Err(ConfigError::Invalid("wait_interval_ms must be non-zero".into()));
        }
        if let UnhandledPolicy::DeadLetter { queue, .. } = &self.unhandled {
            if queue.trim().is_empty() {
                return Err(ConfigError::Missing("unhandled.queue"));
            }
            if *queue == self.queue {
                return Err(ConfigError::Invalid(format!(
                    "dead-letter queue must differ from input queue {}",
                    self.queue
                )));
            }
        }
        Ok(())
    }
}

/// Error type for configuration loading and validation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    /// The document could not be parsed.
    Parse(String),
    /// A required field is empty.
    Missing(&'static str),
    /// A field has an unusable value.
    Invalid(String),
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::Parse(msg) => write!(f, "invalid bus config: {}", msg),
            ConfigError::Missing(field) => write!(f, "missing bus config field: {}", field),
            ConfigError::Invalid(msg) => write!(f, "invalid bus config: {}", msg),
        }
    }
}

impl Error for ConfigError {}
