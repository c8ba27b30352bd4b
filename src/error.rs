use std::error::Error;
use std::fmt;

use crate::config::ConfigError;
use crate::handler::HandlerError;
use crate::transport::TransportError;

/// Error type for bus operations.
///
/// Anything surfacing from `run`, `poll_once` or `publish` is fatal to that
/// call. The empty-queue timeout never appears here.
#[derive(Debug)]
pub enum BusError {
    /// The configuration is unusable.
    Config(ConfigError),
    /// The queue transport failed.
    Transport(TransportError),
    /// A handler failed. Remaining handlers for the message were skipped
    /// and the read was backed out.
    Handler {
        event: String,
        handler: &'static str,
        source: HandlerError,
    },
    /// The envelope could not be serialized for handlers.
    Serialization(String),
    /// The listener thread panicked.
    ListenerPanicked,
}

impl BusError {
    /// The transport reason code, if this is a transport failure.
    pub fn reason(&self) -> Option<i32> {
        match self {
            BusError::Transport(e) => Some(e.reason),
            _ => None,
        }
    }
}

impl fmt::Display for BusError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BusError::Config(e) => write!(f, "{}", e),
            BusError::Transport(e) => write!(f, "{}", e),
            BusError::Handler {
                event,
                handler,
                source,
            } => write!(f, "handler {} failed for {}: {}", handler, event, source),
            BusError::Serialization(msg) => write!(f, "envelope serialization failed: {}", msg),
            BusError::ListenerPanicked => write!(f, "listener thread panicked"),
        }
    }
}

impl Error for BusError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            BusError::Config(e) => Some(e),
            BusError::Transport(e) => Some(e),
            BusError::Handler { source, .. } => Some(source),
            _ => None,
        }
    }
}

impl From<ConfigError> for BusError {
    fn from(err: ConfigError) -> Self {
        BusError::Config(err)
    }
}

impl From<TransportError> for BusError {
    fn from(err: TransportError) -> Self {
        BusError::Transport(err)
    }
}

impl From<serde_json::Error> for BusError {
    fn from(err: serde_json::Error) -> Self {
        BusError::Serialization(err.to_string())
    }
}
