//! Event handler capability and its error type.

use std::error::Error;
use std::fmt;

use crate::scope::Scope;

/// Something that reacts to a dispatched event.
///
/// `message` is the serialized envelope; `scope` is shared with every
/// other handler invoked for the same message.
///
/// Closures with the matching signature are handlers:
///
/// ```
/// use syncpoint_bus::{EventHandler, HandlerError, Scope};
///
/// let handler = |message: &str, _scope: &Scope| -> Result<(), HandlerError> {
///     if message.is_empty() {
///         return Err(HandlerError::Rejected("empty message".into()));
///     }
///     Ok(())
/// };
/// assert!(handler.handle("{}", &Scope::new()).is_ok());
/// ```
pub trait EventHandler: Send + Sync {
    fn handle(&self, message: &str, scope: &Scope) -> Result<(), HandlerError>;
}

impl<F> EventHandler for F
where
    F: Fn(&str, &Scope) -> Result<(), HandlerError> + Send + Sync,
{
    fn handle(&self, message: &str, scope: &Scope) -> Result<(), HandlerError> {
        self(message, scope)
    }
}

/// Error type for handler operations.
#[derive(Debug)]
pub enum HandlerError {
    /// Payload decode failed.
    DecodeFailed(String),
    /// Business logic rejected the event.
    Rejected(String),
    /// A resource the handler expected in the scope was missing.
    MissingContext(&'static str),
    /// Other error.
    Other(Box<dyn Error + Send + Sync>),
}

impl HandlerError {
    /// Wrap any error.
    pub fn other(err: impl Into<Box<dyn Error + Send + Sync>>) -> Self {
        HandlerError::Other(err.into())
    }
}

impl fmt::Display for HandlerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HandlerError::DecodeFailed(msg) => write!(f, "decode failed: {}", msg),
            HandlerError::Rejected(msg) => write!(f, "rejected: {}", msg),
            HandlerError::MissingContext(what) => write!(f, "missing from scope: {}", what),
            HandlerError::Other(e) => write!(f, "handler error: {}", e),
        }
    }
}

impl Error for HandlerError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            HandlerError::Other(e) => Some(e.as_ref()),
            _ => None,
        }
    }
}

impl From<serde_json::Error> for HandlerError {
    fn from(err: serde_json::Error) -> Self {
        HandlerError::DecodeFailed(err.to_string())
    }
}
