//! Events carried by the bus.

use serde::{Deserialize, Serialize};

/// A typed event that can be published or subscribed to.
///
/// `NAME` is the discriminator handlers are registered under. It is
/// normally the type's own name.
///
/// ## Example
///
/// ```
/// use syncpoint_bus::Event;
///
/// struct OrderPlaced {
///     json: String,
/// }
///
/// impl Event for OrderPlaced {
///     const NAME: &'static str = "OrderPlaced";
///
///     fn payload(&self) -> &str {
///         &self.json
///     }
/// }
/// ```
pub trait Event {
    /// Stable type discriminator.
    const NAME: &'static str;

    /// The body written to the queue.
    fn payload(&self) -> &str;

    /// Correlation token to stamp on the outgoing message, if any.
    fn correlation_id(&self) -> Option<&str> {
        None
    }
}

/// An event built from a message taken off the queue.
///
/// Both identifiers are captured verbatim from the transport message.
/// They are correlation tokens, not business data.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReceivedEnvelope {
    pub payload: String,
    pub message_id: String,
    pub correlation_id: String,
}

impl ReceivedEnvelope {
    pub fn new(
        payload: impl Into<String>,
        message_id: impl Into<String>,
        correlation_id: impl Into<String>,
    ) -> Self {
        Self {
            payload: payload.into(),
            message_id: message_id.into(),
            correlation_id: correlation_id.into(),
        }
    }

    /// Recover an envelope from the serialized form handed to handlers.
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }

    /// Deserialize the raw payload as JSON.
    pub fn decode<T: serde::de::DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
        serde_json::from_str(&self.payload)
    }
}

impl Event for ReceivedEnvelope {
    const NAME: &'static str = "ReceivedEnvelope";

    fn payload(&self) -> &str {
        &self.payload
    }

    fn correlation_id(&self) -> Option<&str> {
        if self.correlation_id.is_empty() {
            None
        } else {
            Some(&self.correlation_id)
        }
    }
}
