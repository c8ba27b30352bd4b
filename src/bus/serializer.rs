//! Canonical text form of a received envelope.

use crate::error::BusError;
use crate::event::ReceivedEnvelope;

/// Turns an envelope into the text handed to every handler.
pub trait EnvelopeSerializer: Send + Sync {
    fn serialize(&self, envelope: &ReceivedEnvelope) -> Result<String, BusError>;
}

impl<F> EnvelopeSerializer for F
where
    F: Fn(&ReceivedEnvelope) -> Result<String, BusError> + Send + Sync,
{
    fn serialize(&self, envelope: &ReceivedEnvelope) -> Result<String, BusError> {
        self(envelope)
    }
}

/// JSON object with `payload`, `messageId` and `correlationId` fields.
#[derive(Debug, Default, Clone, Copy)]
pub struct JsonSerializer;

impl EnvelopeSerializer for JsonSerializer {
    fn serialize(&self, envelope: &ReceivedEnvelope) -> Result<String, BusError> {
        Ok(serde_json::to_string(envelope)?)
    }
}
