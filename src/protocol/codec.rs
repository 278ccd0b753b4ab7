//! Wire codec for protocol envelopes.
//!
//! Envelopes travel as JSON in WebSocket text frames. Decoding failures are
//! reported as [`DecodeError`] and are never fatal to a session: the receive
//! loop logs the frame and moves on.

use super::messages::Envelope;

/// A frame that could not be decoded into an [`Envelope`].
#[derive(Debug, thiserror::Error)]
#[error("malformed frame ({len} bytes): {source}")]
pub struct DecodeError {
    /// Size of the rejected frame.
    pub len: usize,
    /// Underlying JSON error (malformed JSON, missing `type`, ...).
    #[source]
    pub source: serde_json::Error,
}

/// Encodes an envelope as JSON text for a WebSocket text frame.
///
/// # Errors
///
/// Returns a serialization error if the envelope cannot be encoded.
pub fn encode(envelope: &Envelope) -> Result<String, serde_json::Error> {
    serde_json::to_string(envelope)
}

/// Decodes one frame's bytes into an [`Envelope`].
///
/// # Errors
///
/// Returns [`DecodeError`] on malformed JSON or a missing `type` field.
pub fn decode(bytes: &[u8]) -> Result<Envelope, DecodeError> {
    serde_json::from_slice(bytes).map_err(|source| DecodeError {
        len: bytes.len(),
        source,
    })
}
