//! `graphql-transport-ws` message types: envelope, type tags, payloads.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::value::RawValue;

use super::ids::OperationId;

/// Top-level protocol envelope.
///
/// The payload is kept as raw JSON text. Outgoing payloads are serialized
/// into it by the constructors below; incoming payloads are parsed lazily
/// by whoever consumes them, into their own specific shape.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Envelope {
    /// Correlation id. Present on operation-scoped messages only.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<OperationId>,
    /// Message type discriminator.
    #[serde(rename = "type")]
    pub kind: MessageType,
    /// Type-specific payload, unparsed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload: Option<Box<RawValue>>,
}

impl PartialEq for Envelope {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
            && self.kind == other.kind
            && self.payload.as_deref().map(RawValue::get)
                == other.payload.as_deref().map(RawValue::get)
    }
}

impl Envelope {
    /// `{"type":"connection_init"}`.
    #[must_use]
    pub const fn connection_init() -> Self {
        Self::control(MessageType::ConnectionInit)
    }

    /// `{"type":"connection_ack"}`.
    #[must_use]
    pub const fn connection_ack() -> Self {
        Self::control(MessageType::ConnectionAck)
    }

    /// `{"type":"pong"}`.
    #[must_use]
    pub const fn pong() -> Self {
        Self::control(MessageType::Pong)
    }

    /// Keepalive ping carrying a diagnostic nonce.
    ///
    /// # Errors
    ///
    /// Returns a serialization error if the payload cannot be encoded.
    pub fn ping(nonce: &str) -> Result<Self, serde_json::Error> {
        let payload = serde_json::value::to_raw_value(&PingPayload { uuid: nonce })?;
        Ok(Self {
            id: None,
            kind: MessageType::Ping,
            payload: Some(payload),
        })
    }

    /// `subscribe` request. Mutations use the same framing.
    ///
    /// # Errors
    ///
    /// Returns a serialization error if the payload cannot be encoded.
    pub fn subscribe(id: OperationId, payload: &SubscribePayload) -> Result<Self, serde_json::Error> {
        Ok(Self {
            id: Some(id),
            kind: MessageType::Subscribe,
            payload: Some(serde_json::value::to_raw_value(payload)?),
        })
    }

    /// `next` result carrying an already-encoded payload.
    #[must_use]
    pub fn next(id: OperationId, payload: Box<RawValue>) -> Self {
        Self {
            id: Some(id),
            kind: MessageType::Next,
            payload: Some(payload),
        }
    }

    /// `error` result with a list of GraphQL errors.
    ///
    /// # Errors
    ///
    /// Returns a serialization error if the payload cannot be encoded.
    pub fn error(id: OperationId, errors: &[GraphqlError]) -> Result<Self, serde_json::Error> {
        Ok(Self {
            id: Some(id),
            kind: MessageType::Error,
            payload: Some(serde_json::value::to_raw_value(errors)?),
        })
    }

    /// `complete` for an operation.
    #[must_use]
    pub const fn complete(id: OperationId) -> Self {
        Self {
            id: Some(id),
            kind: MessageType::Complete,
            payload: None,
        }
    }

    const fn control(kind: MessageType) -> Self {
        Self {
            id: None,
            kind,
            payload: None,
        }
    }

    /// Returns the payload as JSON text, if any.
    #[must_use]
    pub fn payload_str(&self) -> Option<&str> {
        self.payload.as_deref().map(RawValue::get)
    }

    /// Extracts a readable message from an `error` payload.
    ///
    /// Joins all GraphQL error messages; falls back to the raw payload text
    /// when the payload does not have the expected list shape.
    #[must_use]
    pub fn error_message(&self) -> String {
        let Some(raw) = self.payload.as_deref() else {
            return "error without payload".to_string();
        };
        match serde_json::from_str::<Vec<GraphqlError>>(raw.get()) {
            Ok(errors) if !errors.is_empty() => errors
                .into_iter()
                .map(|e| e.message)
                .collect::<Vec<_>>()
                .join("; "),
            _ => raw.get().to_string(),
        }
    }
}

/// Discriminator for protocol messages.
///
/// Unrecognised tags are preserved in [`MessageType::Other`] so the receive
/// loop can log and skip them instead of failing the whole frame.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum MessageType {
    /// Client → Server: open the protocol.
    ConnectionInit,
    /// Server → Client: protocol accepted.
    ConnectionAck,
    /// Either direction: liveness probe.
    Ping,
    /// Either direction: liveness reply.
    Pong,
    /// Client → Server: start an operation.
    Subscribe,
    /// Server → Client: operation result.
    Next,
    /// Server → Client: operation failed.
    Error,
    /// Either direction: operation finished.
    Complete,
    /// Any tag outside the protocol.
    Other(String),
}

impl MessageType {
    /// Returns the wire tag.
    #[must_use]
    pub fn as_str(&self) -> &str {
        match self {
            Self::ConnectionInit => "connection_init",
            Self::ConnectionAck => "connection_ack",
            Self::Ping => "ping",
            Self::Pong => "pong",
            Self::Subscribe => "subscribe",
            Self::Next => "next",
            Self::Error => "error",
            Self::Complete => "complete",
            Self::Other(tag) => tag,
        }
    }

    /// Returns `true` for messages tied to an operation id.
    #[must_use]
    pub const fn is_operation_scoped(&self) -> bool {
        matches!(
            self,
            Self::Subscribe | Self::Next | Self::Error | Self::Complete
        )
    }
}

impl From<String> for MessageType {
    fn from(tag: String) -> Self {
        match tag.as_str() {
            "connection_init" => Self::ConnectionInit,
            "connection_ack" => Self::ConnectionAck,
            "ping" => Self::Ping,
            "pong" => Self::Pong,
            "subscribe" => Self::Subscribe,
            "next" => Self::Next,
            "error" => Self::Error,
            "complete" => Self::Complete,
            _ => Self::Other(tag),
        }
    }
}

impl From<MessageType> for String {
    fn from(kind: MessageType) -> Self {
        match kind {
            MessageType::Other(tag) => tag,
            known => known.as_str().to_string(),
        }
    }
}

impl fmt::Display for MessageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Payload of a `subscribe` request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubscribePayload {
    /// Operation document, opaque to this client.
    pub query: String,
    /// Operation variables, omitted when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub variables: Option<serde_json::Value>,
}

/// Payload of a keepalive `ping`.
#[derive(Debug, Serialize)]
struct PingPayload<'a> {
    uuid: &'a str,
}

/// One entry of an `error` payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GraphqlError {
    /// Human-readable error message.
    pub message: String,
}
