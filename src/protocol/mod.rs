//! Protocol layer: `graphql-transport-ws` envelopes, codec, identifiers.

pub mod codec;
pub mod ids;
pub mod messages;

pub use codec::{DecodeError, decode, encode};
pub use ids::{OperationId, SessionId};
pub use messages::{Envelope, GraphqlError, MessageType, SubscribePayload};

/// WebSocket subprotocol negotiated during the upgrade.
pub const SUBPROTOCOL: &str = "graphql-transport-ws";
