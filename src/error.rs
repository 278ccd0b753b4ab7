//! Client error taxonomy.
//!
//! [`ClientError`] is the central error type. Every variant carries enough
//! context (session, operation id, cause) to diagnose a run from its logs.
//!
//! # Propagation
//!
//! | Variant     | Origin                          | Ends the session |
//! |-------------|---------------------------------|------------------|
//! | `Connect`   | dial or handshake failure       | yes              |
//! | `Write`     | socket write failure            | yes              |
//! | `Decode`    | malformed frame                 | no               |
//! | `Operation` | server-reported GraphQL error   | no               |
//! | `NoResult`  | `complete` without a `next`     | no               |
//! | `DuplicateId` | operation id already in use   | no               |
//! | `Parse`     | response shape mismatch         | no               |
//! | `Cancelled` | session torn down mid-operation | already ended    |

use crate::protocol::{DecodeError, OperationId, SessionId};

/// Client-side error enum.
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    /// Dial or handshake failed.
    #[error("[{session}] connect failed: {reason}")]
    Connect {
        /// Session that failed to connect.
        session: SessionId,
        /// Underlying cause.
        reason: String,
    },

    /// A frame could not be decoded; the receive loop skips it.
    #[error("[{session}] malformed frame: {source}")]
    Decode {
        /// Session that received the frame.
        session: SessionId,
        /// Codec failure.
        source: DecodeError,
    },

    /// Writing to the socket failed.
    #[error("[{session}] write failed{}: {reason}", op_suffix(.op_id.as_ref()))]
    Write {
        /// Session whose socket failed.
        session: SessionId,
        /// Operation being written, if any.
        op_id: Option<OperationId>,
        /// Underlying cause.
        reason: String,
    },

    /// The server answered an operation with an `error` message.
    #[error("[{session}] operation {op_id} failed: {message}")]
    Operation {
        /// Session the operation ran on.
        session: SessionId,
        /// Operation that failed.
        op_id: OperationId,
        /// Server-provided error message.
        message: String,
    },

    /// The server completed a mutation without sending a result.
    #[error("[{session}] operation {op_id} completed without a result")]
    NoResult {
        /// Session the operation ran on.
        session: SessionId,
        /// Operation that produced nothing.
        op_id: OperationId,
    },

    /// A caller-chosen operation id is already registered on the session.
    #[error("[{session}] operation id {op_id} is already in use")]
    DuplicateId {
        /// Session the operation was refused on.
        session: SessionId,
        /// Id held by another operation.
        op_id: OperationId,
    },

    /// A response did not have the expected shape.
    #[error("[{session}] unexpected response for {op_id}: {reason}")]
    Parse {
        /// Session the operation ran on.
        session: SessionId,
        /// Operation whose payload was rejected.
        op_id: OperationId,
        /// Which part of the shape was missing or wrong.
        reason: String,
    },

    /// The session ended while an operation was pending.
    #[error("[{session}] session cancelled{}", op_suffix(.op_id.as_ref()))]
    Cancelled {
        /// Session that ended.
        session: SessionId,
        /// Operation left pending, if any.
        op_id: Option<OperationId>,
    },
}

impl ClientError {
    /// Returns `true` for transport-level errors that terminate the owning
    /// session. Data-level errors leave the session running.
    #[must_use]
    pub const fn is_session_fatal(&self) -> bool {
        match self {
            Self::Connect { .. } | Self::Write { .. } | Self::Cancelled { .. } => true,
            Self::Decode { .. }
            | Self::Operation { .. }
            | Self::NoResult { .. }
            | Self::DuplicateId { .. }
            | Self::Parse { .. } => false,
        }
    }

    /// Short category label for structured logs.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::Connect { .. } => "connect",
            Self::Decode { .. } => "decode",
            Self::Write { .. } => "write",
            Self::Operation { .. } => "operation",
            Self::NoResult { .. } => "no_result",
            Self::DuplicateId { .. } => "duplicate_id",
            Self::Parse { .. } => "parse",
            Self::Cancelled { .. } => "cancelled",
        }
    }
}

fn op_suffix(op_id: Option<&OperationId>) -> String {
    op_id.map(|id| format!(" (op {id})")).unwrap_or_default()
}
