//! WebSocket layer: dial, session state machine, write path, keepalive,
//! correlated operations.
//!
//! Each [`Session`] owns its socket, its cancellation scope and its waiter
//! registry. Nothing in this module is shared between sessions.

pub mod connection;
pub mod keepalive;
pub mod operation;
pub mod outbox;
pub mod session;
pub mod waiters;

pub use connection::WsConnector;
pub use operation::OperationKind;
pub use outbox::Outbox;
pub use session::{Session, SessionEnd, SessionState};
pub use waiters::WaiterRegistry;
