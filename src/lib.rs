//! # gqlws-fleet
//!
//! Load-generation and diagnostic client for GraphQL APIs speaking the
//! `graphql-transport-ws` WebSocket subprotocol.
//!
//! The crate opens many concurrent connections, performs the protocol
//! handshake on each, issues subscriptions and mutations, correlates
//! responses by message id, and keeps every connection alive with periodic
//! pings.
//!
//! ## Architecture
//!
//! ```text
//! Fleet (service/)
//!     │  one task per connection, shared shutdown token
//!     │
//!     ├── Scenario (service/)      subscriptions, create/delete cycles
//!     │
//!     ├── Session (ws/)
//!     │     ├── receive loop       sole reader, routes by id
//!     │     ├── Outbox + writer    sole writer, serialized frames
//!     │     ├── WaiterRegistry     id → pending mutation
//!     │     └── keepalive          periodic ping
//!     │
//!     └── Envelope codec (protocol/)
//! ```

pub mod config;
pub mod error;
pub mod protocol;
pub mod service;
pub mod ws;
