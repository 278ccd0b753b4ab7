//! Operation sender: `subscribe` and `mutate` on a session.
//!
//! Both operations go out as `subscribe` envelopes; the protocol has no
//! separate mutation frame. What differs is what the client does after the
//! write: a subscription is fire-and-forget, a mutation waits for its
//! `next` + `complete` pair.

use std::fmt;

use serde_json::value::RawValue;

use super::session::Session;
use super::waiters::{Refused, WaiterGuard};
use crate::error::ClientError;
use crate::protocol::{Envelope, OperationId, SubscribePayload};

/// Caller intent behind a `subscribe` envelope.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperationKind {
    /// Long-lived stream of `next` messages.
    Subscription,
    /// Single result followed by `complete`.
    Mutation,
}

impl fmt::Display for OperationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Subscription => "subscription",
            Self::Mutation => "mutation",
        })
    }
}

impl Session {
    /// Starts a subscription and returns without waiting for data.
    ///
    /// Incoming `next` messages for the returned id are logged by the
    /// receive loop under `label`.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::Write`] if the request cannot be written,
    /// which also cancels the session, or [`ClientError::Cancelled`] if the
    /// session has already ended.
    pub async fn subscribe(
        &self,
        label: &str,
        query: &str,
        variables: Option<serde_json::Value>,
    ) -> Result<OperationId, ClientError> {
        let op_id = OperationId::new();
        self.waiters.track_subscription(op_id.clone(), label);

        let envelope = self.request(&op_id, query, variables)?;
        self.write(&envelope).await?;
        tracing::info!(
            session = %self.id,
            %op_id,
            kind = %OperationKind::Subscription,
            label,
            "sent subscription"
        );
        Ok(op_id)
    }

    /// Runs a mutation under a fresh correlation id and waits for its result.
    ///
    /// # Errors
    ///
    /// See [`Session::mutate_as`].
    pub async fn mutate(
        &self,
        query: &str,
        variables: Option<serde_json::Value>,
    ) -> Result<Box<RawValue>, ClientError> {
        self.mutate_as(OperationId::new(), query, variables).await
    }

    /// Runs a mutation under `op_id` and waits for its result.
    ///
    /// The waiter is registered before the request is written and removed
    /// when this call returns, however it returns. The raw `next` payload is
    /// returned for the caller to interpret.
    ///
    /// # Errors
    ///
    /// - [`ClientError::Operation`] if the server answers with `error`.
    /// - [`ClientError::NoResult`] if it completes without a `next`.
    /// - [`ClientError::DuplicateId`] if `op_id` already belongs to another
    ///   operation on this session; nothing is written.
    /// - [`ClientError::Write`] if the request cannot be written (the
    ///   session is cancelled).
    /// - [`ClientError::Cancelled`] if the session ends first.
    pub async fn mutate_as(
        &self,
        op_id: OperationId,
        query: &str,
        variables: Option<serde_json::Value>,
    ) -> Result<Box<RawValue>, ClientError> {
        let reply = match self.waiters.register(op_id.clone()) {
            Ok(reply) => reply,
            Err(Refused::Closed) => return Err(self.cancelled(&op_id)),
            Err(Refused::InUse) => {
                return Err(ClientError::DuplicateId {
                    session: self.id,
                    op_id,
                });
            }
        };
        let _guard = WaiterGuard::new(&self.waiters, op_id.clone());

        let envelope = self.request(&op_id, query, variables)?;
        self.write(&envelope).await?;
        tracing::debug!(session = %self.id, %op_id, kind = %OperationKind::Mutation, "sent mutation");

        let outcome = tokio::select! {
            biased;
            outcome = reply => outcome,
            () = self.cancel.cancelled() => return Err(self.cancelled(&op_id)),
        };
        match outcome {
            Ok(Ok(Some(payload))) => Ok(payload),
            Ok(Ok(None)) => Err(ClientError::NoResult {
                session: self.id,
                op_id,
            }),
            Ok(Err(message)) => Err(ClientError::Operation {
                session: self.id,
                op_id,
                message,
            }),
            Err(_) => Err(self.cancelled(&op_id)),
        }
    }

    fn request(
        &self,
        op_id: &OperationId,
        query: &str,
        variables: Option<serde_json::Value>,
    ) -> Result<Envelope, ClientError> {
        let payload = SubscribePayload {
            query: query.to_string(),
            variables,
        };
        Envelope::subscribe(op_id.clone(), &payload).map_err(|e| ClientError::Write {
            session: self.id,
            op_id: Some(op_id.clone()),
            reason: format!("encoding request: {e}"),
        })
    }

    async fn write(&self, envelope: &Envelope) -> Result<(), ClientError> {
        let result = self.outbox.send(envelope).await;
        if let Err(e) = &result
            && e.is_session_fatal()
        {
            tracing::warn!(session = %self.id, error = %e, "request write failed; ending session");
            self.cancel.cancel();
        }
        result
    }

    fn cancelled(&self, op_id: &OperationId) -> ClientError {
        ClientError::Cancelled {
            session: self.id,
            op_id: Some(op_id.clone()),
        }
    }
}
