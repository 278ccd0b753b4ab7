//! Serialized write path for one session.
//!
//! Every outgoing envelope goes through an [`Outbox`] into a bounded queue
//! drained by a single writer task that owns the socket's write half. The
//! operation sender, the keepalive monitor and the receive loop (for `pong`
//! replies) all hold clones of the same `Outbox`, so writes never interleave.

use std::sync::Arc;
use std::time::Duration;

use futures_util::{Sink, SinkExt};
use tokio::sync::{mpsc, oneshot, watch};
use tokio_tungstenite::tungstenite::{Error as WsError, Message};
use tokio_util::sync::CancellationToken;

use super::session::SessionState;
use crate::error::ClientError;
use crate::protocol::{Envelope, OperationId, SessionId, codec};

/// Upper bound on sending the close frame during teardown.
const CLOSE_GRACE: Duration = Duration::from_secs(2);

/// One queued text frame plus the channel that reports its write outcome.
#[derive(Debug)]
pub struct OutboundFrame {
    /// Encoded envelope.
    pub text: String,
    /// Write outcome; `Err` carries the socket error text.
    pub ack: oneshot::Sender<Result<(), String>>,
}

/// Handle for queueing envelopes onto a session's socket.
#[derive(Debug, Clone)]
pub struct Outbox {
    session: SessionId,
    tx: mpsc::Sender<OutboundFrame>,
}

impl Outbox {
    /// Creates an outbox and the receiving end for its writer.
    #[must_use]
    pub fn channel(session: SessionId, capacity: usize) -> (Self, mpsc::Receiver<OutboundFrame>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (Self { session, tx }, rx)
    }

    /// Encodes `envelope`, queues it, and waits until the writer has put it
    /// on the socket.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::Write`] if encoding or the socket write fails,
    /// and [`ClientError::Cancelled`] if the writer has already shut down.
    pub async fn send(&self, envelope: &Envelope) -> Result<(), ClientError> {
        let op_id = envelope.id.clone();
        let text = codec::encode(envelope).map_err(|e| self.write_error(op_id.clone(), e))?;

        let (ack, done) = oneshot::channel();
        if self.tx.send(OutboundFrame { text, ack }).await.is_err() {
            return Err(self.cancelled(op_id));
        }
        match done.await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(reason)) => Err(self.write_error(op_id, reason)),
            Err(_) => Err(self.cancelled(op_id)),
        }
    }

    /// Session this outbox writes to.
    #[must_use]
    pub const fn session(&self) -> SessionId {
        self.session
    }

    fn write_error(&self, op_id: Option<OperationId>, reason: impl ToString) -> ClientError {
        ClientError::Write {
            session: self.session,
            op_id,
            reason: reason.to_string(),
        }
    }

    const fn cancelled(&self, op_id: Option<OperationId>) -> ClientError {
        ClientError::Cancelled {
            session: self.session,
            op_id,
        }
    }
}

/// Drains the outbox queue onto the socket until the session cancels or a
/// write fails. A failed write cancels the session. On exit the socket is
/// closed and the session state moves to [`SessionState::Closed`].
pub async fn run_writer<W>(
    session: SessionId,
    mut sink: W,
    mut rx: mpsc::Receiver<OutboundFrame>,
    cancel: CancellationToken,
    state: Arc<watch::Sender<SessionState>>,
) where
    W: Sink<Message, Error = WsError> + Unpin,
{
    loop {
        let frame = tokio::select! {
            biased;
            () = cancel.cancelled() => break,
            frame = rx.recv() => frame,
        };
        let Some(OutboundFrame { text, ack }) = frame else {
            break;
        };

        let result = tokio::select! {
            biased;
            () = cancel.cancelled() => break,
            result = sink.send(Message::text(text)) => result,
        };
        match result {
            Ok(()) => {
                let _ = ack.send(Ok(()));
            }
            Err(e) => {
                tracing::warn!(%session, error = %e, "socket write failed; cancelling session");
                let _ = ack.send(Err(e.to_string()));
                cancel.cancel();
                break;
            }
        }
    }

    // Queued frames are dropped with their acks, which senders observe as
    // cancellation.
    rx.close();
    state.send_replace(SessionState::Draining);
    if tokio::time::timeout(CLOSE_GRACE, sink.close()).await.is_err() {
        tracing::debug!(%session, "close frame not flushed in time");
    }
    state.send_replace(SessionState::Closed);
    tracing::debug!(%session, "writer stopped, socket closed");
}
