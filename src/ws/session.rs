//! Connection session state machine.
//!
//! A [`Session`] owns one WebSocket connection after the protocol
//! handshake. It runs two tasks: the receive loop, which is the socket's
//! only reader and routes envelopes to their consumers, and the writer
//! task behind the session's [`Outbox`].
//!
//! ```text
//! Connecting → Handshaking → Ready → Draining → Closed
//! ```
//!
//! Cancelling the session (read failure, write failure, a subscription's
//! `complete` under the default policy, or the parent token) wakes every pending mutation with a
//! cancellation, stops the keepalive monitor and closes the socket.

use std::fmt;
use std::ops::ControlFlow;
use std::sync::Arc;
use std::time::Duration;

use futures_util::{Sink, SinkExt, Stream, StreamExt};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::{Error as WsError, Message};
use tokio_util::sync::CancellationToken;

use super::keepalive;
use super::outbox::{Outbox, run_writer};
use super::waiters::{Route, WaiterRegistry};
use crate::config::{CompletionPolicy, SessionConfig};
use crate::error::ClientError;
use crate::protocol::{Envelope, MessageType, OperationId, SessionId, codec};

/// Lifecycle of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Dialing the socket.
    Connecting,
    /// `connection_init` sent, waiting for `connection_ack`.
    Handshaking,
    /// Receive loop running.
    Ready,
    /// Cancellation fired; tasks are winding down.
    Draining,
    /// Socket closed.
    Closed,
}

/// Why a session's receive loop stopped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEnd {
    /// A `complete` ended the session under [`CompletionPolicy::EndSession`].
    Completed(OperationId),
    /// The server closed the socket or the stream ended.
    ServerClosed,
    /// Reading from the socket failed.
    ReadFailed(String),
    /// The session's cancellation scope fired.
    Cancelled,
}

impl fmt::Display for SessionEnd {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Completed(id) => write!(f, "completed by {id}"),
            Self::ServerClosed => f.write_str("closed by server"),
            Self::ReadFailed(reason) => write!(f, "read failed: {reason}"),
            Self::Cancelled => f.write_str("cancelled"),
        }
    }
}

/// One live `graphql-transport-ws` connection.
#[derive(Debug)]
pub struct Session {
    pub(crate) id: SessionId,
    pub(crate) outbox: Outbox,
    pub(crate) waiters: Arc<WaiterRegistry>,
    pub(crate) cancel: CancellationToken,
    config: SessionConfig,
    state: watch::Receiver<SessionState>,
    receive_task: JoinHandle<SessionEnd>,
    writer_task: JoinHandle<()>,
}

impl Session {
    /// Runs the handshake over an already-upgraded socket, then starts the
    /// receive loop and the writer task.
    ///
    /// The session's cancellation scope is a child of `parent`.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::Connect`] if `connection_init` cannot be
    /// written, or no `connection_ack` arrives within the handshake timeout.
    /// Returns [`ClientError::Cancelled`] if `parent` fires first.
    pub async fn establish<S>(
        id: SessionId,
        socket: S,
        config: SessionConfig,
        parent: &CancellationToken,
    ) -> Result<Self, ClientError>
    where
        S: Stream<Item = Result<Message, WsError>>
            + Sink<Message, Error = WsError>
            + Send
            + Unpin
            + 'static,
    {
        let (state_tx, state) = watch::channel(SessionState::Handshaking);
        let (mut sink, mut stream) = socket.split::<Message>();

        tokio::select! {
            biased;
            () = parent.cancelled() => {
                tracing::info!(session = %id, "shutdown during handshake");
                return Err(ClientError::Cancelled { session: id, op_id: None });
            }
            result = handshake(id, &mut sink, &mut stream, config.handshake_timeout) => result?,
        }
        state_tx.send_replace(SessionState::Ready);
        tracing::info!(session = %id, "received connection_ack, session ready");

        let state_tx = Arc::new(state_tx);
        let cancel = parent.child_token();
        let (outbox, rx) = Outbox::channel(id, config.outbox_capacity);
        let waiters = Arc::new(WaiterRegistry::new());

        let writer_task = tokio::spawn(run_writer(
            id,
            sink,
            rx,
            cancel.clone(),
            Arc::clone(&state_tx),
        ));
        let receive_task = tokio::spawn(
            ReceiveLoop {
                id,
                outbox: outbox.clone(),
                waiters: Arc::clone(&waiters),
                cancel: cancel.clone(),
                state: state_tx,
                log_ping: config.log_ping,
                reply_to_ping: config.reply_to_ping,
                completion_policy: config.completion_policy,
            }
            .run(stream),
        );

        Ok(Self {
            id,
            outbox,
            waiters,
            cancel,
            config,
            state,
            receive_task,
            writer_task,
        })
    }

    /// Session identifier.
    #[must_use]
    pub const fn id(&self) -> SessionId {
        self.id
    }

    /// Current lifecycle state.
    #[must_use]
    pub fn state(&self) -> SessionState {
        *self.state.borrow()
    }

    /// Fires the session's cancellation scope.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Returns `true` once the session has been cancelled.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Clone of the session's cancellation token.
    #[must_use]
    pub fn cancellation(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Number of mutations waiting for their result.
    #[must_use]
    pub fn pending_operations(&self) -> usize {
        self.waiters.pending()
    }

    /// Number of subscriptions the server has not completed yet.
    #[must_use]
    pub fn active_subscriptions(&self) -> usize {
        self.waiters.active_subscriptions()
    }

    /// Starts the keepalive monitor at the configured interval.
    ///
    /// The task resolves to the number of pings written once the session
    /// cancels or a ping write fails.
    pub fn spawn_keepalive(&self) -> JoinHandle<u64> {
        self.spawn_keepalive_every(self.config.ping_interval)
    }

    /// Starts the keepalive monitor with an explicit interval.
    pub fn spawn_keepalive_every(&self, interval: Duration) -> JoinHandle<u64> {
        tokio::spawn(keepalive::run_keepalive(
            self.outbox.clone(),
            interval,
            self.cancel.clone(),
            self.config.log_ping,
        ))
    }

    /// Waits until the receive loop stops and the socket is closed.
    pub async fn closed(self) -> SessionEnd {
        let end = match self.receive_task.await {
            Ok(end) => end,
            Err(e) => {
                self.cancel.cancel();
                SessionEnd::ReadFailed(format!("receive loop aborted: {e}"))
            }
        };
        if let Err(e) = self.writer_task.await {
            tracing::warn!(session = %self.id, error = %e, "writer task aborted");
        }
        end
    }
}

/// Writes `connection_init` and discards frames until `connection_ack`.
async fn handshake<W, R>(
    id: SessionId,
    sink: &mut W,
    stream: &mut R,
    timeout: Duration,
) -> Result<(), ClientError>
where
    W: Sink<Message, Error = WsError> + Unpin,
    R: Stream<Item = Result<Message, WsError>> + Unpin,
{
    let connect_error = |reason: String| ClientError::Connect {
        session: id,
        reason,
    };

    let init = codec::encode(&Envelope::connection_init())
        .map_err(|e| connect_error(format!("encoding connection_init: {e}")))?;
    sink.send(Message::text(init))
        .await
        .map_err(|e| connect_error(format!("sending connection_init: {e}")))?;
    tracing::debug!(session = %id, "sent connection_init");

    match tokio::time::timeout(timeout, wait_for_ack(id, stream)).await {
        Ok(Ok(())) => Ok(()),
        Ok(Err(reason)) => Err(connect_error(reason)),
        Err(_) => Err(connect_error(format!(
            "no connection_ack within {}s",
            timeout.as_secs_f64()
        ))),
    }
}

async fn wait_for_ack<R>(id: SessionId, stream: &mut R) -> Result<(), String>
where
    R: Stream<Item = Result<Message, WsError>> + Unpin,
{
    while let Some(frame) = stream.next().await {
        let frame = frame.map_err(|e| format!("reading during handshake: {e}"))?;
        if let Message::Close(close) = &frame {
            return Err(format!("server closed during handshake: {close:?}"));
        }
        let Some(bytes) = frame_bytes(&frame) else {
            continue;
        };
        match codec::decode(bytes) {
            Ok(env) if env.kind == MessageType::ConnectionAck => return Ok(()),
            Ok(env) => {
                tracing::debug!(session = %id, kind = %env.kind, "discarding frame before connection_ack");
            }
            Err(e) => {
                tracing::debug!(session = %id, error = %e, "discarding malformed frame before connection_ack");
            }
        }
    }
    Err("stream ended before connection_ack".to_string())
}

/// Payload bytes of a data frame; `None` for control frames.
fn frame_bytes(frame: &Message) -> Option<&[u8]> {
    match frame {
        Message::Text(text) => Some(text.as_str().as_bytes()),
        Message::Binary(bytes) => Some(bytes.as_ref()),
        _ => None,
    }
}

/// The socket's sole reader.
struct ReceiveLoop {
    id: SessionId,
    outbox: Outbox,
    waiters: Arc<WaiterRegistry>,
    cancel: CancellationToken,
    state: Arc<watch::Sender<SessionState>>,
    log_ping: bool,
    reply_to_ping: bool,
    completion_policy: CompletionPolicy,
}

impl ReceiveLoop {
    async fn run<R>(self, mut stream: R) -> SessionEnd
    where
        R: Stream<Item = Result<Message, WsError>> + Unpin,
    {
        let id = self.id;
        let end = loop {
            let frame = tokio::select! {
                biased;
                () = self.cancel.cancelled() => break SessionEnd::Cancelled,
                frame = stream.next() => frame,
            };
            let frame = match frame {
                None => break SessionEnd::ServerClosed,
                Some(Err(e)) => break SessionEnd::ReadFailed(e.to_string()),
                Some(Ok(frame)) => frame,
            };
            if let Message::Close(close) = &frame {
                tracing::info!(session = %id, frame = ?close, "server sent close");
                break SessionEnd::ServerClosed;
            }
            let Some(bytes) = frame_bytes(&frame) else {
                continue;
            };
            let envelope = match codec::decode(bytes) {
                Ok(envelope) => envelope,
                Err(source) => {
                    let error = ClientError::Decode {
                        session: id,
                        source,
                    };
                    tracing::warn!(session = %id, kind = error.kind(), error = %error, "skipping frame");
                    continue;
                }
            };
            if let ControlFlow::Break(end) = self.dispatch(envelope).await {
                break end;
            }
        };

        self.state.send_if_modified(|state| {
            let draining = *state == SessionState::Ready;
            if draining {
                *state = SessionState::Draining;
            }
            draining
        });
        self.cancel.cancel();
        self.waiters.close();
        tracing::info!(session = %id, reason = %end, "receive loop stopped");
        end
    }

    async fn dispatch(&self, envelope: Envelope) -> ControlFlow<SessionEnd> {
        let id = self.id;
        match envelope.kind {
            MessageType::Next | MessageType::Error | MessageType::Complete => {
                let Some(op_id) = envelope.id.clone() else {
                    tracing::warn!(session = %id, kind = %envelope.kind, "operation message without id");
                    return ControlFlow::Continue(());
                };
                return self.route(op_id, &envelope);
            }
            MessageType::Ping => {
                self.log_keepalive("received ping");
                if self.reply_to_ping
                    && let Err(e) = self.outbox.send(&Envelope::pong()).await
                {
                    tracing::warn!(session = %id, error = %e, "failed to answer ping");
                }
            }
            MessageType::Pong => self.log_keepalive("received pong"),
            MessageType::ConnectionAck => {
                tracing::debug!(session = %id, "ignoring repeated connection_ack");
            }
            MessageType::ConnectionInit | MessageType::Subscribe | MessageType::Other(_) => {
                tracing::warn!(session = %id, kind = %envelope.kind, "unexpected message type");
            }
        }
        ControlFlow::Continue(())
    }

    fn route(&self, op_id: OperationId, envelope: &Envelope) -> ControlFlow<SessionEnd> {
        let id = self.id;
        let ends_session = self.completion_policy == CompletionPolicy::EndSession;

        match self.waiters.route(&op_id, envelope) {
            Route::Mutation => {
                tracing::debug!(session = %id, %op_id, kind = %envelope.kind, "delivered to pending mutation");
            }
            Route::Subscription(stream) => match envelope.kind {
                MessageType::Next => {
                    tracing::info!(
                        session = %id,
                        %op_id,
                        stream = %stream,
                        payload = envelope.payload_str().unwrap_or_default(),
                        "received"
                    );
                }
                MessageType::Error => {
                    tracing::warn!(
                        session = %id,
                        %op_id,
                        stream = %stream,
                        error = %envelope.error_message(),
                        "subscription failed"
                    );
                }
                _ => {
                    tracing::info!(session = %id, %op_id, stream = %stream, "subscription completed");
                    if ends_session {
                        return ControlFlow::Break(SessionEnd::Completed(op_id));
                    }
                }
            },
            Route::Unclaimed => {
                tracing::debug!(session = %id, %op_id, kind = %envelope.kind, "no consumer registered; dropping");
            }
        }
        ControlFlow::Continue(())
    }

    fn log_keepalive(&self, what: &str) {
        if self.log_ping {
            tracing::info!(session = %self.id, "{what}");
        } else {
            tracing::debug!(session = %self.id, "{what}");
        }
    }
}

#[cfg(test)]
#[allow(clippy::panic)]
mod tests {
    use super::*;

    #[test]
    fn control_frames_have_no_bytes() {
        assert!(frame_bytes(&Message::Ping(Vec::new().into())).is_none());
        assert_eq!(
            frame_bytes(&Message::text("{}")),
            Some(b"{}".as_slice())
        );
    }

    #[test]
    fn session_end_display() {
        assert_eq!(
            SessionEnd::Completed(OperationId::from("a")).to_string(),
            "completed by a"
        );
        assert_eq!(SessionEnd::ServerClosed.to_string(), "closed by server");
    }
}
