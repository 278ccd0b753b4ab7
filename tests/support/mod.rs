//! Scripted `graphql-transport-ws` server over an in-memory pipe.

#![allow(dead_code, clippy::panic)]

use futures_util::{SinkExt, StreamExt};
use serde_json::value::RawValue;
use tokio::io::DuplexStream;
use tokio_tungstenite::WebSocketStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::protocol::Role;
use tokio_util::sync::CancellationToken;

use gqlws_fleet::config::SessionConfig;
use gqlws_fleet::protocol::{
    Envelope, GraphqlError, MessageType, OperationId, SessionId, SubscribePayload, decode, encode,
};
use gqlws_fleet::ws::Session;

/// WebSocket endpoint over an in-memory duplex pipe.
pub type Socket = WebSocketStream<DuplexStream>;

/// Returns a connected `(client, server)` socket pair.
pub async fn socket_pair() -> (Socket, Socket) {
    let (client_io, server_io) = tokio::io::duplex(64 * 1024);
    tokio::join!(
        WebSocketStream::from_raw_socket(client_io, Role::Client, None),
        WebSocketStream::from_raw_socket(server_io, Role::Server, None),
    )
}

/// Establishes a session against a scripted server that acks the handshake.
pub async fn connect(index: usize, config: SessionConfig) -> (Session, ScriptedServer) {
    let (client, server) = socket_pair().await;
    let mut server = ScriptedServer::new(server);
    let parent = CancellationToken::new();
    let (session, ()) = tokio::join!(
        Session::establish(SessionId::new(index), client, config, &parent),
        server.accept(),
    );
    let Ok(session) = session else {
        panic!("handshake failed");
    };
    (session, server)
}

/// Server side of a test connection, driven step by step by the test.
#[derive(Debug)]
pub struct ScriptedServer {
    ws: Socket,
}

impl ScriptedServer {
    pub fn new(ws: Socket) -> Self {
        Self { ws }
    }

    /// Next envelope from the client; `None` once the client closes.
    /// Panics on a frame that is not a valid envelope.
    pub async fn recv(&mut self) -> Option<Envelope> {
        loop {
            match self.ws.next().await {
                Some(Ok(Message::Text(text))) => {
                    let Ok(env) = decode(text.as_str().as_bytes()) else {
                        panic!("client wrote a malformed frame: {}", text.as_str());
                    };
                    return Some(env);
                }
                Some(Ok(Message::Close(_))) | Some(Err(_)) | None => return None,
                Some(Ok(_)) => continue,
            }
        }
    }

    /// Next envelope, which must be of `kind`.
    pub async fn expect(&mut self, kind: MessageType) -> Envelope {
        let Some(env) = self.recv().await else {
            panic!("client closed while expecting {kind}");
        };
        assert_eq!(env.kind, kind, "unexpected envelope: {env:?}");
        env
    }

    /// Next `subscribe` request with its id and decoded payload.
    pub async fn expect_request(&mut self) -> (OperationId, SubscribePayload) {
        let env = self.expect(MessageType::Subscribe).await;
        let Some(id) = env.id.clone() else {
            panic!("subscribe without id");
        };
        let Some(Ok(payload)) = env.payload_str().map(serde_json::from_str::<SubscribePayload>)
        else {
            panic!("subscribe without a valid payload");
        };
        (id, payload)
    }

    /// Waits for `connection_init` and answers `connection_ack`.
    pub async fn accept(&mut self) {
        self.expect(MessageType::ConnectionInit).await;
        self.send(&Envelope::connection_ack()).await;
    }

    pub async fn send(&mut self, env: &Envelope) {
        let Ok(text) = encode(env) else {
            panic!("failed to encode {env:?}");
        };
        self.send_raw(&text).await;
    }

    pub async fn send_raw(&mut self, text: &str) {
        if self.ws.send(Message::text(text.to_string())).await.is_err() {
            panic!("server write failed");
        }
    }

    /// Sends `next` with `payload` for `id`.
    pub async fn next(&mut self, id: &OperationId, payload: &str) {
        let Ok(raw) = RawValue::from_string(payload.to_string()) else {
            panic!("invalid payload json: {payload}");
        };
        self.send(&Envelope::next(id.clone(), raw)).await;
    }

    /// Sends `next` followed by `complete`, the full answer to a mutation.
    pub async fn reply(&mut self, id: &OperationId, payload: &str) {
        self.next(id, payload).await;
        self.send(&Envelope::complete(id.clone())).await;
    }

    /// Sends an `error` for `id`.
    pub async fn fail(&mut self, id: &OperationId, message: &str) {
        let Ok(env) = Envelope::error(
            id.clone(),
            &[GraphqlError {
                message: message.to_string(),
            }],
        ) else {
            panic!("failed to build error envelope");
        };
        self.send(&env).await;
    }

    /// Drains client frames until the client closes.
    pub async fn drain(&mut self) -> Vec<Envelope> {
        let mut seen = Vec::new();
        while let Some(env) = self.recv().await {
            seen.push(env);
        }
        seen
    }

    /// Closes the socket from the server side.
    pub async fn close(mut self) {
        let _ = self.ws.close(None).await;
    }
}
