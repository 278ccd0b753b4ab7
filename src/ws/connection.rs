//! WebSocket dial: upgrade request with credentials and subprotocol.

use std::fmt;

use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::handshake::client::Request;
use tokio_tungstenite::tungstenite::http::{HeaderValue, header};
use tokio_tungstenite::tungstenite::Error as WsError;
use tokio_util::sync::CancellationToken;

use super::session::{Session, SessionState};
use crate::config::{AuthStyle, FleetConfig, SessionConfig};
use crate::error::ClientError;
use crate::protocol::{SUBPROTOCOL, SessionId};

/// Opens sockets to one endpoint with one set of credentials.
#[derive(Clone)]
pub struct WsConnector {
    endpoint: String,
    access_token: String,
    auth_style: AuthStyle,
    session: SessionConfig,
}

impl WsConnector {
    /// Creates a connector.
    #[must_use]
    pub fn new(
        endpoint: impl Into<String>,
        access_token: impl Into<String>,
        auth_style: AuthStyle,
        session: SessionConfig,
    ) -> Self {
        Self {
            endpoint: endpoint.into(),
            access_token: access_token.into(),
            auth_style,
            session,
        }
    }

    /// Creates a connector from the fleet configuration.
    #[must_use]
    pub fn from_config(config: &FleetConfig) -> Self {
        Self::new(
            config.endpoint.clone(),
            config.access_token.clone(),
            config.auth_style,
            config.session.clone(),
        )
    }

    /// Dials the endpoint and runs the protocol handshake.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::Connect`] if the request cannot be built, the
    /// upgrade fails, or the handshake does not complete.
    pub async fn connect_and_handshake(
        &self,
        id: SessionId,
        parent: &CancellationToken,
    ) -> Result<Session, ClientError> {
        let connect_error = |e: WsError| ClientError::Connect {
            session: id,
            reason: e.to_string(),
        };

        tracing::debug!(session = %id, state = ?SessionState::Connecting, endpoint = %self.endpoint, "dialing");
        let request = build_request(&self.endpoint, &self.access_token, self.auth_style)
            .map_err(connect_error)?;
        let (socket, response) = tokio::select! {
            biased;
            () = parent.cancelled() => {
                return Err(ClientError::Cancelled { session: id, op_id: None });
            }
            result = tokio_tungstenite::connect_async(request) => result.map_err(connect_error)?,
        };
        tracing::info!(session = %id, status = %response.status(), "connected to websocket");

        Session::establish(id, socket, self.session.clone(), parent).await
    }
}

impl fmt::Debug for WsConnector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WsConnector")
            .field("endpoint", &self.endpoint)
            .field("access_token", &"<redacted>")
            .field("auth_style", &self.auth_style)
            .field("session", &self.session)
            .finish()
    }
}

/// Builds the upgrade request: subprotocol negotiation plus the token in
/// the configured header.
///
/// # Errors
///
/// Returns an error if the endpoint is not a valid WebSocket URL or the
/// token contains characters not allowed in a header value.
pub fn build_request(endpoint: &str, token: &str, style: AuthStyle) -> Result<Request, WsError> {
    let mut request = endpoint.into_client_request()?;

    let (name, value) = match style {
        AuthStyle::Cookie => (header::COOKIE, format!("access_token={token}")),
        AuthStyle::Bearer => (header::AUTHORIZATION, format!("Bearer {token}")),
    };
    let mut value =
        HeaderValue::from_str(&value).map_err(|e| WsError::HttpFormat(e.into()))?;
    value.set_sensitive(true);

    let headers = request.headers_mut();
    headers.insert(
        header::SEC_WEBSOCKET_PROTOCOL,
        HeaderValue::from_static(SUBPROTOCOL),
    );
    headers.insert(name, value);
    Ok(request)
}

#[cfg(test)]
#[allow(clippy::panic)]
mod tests {
    use super::*;

    #[test]
    fn cookie_style_request_carries_token_and_subprotocol() {
        let Ok(request) = build_request("wss://api.example.com/graphql", "tok", AuthStyle::Cookie)
        else {
            panic!("request should build");
        };
        let headers = request.headers();
        assert_eq!(
            headers.get(header::SEC_WEBSOCKET_PROTOCOL).map(HeaderValue::as_bytes),
            Some(SUBPROTOCOL.as_bytes())
        );
        assert_eq!(
            headers.get(header::COOKIE).map(HeaderValue::as_bytes),
            Some(b"access_token=tok".as_slice())
        );
        assert!(headers.get(header::AUTHORIZATION).is_none());
    }

    #[test]
    fn bearer_style_uses_authorization_header() {
        let Ok(request) = build_request("ws://localhost:4000/graphql", "tok", AuthStyle::Bearer)
        else {
            panic!("request should build");
        };
        assert_eq!(
            request
                .headers()
                .get(header::AUTHORIZATION)
                .map(HeaderValue::as_bytes),
            Some(b"Bearer tok".as_slice())
        );
    }

    #[test]
    fn token_with_newline_is_rejected() {
        assert!(build_request("ws://localhost/graphql", "bad\ntoken", AuthStyle::Cookie).is_err());
    }

    #[test]
    fn debug_redacts_token() {
        let connector = WsConnector::new(
            "ws://localhost/graphql",
            "secret-token",
            AuthStyle::Cookie,
            SessionConfig::default(),
        );
        let printed = format!("{connector:?}");
        assert!(!printed.contains("secret-token"));
        assert!(printed.contains("<redacted>"));
    }

    #[tokio::test]
    async fn unreachable_endpoint_is_a_connect_error() {
        let connector = WsConnector::new(
            "ws://127.0.0.1:1/graphql",
            "tok",
            AuthStyle::Bearer,
            SessionConfig::default(),
        );
        let result = connector
            .connect_and_handshake(SessionId::new(9), &CancellationToken::new())
            .await;
        let Err(ClientError::Connect { session, .. }) = result else {
            panic!("expected connect error");
        };
        assert_eq!(session, SessionId::new(9));
    }
}
