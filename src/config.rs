//! Fleet configuration loaded from environment variables.
//!
//! Follows 12-factor style: all settings come from environment variables
//! (or a `.env` file via `dotenvy`). Only the access token is mandatory.

use std::time::Duration;

use crate::service::scenario::SubscriptionStream;

/// Default GraphQL WebSocket endpoint.
pub const DEFAULT_ENDPOINT: &str = "ws://127.0.0.1:4000/graphql";

/// How the opaque access token is attached to the upgrade request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthStyle {
    /// `Cookie: access_token=<token>`.
    Cookie,
    /// `Authorization: Bearer <token>`.
    Bearer,
}

impl AuthStyle {
    fn parse(value: &str) -> Option<Self> {
        match value.to_ascii_lowercase().as_str() {
            "cookie" => Some(Self::Cookie),
            "bearer" | "authorization" => Some(Self::Bearer),
            _ => None,
        }
    }
}

/// What an incoming `complete` not claimed by a pending mutation does.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CompletionPolicy {
    /// Any subscription completing tears down the whole session.
    #[default]
    EndSession,
    /// Only the completed subscription ends; the session keeps running.
    EndSubscription,
}

impl CompletionPolicy {
    fn parse(value: &str) -> Option<Self> {
        match value.to_ascii_lowercase().as_str() {
            "session" => Some(Self::EndSession),
            "subscription" => Some(Self::EndSubscription),
            _ => None,
        }
    }
}

/// Per-session protocol settings.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Interval between keepalive pings.
    pub ping_interval: Duration,
    /// Upper bound on the `connection_init` → `connection_ack` wait.
    pub handshake_timeout: Duration,
    /// Log ping/pong traffic at `info` instead of `debug`.
    pub log_ping: bool,
    /// Answer server pings with `pong`.
    pub reply_to_ping: bool,
    /// Effect of an unclaimed `complete`.
    pub completion_policy: CompletionPolicy,
    /// Capacity of the outgoing frame queue.
    pub outbox_capacity: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            ping_interval: Duration::from_secs(10),
            handshake_timeout: Duration::from_secs(10),
            log_ping: false,
            reply_to_ping: true,
            completion_policy: CompletionPolicy::EndSession,
            outbox_capacity: 64,
        }
    }
}

/// Top-level fleet configuration.
///
/// Loaded once at startup via [`FleetConfig::from_env`].
#[derive(Debug, Clone)]
pub struct FleetConfig {
    /// GraphQL WebSocket endpoint (`ws://` or `wss://`).
    pub endpoint: String,

    /// Opaque access token. Never logged.
    pub access_token: String,

    /// Header style for the token.
    pub auth_style: AuthStyle,

    /// Number of concurrent connections.
    pub connection_count: usize,

    /// Subscription streams each session opens.
    pub subscriptions: Vec<SubscriptionStream>,

    /// Create/delete mutation cycles per session.
    pub mutation_cycles: u32,

    /// Pause between mutation cycles.
    pub cycle_delay: Duration,

    /// Per-session protocol settings.
    pub session: SessionConfig,
}

impl FleetConfig {
    /// Loads configuration from environment variables.
    ///
    /// Falls back to defaults when a variable is unset or invalid.
    /// Calls `dotenvy::dotenv().ok()` to optionally load a `.env` file.
    ///
    /// # Errors
    ///
    /// Returns an error if `ACCESS_TOKEN` is unset or empty.
    pub fn from_env() -> Result<Self, anyhow::Error> {
        dotenvy::dotenv().ok();

        let access_token = std::env::var("ACCESS_TOKEN")
            .ok()
            .filter(|t| !t.trim().is_empty())
            .ok_or_else(|| anyhow::anyhow!("ACCESS_TOKEN must be set"))?;

        let endpoint =
            std::env::var("GRAPHQL_WS_URL").unwrap_or_else(|_| DEFAULT_ENDPOINT.to_string());

        let auth_style = std::env::var("AUTH_STYLE")
            .ok()
            .and_then(|v| AuthStyle::parse(&v))
            .unwrap_or(AuthStyle::Cookie);

        let subscriptions = std::env::var("SUBSCRIPTIONS")
            .map(|v| parse_subscriptions(&v))
            .unwrap_or_else(|_| vec![SubscriptionStream::CreatedPlaylists]);

        let session = SessionConfig {
            ping_interval: Duration::from_secs(parse_env("PING_INTERVAL_SECS", 10)),
            handshake_timeout: Duration::from_secs(parse_env("HANDSHAKE_TIMEOUT_SECS", 10)),
            log_ping: parse_env_bool("LOG_PING", false),
            reply_to_ping: parse_env_bool("REPLY_TO_PING", true),
            completion_policy: std::env::var("COMPLETION_POLICY")
                .ok()
                .and_then(|v| CompletionPolicy::parse(&v))
                .unwrap_or_default(),
            outbox_capacity: parse_env("OUTBOX_CAPACITY", 64).max(1),
        };

        Ok(Self {
            endpoint,
            access_token,
            auth_style,
            connection_count: parse_env("CONNECTION_COUNT", 100),
            subscriptions,
            mutation_cycles: parse_env("MUTATION_CYCLES", 0),
            cycle_delay: Duration::from_millis(parse_env("CYCLE_DELAY_MS", 1_000)),
            session,
        })
    }
}

/// Parses a comma-separated list of stream names, skipping unknown names.
fn parse_subscriptions(value: &str) -> Vec<SubscriptionStream> {
    value
        .split(',')
        .map(str::trim)
        .filter(|name| !name.is_empty())
        .filter_map(|name| {
            let stream = SubscriptionStream::from_name(name);
            if stream.is_none() {
                tracing::warn!(name, "ignoring unknown subscription stream");
            }
            stream
        })
        .collect()
}

/// Parses an environment variable as `T`, returning `default` on missing
/// or invalid values.
fn parse_env<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

/// Parses an environment variable as a boolean, returning `default` on
/// missing or unrecognised values.
fn parse_env_bool(key: &str, default: bool) -> bool {
    std::env::var(key)
        .ok()
        .and_then(|v| parse_bool(&v))
        .unwrap_or(default)
}

/// Accepts `true`/`false` in any case, and `1`/`0`.
fn parse_bool(value: &str) -> Option<bool> {
    let value = value.trim();
    if value == "1" || value.eq_ignore_ascii_case("true") {
        Some(true)
    } else if value == "0" || value.eq_ignore_ascii_case("false") {
        Some(false)
    } else {
        None
    }
}
