//! Per-session scenario: which streams to subscribe to, how many
//! create/delete cycles to run, and the order they run in.

use std::time::Duration;

use super::sessions;
use crate::config::FleetConfig;
use crate::ws::{Session, SessionEnd};

/// Subscription streams the harness knows how to open.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SubscriptionStream {
    /// `createdPlaylists { playlists { playlistId } }`.
    CreatedPlaylists,
    /// `createdAssets { assets { assetId } }`.
    CreatedAssets,
    /// `updatedAssets { assets { assetId } }`.
    UpdatedAssets,
    /// `createdTags { tags { tagId } }`.
    CreatedTags,
}

impl SubscriptionStream {
    /// Every known stream.
    pub const ALL: [Self; 4] = [
        Self::CreatedPlaylists,
        Self::CreatedAssets,
        Self::UpdatedAssets,
        Self::CreatedTags,
    ];

    /// GraphQL field name, also used as the log label.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::CreatedPlaylists => "createdPlaylists",
            Self::CreatedAssets => "createdAssets",
            Self::UpdatedAssets => "updatedAssets",
            Self::CreatedTags => "createdTags",
        }
    }

    /// Subscription document.
    #[must_use]
    pub const fn query(self) -> &'static str {
        match self {
            Self::CreatedPlaylists => "subscription { createdPlaylists { playlists { playlistId }}}",
            Self::CreatedAssets => "subscription { createdAssets { assets { assetId }}}",
            Self::UpdatedAssets => "subscription { updatedAssets { assets { assetId }}}",
            Self::CreatedTags => "subscription { createdTags { tags { tagId }}}",
        }
    }

    /// Looks a stream up by its field name (case-insensitive).
    #[must_use]
    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL
            .into_iter()
            .find(|s| s.name().eq_ignore_ascii_case(name))
    }
}

/// One subscription a scenario opens.
#[derive(Debug, Clone, PartialEq)]
pub struct SubscriptionSpec {
    /// Log label.
    pub label: String,
    /// Subscription document.
    pub query: String,
    /// Optional variables.
    pub variables: Option<serde_json::Value>,
}

impl From<SubscriptionStream> for SubscriptionSpec {
    fn from(stream: SubscriptionStream) -> Self {
        Self {
            label: stream.name().to_string(),
            query: stream.query().to_string(),
            variables: None,
        }
    }
}

/// What one session does after its handshake.
#[derive(Debug, Clone)]
pub struct Scenario {
    subscriptions: Vec<SubscriptionSpec>,
    mutation_cycles: u32,
    cycle_delay: Duration,
    keepalive: bool,
}

/// Counters and end reason for one scenario run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScenarioOutcome {
    /// Why the session stopped.
    pub end: SessionEnd,
    /// Subscriptions successfully sent.
    pub subscriptions_sent: usize,
    /// Create/delete cycles that finished.
    pub cycles_completed: u32,
    /// Create/delete cycles that failed without ending the session.
    pub cycles_failed: u32,
}

impl Scenario {
    /// Starts a builder with no subscriptions, no mutation cycles and
    /// keepalive enabled.
    #[must_use]
    pub fn builder() -> ScenarioBuilder {
        ScenarioBuilder::default()
    }

    /// Builds the scenario described by the fleet configuration.
    #[must_use]
    pub fn from_config(config: &FleetConfig) -> Self {
        config
            .subscriptions
            .iter()
            .fold(Self::builder(), |b, s| b.stream(*s))
            .mutation_cycles(config.mutation_cycles)
            .cycle_delay(config.cycle_delay)
            .build()
    }

    /// Subscriptions opened by this scenario.
    #[must_use]
    pub fn subscriptions(&self) -> &[SubscriptionSpec] {
        &self.subscriptions
    }

    /// Number of create/delete cycles.
    #[must_use]
    pub const fn mutation_cycles(&self) -> u32 {
        self.mutation_cycles
    }

    /// Runs the scenario on an established session until it closes.
    ///
    /// Order: subscriptions, keepalive (it runs from session-ready), the
    /// mutation cycles with `cycle_delay` between them, then wait for the
    /// receive loop to end. A session-fatal error stops the remaining steps
    /// and goes straight to teardown; data-level errors are logged and the
    /// next cycle runs.
    pub async fn run(&self, session: Session) -> ScenarioOutcome {
        let id = session.id();
        let mut subscriptions_sent = 0;
        let mut cycles_completed = 0;
        let mut cycles_failed = 0;

        for spec in &self.subscriptions {
            match session
                .subscribe(&spec.label, &spec.query, spec.variables.clone())
                .await
            {
                Ok(_) => subscriptions_sent += 1,
                Err(e) => {
                    tracing::warn!(session = %id, label = %spec.label, error = %e, "subscription not sent");
                    break;
                }
            }
        }

        let keepalive = (self.keepalive && !session.is_cancelled()).then(|| session.spawn_keepalive());

        let cancel = session.cancellation();
        for cycle in 0..self.mutation_cycles {
            if cancel.is_cancelled() {
                break;
            }
            if cycle > 0 {
                tokio::select! {
                    biased;
                    () = cancel.cancelled() => break,
                    () = tokio::time::sleep(self.cycle_delay) => {}
                }
            }
            match sessions::create_then_delete(&session).await {
                Ok(outcome) => {
                    cycles_completed += 1;
                    tracing::debug!(session = %id, cycle, created_id = %outcome.created_id, "cycle finished");
                }
                Err(e) if e.is_session_fatal() => {
                    tracing::warn!(session = %id, cycle, kind = e.kind(), error = %e, "cycle aborted");
                    break;
                }
                Err(e) => {
                    cycles_failed += 1;
                    tracing::warn!(session = %id, cycle, kind = e.kind(), error = %e, "cycle failed");
                }
            }
        }

        let end = session.closed().await;
        if let Some(keepalive) = keepalive
            && let Ok(pings) = keepalive.await
        {
            tracing::debug!(session = %id, pings, "keepalive finished");
        }

        ScenarioOutcome {
            end,
            subscriptions_sent,
            cycles_completed,
            cycles_failed,
        }
    }
}

/// Builder for [`Scenario`].
#[derive(Debug, Clone)]
pub struct ScenarioBuilder {
    subscriptions: Vec<SubscriptionSpec>,
    mutation_cycles: u32,
    cycle_delay: Duration,
    keepalive: bool,
}

impl Default for ScenarioBuilder {
    fn default() -> Self {
        Self {
            subscriptions: Vec::new(),
            mutation_cycles: 0,
            cycle_delay: Duration::from_secs(1),
            keepalive: true,
        }
    }
}

impl ScenarioBuilder {
    /// Adds a known stream.
    #[must_use]
    pub fn stream(mut self, stream: SubscriptionStream) -> Self {
        self.subscriptions.push(stream.into());
        self
    }

    /// Adds an arbitrary subscription.
    #[must_use]
    pub fn subscription(mut self, label: impl Into<String>, query: impl Into<String>) -> Self {
        self.subscriptions.push(SubscriptionSpec {
            label: label.into(),
            query: query.into(),
            variables: None,
        });
        self
    }

    /// Sets the number of create/delete cycles.
    #[must_use]
    pub const fn mutation_cycles(mut self, cycles: u32) -> Self {
        self.mutation_cycles = cycles;
        self
    }

    /// Sets the pause between cycles.
    #[must_use]
    pub const fn cycle_delay(mut self, delay: Duration) -> Self {
        self.cycle_delay = delay;
        self
    }

    /// Enables or disables the keepalive monitor.
    #[must_use]
    pub const fn keepalive(mut self, enabled: bool) -> Self {
        self.keepalive = enabled;
        self
    }

    /// Finishes the scenario.
    #[must_use]
    pub fn build(self) -> Scenario {
        Scenario {
            subscriptions: self.subscriptions,
            mutation_cycles: self.mutation_cycles,
            cycle_delay: self.cycle_delay,
            keepalive: self.keepalive,
        }
    }
}
