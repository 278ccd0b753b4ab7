//! Fleet orchestrator: many independent sessions, supervised together.
//!
//! Every session runs in its own task with its own socket, registry and
//! cancellation scope. Session scopes are children of the fleet's shutdown
//! token, so [`Fleet::shutdown`] ends every session, while a failure in one
//! session never touches the others.

use std::future::Future;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::Instrument;

use super::scenario::{Scenario, ScenarioOutcome};
use crate::error::ClientError;
use crate::protocol::SessionId;
use crate::ws::{Session, WsConnector};

/// Produces established sessions for the fleet.
pub trait ConnectionFactory: Send + Sync + 'static {
    /// Opens the connection for session `id` and completes its handshake.
    /// The session's cancellation scope must be a child of `shutdown`.
    fn connect(
        &self,
        id: SessionId,
        shutdown: &CancellationToken,
    ) -> impl Future<Output = Result<Session, ClientError>> + Send;
}

impl ConnectionFactory for WsConnector {
    fn connect(
        &self,
        id: SessionId,
        shutdown: &CancellationToken,
    ) -> impl Future<Output = Result<Session, ClientError>> + Send {
        self.connect_and_handshake(id, shutdown)
    }
}

/// Outcome of one session in a fleet run.
#[derive(Debug)]
pub struct SessionReport {
    /// Session identifier.
    pub session: SessionId,
    /// When the session task started.
    pub started_at: DateTime<Utc>,
    /// When the session reached a terminal state.
    pub ended_at: DateTime<Utc>,
    /// Scenario outcome, or the error that kept the session from starting.
    pub outcome: Result<ScenarioOutcome, ClientError>,
}

impl SessionReport {
    /// Returns `true` if the session connected and ran its scenario.
    #[must_use]
    pub const fn succeeded(&self) -> bool {
        self.outcome.is_ok()
    }
}

/// Outcome of a whole fleet run.
#[derive(Debug, Default)]
pub struct FleetReport {
    /// Per-session reports, ordered by session id.
    pub sessions: Vec<SessionReport>,
    /// Session tasks that panicked and produced no report.
    pub panicked: usize,
}

impl FleetReport {
    /// Sessions that connected and ran their scenario.
    #[must_use]
    pub fn succeeded(&self) -> usize {
        self.sessions.iter().filter(|r| r.succeeded()).count()
    }

    /// Sessions that failed to start, plus panicked tasks.
    #[must_use]
    pub fn failed(&self) -> usize {
        self.sessions.len() - self.succeeded() + self.panicked
    }

    /// Create/delete cycles completed across the fleet.
    #[must_use]
    pub fn cycles_completed(&self) -> u64 {
        self.sessions
            .iter()
            .filter_map(|r| r.outcome.as_ref().ok())
            .map(|o| u64::from(o.cycles_completed))
            .sum()
    }
}

/// Runs and supervises a fleet of sessions.
#[derive(Debug, Clone, Default)]
pub struct Fleet {
    shutdown: CancellationToken,
}

impl Fleet {
    /// Creates a fleet with a fresh shutdown token.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Clone of the shutdown token; cancelling it ends every session.
    #[must_use]
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    /// Cancels every session in the fleet.
    pub fn shutdown(&self) {
        self.shutdown.cancel();
    }

    /// Starts `count` sessions concurrently, each running `scenario`, and
    /// returns once every one has reached a terminal state.
    pub async fn run<F>(&self, count: usize, factory: Arc<F>, scenario: Arc<Scenario>) -> FleetReport
    where
        F: ConnectionFactory,
    {
        let mut tasks = JoinSet::new();
        for index in 0..count {
            let id = SessionId::new(index);
            let factory = Arc::clone(&factory);
            let scenario = Arc::clone(&scenario);
            let shutdown = self.shutdown.clone();
            tasks.spawn(
                run_session(id, factory, scenario, shutdown)
                    .instrument(tracing::info_span!("session", session = %id)),
            );
        }
        tracing::info!(count, "fleet started");

        let mut report = FleetReport::default();
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(session) => report.sessions.push(session),
                Err(e) => {
                    tracing::error!(error = %e, "session task aborted");
                    report.panicked += 1;
                }
            }
        }
        report.sessions.sort_by_key(|r| r.session);

        tracing::info!(
            total = count,
            succeeded = report.succeeded(),
            failed = report.failed(),
            cycles = report.cycles_completed(),
            "fleet finished"
        );
        report
    }
}

async fn run_session<F: ConnectionFactory>(
    id: SessionId,
    factory: Arc<F>,
    scenario: Arc<Scenario>,
    shutdown: CancellationToken,
) -> SessionReport {
    let started_at = Utc::now();
    let outcome = match factory.connect(id, &shutdown).await {
        Ok(session) => {
            let outcome = scenario.run(session).await;
            tracing::info!(
                session = %id,
                end = %outcome.end,
                cycles = outcome.cycles_completed,
                failed_cycles = outcome.cycles_failed,
                "session ended"
            );
            Ok(outcome)
        }
        Err(e) => {
            tracing::warn!(session = %id, kind = e.kind(), error = %e, "session failed to start");
            Err(e)
        }
    };
    SessionReport {
        session: id,
        started_at,
        ended_at: Utc::now(),
        outcome,
    }
}
