//! Fleet orchestration over scripted connections.

#![allow(clippy::panic)]

mod support;

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use gqlws_fleet::config::SessionConfig;
use gqlws_fleet::error::ClientError;
use gqlws_fleet::protocol::{Envelope, SessionId};
use gqlws_fleet::service::{ConnectionFactory, Fleet, Scenario, SubscriptionStream};
use gqlws_fleet::ws::{Session, SessionEnd};

use support::{ScriptedServer, socket_pair};

/// How the scripted server behaves after the handshake.
#[derive(Clone, Copy)]
enum Script {
    /// Answer create/delete cycles, then complete the subscription.
    CyclesThenComplete { cycles: usize },
    /// Accept the subscription and never answer.
    Silent,
}

struct ScriptedFactory {
    refuse: Option<usize>,
    script: Script,
}

impl ConnectionFactory for ScriptedFactory {
    async fn connect(
        &self,
        id: SessionId,
        shutdown: &CancellationToken,
    ) -> Result<Session, ClientError> {
        if self.refuse == Some(id.index()) {
            return Err(ClientError::Connect {
                session: id,
                reason: "connection refused".to_string(),
            });
        }

        let (client, server) = socket_pair().await;
        let script = self.script;
        tokio::spawn(async move {
            let mut server = ScriptedServer::new(server);
            server.accept().await;
            let (subscription, _) = server.expect_request().await;
            if let Script::CyclesThenComplete { cycles } = script {
                for n in 0..cycles {
                    let (create, _) = server.expect_request().await;
                    let body = format!(
                        r#"{{"data":{{"createSessions":{{"sessions":[{{"id":"s-{n}","name":"x"}}]}}}}}}"#
                    );
                    server.reply(&create, &body).await;
                    let (delete, _) = server.expect_request().await;
                    server
                        .reply(&delete, r#"{"data":{"deleteSessions":{"success":true}}}"#)
                        .await;
                }
                server.send(&Envelope::complete(subscription)).await;
            }
            server.drain().await;
        });

        Session::establish(id, client, SessionConfig::default(), shutdown).await
    }
}

#[tokio::test]
async fn one_failed_connection_does_not_affect_the_others() {
    let factory = Arc::new(ScriptedFactory {
        refuse: Some(2),
        script: Script::CyclesThenComplete { cycles: 2 },
    });
    let scenario = Arc::new(
        Scenario::builder()
            .stream(SubscriptionStream::CreatedPlaylists)
            .mutation_cycles(2)
            .cycle_delay(Duration::from_millis(5))
            .build(),
    );

    let report = Fleet::new().run(5, factory, scenario).await;

    assert_eq!(report.sessions.len(), 5, "every session reaches a terminal state");
    assert_eq!(report.succeeded(), 4);
    assert_eq!(report.failed(), 1);
    assert_eq!(report.cycles_completed(), 8);

    for session in &report.sessions {
        if session.session.index() == 2 {
            assert!(matches!(session.outcome, Err(ClientError::Connect { .. })));
            continue;
        }
        let Ok(outcome) = &session.outcome else {
            panic!("{} should have run its scenario", session.session);
        };
        assert!(matches!(outcome.end, SessionEnd::Completed(_)), "{:?}", outcome.end);
        assert_eq!(outcome.subscriptions_sent, 1);
        assert_eq!(outcome.cycles_completed, 2);
        assert_eq!(outcome.cycles_failed, 0);
    }
}

#[tokio::test]
async fn shutdown_cancels_every_session() {
    let factory = Arc::new(ScriptedFactory {
        refuse: None,
        script: Script::Silent,
    });
    let scenario = Arc::new(
        Scenario::builder()
            .stream(SubscriptionStream::CreatedTags)
            .build(),
    );
    let fleet = Fleet::new();
    let shutdown = fleet.shutdown_token();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(50)).await;
        shutdown.cancel();
    });

    let report = fleet.run(3, factory, scenario).await;

    assert_eq!(report.succeeded(), 3);
    for session in &report.sessions {
        let Ok(outcome) = &session.outcome else {
            panic!("{} should have connected", session.session);
        };
        assert_eq!(outcome.end, SessionEnd::Cancelled);
    }
}
