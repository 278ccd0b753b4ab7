//! Keepalive monitor: periodic `ping` envelopes on one session.

use std::time::Duration;

use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use super::outbox::Outbox;
use crate::protocol::Envelope;

/// Writes a `ping` every `interval` until `cancel` fires.
///
/// The first ping goes out one full interval after start. Each ping
/// carries a fresh UUID nonce for log correlation; the server is not
/// expected to echo it. A failed write stops the monitor but leaves the
/// session alone: the receive loop decides when the session is dead.
///
/// Returns the number of pings written.
pub async fn run_keepalive(
    outbox: Outbox,
    interval: Duration,
    cancel: CancellationToken,
    log_ping: bool,
) -> u64 {
    let session = outbox.session();
    let mut ticker = tokio::time::interval_at(Instant::now() + interval, interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut sent = 0_u64;

    loop {
        tokio::select! {
            biased;
            () = cancel.cancelled() => break,
            _ = ticker.tick() => {}
        }

        let nonce = uuid::Uuid::new_v4().to_string();
        let ping = match Envelope::ping(&nonce) {
            Ok(ping) => ping,
            Err(e) => {
                tracing::warn!(%session, error = %e, "failed to build ping");
                break;
            }
        };
        if let Err(e) = outbox.send(&ping).await {
            tracing::warn!(%session, error = %e, "failed to send ping; keepalive stopped");
            break;
        }
        sent += 1;
        if log_ping {
            tracing::info!(%session, %nonce, "ping sent");
        } else {
            tracing::trace!(%session, %nonce, "ping sent");
        }
    }

    tracing::debug!(%session, pings = sent, "keepalive stopped");
    sent
}
