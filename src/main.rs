//! gqlws-fleet entry point.
//!
//! Loads configuration, starts the fleet, and cancels it on Ctrl-C.

use std::sync::Arc;

use tracing_subscriber::EnvFilter;

use gqlws_fleet::config::FleetConfig;
use gqlws_fleet::service::{Fleet, Scenario};
use gqlws_fleet::ws::WsConnector;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    if std::env::var("LOG_FORMAT").is_ok_and(|f| f.eq_ignore_ascii_case("json")) {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }

    // Load configuration
    let config = FleetConfig::from_env()?;
    tracing::info!(
        endpoint = %config.endpoint,
        connections = config.connection_count,
        cycles = config.mutation_cycles,
        "starting gqlws-fleet"
    );

    let connector = Arc::new(WsConnector::from_config(&config));
    let scenario = Arc::new(Scenario::from_config(&config));
    let fleet = Fleet::new();

    let shutdown = fleet.shutdown_token();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("ctrl-c received, shutting down fleet");
            shutdown.cancel();
        }
    });

    let report = fleet
        .run(config.connection_count, connector, scenario)
        .await;

    if report.succeeded() == 0 && config.connection_count > 0 {
        anyhow::bail!("no session connected ({} failed)", report.failed());
    }
    Ok(())
}
