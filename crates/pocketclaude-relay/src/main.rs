//! PocketClaude Relay
//!
//! Cloud-side message switch: authenticates WebSocket peers, enforces the
//! single-agent invariant, routes commands to the agent and fans output back
//! out to every client.

use clap::Parser;
use tracing::info;

use pocketclaude_relay::config::RelayConfig;
use pocketclaude_relay::heartbeat::spawn_heartbeat_task;
use pocketclaude_relay::server::{router, AppState};

#[derive(Parser, Debug)]
#[command(name = "pocketclaude-relay")]
#[command(version, about = "PocketClaude relay - WebSocket message switch")]
struct Args {
    /// TCP port to listen on.
    #[arg(long, default_value_t = 8080, env = "PORT")]
    port: u16,

    /// Shared bearer secret peers must present during auth.
    #[arg(long, env = "RELAY_TOKEN")]
    token: String,

    /// Log level filter (e.g. "info", "debug", "warn").
    #[arg(long, default_value = "info", env = "RELAY_LOG_LEVEL")]
    log_level: String,

    /// Output logs as JSON (for structured log aggregation).
    #[arg(long, env = "RELAY_LOG_JSON")]
    log_json: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let log_filter = format!("pocketclaude_relay={}", args.log_level);
    pocketclaude_core::tracing_init::init_tracing(&log_filter, args.log_json);

    info!(
        version = env!("CARGO_PKG_VERSION"),
        port = args.port,
        "Starting pocketclaude-relay"
    );

    let state = AppState::new(RelayConfig::new(args.token));
    let app = router(state.clone());

    let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);
    let heartbeat_handle = spawn_heartbeat_task(state, shutdown_rx);

    let addr = format!("0.0.0.0:{}", args.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!(addr = %addr, "Relay listening");

    tokio::select! {
        result = axum::serve(listener, app) => {
            result?;
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Received shutdown signal");
        }
    }

    let _ = shutdown_tx.send(true);
    let _ = heartbeat_handle.await;

    info!("Relay stopped");
    Ok(())
}
