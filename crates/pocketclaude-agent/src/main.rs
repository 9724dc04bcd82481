//! PocketClaude Agent
//!
//! Workstation-resident daemon: owns the PTY sessions running the assistant
//! CLI, streams their output to the relay, and keeps per-project history on
//! disk.

use std::path::PathBuf;

use clap::Parser;
use tracing::info;

use pocketclaude_agent::history::{HistoryStore, Memory};
use pocketclaude_agent::session::{SessionConfig, SessionManager};
use pocketclaude_agent::uplink::{Uplink, UplinkConfig};
use pocketclaude_core::backoff::ReconnectPolicy;
use pocketclaude_core::projects::ProjectRegistry;

#[derive(Parser, Debug)]
#[command(name = "pocketclaude-agent")]
#[command(version, about = "PocketClaude agent - PTY session manager and relay uplink")]
struct Args {
    /// Relay WebSocket URL (e.g. "wss://relay.example.com/ws").
    #[arg(long, env = "RELAY_URL")]
    relay_url: String,

    /// Shared bearer secret for relay authentication.
    #[arg(long, env = "RELAY_TOKEN")]
    token: String,

    /// Path to projects.json (next to the binary by default).
    #[arg(long, default_value = "projects.json", env = "POCKETCLAUDE_PROJECTS")]
    projects: PathBuf,

    /// Working directory for quick sessions (defaults to the user home).
    #[arg(long, env = "QUICK_SESSION_PATH")]
    quick_session_path: Option<PathBuf>,

    /// Launch command for the assistant CLI.
    #[arg(long, default_value = "claude", env = "CLAUDE_PATH")]
    claude_path: String,

    /// History directory (defaults to ~/.pocketclaude/history).
    #[arg(long, env = "POCKETCLAUDE_HISTORY_DIR")]
    history_dir: Option<PathBuf>,

    /// Disable the second carriage return after each input submission.
    #[arg(long, env = "POCKETCLAUDE_NO_DOUBLE_TAP")]
    no_double_tap: bool,

    /// Delay in milliseconds before the second carriage return.
    #[arg(long, default_value_t = 100, env = "POCKETCLAUDE_DOUBLE_TAP_MS")]
    double_tap_ms: u64,

    /// Log level filter for the agent (e.g. "info", "debug", "warn").
    #[arg(long, default_value = "info", env = "POCKETCLAUDE_LOG_LEVEL")]
    log_level: String,

    /// Output logs as JSON (for structured log aggregation).
    #[arg(long, env = "POCKETCLAUDE_LOG_JSON")]
    log_json: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let log_filter = format!("pocketclaude_agent={}", args.log_level);
    pocketclaude_core::tracing_init::init_tracing(&log_filter, args.log_json);

    info!(
        version = env!("CARGO_PKG_VERSION"),
        relay = %args.relay_url,
        "Starting pocketclaude-agent"
    );

    let projects = ProjectRegistry::load(&args.projects, args.quick_session_path.clone())?;
    info!(
        projects = projects.all().len(),
        path = %args.projects.display(),
        "Projects loaded"
    );

    let history_root = args.history_dir.unwrap_or_else(HistoryStore::default_root);
    let history = HistoryStore::new(history_root);

    let memory_path = Memory::default_path();
    let memory = Memory::load(&memory_path).await;

    let config = SessionConfig {
        launch_command: args.claude_path,
        double_tap_delay: (!args.no_double_tap)
            .then(|| std::time::Duration::from_millis(args.double_tap_ms)),
        ..Default::default()
    };
    let manager = SessionManager::new(projects, history, memory_path, memory, config);

    let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);
    let reaper = SessionManager::spawn_reaper(&manager, shutdown_tx.subscribe());

    let uplink = Uplink::new(
        UplinkConfig {
            relay_url: args.relay_url,
            token: args.token,
            policy: ReconnectPolicy::default(),
        },
        manager.clone(),
    );

    let uplink_handle = {
        let shutdown_rx = shutdown_rx;
        tokio::spawn(async move {
            uplink.run(shutdown_rx).await;
        })
    };

    tokio::signal::ctrl_c().await?;
    info!("Received shutdown signal");

    let _ = shutdown_tx.send(true);
    let _ = uplink_handle.await;
    let _ = reaper.await;

    // Finalize history files before exiting.
    manager.shutdown_all().await;

    info!("Agent stopped");
    Ok(())
}
