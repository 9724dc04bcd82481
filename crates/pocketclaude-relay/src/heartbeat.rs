//! Heartbeat task: periodic pings plus stale-peer eviction.

use serde_json::json;
use tracing::info;

use pocketclaude_proto::{Envelope, StatusKind};

use crate::server::AppState;

/// Spawn the heartbeat loop. Every interval tick it pings all authenticated
/// peers, then force-closes any peer whose last pong exceeds the configured
/// timeout. Evicting the agent triggers the normal disconnect broadcast.
pub fn spawn_heartbeat_task(
    state: AppState,
    mut shutdown: tokio::sync::watch::Receiver<bool>,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut timer = tokio::time::interval(state.config.heartbeat_interval);
        timer.tick().await; // Skip first immediate tick

        loop {
            tokio::select! {
                _ = timer.tick() => {
                    state.registry.ping_all().await;

                    let agent_evicted = state
                        .registry
                        .evict_stale(state.config.heartbeat_timeout)
                        .await;
                    if agent_evicted {
                        let notice = Envelope::status_with(
                            StatusKind::Disconnected,
                            Some(json!({ "reason": "agent_disconnected" })),
                            None,
                        );
                        state.registry.broadcast_to_clients(&notice.to_json()).await;
                    }
                }
                _ = shutdown.changed() => {
                    info!("Heartbeat task shutting down");
                    return;
                }
            }
        }
    })
}
