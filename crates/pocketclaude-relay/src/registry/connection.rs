//! Connection records and the registry guarding the agent slot.
//!
//! The registry is the relay's only shared state: at most one agent record
//! plus a set of client records, all behind a single lock. Mutations happen
//! on the auth, close, and heartbeat-timeout paths.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::{mpsc, RwLock};
use tracing::{debug, info, warn};

use pocketclaude_proto::Role;

/// Identifies one accepted connection for the lifetime of the process.
pub type PeerId = u64;

/// Frames the per-peer writer task can emit.
#[derive(Debug, Clone)]
pub enum Outbound {
    /// One serialized envelope as a text frame.
    Frame(String),
    /// A WebSocket ping.
    Ping,
    /// Close the connection with a protocol close code, then stop writing.
    Close { code: u16, reason: &'static str },
}

/// Registry errors.
#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    #[error("An agent is already connected")]
    AgentSlotBusy,
}

struct PeerRecord {
    id: PeerId,
    tx: mpsc::Sender<Outbound>,
    last_pong: Instant,
}

#[derive(Default)]
struct Inner {
    agent: Option<PeerRecord>,
    clients: HashMap<PeerId, PeerRecord>,
}

/// Thread-safe registry of authenticated peers.
pub struct ConnectionRegistry {
    inner: Arc<RwLock<Inner>>,
    next_id: AtomicU64,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(RwLock::new(Inner::default())),
            next_id: AtomicU64::new(1),
        }
    }

    fn allocate_id(&self) -> PeerId {
        self.next_id.fetch_add(1, Ordering::Relaxed)
    }

    /// Bind the agent slot. Fails while a healthy agent already holds it; a
    /// dead incumbent (writer channel closed) is displaced.
    pub async fn bind_agent(&self, tx: mpsc::Sender<Outbound>) -> Result<PeerId, RegistryError> {
        let mut inner = self.inner.write().await;
        if let Some(existing) = &inner.agent {
            if !existing.tx.is_closed() {
                return Err(RegistryError::AgentSlotBusy);
            }
            warn!(peer_id = existing.id, "Displacing dead agent record");
        }

        let id = self.allocate_id();
        inner.agent = Some(PeerRecord {
            id,
            tx,
            last_pong: Instant::now(),
        });
        info!(peer_id = id, "Agent bound");
        Ok(id)
    }

    /// Register an authenticated client.
    pub async fn add_client(&self, tx: mpsc::Sender<Outbound>) -> PeerId {
        let id = self.allocate_id();
        let mut inner = self.inner.write().await;
        inner.clients.insert(
            id,
            PeerRecord {
                id,
                tx,
                last_pong: Instant::now(),
            },
        );
        info!(peer_id = id, clients = inner.clients.len(), "Client registered");
        id
    }

    /// Remove a peer on close. Returns `true` when the removed peer was the
    /// bound agent (the caller then broadcasts the disconnect status).
    pub async fn remove(&self, id: PeerId) -> bool {
        let mut inner = self.inner.write().await;
        if inner.agent.as_ref().is_some_and(|a| a.id == id) {
            inner.agent = None;
            info!(peer_id = id, "Agent released");
            return true;
        }
        if inner.clients.remove(&id).is_some() {
            info!(peer_id = id, clients = inner.clients.len(), "Client removed");
        }
        false
    }

    /// Sender for the bound agent, if any.
    pub async fn agent_tx(&self) -> Option<mpsc::Sender<Outbound>> {
        self.inner.read().await.agent.as_ref().map(|a| a.tx.clone())
    }

    /// Whether an agent is currently bound.
    pub async fn agent_connected(&self) -> bool {
        self.inner.read().await.agent.is_some()
    }

    /// `(agent_connected, client_count)` for the health endpoint.
    pub async fn counts(&self) -> (bool, usize) {
        let inner = self.inner.read().await;
        (inner.agent.is_some(), inner.clients.len())
    }

    /// Broadcast a serialized frame to every client. A client whose outbound
    /// queue is closed or full is dropped; other clients and the agent are
    /// unaffected.
    pub async fn broadcast_to_clients(&self, frame: &str) {
        let mut inner = self.inner.write().await;
        let mut dropped = Vec::new();
        for (id, client) in &inner.clients {
            if client.tx.try_send(Outbound::Frame(frame.to_string())).is_err() {
                warn!(peer_id = id, "Client send failed, dropping");
                dropped.push(*id);
            }
        }
        for id in dropped {
            inner.clients.remove(&id);
        }
    }

    /// Record a pong from a peer.
    pub async fn record_pong(&self, id: PeerId) {
        let mut inner = self.inner.write().await;
        if let Some(agent) = inner.agent.as_mut().filter(|a| a.id == id) {
            agent.last_pong = Instant::now();
        } else if let Some(client) = inner.clients.get_mut(&id) {
            client.last_pong = Instant::now();
        }
    }

    /// Send a ping to every authenticated peer.
    pub async fn ping_all(&self) {
        let inner = self.inner.read().await;
        if let Some(agent) = &inner.agent {
            let _ = agent.tx.try_send(Outbound::Ping);
        }
        for client in inner.clients.values() {
            let _ = client.tx.try_send(Outbound::Ping);
        }
        debug!(clients = inner.clients.len(), agent = inner.agent.is_some(), "Pinged peers");
    }

    /// Force-close peers whose last pong is older than `timeout`. Returns
    /// `true` when the agent was among them.
    pub async fn evict_stale(&self, timeout: Duration) -> bool {
        let mut inner = self.inner.write().await;
        let mut agent_evicted = false;

        let agent_stale = inner
            .agent
            .as_ref()
            .is_some_and(|a| a.last_pong.elapsed() > timeout);
        if agent_stale {
            if let Some(agent) = inner.agent.take() {
                warn!(peer_id = agent.id, "Agent heartbeat timeout");
                let _ = agent.tx.try_send(Outbound::Close {
                    code: 1001,
                    reason: "heartbeat timeout",
                });
                agent_evicted = true;
            }
        }

        let stale: Vec<PeerId> = inner
            .clients
            .values()
            .filter(|c| c.last_pong.elapsed() > timeout)
            .map(|c| c.id)
            .collect();
        for id in stale {
            if let Some(client) = inner.clients.remove(&id) {
                warn!(peer_id = id, "Client heartbeat timeout");
                let _ = client.tx.try_send(Outbound::Close {
                    code: 1001,
                    reason: "heartbeat timeout",
                });
            }
        }

        agent_evicted
    }
}

impl Default for ConnectionRegistry {
    fn default() -> Self {
        Self::new()
    }
}
