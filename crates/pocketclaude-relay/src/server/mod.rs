//! WebSocket server and message routing.
//!
//! One task pair per connection: a writer draining the peer's outbound
//! channel, and a reader that authenticates the peer and then routes frames
//! according to its role. Routing never reorders frames from the same
//! sender; each peer's outbound channel is drained by exactly one writer.

mod health;

use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::ws::{CloseFrame, Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::Response;
use axum::routing::get;
use axum::Router;
use futures::stream::SplitStream;
use futures::{SinkExt, StreamExt};
use serde_json::json;
use tokio::sync::mpsc;
use tokio::time::timeout;
use tracing::{debug, info, warn};

use pocketclaude_proto::{codes, AuthPayload, Envelope, MessageType, Role, StatusKind};

use crate::config::RelayConfig;
use crate::registry::{ConnectionRegistry, Outbound, PeerId};

/// Shared server state.
#[derive(Clone)]
pub struct AppState {
    pub registry: Arc<ConnectionRegistry>,
    pub config: Arc<RelayConfig>,
}

impl AppState {
    pub fn new(config: RelayConfig) -> Self {
        Self {
            registry: Arc::new(ConnectionRegistry::new()),
            config: Arc::new(config),
        }
    }
}

/// Build the relay's HTTP surface: the WebSocket endpoint and `/health`.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/ws", get(ws_upgrade))
        .route("/health", get(health::health))
        .with_state(state)
}

async fn ws_upgrade(State(state): State<AppState>, ws: WebSocketUpgrade) -> Response {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

/// Per-peer outbound queue depth. A peer that cannot drain this many frames
/// is considered dead and dropped.
const OUTBOUND_CAPACITY: usize = 256;

async fn handle_socket(socket: WebSocket, state: AppState) {
    let (mut sink, mut stream) = socket.split();
    let (tx, mut rx) = mpsc::channel::<Outbound>(OUTBOUND_CAPACITY);

    // Writer: sole owner of the sink; Close stops it.
    let writer = tokio::spawn(async move {
        while let Some(out) = rx.recv().await {
            let result = match out {
                Outbound::Frame(frame) => sink.send(Message::Text(frame.into())).await,
                Outbound::Ping => sink.send(Message::Ping(Bytes::new())).await,
                Outbound::Close { code, reason } => {
                    let _ = sink
                        .send(Message::Close(Some(CloseFrame {
                            code,
                            reason: reason.into(),
                        })))
                        .await;
                    break;
                }
            };
            if result.is_err() {
                break;
            }
        }
    });

    let authed = match timeout(
        state.config.handshake_timeout,
        authenticate(&mut stream, &tx, &state),
    )
    .await
    {
        Ok(Some(role)) => Some(role),
        Ok(None) => None,
        Err(_) => {
            debug!("Handshake timed out");
            let _ = tx
                .send(Outbound::Close {
                    code: codes::CLOSE_AUTH_FAILURE,
                    reason: "handshake timeout",
                })
                .await;
            None
        }
    };

    let Some(role) = authed else {
        drop(tx);
        let _ = writer.await;
        return;
    };

    let peer_id = match register(&state, role, tx.clone()).await {
        Some(id) => id,
        None => {
            drop(tx);
            let _ = writer.await;
            return;
        }
    };

    // Post-auth read loop.
    while let Some(message) = stream.next().await {
        match message {
            Ok(Message::Text(text)) => route_frame(&state, role, &tx, text.as_str()).await,
            Ok(Message::Pong(_)) => state.registry.record_pong(peer_id).await,
            Ok(Message::Close(_)) => break,
            Ok(_) => {}
            Err(e) => {
                debug!(peer_id, error = %e, "Socket read error");
                break;
            }
        }
    }

    unregister(&state, role, peer_id).await;
    drop(tx);
    let _ = writer.await;
}

/// Run the auth handshake: the first frame must be a valid `auth` envelope
/// with the shared secret. Returns the authenticated role, or `None` after
/// queueing the error/close frames.
async fn authenticate(
    stream: &mut SplitStream<WebSocket>,
    tx: &mpsc::Sender<Outbound>,
    state: &AppState,
) -> Option<Role> {
    let raw = loop {
        match stream.next().await? {
            Ok(Message::Text(text)) => break text,
            Ok(Message::Close(_)) | Err(_) => return None,
            // Control frames before auth are tolerated.
            Ok(_) => {}
        }
    };

    let reject = |code: &str, close: u16, reason: &'static str| {
        let frame = Envelope::error(code, reason).to_json();
        let tx = tx.clone();
        async move {
            let _ = tx.send(Outbound::Frame(frame)).await;
            let _ = tx.send(Outbound::Close { code: close, reason }).await;
        }
    };

    let envelope = match Envelope::from_json(raw.as_str()) {
        Ok(env) => env,
        Err(_) => {
            reject(
                codes::AUTH_FAILED,
                codes::CLOSE_AUTH_FAILURE,
                "first frame must be auth",
            )
            .await;
            return None;
        }
    };

    if envelope.message_type != MessageType::Auth {
        reject(
            codes::NOT_AUTHENTICATED,
            codes::CLOSE_AUTH_FAILURE,
            "first frame must be auth",
        )
        .await;
        return None;
    }

    let auth: AuthPayload = match envelope.decode_payload("auth") {
        Ok(auth) => auth,
        Err(_) => {
            // A present but unparseable role (or token) counts as invalid.
            reject(
                codes::INVALID_ROLE,
                codes::CLOSE_INVALID_ROLE,
                "invalid auth payload",
            )
            .await;
            return None;
        }
    };

    if auth.token != state.config.token {
        reject(
            codes::AUTH_FAILED,
            codes::CLOSE_AUTH_FAILURE,
            "invalid token",
        )
        .await;
        return None;
    }

    Some(auth.role)
}

/// Register the authenticated peer, reply with the connected status, and
/// broadcast agent presence when the agent binds.
async fn register(state: &AppState, role: Role, tx: mpsc::Sender<Outbound>) -> Option<PeerId> {
    let peer_id = match role {
        Role::Agent => match state.registry.bind_agent(tx.clone()).await {
            Ok(id) => id,
            Err(_) => {
                let frame =
                    Envelope::error(codes::AGENT_EXISTS, "an agent is already connected").to_json();
                let _ = tx.send(Outbound::Frame(frame)).await;
                let _ = tx
                    .send(Outbound::Close {
                        code: codes::CLOSE_AGENT_EXISTS,
                        reason: "agent already connected",
                    })
                    .await;
                return None;
            }
        },
        Role::Client => state.registry.add_client(tx.clone()).await,
    };

    let agent_connected = state.registry.agent_connected().await;
    let connected = Envelope::status_with(
        StatusKind::Connected,
        Some(json!({ "role": role, "agentConnected": agent_connected })),
        None,
    );
    let _ = tx.send(Outbound::Frame(connected.to_json())).await;

    if role == Role::Agent {
        info!(peer_id, "Agent connected, notifying clients");
        let notice = Envelope::status_with(
            StatusKind::Connected,
            Some(json!({ "reason": "agent_connected" })),
            None,
        );
        state.registry.broadcast_to_clients(&notice.to_json()).await;
    }

    Some(peer_id)
}

/// Remove a peer and broadcast the agent-disconnected status when the bound
/// agent goes away.
pub(crate) async fn unregister(state: &AppState, role: Role, peer_id: PeerId) {
    let was_agent = state.registry.remove(peer_id).await;
    if was_agent {
        info!(peer_id, "Agent disconnected, notifying clients");
        let notice = Envelope::status_with(
            StatusKind::Disconnected,
            Some(json!({ "reason": "agent_disconnected" })),
            None,
        );
        state.registry.broadcast_to_clients(&notice.to_json()).await;
    } else {
        debug!(peer_id, %role, "Peer disconnected");
    }
}

/// Route one post-auth frame according to the sender's role. Frames are
/// forwarded verbatim so per-sender byte order is preserved.
async fn route_frame(state: &AppState, role: Role, tx: &mpsc::Sender<Outbound>, raw: &str) {
    let envelope = match Envelope::from_json(raw) {
        Ok(env) => env,
        Err(e) => {
            debug!(error = %e, "Dropping unparseable frame");
            let reply = Envelope::error(codes::INVALID_JSON, "frame was not a valid envelope");
            let _ = tx.send(Outbound::Frame(reply.to_json())).await;
            return;
        }
    };

    match (role, envelope.message_type) {
        (Role::Client, MessageType::Command) => match state.registry.agent_tx().await {
            Some(agent_tx) => {
                if agent_tx.try_send(Outbound::Frame(raw.to_string())).is_err() {
                    warn!("Agent outbound queue unavailable, dropping command");
                }
            }
            None => {
                let reply = Envelope::error(codes::NO_AGENT, "no agent connected");
                let _ = tx.send(Outbound::Frame(reply.to_json())).await;
            }
        },
        (Role::Agent, MessageType::Output | MessageType::Status | MessageType::Error) => {
            state.registry.broadcast_to_clients(raw).await;
        }
        // Everything else (repeated auth, client status, agent command, ...)
        // is silently discarded.
        (role, kind) => {
            debug!(%role, ?kind, "Discarding frame");
        }
    }
}
