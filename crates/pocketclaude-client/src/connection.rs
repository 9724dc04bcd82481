//! Relay connection for client adapters.
//!
//! Connects, authenticates with role `client`, and keeps the link alive
//! with the same backoff policy the agent uses. The caller sends typed
//! commands and receives raw envelopes; agent presence is tracked from the
//! relay's broadcast status frames and exposed as a watch channel.

use std::time::Duration;

use futures::{SinkExt, StreamExt};
use tokio::sync::{mpsc, watch};
use tokio::time::{sleep, timeout};
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, info, warn};

use pocketclaude_core::backoff::{BackoffState, ReconnectPolicy};
use pocketclaude_proto::{
    CommandPayload, Envelope, MessageType, Role, StatusKind, StatusPayload,
};

/// How long to wait for the relay's auth reply.
const AUTH_TIMEOUT: Duration = Duration::from_secs(10);

/// Client connection configuration.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Relay WebSocket URL (e.g. "wss://relay.example.com/ws").
    pub relay_url: String,
    /// Shared bearer secret.
    pub token: String,
    /// Reconnection policy.
    pub policy: ReconnectPolicy,
}

/// Connection errors surfaced to the adapter.
#[derive(Debug, thiserror::Error)]
pub enum ConnectionError {
    #[error("Connection failed: {0}")]
    Connect(String),

    #[error("Authentication rejected: {0}")]
    Auth(String),

    #[error("Connection lost: {0}")]
    Lost(String),
}

/// Cloneable sending half of a [`ClientHandle`], for adapters that issue
/// commands while another task drains events.
#[derive(Clone)]
pub struct CommandSender {
    commands: mpsc::Sender<CommandPayload>,
}

impl CommandSender {
    /// Queue a command for the agent.
    pub async fn send(&self, command: CommandPayload) -> Result<(), ConnectionError> {
        self.commands
            .send(command)
            .await
            .map_err(|_| ConnectionError::Lost("connection task stopped".into()))
    }
}

/// Handle held by the adapter front-end.
pub struct ClientHandle {
    commands: mpsc::Sender<CommandPayload>,
    events: mpsc::Receiver<Envelope>,
    agent_connected: watch::Receiver<bool>,
    shutdown: watch::Sender<bool>,
}

impl ClientHandle {
    /// Spawn the connection task. The handle is usable immediately; frames
    /// queue up once the first authentication succeeds.
    pub fn connect(config: ClientConfig) -> Self {
        let (command_tx, command_rx) = mpsc::channel(32);
        let (event_tx, event_rx) = mpsc::channel(256);
        let (presence_tx, presence_rx) = watch::channel(false);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        tokio::spawn(run_connection(
            config,
            command_rx,
            event_tx,
            presence_tx,
            shutdown_rx,
        ));

        Self {
            commands: command_tx,
            events: event_rx,
            agent_connected: presence_rx,
            shutdown: shutdown_tx,
        }
    }

    /// Queue a command for the agent.
    pub async fn send(&self, command: CommandPayload) -> Result<(), ConnectionError> {
        self.commands
            .send(command)
            .await
            .map_err(|_| ConnectionError::Lost("connection task stopped".into()))
    }

    /// Detachable sending half.
    pub fn sender(&self) -> CommandSender {
        CommandSender {
            commands: self.commands.clone(),
        }
    }

    /// Next envelope from the relay (output, status, or error).
    pub async fn recv(&mut self) -> Option<Envelope> {
        self.events.recv().await
    }

    /// Watch channel tracking whether an agent is bound to the relay.
    pub fn agent_connected(&self) -> watch::Receiver<bool> {
        self.agent_connected.clone()
    }

    /// Stop the connection task.
    pub fn close(&self) {
        let _ = self.shutdown.send(true);
    }
}

async fn run_connection(
    config: ClientConfig,
    mut commands: mpsc::Receiver<CommandPayload>,
    events: mpsc::Sender<Envelope>,
    presence: watch::Sender<bool>,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut backoff = BackoffState::new(config.policy.clone());

    loop {
        if *shutdown.borrow() {
            return;
        }

        match connect_once(
            &config,
            &mut commands,
            &events,
            &presence,
            &mut backoff,
            &mut shutdown,
        )
        .await
        {
            Ok(()) => return,
            Err(e) => warn!(error = %e, "Client connection attempt failed"),
        }

        let _ = presence.send(false);
        let delay = backoff.next_delay();
        debug!(delay_ms = delay.as_millis() as u64, "Client reconnecting");
        tokio::select! {
            _ = sleep(delay) => {}
            _ = shutdown.changed() => return,
        }
    }
}

async fn connect_once(
    config: &ClientConfig,
    commands: &mut mpsc::Receiver<CommandPayload>,
    events: &mpsc::Sender<Envelope>,
    presence: &watch::Sender<bool>,
    backoff: &mut BackoffState,
    shutdown: &mut watch::Receiver<bool>,
) -> Result<(), ConnectionError> {
    let (ws, _) = connect_async(config.relay_url.as_str())
        .await
        .map_err(|e| ConnectionError::Connect(e.to_string()))?;
    let (mut sink, mut stream) = ws.split();

    let auth = Envelope::auth(config.token.clone(), Role::Client);
    sink.send(Message::Text(auth.to_json().into()))
        .await
        .map_err(|e| ConnectionError::Connect(e.to_string()))?;

    let agent_connected = timeout(AUTH_TIMEOUT, await_auth_reply(&mut stream))
        .await
        .map_err(|_| ConnectionError::Auth("timed out waiting for auth reply".into()))??;

    backoff.reset();
    let _ = presence.send(agent_connected);
    info!(relay = %config.relay_url, agent_connected, "Client authenticated");

    loop {
        tokio::select! {
            message = stream.next() => {
                match message {
                    Some(Ok(Message::Text(text))) => {
                        let Ok(envelope) = Envelope::from_json(text.as_str()) else {
                            debug!("Ignoring unparseable frame");
                            continue;
                        };
                        track_presence(&envelope, presence);
                        if events.send(envelope).await.is_err() {
                            // Front-end is gone; stop cleanly.
                            return Ok(());
                        }
                    }
                    Some(Ok(Message::Close(_))) | None => {
                        return Err(ConnectionError::Lost("closed by relay".into()));
                    }
                    Some(Ok(_)) => {}
                    Some(Err(e)) => return Err(ConnectionError::Lost(e.to_string())),
                }
            }
            command = commands.recv() => {
                match command {
                    Some(payload) => {
                        let envelope = Envelope::command(&payload);
                        sink.send(Message::Text(envelope.to_json().into()))
                            .await
                            .map_err(|e| ConnectionError::Lost(e.to_string()))?;
                    }
                    None => return Ok(()),
                }
            }
            _ = shutdown.changed() => {
                let _ = sink.send(Message::Close(None)).await;
                return Ok(());
            }
        }
    }
}

/// Wait for `status{connected}` and report the broadcast agent flag.
async fn await_auth_reply<S>(stream: &mut S) -> Result<bool, ConnectionError>
where
    S: futures::Stream<Item = Result<Message, tokio_tungstenite::tungstenite::Error>> + Unpin,
{
    loop {
        let message = stream
            .next()
            .await
            .ok_or_else(|| ConnectionError::Auth("connection closed during auth".into()))?
            .map_err(|e| ConnectionError::Auth(e.to_string()))?;

        let text = match message {
            Message::Text(text) => text,
            Message::Close(_) => return Err(ConnectionError::Auth("closed during auth".into())),
            _ => continue,
        };

        let envelope = Envelope::from_json(text.as_str())
            .map_err(|e| ConnectionError::Auth(format!("bad auth reply: {e}")))?;
        match envelope.message_type {
            MessageType::Status => {
                let status: StatusPayload = envelope
                    .decode_payload("status")
                    .map_err(|e| ConnectionError::Auth(e.to_string()))?;
                if status.status == StatusKind::Connected {
                    let agent_connected = status
                        .data
                        .as_ref()
                        .and_then(|d| d.get("agentConnected"))
                        .and_then(serde_json::Value::as_bool)
                        .unwrap_or(false);
                    return Ok(agent_connected);
                }
            }
            MessageType::Error => {
                let detail = envelope.payload["message"].as_str().unwrap_or("rejected");
                return Err(ConnectionError::Auth(detail.to_string()));
            }
            _ => {}
        }
    }
}

/// Update the agent-presence flag from broadcast status frames.
fn track_presence(envelope: &Envelope, presence: &watch::Sender<bool>) {
    if envelope.message_type != MessageType::Status {
        return;
    }
    let Ok(status) = envelope.decode_payload::<StatusPayload>("status") else {
        return;
    };
    let reason = status
        .data
        .as_ref()
        .and_then(|d| d.get("reason"))
        .and_then(serde_json::Value::as_str);
    match (status.status, reason) {
        (StatusKind::Connected, Some("agent_connected")) => {
            let _ = presence.send(true);
        }
        (StatusKind::Disconnected, Some("agent_disconnected")) => {
            let _ = presence.send(false);
        }
        _ => {}
    }
}
