//! Uplink client connecting the agent to the relay.
//!
//! States: Disconnected -> Connecting -> Authenticating -> Authenticated.
//! A drop never tears down the session table: PTYs keep running, their
//! output lands in ring buffers and history logs, and live streaming
//! resumes on the next successful authentication with no replay.

use std::sync::Arc;
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use tokio::time::{sleep, timeout};
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, info, warn};

use pocketclaude_core::backoff::{BackoffState, ReconnectPolicy};
use pocketclaude_proto::{codes, Envelope, ErrorPayload, MessageType, Role, StatusKind, StatusPayload};

use crate::dispatch;
use crate::session::SessionManager;

/// How long to wait for the relay's auth reply.
const AUTH_TIMEOUT: Duration = Duration::from_secs(10);

/// Uplink configuration.
#[derive(Debug, Clone)]
pub struct UplinkConfig {
    /// Relay WebSocket URL (e.g. "wss://relay.example.com/ws").
    pub relay_url: String,
    /// Shared bearer secret.
    pub token: String,
    /// Reconnection policy.
    pub policy: ReconnectPolicy,
}

/// Errors from one connection attempt.
#[derive(Debug, thiserror::Error)]
pub enum UplinkError {
    #[error("Connection failed: {0}")]
    Connect(String),

    #[error("Authentication rejected: {0}")]
    Auth(String),

    /// Another agent holds the slot; back off harder to protect it.
    #[error("Another agent is already bound to the relay")]
    AgentExists,

    #[error("Connection lost: {0}")]
    ConnectionLost(String),
}

/// Uplink client with automatic reconnection.
pub struct Uplink {
    config: UplinkConfig,
    manager: Arc<SessionManager>,
}

impl Uplink {
    pub fn new(config: UplinkConfig, manager: Arc<SessionManager>) -> Self {
        Self { config, manager }
    }

    /// Run the uplink until shutdown. Connects, authenticates, pumps frames,
    /// and reconnects with exponential backoff on any failure.
    pub async fn run(&self, mut shutdown: tokio::sync::watch::Receiver<bool>) {
        let mut backoff = BackoffState::new(self.config.policy.clone());

        loop {
            if *shutdown.borrow() {
                info!("Uplink shutting down");
                return;
            }

            match self.connect_and_run(&mut backoff, &mut shutdown).await {
                Ok(()) => {
                    info!("Uplink closed cleanly");
                    return;
                }
                Err(UplinkError::AgentExists) => {
                    warn!("Relay already has an agent, backing off harder");
                    backoff.penalize_agent_exists();
                }
                Err(e) => {
                    warn!(error = %e, "Uplink attempt failed");
                }
            }

            let attempt = backoff.attempt();
            let delay = backoff.next_delay();
            warn!(attempt, delay_ms = delay.as_millis() as u64, "Reconnecting");

            tokio::select! {
                _ = sleep(delay) => {}
                _ = shutdown.changed() => {
                    info!("Uplink shutting down during reconnect wait");
                    return;
                }
            }
        }
    }

    /// One connection: open, authenticate, then pump frames both ways.
    async fn connect_and_run(
        &self,
        backoff: &mut BackoffState,
        shutdown: &mut tokio::sync::watch::Receiver<bool>,
    ) -> Result<(), UplinkError> {
        let (ws, _) = connect_async(self.config.relay_url.as_str())
            .await
            .map_err(|e| UplinkError::Connect(e.to_string()))?;
        let (mut sink, mut stream) = ws.split();

        let auth = Envelope::auth(self.config.token.clone(), Role::Agent);
        sink.send(Message::Text(auth.to_json().into()))
            .await
            .map_err(|e| UplinkError::Connect(e.to_string()))?;

        timeout(AUTH_TIMEOUT, await_auth_reply(&mut stream))
            .await
            .map_err(|_| UplinkError::Auth("timed out waiting for auth reply".into()))??;

        // Only a confirmed bind resets the backoff.
        backoff.reset();
        info!(relay = %self.config.relay_url, "Uplink authenticated");

        let mut events = self.manager.subscribe_events();

        loop {
            tokio::select! {
                message = stream.next() => {
                    match message {
                        Some(Ok(Message::Text(text))) => {
                            self.handle_frame(text.as_str(), &mut sink).await?;
                        }
                        Some(Ok(Message::Close(frame))) => {
                            return Err(UplinkError::ConnectionLost(format!(
                                "closed by relay: {frame:?}"
                            )));
                        }
                        // Pings are answered by the transport.
                        Some(Ok(_)) => {}
                        Some(Err(e)) => {
                            return Err(UplinkError::ConnectionLost(e.to_string()));
                        }
                        None => {
                            return Err(UplinkError::ConnectionLost("stream ended".into()));
                        }
                    }
                }
                event = events.recv() => {
                    match event {
                        Ok(envelope) => {
                            sink.send(Message::Text(envelope.to_json().into()))
                                .await
                                .map_err(|e| UplinkError::ConnectionLost(e.to_string()))?;
                        }
                        // Skipping frames silently would break the
                        // contiguous-suffix guarantee; drop the link so
                        // clients observe the loss as a disconnect.
                        Err(tokio::sync::broadcast::error::RecvError::Lagged(skipped)) => {
                            return Err(UplinkError::ConnectionLost(format!(
                                "output backlog overflowed, {skipped} frames behind"
                            )));
                        }
                        Err(tokio::sync::broadcast::error::RecvError::Closed) => {
                            return Ok(());
                        }
                    }
                }
                _ = shutdown.changed() => {
                    let _ = sink.send(Message::Close(None)).await;
                    return Ok(());
                }
            }
        }
    }

    /// Dispatch one inbound frame; anything but a command is ignored.
    async fn handle_frame<S>(&self, raw: &str, sink: &mut S) -> Result<(), UplinkError>
    where
        S: futures::Sink<Message> + Unpin,
        S::Error: std::fmt::Display,
    {
        let envelope = match Envelope::from_json(raw) {
            Ok(envelope) => envelope,
            Err(e) => {
                debug!(error = %e, "Ignoring unparseable frame from relay");
                return Ok(());
            }
        };

        if envelope.message_type != MessageType::Command {
            debug!(kind = ?envelope.message_type, "Ignoring non-command frame");
            return Ok(());
        }

        for reply in dispatch::handle_command(&self.manager, &envelope).await {
            sink.send(Message::Text(reply.to_json().into()))
                .await
                .map_err(|e| UplinkError::ConnectionLost(e.to_string()))?;
        }
        Ok(())
    }
}

/// Read frames until the relay answers the auth frame.
async fn await_auth_reply<S>(stream: &mut S) -> Result<(), UplinkError>
where
    S: futures::Stream<Item = Result<Message, tokio_tungstenite::tungstenite::Error>> + Unpin,
{
    loop {
        let message = stream
            .next()
            .await
            .ok_or_else(|| UplinkError::Auth("connection closed during auth".into()))?
            .map_err(|e| UplinkError::Auth(e.to_string()))?;

        let text = match message {
            Message::Text(text) => text,
            Message::Close(_) => {
                return Err(UplinkError::Auth("closed during auth".into()));
            }
            _ => continue,
        };

        let envelope = Envelope::from_json(text.as_str())
            .map_err(|e| UplinkError::Auth(format!("bad auth reply: {e}")))?;

        match envelope.message_type {
            MessageType::Status => {
                let status: StatusPayload = envelope
                    .decode_payload("status")
                    .map_err(|e| UplinkError::Auth(e.to_string()))?;
                let bound_as_agent = status.status == StatusKind::Connected
                    && status
                        .data
                        .as_ref()
                        .and_then(|d| d.get("role"))
                        .and_then(|r| r.as_str())
                        == Some("agent");
                if bound_as_agent {
                    return Ok(());
                }
                debug!(status = ?status.status, "Ignoring status while authenticating");
            }
            MessageType::Error => {
                let error: ErrorPayload = envelope
                    .decode_payload("error")
                    .map_err(|e| UplinkError::Auth(e.to_string()))?;
                if error.code == codes::AGENT_EXISTS {
                    return Err(UplinkError::AgentExists);
                }
                return Err(UplinkError::Auth(format!(
                    "{}: {}",
                    error.code, error.message
                )));
            }
            _ => debug!("Ignoring frame while authenticating"),
        }
    }
}
