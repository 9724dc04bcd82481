//! PocketClaude CLI
//!
//! Reference terminal adapter: a thin front-end over the client library.
//! One-shot queries (`status`, `projects`, `sessions`, `history`), an
//! interactive `attach` mode bridging stdin/stdout to a session, and a
//! `watch` mode that follows all output chat-style.

use std::time::Duration;

use clap::{Parser, Subcommand};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::time::timeout;
use tracing::warn;

use pocketclaude_client::presentation::ChatBuffer;
use pocketclaude_client::{ClientConfig, ClientHandle, SessionCache};
use pocketclaude_core::backoff::ReconnectPolicy;
use pocketclaude_proto::{
    CommandName, CommandPayload, Envelope, MessageType, StatusKind, StatusPayload,
};

/// How long one-shot queries wait for their reply.
const REPLY_TIMEOUT: Duration = Duration::from_secs(10);

/// Keepalive cadence while attached to a session.
const KEEPALIVE_EVERY: Duration = Duration::from_secs(120);

#[derive(Parser, Debug)]
#[command(name = "pocketclaude-cli")]
#[command(version, about = "PocketClaude terminal client")]
struct Cli {
    /// Relay WebSocket URL (e.g. "wss://relay.example.com/ws").
    #[arg(long, env = "RELAY_URL")]
    relay_url: String,

    /// Shared bearer secret.
    #[arg(long, env = "RELAY_TOKEN")]
    token: String,

    /// Log level filter (e.g. "info", "debug", "warn").
    #[arg(long, default_value = "warn", env = "POCKETCLAUDE_LOG_LEVEL")]
    log_level: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Show relay and agent status.
    Status,
    /// List configured projects.
    Projects,
    /// List live sessions.
    Sessions,
    /// Start (or take over) a session and bridge it to this terminal.
    Attach {
        /// Project id; omit for a quick session.
        project_id: Option<String>,
    },
    /// Follow all session output, batched chat-style.
    Watch,
    /// Show recent session summaries for a project.
    History { project_id: String },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let log_filter = format!("pocketclaude_client={}", cli.log_level);
    pocketclaude_core::tracing_init::init_tracing(&log_filter, false);

    let mut client = ClientHandle::connect(ClientConfig {
        relay_url: cli.relay_url.clone(),
        token: cli.token.clone(),
        policy: ReconnectPolicy::default(),
    });

    match cli.command {
        Commands::Status => status(&client).await,
        Commands::Projects => {
            one_shot(&mut client, CommandName::ListProjects, None, StatusKind::ProjectsList).await
        }
        Commands::Sessions => sessions(&mut client).await,
        Commands::Attach { project_id } => attach(&mut client, project_id).await,
        Commands::Watch => watch(&mut client).await,
        Commands::History { project_id } => {
            one_shot(
                &mut client,
                CommandName::GetSessionHistory,
                Some(project_id),
                StatusKind::SessionHistory,
            )
            .await
        }
    }
}

/// Wait for a status reply of the given kind, surfacing error envelopes.
async fn await_reply(client: &mut ClientHandle, kind: StatusKind) -> anyhow::Result<StatusPayload> {
    timeout(REPLY_TIMEOUT, async {
        loop {
            let Some(envelope) = client.recv().await else {
                anyhow::bail!("connection closed");
            };
            match envelope.message_type {
                MessageType::Status => {
                    let status: StatusPayload = envelope
                        .decode_payload("status")
                        .map_err(|e| anyhow::anyhow!("{e}"))?;
                    if status.status == kind {
                        return Ok(status);
                    }
                }
                MessageType::Error => {
                    let code = envelope.payload["code"].as_str().unwrap_or("?");
                    let message = envelope.payload["message"].as_str().unwrap_or("");
                    anyhow::bail!("{code}: {message}");
                }
                _ => {}
            }
        }
    })
    .await
    .map_err(|_| anyhow::anyhow!("timed out waiting for reply"))?
}

async fn status(client: &ClientHandle) -> anyhow::Result<()> {
    let mut presence = client.agent_connected();
    // Give the connection a moment to authenticate.
    let _ = timeout(Duration::from_secs(5), presence.changed()).await;
    println!(
        "agent: {}",
        if *presence.borrow() { "connected" } else { "not connected" }
    );
    Ok(())
}

async fn one_shot(
    client: &mut ClientHandle,
    command: CommandName,
    project_id: Option<String>,
    reply: StatusKind,
) -> anyhow::Result<()> {
    client
        .send(CommandPayload {
            command,
            project_id,
            ..Default::default()
        })
        .await?;
    let status = await_reply(client, reply).await?;
    let data = status.data.unwrap_or_default();
    println!("{}", serde_json::to_string_pretty(&data)?);
    Ok(())
}

async fn sessions(client: &mut ClientHandle) -> anyhow::Result<()> {
    client
        .send(CommandPayload {
            command: CommandName::ListSessions,
            ..Default::default()
        })
        .await?;
    let status = await_reply(client, StatusKind::SessionsList).await?;
    let listed = status
        .data
        .as_ref()
        .and_then(|d| d.get("sessions"))
        .and_then(serde_json::Value::as_array)
        .cloned()
        .unwrap_or_default();

    let mut cache = SessionCache::new();
    cache.sync(&listed);
    if cache.is_empty() {
        println!("no live sessions");
        return Ok(());
    }
    for session in &listed {
        println!(
            "{}  {}  {}",
            session["sessionId"].as_str().unwrap_or("?"),
            session["projectId"].as_str().unwrap_or("?"),
            session["status"].as_str().unwrap_or("?"),
        );
    }
    Ok(())
}

/// Interactive bridge: stdin lines become `send_input`, output frames go to
/// stdout verbatim (this is the terminal adapter, rendering is the
/// terminal's job). EOF closes the session.
async fn attach(client: &mut ClientHandle, project_id: Option<String>) -> anyhow::Result<()> {
    client
        .send(CommandPayload {
            command: CommandName::StartSession,
            project_id,
            ..Default::default()
        })
        .await?;
    let started = await_reply(client, StatusKind::SessionStarted).await?;
    let data = started.data.unwrap_or_default();
    let session_id = data["sessionId"]
        .as_str()
        .ok_or_else(|| anyhow::anyhow!("malformed session_started reply"))?
        .to_string();
    eprintln!(
        "attached to session {session_id} (project {})",
        data["projectId"].as_str().unwrap_or("?")
    );

    // Sending half detached so the select arms below can issue commands
    // while `recv` holds the handle.
    let sender = client.sender();
    let mut stdin = BufReader::new(tokio::io::stdin()).lines();
    let mut stdout = tokio::io::stdout();
    let mut keepalive = tokio::time::interval(KEEPALIVE_EVERY);
    keepalive.tick().await; // Skip first immediate tick

    loop {
        tokio::select! {
            envelope = client.recv() => {
                let Some(envelope) = envelope else {
                    anyhow::bail!("connection closed");
                };
                match envelope.message_type {
                    MessageType::Output
                        if envelope.session_id.as_deref() == Some(session_id.as_str()) =>
                    {
                        if let Some(chunk) = envelope.payload["data"].as_str() {
                            stdout.write_all(chunk.as_bytes()).await?;
                            stdout.flush().await?;
                        }
                    }
                    MessageType::Status => {
                        if session_closed(&envelope, &session_id) {
                            eprintln!("\nsession closed");
                            return Ok(());
                        }
                    }
                    _ => {}
                }
            }
            line = stdin.next_line() => {
                match line? {
                    Some(input) => {
                        sender.send(CommandPayload {
                            command: CommandName::SendInput,
                            session_id: Some(session_id.clone()),
                            input: Some(input),
                            ..Default::default()
                        }).await?;
                    }
                    None => {
                        sender.send(CommandPayload {
                            command: CommandName::CloseSession,
                            session_id: Some(session_id.clone()),
                            ..Default::default()
                        }).await?;
                        eprintln!("closing session");
                        return Ok(());
                    }
                }
            }
            _ = keepalive.tick() => {
                sender.send(CommandPayload {
                    command: CommandName::Keepalive,
                    session_id: Some(session_id.clone()),
                    ..Default::default()
                }).await?;
            }
        }
    }
}

/// Follow every session's output, scrubbed and batched like a chat feed.
async fn watch(client: &mut ClientHandle) -> anyhow::Result<()> {
    let mut presence = client.agent_connected();
    let mut buffer = ChatBuffer::new();
    let mut flush_tick = tokio::time::interval(Duration::from_millis(100));
    eprintln!("watching (ctrl-c to stop)");

    loop {
        tokio::select! {
            envelope = client.recv() => {
                let Some(envelope) = envelope else {
                    anyhow::bail!("connection closed");
                };
                if envelope.message_type == MessageType::Output {
                    if let Some(chunk) = envelope.payload["data"].as_str() {
                        for message in buffer.push(chunk) {
                            println!("{message}");
                        }
                    }
                }
            }
            _ = flush_tick.tick() => {
                for message in buffer.poll() {
                    println!("{message}");
                }
            }
            result = presence.changed() => {
                if result.is_err() {
                    return Ok(());
                }
                let connected = *presence.borrow();
                eprintln!("agent {}", if connected { "connected" } else { "disconnected" });
                if !connected {
                    warn!("agent link is down, output will resume on reconnect");
                }
            }
            _ = tokio::signal::ctrl_c() => {
                return Ok(());
            }
        }
    }
}

fn session_closed(envelope: &Envelope, session_id: &str) -> bool {
    envelope
        .decode_payload::<StatusPayload>("status")
        .is_ok_and(|status| {
            status.status == StatusKind::SessionClosed
                && status.session_id.as_deref() == Some(session_id)
        })
}
