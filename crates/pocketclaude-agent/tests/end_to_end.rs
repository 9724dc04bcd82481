#![allow(clippy::unwrap_used)] // Integration tests use unwrap for brevity
#![cfg(unix)] // Spawns bash in a real PTY

//! End-to-end scenarios across relay + agent + a raw WebSocket client:
//! the full command/output loop over real sockets and real PTYs.

use std::sync::Arc;
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

use pocketclaude_agent::history::{HistoryStore, Memory};
use pocketclaude_agent::session::{SessionConfig, SessionManager};
use pocketclaude_agent::uplink::{Uplink, UplinkConfig};
use pocketclaude_core::backoff::ReconnectPolicy;
use pocketclaude_core::projects::{Project, ProjectRegistry};
use pocketclaude_proto::{
    CommandName, CommandPayload, Envelope, MessageType, Role, StatusKind, StatusPayload,
};
use pocketclaude_relay::config::RelayConfig;
use pocketclaude_relay::server::{router, AppState};

type Socket = WebSocketStream<MaybeTlsStream<TcpStream>>;

const TOKEN: &str = "e2e-token";
const WAIT: Duration = Duration::from_secs(5);

struct Harness {
    ws_url: String,
    manager: Arc<SessionManager>,
    _dir: tempfile::TempDir,
    shutdown: tokio::sync::watch::Sender<bool>,
}

/// Boot a relay on an ephemeral port plus an agent connected to it.
async fn start_stack() -> Harness {
    let state = AppState::new(RelayConfig::new(TOKEN.into()));
    let app = router(state);
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    let ws_url = format!("ws://{addr}/ws");

    let dir = tempfile::tempdir().unwrap();
    let project_dir = dir.path().join("demo");
    std::fs::create_dir_all(&project_dir).unwrap();
    let projects = ProjectRegistry::from_projects(
        vec![Project {
            id: "demo".into(),
            name: "Demo".into(),
            path: project_dir,
            keywords: Vec::new(),
            tech_stack: Vec::new(),
            description: None,
        }],
        Some(dir.path().to_path_buf()),
    );
    let manager = SessionManager::new(
        projects,
        HistoryStore::new(dir.path().join("history")),
        dir.path().join("memory.json"),
        Memory::default(),
        SessionConfig {
            launch_command: "true".to_string(),
            launch_delay: Duration::from_millis(20),
            double_tap_delay: Some(Duration::from_millis(20)),
            ..Default::default()
        },
    );

    let uplink = Uplink::new(
        UplinkConfig {
            relay_url: ws_url.clone(),
            token: TOKEN.into(),
            policy: ReconnectPolicy {
                initial_delay: Duration::from_millis(50),
                max_delay: Duration::from_millis(200),
                ..Default::default()
            },
        },
        manager.clone(),
    );
    let (shutdown, shutdown_rx) = tokio::sync::watch::channel(false);
    tokio::spawn(async move {
        uplink.run(shutdown_rx).await;
    });

    Harness {
        ws_url,
        manager,
        _dir: dir,
        shutdown,
    }
}

async fn connect_client(ws_url: &str) -> Socket {
    let (mut ws, _) = connect_async(ws_url).await.unwrap();
    ws.send(Message::Text(
        Envelope::auth(TOKEN, Role::Client).to_json().into(),
    ))
    .await
    .unwrap();
    let reply = next_envelope(&mut ws).await;
    let status: StatusPayload = reply.decode_payload("status").unwrap();
    assert_eq!(status.status, StatusKind::Connected);
    ws
}

async fn next_envelope(ws: &mut Socket) -> Envelope {
    timeout(WAIT, async {
        loop {
            match ws.next().await.expect("socket closed").unwrap() {
                Message::Text(text) => return Envelope::from_json(text.as_str()).unwrap(),
                Message::Ping(_) | Message::Pong(_) => {}
                other => panic!("unexpected frame: {other:?}"),
            }
        }
    })
    .await
    .expect("timed out waiting for frame")
}

/// Wait for a status envelope of the given kind, skipping everything else.
async fn await_status(ws: &mut Socket, kind: StatusKind) -> StatusPayload {
    timeout(WAIT, async {
        loop {
            let envelope = next_envelope(ws).await;
            if envelope.message_type != MessageType::Status {
                continue;
            }
            let status: StatusPayload = envelope.decode_payload("status").unwrap();
            if status.status == kind {
                return status;
            }
        }
    })
    .await
    .unwrap_or_else(|_| panic!("no {kind:?} status"))
}

/// Wait for output of one session containing `needle`.
async fn await_output(ws: &mut Socket, session_id: &str, needle: &str) {
    timeout(WAIT, async {
        loop {
            let envelope = next_envelope(ws).await;
            if envelope.message_type == MessageType::Output
                && envelope.session_id.as_deref() == Some(session_id)
                && envelope.payload["data"]
                    .as_str()
                    .is_some_and(|d| d.contains(needle))
            {
                return;
            }
        }
    })
    .await
    .unwrap_or_else(|_| panic!("no output containing {needle:?}"))
}

async fn send_command(ws: &mut Socket, payload: CommandPayload) {
    ws.send(Message::Text(Envelope::command(&payload).to_json().into()))
        .await
        .unwrap();
}

// =========================================================================
// Scenarios
// =========================================================================

#[tokio::test]
async fn list_projects_round_trip() {
    let harness = start_stack().await;
    // Give the uplink a beat to authenticate.
    tokio::time::sleep(Duration::from_millis(200)).await;

    let mut client = connect_client(&harness.ws_url).await;
    send_command(
        &mut client,
        CommandPayload {
            command: CommandName::ListProjects,
            ..Default::default()
        },
    )
    .await;

    let status = await_status(&mut client, StatusKind::ProjectsList).await;
    let projects = status.data.unwrap()["projects"].clone();
    assert_eq!(projects[0]["id"], "demo");

    let _ = harness.shutdown.send(true);
}

#[tokio::test]
async fn session_echo_through_the_stack() {
    let harness = start_stack().await;
    tokio::time::sleep(Duration::from_millis(200)).await;

    let mut client = connect_client(&harness.ws_url).await;
    send_command(
        &mut client,
        CommandPayload {
            command: CommandName::StartSession,
            project_id: Some("demo".into()),
            ..Default::default()
        },
    )
    .await;

    let started = await_status(&mut client, StatusKind::SessionStarted).await;
    let data = started.data.unwrap();
    let session_id = data["sessionId"].as_str().unwrap().to_string();
    assert_eq!(data["projectId"], "demo");
    assert_eq!(data["isQuickSession"], false);

    send_command(
        &mut client,
        CommandPayload {
            command: CommandName::SendInput,
            session_id: Some(session_id.clone()),
            input: Some("echo relay-roundtrip".into()),
            ..Default::default()
        },
    )
    .await;
    await_output(&mut client, &session_id, "relay-roundtrip").await;

    send_command(
        &mut client,
        CommandPayload {
            command: CommandName::CloseSession,
            session_id: Some(session_id.clone()),
            ..Default::default()
        },
    )
    .await;
    let closed = await_status(&mut client, StatusKind::SessionClosed).await;
    assert_eq!(closed.session_id.as_deref(), Some(session_id.as_str()));

    let _ = harness.shutdown.send(true);
}

#[tokio::test]
async fn second_client_sees_existing_session() {
    let harness = start_stack().await;
    tokio::time::sleep(Duration::from_millis(200)).await;

    // First client starts a session, then goes away.
    let mut c1 = connect_client(&harness.ws_url).await;
    send_command(
        &mut c1,
        CommandPayload {
            command: CommandName::StartSession,
            project_id: Some("demo".into()),
            ..Default::default()
        },
    )
    .await;
    let started = await_status(&mut c1, StatusKind::SessionStarted).await;
    let session_id = started.data.unwrap()["sessionId"].as_str().unwrap().to_string();
    drop(c1);

    // A fresh client finds the same session in the authoritative list and
    // receives its further output.
    let mut c2 = connect_client(&harness.ws_url).await;
    send_command(
        &mut c2,
        CommandPayload {
            command: CommandName::ListSessions,
            ..Default::default()
        },
    )
    .await;
    let listed = await_status(&mut c2, StatusKind::SessionsList).await;
    let sessions = listed.data.unwrap()["sessions"].clone();
    assert_eq!(sessions[0]["sessionId"], session_id.as_str());

    send_command(
        &mut c2,
        CommandPayload {
            command: CommandName::SendInput,
            session_id: Some(session_id.clone()),
            input: Some("echo second-client".into()),
            ..Default::default()
        },
    )
    .await;
    await_output(&mut c2, &session_id, "second-client").await;

    let _ = harness.shutdown.send(true);
}

#[tokio::test]
async fn agent_outage_keeps_session_and_log_growing() {
    let harness = start_stack().await;
    tokio::time::sleep(Duration::from_millis(200)).await;

    let mut client = connect_client(&harness.ws_url).await;
    send_command(
        &mut client,
        CommandPayload {
            command: CommandName::StartSession,
            project_id: Some("demo".into()),
            ..Default::default()
        },
    )
    .await;
    let started = await_status(&mut client, StatusKind::SessionStarted).await;
    let session_id = started.data.unwrap()["sessionId"].as_str().unwrap().to_string();

    // Stop the uplink; the PTY keeps running and logging locally.
    let _ = harness.shutdown.send(true);
    tokio::time::sleep(Duration::from_millis(100)).await;

    harness
        .manager
        .send_input(&session_id, "echo offline-bytes")
        .await
        .unwrap();
    tokio::time::sleep(Duration::from_millis(300)).await;

    // The session survived the outage and the disk log grew.
    assert_eq!(harness.manager.list_sessions().await.len(), 1);
    let lines = harness.manager.recent_output(&session_id).await.unwrap();
    assert!(lines.iter().any(|l| l.contains("offline-bytes")));

    harness.manager.close_session(&session_id).await.unwrap();
    let log = harness.manager.history().last_output("demo").await.unwrap();
    assert!(log.contains("offline-bytes"));
}
