#![allow(clippy::unwrap_used)] // Integration tests use unwrap for brevity
#![cfg(unix)] // Spawns bash in a real PTY

//! Integration tests for the session manager: real PTYs, on-disk history,
//! uploads, and the idle reaper, without a relay in the loop.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use base64::engine::general_purpose::STANDARD as B64;
use base64::Engine;
use tokio::time::{sleep, timeout};

use pocketclaude_agent::history::{HistoryStore, Memory};
use pocketclaude_agent::session::{SessionConfig, SessionManager, SessionStatus};
use pocketclaude_core::projects::{Project, ProjectRegistry, QUICK_SESSION_ID};
use pocketclaude_proto::{Envelope, MessageType, StatusKind, StatusPayload};

const WAIT: Duration = Duration::from_secs(5);

/// Short timers and a harmless launch command for tests.
fn test_config() -> SessionConfig {
    SessionConfig {
        launch_command: "true".to_string(),
        launch_delay: Duration::from_millis(20),
        double_tap_delay: Some(Duration::from_millis(20)),
        ..Default::default()
    }
}

fn test_manager(config: SessionConfig) -> (tempfile::TempDir, Arc<SessionManager>) {
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
        Some(dir.path().join("home")),
    );
    let history = HistoryStore::new(dir.path().join("history"));
    let manager = SessionManager::new(
        projects,
        history,
        dir.path().join("memory.json"),
        Memory::default(),
        config,
    );
    (dir, manager)
}

/// Wait until an output frame containing `needle` arrives for the session.
async fn await_output(
    events: &mut tokio::sync::broadcast::Receiver<Envelope>,
    session_id: &str,
    needle: &str,
) {
    timeout(WAIT, async {
        loop {
            let envelope = events.recv().await.unwrap();
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
    .unwrap_or_else(|_| panic!("no output containing {needle:?}"));
}

async fn await_session_closed(
    events: &mut tokio::sync::broadcast::Receiver<Envelope>,
    session_id: &str,
) {
    timeout(WAIT, async {
        loop {
            let envelope = events.recv().await.unwrap();
            if envelope.message_type != MessageType::Status {
                continue;
            }
            let status: StatusPayload = envelope.decode_payload("status").unwrap();
            if status.status == StatusKind::SessionClosed
                && status.session_id.as_deref() == Some(session_id)
            {
                return;
            }
        }
    })
    .await
    .expect("no session_closed status");
}

// =========================================================================
// Lifecycle
// =========================================================================

#[tokio::test]
async fn session_echoes_input() {
    let (_dir, manager) = test_manager(test_config());
    let mut events = manager.subscribe_events();

    let started = manager.start_session(Some("demo")).await.unwrap();
    assert_eq!(started.project_id, "demo");
    assert!(!started.is_quick_session);

    manager
        .send_input(&started.session_id, "echo pocket-marker")
        .await
        .unwrap();
    await_output(&mut events, &started.session_id, "pocket-marker").await;

    // The echoed line also lands in the ring buffer.
    let lines = manager.recent_output(&started.session_id).await.unwrap();
    assert!(lines.iter().any(|l| l.contains("pocket-marker")));

    manager.close_session(&started.session_id).await.unwrap();
}

#[tokio::test]
async fn quick_session_uses_sentinel_project() {
    let (_dir, manager) = test_manager(test_config());

    let started = manager.start_session(None).await.unwrap();
    assert_eq!(started.project_id, QUICK_SESSION_ID);
    assert!(started.is_quick_session);

    let sessions = manager.list_sessions().await;
    assert_eq!(sessions.len(), 1);
    assert!(sessions[0].is_quick_session);

    manager.close_session(&started.session_id).await.unwrap();
}

#[tokio::test]
async fn one_session_per_project() {
    let (_dir, manager) = test_manager(test_config());
    let mut events = manager.subscribe_events();

    let first = manager.start_session(Some("demo")).await.unwrap();
    let second = manager.start_session(Some("demo")).await.unwrap();
    assert_ne!(first.session_id, second.session_id);

    // Starting the second closed the first.
    await_session_closed(&mut events, &first.session_id).await;
    let sessions = manager.list_sessions().await;
    assert_eq!(sessions.len(), 1);
    assert_eq!(sessions[0].session_id, second.session_id);

    // The first session's history pair is finalized on disk.
    let summaries = manager.history().summaries("demo", 10).await;
    let first_summary = summaries
        .iter()
        .find(|s| s.session_id == first.session_id)
        .expect("first session summary");
    assert!(first_summary.ended_at.is_some());

    manager.close_session(&second.session_id).await.unwrap();
}

#[tokio::test]
async fn close_restores_pre_call_state() {
    let (_dir, manager) = test_manager(test_config());
    let mut events = manager.subscribe_events();

    let started = manager.start_session(Some("demo")).await.unwrap();
    // Let the shell produce some output for the log.
    await_output(&mut events, &started.session_id, "").await;

    manager.close_session(&started.session_id).await.unwrap();
    await_session_closed(&mut events, &started.session_id).await;

    assert!(manager.list_sessions().await.is_empty());
    assert!(manager.recent_output(&started.session_id).await.is_none());

    // A closed history file pair exists on disk.
    let summaries = manager.history().summaries("demo", 10).await;
    assert_eq!(summaries.len(), 1);
    assert!(summaries[0].ended_at.is_some());
    assert!(manager.history().last_output("demo").await.is_some());
}

#[tokio::test]
async fn closing_unknown_session_fails_cleanly() {
    let (_dir, manager) = test_manager(test_config());
    assert!(manager.close_session("ghost").await.is_err());
    assert!(manager.send_input("ghost", "hello").await.is_err());
    assert!(manager.keepalive("ghost").await.is_err());
}

#[tokio::test]
async fn pty_exit_removes_session() {
    let (_dir, manager) = test_manager(test_config());
    let mut events = manager.subscribe_events();

    let started = manager.start_session(Some("demo")).await.unwrap();
    manager
        .send_input(&started.session_id, "exit")
        .await
        .unwrap();

    await_session_closed(&mut events, &started.session_id).await;
    assert!(manager.list_sessions().await.is_empty());
}

// =========================================================================
// Idle reaper
// =========================================================================

#[tokio::test]
async fn idle_sessions_are_reaped() {
    let config = SessionConfig {
        idle_timeout: Duration::from_millis(500),
        reap_interval: Duration::from_millis(100),
        ..test_config()
    };
    let (_dir, manager) = test_manager(config);
    let mut events = manager.subscribe_events();

    let started = manager.start_session(Some("demo")).await.unwrap();

    // Drain the initial shell output, then let the session go quiet.
    sleep(Duration::from_millis(1200)).await;
    let closed = manager.reap_idle().await;
    assert_eq!(closed, vec![started.session_id.clone()]);

    await_session_closed(&mut events, &started.session_id).await;
    assert!(manager.list_sessions().await.is_empty());
}

#[tokio::test]
async fn keepalive_defers_the_reaper() {
    let config = SessionConfig {
        idle_timeout: Duration::from_millis(700),
        reap_interval: Duration::from_millis(100),
        ..test_config()
    };
    let (_dir, manager) = test_manager(config);

    let started = manager.start_session(Some("demo")).await.unwrap();
    sleep(Duration::from_millis(500)).await;
    manager.keepalive(&started.session_id).await.unwrap();
    sleep(Duration::from_millis(400)).await;

    // Total elapsed exceeds the timeout, but keepalive reset the clock.
    assert!(manager.reap_idle().await.is_empty());
    assert_eq!(manager.list_sessions().await.len(), 1);

    manager.close_session(&started.session_id).await.unwrap();
}

#[tokio::test]
async fn quiet_sessions_are_marked_idle() {
    let config = SessionConfig {
        idle_timeout: Duration::from_secs(3600),
        reap_interval: Duration::from_millis(100),
        ..test_config()
    };
    let (_dir, manager) = test_manager(config);

    let started = manager.start_session(Some("demo")).await.unwrap();
    sleep(Duration::from_millis(800)).await;
    assert!(manager.reap_idle().await.is_empty());

    let sessions = manager.list_sessions().await;
    assert_eq!(sessions[0].status, SessionStatus::Idle);

    manager.close_session(&started.session_id).await.unwrap();
}

// =========================================================================
// Uploads
// =========================================================================

#[tokio::test]
async fn upload_writes_into_uploads_dir() {
    let (dir, manager) = test_manager(test_config());
    let started = manager.start_session(Some("demo")).await.unwrap();

    let uploaded = manager
        .upload_file(
            &started.session_id,
            "report.pdf",
            &B64.encode(b"fake pdf bytes"),
        )
        .await
        .unwrap();

    assert_eq!(uploaded.file_name, "report.pdf");
    assert_eq!(uploaded.size, 14);
    let expected = dir.path().join("demo").join("uploads").join("report.pdf");
    assert_eq!(PathBuf::from(&uploaded.file_path), expected);
    assert_eq!(std::fs::read(expected).unwrap(), b"fake pdf bytes");

    manager.close_session(&started.session_id).await.unwrap();
}

#[tokio::test]
async fn upload_traversal_is_confined() {
    let (dir, manager) = test_manager(test_config());
    let started = manager.start_session(Some("demo")).await.unwrap();

    let uploaded = manager
        .upload_file(&started.session_id, "../../etc/passwd", &B64.encode(b"nope"))
        .await
        .unwrap();

    assert_eq!(uploaded.file_name, ".._.._etc_passwd");
    let inside = dir
        .path()
        .join("demo")
        .join("uploads")
        .join(".._.._etc_passwd");
    assert!(inside.exists());
    assert!(!dir.path().join("etc").exists());

    manager.close_session(&started.session_id).await.unwrap();
}

#[tokio::test]
async fn upload_rejects_bad_base64() {
    let (_dir, manager) = test_manager(test_config());
    let started = manager.start_session(Some("demo")).await.unwrap();

    let result = manager
        .upload_file(&started.session_id, "x.bin", "!!! not base64 !!!")
        .await;
    assert!(result.is_err());

    manager.close_session(&started.session_id).await.unwrap();
}

// =========================================================================
// Context injection
// =========================================================================

#[tokio::test]
async fn second_session_reports_previous_context() {
    let (_dir, manager) = test_manager(test_config());
    let mut events = manager.subscribe_events();

    let first = manager.start_session(Some("demo")).await.unwrap();
    assert!(!first.has_previous_context);
    // Produce some log content before closing.
    await_output(&mut events, &first.session_id, "").await;
    manager.close_session(&first.session_id).await.unwrap();

    let second = manager.start_session(Some("demo")).await.unwrap();
    assert!(second.has_previous_context);

    manager.close_session(&second.session_id).await.unwrap();
}
