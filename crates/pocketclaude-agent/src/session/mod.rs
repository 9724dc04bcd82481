//! PTY session table and lifecycle.
//!
//! The manager owns every live session: spawning, input, explicit close,
//! spontaneous PTY exit, and idle reaping all funnel through here. Output
//! fans out over a broadcast channel; the uplink subscribes while it is
//! authenticated, so frames produced during a relay outage are dropped
//! upstream while the ring buffer and history log keep receiving them.

pub mod pty;
pub mod ring;
pub mod types;

pub use types::{
    SessionConfig, SessionError, SessionInfo, SessionStatus, StartedSession, UploadedFile,
};

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use base64::engine::general_purpose::STANDARD as B64;
use base64::Engine;
use tokio::sync::{broadcast, mpsc, RwLock};
use tracing::{debug, info, warn};

use pocketclaude_core::projects::{ProjectRegistry, QUICK_SESSION_ID};
use pocketclaude_proto::{now_ms, Envelope, StatusKind};

use crate::history::{HistoryPaths, HistoryStore, HistoryWriter, Memory};
use pty::PtyProcess;
use ring::LineRing;

/// Capacity of the outbound event fan-out channel.
const EVENT_CAPACITY: usize = 1024;

struct SessionEntry {
    project_id: String,
    working_dir: PathBuf,
    status: SessionStatus,
    last_activity: i64,
    is_quick: bool,
    ring: LineRing,
    pty: PtyProcess,
    history_paths: HistoryPaths,
}

impl SessionEntry {
    fn touch(&mut self) {
        self.last_activity = self.last_activity.max(now_ms());
        self.status = SessionStatus::Active;
    }

    fn info(&self, session_id: &str) -> SessionInfo {
        SessionInfo {
            session_id: session_id.to_string(),
            project_id: self.project_id.clone(),
            working_dir: self.working_dir.display().to_string(),
            status: self.status,
            last_activity: self.last_activity,
            is_quick_session: self.is_quick,
        }
    }
}

type SessionTable = Arc<RwLock<HashMap<String, SessionEntry>>>;

/// Owner of the session table and the output fan-out.
pub struct SessionManager {
    sessions: SessionTable,
    projects: ProjectRegistry,
    history: HistoryStore,
    memory_path: PathBuf,
    memory: tokio::sync::Mutex<Memory>,
    events: broadcast::Sender<Envelope>,
    config: SessionConfig,
}

impl SessionManager {
    pub fn new(
        projects: ProjectRegistry,
        history: HistoryStore,
        memory_path: PathBuf,
        memory: Memory,
        config: SessionConfig,
    ) -> Arc<Self> {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Arc::new(Self {
            sessions: Arc::new(RwLock::new(HashMap::new())),
            projects,
            history,
            memory_path,
            memory: tokio::sync::Mutex::new(memory),
            events,
            config,
        })
    }

    /// Subscribe to outbound frames (output and status envelopes).
    pub fn subscribe_events(&self) -> broadcast::Receiver<Envelope> {
        self.events.subscribe()
    }

    pub fn projects(&self) -> &ProjectRegistry {
        &self.projects
    }

    pub fn history(&self) -> &HistoryStore {
        &self.history
    }

    fn emit(&self, envelope: Envelope) {
        // No receivers simply means the uplink is down; output is already
        // in the ring buffer and on disk.
        let _ = self.events.send(envelope);
    }

    // ---------------------------------------------------------------------
    // Lifecycle
    // ---------------------------------------------------------------------

    /// Start a session for a project (or a quick session when no project id
    /// is given). An existing session for the same project is closed first.
    pub async fn start_session(
        &self,
        project_id: Option<&str>,
    ) -> Result<StartedSession, SessionError> {
        let requested = project_id
            .filter(|id| !id.is_empty())
            .unwrap_or(QUICK_SESSION_ID);
        let project =
            self.projects
                .get(requested)
                .ok_or_else(|| SessionError::ProjectNotFound {
                    id: requested.to_string(),
                })?;
        let is_quick = project.id == QUICK_SESSION_ID;

        // One session per project: close the incumbent before spawning.
        if let Some(existing) = self.session_for_project(&project.id).await {
            info!(project_id = %project.id, session_id = %existing, "Closing previous session for project");
            let _ = self.close_session(&existing).await;
        }

        let context = self.history.context_summary(&project.id).await;
        let has_previous_context = !context.is_empty();

        let (pty, output_rx, exit_rx) =
            PtyProcess::spawn(&project.path, self.config.rows, self.config.cols)?;

        let session_id = uuid::Uuid::new_v4().to_string();
        let (history_paths, history_writer) = self.history.begin(&project.id, &session_id).await;

        let entry = SessionEntry {
            project_id: project.id.clone(),
            working_dir: project.path.clone(),
            status: SessionStatus::Active,
            last_activity: now_ms(),
            is_quick,
            ring: LineRing::new(self.config.ring_capacity),
            pty,
            history_paths,
        };
        self.sessions
            .write()
            .await
            .insert(session_id.clone(), entry);

        info!(
            session_id = %session_id,
            project_id = %project.id,
            cwd = %project.path.display(),
            has_previous_context,
            "Session started"
        );

        self.spawn_output_pump(session_id.clone(), output_rx, history_writer);
        self.spawn_exit_watcher(session_id.clone(), exit_rx);
        self.spawn_launcher(session_id.clone(), context);

        {
            let mut memory = self.memory.lock().await;
            memory.touch_project(&project.id);
            memory.save(&self.memory_path).await;
        }

        Ok(StartedSession {
            session_id,
            project_id: project.id,
            is_quick_session: is_quick,
            has_previous_context,
        })
    }

    /// Write user input followed by a carriage return, then schedule the
    /// second return the assistant CLI sometimes needs.
    pub async fn send_input(&self, session_id: &str, input: &str) -> Result<(), SessionError> {
        let sender = {
            let mut sessions = self.sessions.write().await;
            let entry =
                sessions
                    .get_mut(session_id)
                    .ok_or_else(|| SessionError::SessionNotFound {
                        id: session_id.to_string(),
                    })?;
            entry.touch();
            entry.pty.input_sender()
        };

        let mut bytes = input.as_bytes().to_vec();
        bytes.push(b'\r');
        sender.send(bytes).await.map_err(|_| SessionError::PtyGone)?;

        if let Some(delay) = self.config.double_tap_delay {
            let sessions = Arc::clone(&self.sessions);
            let session_id = session_id.to_string();
            tokio::spawn(async move {
                tokio::time::sleep(delay).await;
                // The session may have closed in the meantime.
                let _ = write_to_session(&sessions, &session_id, b"\r").await;
            });
        }

        Ok(())
    }

    /// Refresh `last_activity` without touching the PTY.
    pub async fn keepalive(&self, session_id: &str) -> Result<(), SessionError> {
        let mut sessions = self.sessions.write().await;
        let entry = sessions
            .get_mut(session_id)
            .ok_or_else(|| SessionError::SessionNotFound {
                id: session_id.to_string(),
            })?;
        entry.last_activity = entry.last_activity.max(now_ms());
        Ok(())
    }

    /// Kill the PTY, drop the session, finalize history, and announce the
    /// close downstream.
    pub async fn close_session(&self, session_id: &str) -> Result<(), SessionError> {
        let mut entry = self
            .sessions
            .write()
            .await
            .remove(session_id)
            .ok_or_else(|| SessionError::SessionNotFound {
                id: session_id.to_string(),
            })?;

        entry.pty.kill();
        self.history.finalize(&entry.history_paths).await;
        self.emit_session_closed(session_id, &entry.project_id);
        info!(session_id, project_id = %entry.project_id, "Session closed");
        Ok(())
    }

    /// Snapshot of all live sessions.
    pub async fn list_sessions(&self) -> Vec<SessionInfo> {
        self.sessions
            .read()
            .await
            .iter()
            .map(|(id, entry)| entry.info(id))
            .collect()
    }

    /// Last complete output lines of one session (newest last).
    pub async fn recent_output(&self, session_id: &str) -> Option<Vec<String>> {
        let sessions = self.sessions.read().await;
        let entry = sessions.get(session_id)?;
        Some(entry.ring.lines().map(str::to_string).collect())
    }

    /// Close every session (process shutdown).
    pub async fn shutdown_all(&self) {
        let ids: Vec<String> = self.sessions.read().await.keys().cloned().collect();
        for id in ids {
            let _ = self.close_session(&id).await;
        }
    }

    // ---------------------------------------------------------------------
    // Idle reaping
    // ---------------------------------------------------------------------

    /// One reaper scan: close sessions idle beyond the timeout and demote
    /// quiet-but-live sessions to `Idle`. Returns the closed ids.
    pub async fn reap_idle(&self) -> Vec<String> {
        let now = now_ms();
        let idle_ms = self.config.idle_timeout.as_millis() as i64;
        let quiet_ms = self.config.reap_interval.as_millis() as i64;

        let mut expired = Vec::new();
        {
            let mut sessions = self.sessions.write().await;
            for (id, entry) in sessions.iter_mut() {
                let idle_for = now - entry.last_activity;
                if idle_for > idle_ms {
                    expired.push(id.clone());
                } else if idle_for > quiet_ms {
                    entry.status = SessionStatus::Idle;
                }
            }
        }

        for id in &expired {
            warn!(session_id = %id, "Closing idle session");
            let _ = self.close_session(id).await;
        }
        expired
    }

    /// Spawn the periodic reaper loop.
    pub fn spawn_reaper(
        manager: &Arc<Self>,
        mut shutdown: tokio::sync::watch::Receiver<bool>,
    ) -> tokio::task::JoinHandle<()> {
        let manager = Arc::clone(manager);
        tokio::spawn(async move {
            let mut timer = tokio::time::interval(manager.config.reap_interval);
            timer.tick().await; // Skip first immediate tick
            loop {
                tokio::select! {
                    _ = timer.tick() => {
                        let closed = manager.reap_idle().await;
                        if !closed.is_empty() {
                            info!(count = closed.len(), "Idle reaper closed sessions");
                        }
                    }
                    _ = shutdown.changed() => {
                        debug!("Idle reaper shutting down");
                        return;
                    }
                }
            }
        })
    }

    // ---------------------------------------------------------------------
    // Uploads
    // ---------------------------------------------------------------------

    /// Decode and store an uploaded file under the session's `uploads/`
    /// directory. The name is flattened so it can never escape it.
    pub async fn upload_file(
        &self,
        session_id: &str,
        file_name: &str,
        file_content_b64: &str,
    ) -> Result<UploadedFile, SessionError> {
        let working_dir = {
            let sessions = self.sessions.read().await;
            let entry = sessions
                .get(session_id)
                .ok_or_else(|| SessionError::SessionNotFound {
                    id: session_id.to_string(),
                })?;
            entry.working_dir.clone()
        };

        let bytes = B64
            .decode(file_content_b64)
            .map_err(|e| SessionError::UploadFailed {
                reason: format!("invalid base64: {e}"),
            })?;

        let name = sanitize_file_name(file_name);
        let dir = working_dir.join("uploads");
        tokio::fs::create_dir_all(&dir)
            .await
            .map_err(|e| SessionError::UploadFailed {
                reason: e.to_string(),
            })?;
        let path = dir.join(&name);
        tokio::fs::write(&path, &bytes)
            .await
            .map_err(|e| SessionError::UploadFailed {
                reason: e.to_string(),
            })?;

        info!(session_id, file = %path.display(), size = bytes.len(), "File uploaded");
        Ok(UploadedFile {
            file_name: name,
            file_path: path.display().to_string(),
            size: bytes.len(),
        })
    }

    // ---------------------------------------------------------------------
    // Internals
    // ---------------------------------------------------------------------

    async fn session_for_project(&self, project_id: &str) -> Option<String> {
        self.sessions
            .read()
            .await
            .iter()
            .find(|(_, entry)| entry.project_id == project_id)
            .map(|(id, _)| id.clone())
    }

    fn emit_session_closed(&self, session_id: &str, project_id: &str) {
        self.emit(Envelope::status_with(
            StatusKind::SessionClosed,
            Some(serde_json::json!({
                "sessionId": session_id,
                "projectId": project_id,
            })),
            Some(session_id.to_string()),
        ));
    }

    /// Per-chunk pipeline: activity, ring buffer, history log, upstream frame.
    fn spawn_output_pump(
        &self,
        session_id: String,
        mut output_rx: mpsc::Receiver<Vec<u8>>,
        mut writer: HistoryWriter,
    ) {
        let sessions = Arc::clone(&self.sessions);
        let events = self.events.clone();
        tokio::spawn(async move {
            while let Some(chunk) = output_rx.recv().await {
                let text = String::from_utf8_lossy(&chunk).into_owned();
                {
                    let mut table = sessions.write().await;
                    match table.get_mut(&session_id) {
                        Some(entry) => {
                            entry.touch();
                            entry.ring.push_chunk(&text);
                        }
                        // Session closed while output was in flight.
                        None => break,
                    }
                }
                writer.append(&chunk).await;
                let _ = events.send(Envelope::output(&session_id, text));
            }
            debug!(session_id = %session_id, "Output pump finished");
        });
    }

    /// Observe spontaneous PTY exit and run the normal close path. After an
    /// explicit close the entry is already gone and this is a no-op.
    fn spawn_exit_watcher(
        &self,
        session_id: String,
        exit_rx: tokio::sync::oneshot::Receiver<()>,
    ) {
        let sessions = Arc::clone(&self.sessions);
        let history = self.history.clone();
        let events = self.events.clone();
        tokio::spawn(async move {
            let _ = exit_rx.await;
            let removed = sessions.write().await.remove(&session_id);
            if let Some(entry) = removed {
                warn!(session_id = %session_id, "PTY exited unexpectedly");
                history.finalize(&entry.history_paths).await;
                let _ = events.send(Envelope::status_with(
                    StatusKind::SessionClosed,
                    Some(serde_json::json!({
                        "sessionId": session_id,
                        "projectId": entry.project_id,
                    })),
                    Some(session_id.clone()),
                ));
            }
        });
    }

    /// After the spawn settle delay, inject previous context (when present)
    /// and then the assistant launch command.
    fn spawn_launcher(&self, session_id: String, context: String) {
        let sessions = Arc::clone(&self.sessions);
        let delay = self.config.launch_delay;
        let launch = self.config.launch_command.clone();
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            if !context.is_empty() {
                let mut bytes = context.into_bytes();
                bytes.push(b'\r');
                if write_to_session(&sessions, &session_id, &bytes).await.is_err() {
                    return;
                }
            }
            let mut bytes = launch.into_bytes();
            bytes.push(b'\r');
            let _ = write_to_session(&sessions, &session_id, &bytes).await;
        });
    }
}

/// Write raw bytes to a session's PTY if the session still exists.
async fn write_to_session(
    sessions: &RwLock<HashMap<String, SessionEntry>>,
    session_id: &str,
    bytes: &[u8],
) -> Result<(), SessionError> {
    let sender = {
        let table = sessions.read().await;
        table
            .get(session_id)
            .map(|entry| entry.pty.input_sender())
            .ok_or_else(|| SessionError::SessionNotFound {
                id: session_id.to_string(),
            })?
    };
    sender
        .send(bytes.to_vec())
        .await
        .map_err(|_| SessionError::PtyGone)
}

/// Flatten a client-supplied file name into `[A-Za-z0-9._-]`. Path
/// separators become underscores, so `../../etc/passwd` stays inside the
/// uploads directory as `.._.._etc_passwd`.
fn sanitize_file_name(name: &str) -> String {
    let sanitized: String = name
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-') {
                c
            } else {
                '_'
            }
        })
        .collect();
    if sanitized.is_empty() {
        "upload".to_string()
    } else {
        sanitized
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sanitize_flattens_traversal() {
        assert_eq!(sanitize_file_name("../../etc/passwd"), ".._.._etc_passwd");
        assert_eq!(sanitize_file_name("report v2.pdf"), "report_v2.pdf");
        assert_eq!(sanitize_file_name("ok-name_1.txt"), "ok-name_1.txt");
        assert_eq!(sanitize_file_name(""), "upload");
    }
}
