//! Session manager types.

use std::time::Duration;

use serde::Serialize;

/// Configuration for session spawning and lifecycle timers.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Command written into the PTY to launch the assistant CLI.
    pub launch_command: String,
    /// Delay between PTY spawn and writing the launch command.
    pub launch_delay: Duration,
    /// Delay before the second carriage return after `send_input`.
    /// `None` disables the double tap.
    pub double_tap_delay: Option<Duration>,
    /// Sessions idle longer than this are closed by the reaper.
    pub idle_timeout: Duration,
    /// How often the reaper scans the session table.
    pub reap_interval: Duration,
    /// PTY dimensions.
    pub rows: u16,
    pub cols: u16,
    /// Ring buffer capacity in lines.
    pub ring_capacity: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            launch_command: "claude".to_string(),
            launch_delay: Duration::from_millis(500),
            double_tap_delay: Some(Duration::from_millis(100)),
            idle_timeout: Duration::from_secs(30 * 60),
            reap_interval: Duration::from_secs(5 * 60),
            rows: 30,
            cols: 120,
            ring_capacity: 100,
        }
    }
}

/// Session liveness as reported in `sessions_list`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionStatus {
    Active,
    Idle,
}

/// Snapshot of one live session for `sessions_list`.
#[derive(Debug, Clone, Serialize)]
pub struct SessionInfo {
    #[serde(rename = "sessionId")]
    pub session_id: String,
    #[serde(rename = "projectId")]
    pub project_id: String,
    #[serde(rename = "workingDir")]
    pub working_dir: String,
    pub status: SessionStatus,
    #[serde(rename = "lastActivity")]
    pub last_activity: i64,
    #[serde(rename = "isQuickSession")]
    pub is_quick_session: bool,
}

/// Result of a successful `start_session`.
#[derive(Debug, Clone)]
pub struct StartedSession {
    pub session_id: String,
    pub project_id: String,
    pub is_quick_session: bool,
    pub has_previous_context: bool,
}

/// A file accepted by `upload_file`.
#[derive(Debug, Clone)]
pub struct UploadedFile {
    pub file_name: String,
    pub file_path: String,
    pub size: usize,
}

/// Errors from session operations.
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("Project not found: {id}")]
    ProjectNotFound { id: String },

    #[error("Session not found: {id}")]
    SessionNotFound { id: String },

    #[error("Failed to spawn PTY: {reason}")]
    SpawnFailed { reason: String },

    #[error("Session PTY writer is closed")]
    PtyGone,

    #[error("Upload failed: {reason}")]
    UploadFailed { reason: String },
}
