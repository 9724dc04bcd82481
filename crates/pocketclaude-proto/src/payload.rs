//! Typed payload schemas for each envelope kind.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Peer role declared during the auth handshake.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Agent,
    Client,
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Agent => f.write_str("agent"),
            Self::Client => f.write_str("client"),
        }
    }
}

/// Payload of `type=auth`: the first frame on every connection.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthPayload {
    pub token: String,
    pub role: Role,
}

/// Commands a client may issue, as they appear on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CommandName {
    ListProjects,
    ListSessions,
    StartSession,
    SendInput,
    CloseSession,
    Keepalive,
    GetSessionHistory,
    GetLastSessionOutput,
    GetContextSummary,
    UploadFile,
}

/// Payload of `type=command`. Fields beyond `command` are per-command;
/// the agent validates presence and replies with a `MISSING_*` error code
/// when a required field is absent.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CommandPayload {
    pub command: CommandName,
    #[serde(rename = "projectId", skip_serializing_if = "Option::is_none")]
    pub project_id: Option<String>,
    #[serde(rename = "sessionId", skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub input: Option<String>,
    #[serde(rename = "fileName", skip_serializing_if = "Option::is_none")]
    pub file_name: Option<String>,
    /// Base64-encoded file content for `upload_file`.
    #[serde(rename = "fileContent", skip_serializing_if = "Option::is_none")]
    pub file_content: Option<String>,
    #[serde(rename = "mimeType", skip_serializing_if = "Option::is_none")]
    pub mime_type: Option<String>,
}

impl Default for CommandName {
    fn default() -> Self {
        Self::ListSessions
    }
}

/// Payload of `type=output`: one raw PTY chunk. Multi-byte sequences may be
/// split across consecutive frames.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutputPayload {
    #[serde(rename = "sessionId")]
    pub session_id: String,
    pub data: String,
}

/// Status kinds carried by `type=status` envelopes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StatusKind {
    Connected,
    Disconnected,
    SessionStarted,
    SessionClosed,
    ProjectsList,
    SessionsList,
    SessionHistory,
    LastSessionOutput,
    FileUploaded,
    ContextSummary,
}

/// Payload of `type=status`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusPayload {
    pub status: StatusKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    #[serde(rename = "sessionId", skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
}

/// Payload of `type=error`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorPayload {
    pub code: String,
    pub message: String,
}
