//! Command dispatch: wire envelopes in, reply envelopes out.
//!
//! Commands arrive on the uplink in order and are handled sequentially.
//! Replies are returned to the uplink for sending; session output and
//! close notifications travel separately over the manager's event channel.

use std::sync::Arc;

use serde_json::json;
use tracing::debug;

use pocketclaude_proto::{codes, CommandName, CommandPayload, Envelope, StatusKind};

use crate::session::{SessionError, SessionManager};

/// Default number of summaries returned by `get_session_history`.
const HISTORY_LIMIT: usize = 10;

/// Handle one `command` envelope, returning the reply envelopes to send.
pub async fn handle_command(manager: &Arc<SessionManager>, envelope: &Envelope) -> Vec<Envelope> {
    let payload: CommandPayload = match envelope.decode_payload("command") {
        Ok(payload) => payload,
        Err(e) => {
            debug!(error = %e, "Unparseable command payload");
            return error(codes::UNKNOWN_COMMAND, "unknown or malformed command");
        }
    };

    match payload.command {
        CommandName::ListProjects => list_projects(manager),
        CommandName::ListSessions => list_sessions(manager).await,
        CommandName::StartSession => start_session(manager, &payload).await,
        CommandName::SendInput => send_input(manager, &payload).await,
        CommandName::CloseSession => close_session(manager, &payload).await,
        CommandName::Keepalive => keepalive(manager, &payload).await,
        CommandName::GetSessionHistory => session_history(manager, &payload).await,
        CommandName::GetLastSessionOutput => last_session_output(manager, &payload).await,
        CommandName::GetContextSummary => context_summary(manager, &payload).await,
        CommandName::UploadFile => upload_file(manager, &payload).await,
    }
}

fn error(code: &str, message: impl Into<String>) -> Vec<Envelope> {
    vec![Envelope::error(code, message)]
}

fn status(kind: StatusKind, data: serde_json::Value, session_id: Option<String>) -> Vec<Envelope> {
    vec![Envelope::status_with(kind, Some(data), session_id)]
}

fn list_projects(manager: &SessionManager) -> Vec<Envelope> {
    let projects = serde_json::to_value(manager.projects().all()).unwrap_or_default();
    status(StatusKind::ProjectsList, json!({ "projects": projects }), None)
}

async fn list_sessions(manager: &SessionManager) -> Vec<Envelope> {
    let sessions = serde_json::to_value(manager.list_sessions().await).unwrap_or_default();
    status(StatusKind::SessionsList, json!({ "sessions": sessions }), None)
}

async fn start_session(manager: &Arc<SessionManager>, payload: &CommandPayload) -> Vec<Envelope> {
    match manager.start_session(payload.project_id.as_deref()).await {
        Ok(started) => status(
            StatusKind::SessionStarted,
            json!({
                "sessionId": started.session_id,
                "projectId": started.project_id,
                "isQuickSession": started.is_quick_session,
                "hasPreviousContext": started.has_previous_context,
            }),
            Some(started.session_id.clone()),
        ),
        Err(SessionError::ProjectNotFound { id }) => {
            error(codes::PROJECT_NOT_FOUND, format!("project not found: {id}"))
        }
        Err(e) => error("SPAWN_FAILED", e.to_string()),
    }
}

async fn send_input(manager: &Arc<SessionManager>, payload: &CommandPayload) -> Vec<Envelope> {
    let Some(session_id) = payload.session_id.as_deref() else {
        return error(codes::MISSING_SESSION_ID, "sessionId is required");
    };
    let Some(input) = payload.input.as_deref() else {
        return error(codes::MISSING_INPUT, "input is required");
    };
    match manager.send_input(session_id, input).await {
        // Output streams back asynchronously; no direct reply.
        Ok(()) => Vec::new(),
        Err(e) => session_error(e),
    }
}

async fn close_session(manager: &Arc<SessionManager>, payload: &CommandPayload) -> Vec<Envelope> {
    let Some(session_id) = payload.session_id.as_deref() else {
        return error(codes::MISSING_SESSION_ID, "sessionId is required");
    };
    match manager.close_session(session_id).await {
        // The close notification goes out on the event channel.
        Ok(()) => Vec::new(),
        Err(e) => session_error(e),
    }
}

async fn keepalive(manager: &Arc<SessionManager>, payload: &CommandPayload) -> Vec<Envelope> {
    let Some(session_id) = payload.session_id.as_deref() else {
        return error(codes::MISSING_SESSION_ID, "sessionId is required");
    };
    match manager.keepalive(session_id).await {
        Ok(()) => Vec::new(),
        Err(e) => session_error(e),
    }
}

async fn session_history(manager: &SessionManager, payload: &CommandPayload) -> Vec<Envelope> {
    let Some(project_id) = payload.project_id.as_deref() else {
        return error(codes::MISSING_PROJECT_ID, "projectId is required");
    };
    let summaries = manager.history().summaries(project_id, HISTORY_LIMIT).await;
    let history = serde_json::to_value(summaries).unwrap_or_default();
    status(StatusKind::SessionHistory, json!({ "history": history }), None)
}

async fn last_session_output(manager: &SessionManager, payload: &CommandPayload) -> Vec<Envelope> {
    let Some(project_id) = payload.project_id.as_deref() else {
        return error(codes::MISSING_PROJECT_ID, "projectId is required");
    };
    let output = manager.history().last_output(project_id).await.unwrap_or_default();
    status(StatusKind::LastSessionOutput, json!({ "output": output }), None)
}

async fn context_summary(manager: &SessionManager, payload: &CommandPayload) -> Vec<Envelope> {
    let Some(project_id) = payload.project_id.as_deref() else {
        return error(codes::MISSING_PROJECT_ID, "projectId is required");
    };
    let summary = manager.history().context_summary(project_id).await;
    status(StatusKind::ContextSummary, json!({ "summary": summary }), None)
}

async fn upload_file(manager: &SessionManager, payload: &CommandPayload) -> Vec<Envelope> {
    let Some(session_id) = payload.session_id.as_deref() else {
        return error(codes::MISSING_SESSION_ID, "sessionId is required");
    };
    let (Some(file_name), Some(file_content)) =
        (payload.file_name.as_deref(), payload.file_content.as_deref())
    else {
        return error(codes::MISSING_FILE_DATA, "fileName and fileContent are required");
    };

    match manager.upload_file(session_id, file_name, file_content).await {
        Ok(uploaded) => status(
            StatusKind::FileUploaded,
            json!({
                "fileName": uploaded.file_name,
                "filePath": uploaded.file_path,
                "size": uploaded.size,
            }),
            Some(session_id.to_string()),
        ),
        Err(SessionError::UploadFailed { reason }) => {
            error(codes::UPLOAD_FAILED, format!("upload failed: {reason}"))
        }
        Err(e) => session_error(e),
    }
}

fn session_error(e: SessionError) -> Vec<Envelope> {
    match e {
        SessionError::SessionNotFound { id } => {
            error(codes::SESSION_NOT_FOUND, format!("session not found: {id}"))
        }
        SessionError::PtyGone => error(codes::SESSION_NOT_FOUND, "session PTY is gone"),
        SessionError::ProjectNotFound { id } => {
            error(codes::PROJECT_NOT_FOUND, format!("project not found: {id}"))
        }
        SessionError::SpawnFailed { reason } => error("SPAWN_FAILED", reason),
        SessionError::UploadFailed { reason } => error(codes::UPLOAD_FAILED, reason),
    }
}
