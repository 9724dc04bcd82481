//! The JSON envelope framing every protocol message.

use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::payload::{
    AuthPayload, CommandPayload, ErrorPayload, OutputPayload, Role, StatusKind, StatusPayload,
};
use crate::ProtocolError;

/// Message kinds carried by an [`Envelope`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageType {
    Auth,
    Command,
    Output,
    Status,
    Error,
}

/// One transport message: a single JSON object, UTF-8, no BOM.
///
/// `timestamp` is assigned by the sending side at send time (milliseconds
/// since the Unix epoch).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Envelope {
    #[serde(rename = "type")]
    pub message_type: MessageType,
    #[serde(rename = "sessionId", skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    pub payload: Value,
    pub timestamp: i64,
}

/// Current wall-clock time in milliseconds since the Unix epoch.
pub fn now_ms() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| i64::try_from(d.as_millis()).unwrap_or(i64::MAX))
        .unwrap_or(0)
}

impl Envelope {
    fn new(message_type: MessageType, session_id: Option<String>, payload: Value) -> Self {
        Self {
            message_type,
            session_id,
            payload,
            timestamp: now_ms(),
        }
    }

    /// Build an `auth` envelope for the handshake.
    pub fn auth(token: impl Into<String>, role: Role) -> Self {
        let payload = AuthPayload {
            token: token.into(),
            role,
        };
        Self::new(MessageType::Auth, None, to_value(&payload))
    }

    /// Build a `command` envelope.
    pub fn command(payload: &CommandPayload) -> Self {
        Self::new(MessageType::Command, None, to_value(payload))
    }

    /// Build an `output` envelope carrying one PTY chunk.
    pub fn output(session_id: impl Into<String>, data: impl Into<String>) -> Self {
        let session_id = session_id.into();
        let payload = OutputPayload {
            session_id: session_id.clone(),
            data: data.into(),
        };
        Self::new(MessageType::Output, Some(session_id), to_value(&payload))
    }

    /// Build a `status` envelope with no data object.
    pub fn status(status: StatusKind) -> Self {
        Self::status_with(status, None, None)
    }

    /// Build a `status` envelope with an optional data object and session id.
    pub fn status_with(status: StatusKind, data: Option<Value>, session_id: Option<String>) -> Self {
        let payload = StatusPayload {
            status,
            data,
            session_id: session_id.clone(),
        };
        Self::new(MessageType::Status, session_id, to_value(&payload))
    }

    /// Build an `error` envelope from a protocol error code and message.
    pub fn error(code: &str, message: impl Into<String>) -> Self {
        let payload = ErrorPayload {
            code: code.to_string(),
            message: message.into(),
        };
        Self::new(MessageType::Error, None, to_value(&payload))
    }

    /// Parse one transport message.
    pub fn from_json(raw: &str) -> Result<Self, ProtocolError> {
        Ok(serde_json::from_str(raw)?)
    }

    /// Serialize for the wire.
    ///
    /// Serialization of these types cannot fail; a failure would indicate a
    /// bug in the payload constructors, so it degrades to an error frame.
    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|e| {
            format!(
                r#"{{"type":"error","payload":{{"code":"INVALID_JSON","message":"{e}"}},"timestamp":0}}"#
            )
        })
    }

    /// Decode the payload as a concrete type, reporting schema mismatches.
    pub fn decode_payload<T: serde::de::DeserializeOwned>(
        &self,
        kind: &'static str,
    ) -> Result<T, ProtocolError> {
        serde_json::from_value(self.payload.clone()).map_err(|e| ProtocolError::InvalidPayload {
            kind,
            reason: e.to_string(),
        })
    }
}

fn to_value<T: Serialize>(payload: &T) -> Value {
    serde_json::to_value(payload).unwrap_or(Value::Null)
}
