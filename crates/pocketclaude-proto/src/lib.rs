//! `PocketClaude` wire protocol
//!
//! JSON envelope types shared by the relay, the agent, and client adapters.
//!
//! This crate contains:
//! - [`Envelope`] and the five message kinds it carries
//! - Typed payloads for `auth`, `command`, `output`, `status`, and `error`
//! - Named constants for error codes and WebSocket close codes

pub mod codes;
pub mod envelope;
pub mod payload;

pub use envelope::{now_ms, Envelope, MessageType};
pub use payload::{
    AuthPayload, CommandName, CommandPayload, ErrorPayload, OutputPayload, Role, StatusKind,
    StatusPayload,
};

/// Errors produced while encoding or decoding protocol frames.
#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    /// The frame was not valid JSON or did not match the envelope shape.
    #[error("Invalid envelope: {0}")]
    InvalidEnvelope(#[from] serde_json::Error),

    /// The envelope payload did not match the schema for its message type.
    #[error("Invalid {kind} payload: {reason}")]
    InvalidPayload { kind: &'static str, reason: String },
}
