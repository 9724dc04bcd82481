//! PocketClaude Agent Library
//!
//! Workstation-resident core of the overlay:
//! - PTY session management (spawn, input, close, idle reaping)
//! - Output pipeline: ring buffer, on-disk history logs, upstream frames
//! - Command dispatch for the wire protocol
//! - Resilient uplink to the relay with exponential backoff

pub mod dispatch;
pub mod history;
pub mod session;
pub mod uplink;
