//! PocketClaude Core Library
//!
//! Shared functionality for the relay, agent, and client adapters:
//! - Projects configuration (`projects.json`)
//! - Reconnect backoff policy
//! - Error types
//! - Tracing/logging initialization

pub mod backoff;
pub mod error;
pub mod projects;
pub mod tracing_init;

pub use error::{Error, Result};
