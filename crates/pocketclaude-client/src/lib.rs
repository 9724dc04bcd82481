//! PocketClaude Client Adapter Library
//!
//! Building blocks for read/write clients of the relay:
//! - Authenticated connection with automatic reconnection
//! - Agent-presence tracking from broadcast status frames
//! - Local session cache with stale eviction
//! - Presentation helpers for chat and terminal front-ends

pub mod cache;
pub mod connection;
pub mod presentation;

pub use cache::SessionCache;
pub use connection::{ClientConfig, ClientHandle, CommandSender, ConnectionError};
