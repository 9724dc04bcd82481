//! PocketClaude Relay Library
//!
//! A pure message switch between one agent and any number of clients:
//! - Connection registry enforcing the single-agent invariant
//! - WebSocket server with per-peer routing
//! - Heartbeat keepalives and stale-peer eviction
//! - `/health` endpoint

pub mod config;
pub mod heartbeat;
pub mod registry;
pub mod server;
