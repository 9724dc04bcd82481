//! In-memory connection registry.

mod connection;

pub use connection::{ConnectionRegistry, Outbound, PeerId, RegistryError};
