//! Relay configuration.

use std::time::Duration;

/// Runtime configuration for the relay.
#[derive(Debug, Clone)]
pub struct RelayConfig {
    /// Shared bearer secret every peer must present in its auth frame.
    pub token: String,
    /// Interval between ping frames to authenticated peers.
    pub heartbeat_interval: Duration,
    /// A peer whose last pong is older than this is force-closed.
    pub heartbeat_timeout: Duration,
    /// How long a fresh connection may take to send its auth frame.
    pub handshake_timeout: Duration,
}

impl RelayConfig {
    /// Production defaults around a given shared secret.
    pub fn new(token: String) -> Self {
        Self {
            token,
            heartbeat_interval: Duration::from_secs(30),
            heartbeat_timeout: Duration::from_secs(60),
            handshake_timeout: Duration::from_secs(10),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_intervals() {
        let config = RelayConfig::new("secret".into());
        assert_eq!(config.heartbeat_interval, Duration::from_secs(30));
        assert_eq!(config.heartbeat_timeout, Duration::from_secs(60));
        assert_eq!(config.handshake_timeout, Duration::from_secs(10));
    }
}
