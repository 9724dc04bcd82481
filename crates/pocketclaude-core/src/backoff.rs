//! Exponential reconnect backoff shared by the agent uplink and client
//! adapters.

use std::time::Duration;

use rand::Rng;

/// Exponential backoff reconnection policy with jitter.
#[derive(Debug, Clone)]
pub struct ReconnectPolicy {
    /// Initial delay before the first reconnect attempt.
    pub initial_delay: Duration,
    /// Maximum delay between reconnect attempts.
    pub max_delay: Duration,
    /// Multiplier applied to the delay after each failed attempt.
    pub multiplier: f64,
    /// Jitter fraction applied to each delay (0.1 = plus/minus 10 percent).
    pub jitter: f64,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
            multiplier: 2.0,
            jitter: 0.1,
        }
    }
}

impl ReconnectPolicy {
    /// Calculate the base delay for a given attempt number (0-indexed),
    /// before jitter.
    pub fn base_delay(&self, attempt: u32) -> Duration {
        let base_ms = self.initial_delay.as_millis() as f64;
        let delay_ms = base_ms * self.multiplier.powi(attempt.min(30) as i32);
        let capped_ms = delay_ms.min(self.max_delay.as_millis() as f64);
        Duration::from_millis(capped_ms as u64)
    }

    /// The delay for a given attempt with jitter applied.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let base = self.base_delay(attempt).as_millis() as f64;
        let factor = if self.jitter > 0.0 {
            rand::thread_rng().gen_range(1.0 - self.jitter..=1.0 + self.jitter)
        } else {
            1.0
        };
        Duration::from_millis((base * factor) as u64)
    }
}

/// Mutable backoff state carried across connection attempts.
///
/// `attempt` advances on each scheduled reconnect and resets only on a
/// successful authentication. A rejected bind (another agent already holds
/// the slot) advances the counter by five extra steps so the incumbent is
/// not contended.
#[derive(Debug, Clone)]
pub struct BackoffState {
    policy: ReconnectPolicy,
    attempt: u32,
}

/// Extra steps added when the relay reports `AGENT_EXISTS`.
const AGENT_EXISTS_PENALTY: u32 = 5;

impl BackoffState {
    pub fn new(policy: ReconnectPolicy) -> Self {
        Self { policy, attempt: 0 }
    }

    /// Current attempt number.
    pub const fn attempt(&self) -> u32 {
        self.attempt
    }

    /// Delay to sleep before the next attempt; advances the counter.
    pub fn next_delay(&mut self) -> Duration {
        let delay = self.policy.delay_for_attempt(self.attempt);
        self.attempt = self.attempt.saturating_add(1);
        delay
    }

    /// Reset on successful authentication.
    pub fn reset(&mut self) {
        self.attempt = 0;
    }

    /// Penalize after an `AGENT_EXISTS` rejection.
    pub fn penalize_agent_exists(&mut self) {
        self.attempt = self.attempt.saturating_add(AGENT_EXISTS_PENALTY);
    }
}
