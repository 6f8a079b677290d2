//! Reconnection Backoff
//!
//! Exponential backoff with jitter for the opt-in upstream reconnect loop.
//! Reconnection is disabled unless `UPSTREAM_AUTO_RECONNECT` is set; when
//! it is off a dropped connection simply ends the session.

use std::time::Duration;

use rand::Rng;

/// Configuration for reconnection behavior.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ReconnectConfig {
    /// Whether a dropped connection is re-established automatically.
    pub enabled: bool,
    /// Delay before the first reconnection attempt.
    pub initial_delay: Duration,
    /// Upper bound on any single delay.
    pub max_delay: Duration,
    /// Growth factor applied per attempt.
    pub multiplier: f64,
    /// Jitter as a fraction of the delay (0.1 = ±10%).
    pub jitter_factor: f64,
    /// Attempts allowed before giving up (0 = unlimited).
    pub max_attempts: u32,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            initial_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(30),
            multiplier: 2.0,
            jitter_factor: 0.1,
            max_attempts: 0,
        }
    }
}

/// Backoff state for one reconnect sequence.
#[derive(Debug)]
pub struct ReconnectPolicy {
    config: ReconnectConfig,
    attempts: u32,
}

impl ReconnectPolicy {
    /// Create a new policy.
    #[must_use]
    pub const fn new(config: ReconnectConfig) -> Self {
        Self {
            config,
            attempts: 0,
        }
    }

    /// Delay before the next attempt, or `None` when reconnecting is
    /// disabled or the attempt budget is spent.
    #[must_use]
    pub fn next_delay(&mut self) -> Option<Duration> {
        if !self.config.enabled {
            return None;
        }
        if self.config.max_attempts > 0 && self.attempts >= self.config.max_attempts {
            return None;
        }

        let base = self.base_delay(self.attempts);
        self.attempts += 1;
        Some(self.jitter(base))
    }

    /// Start a fresh sequence after a successful connection.
    pub const fn reset(&mut self) {
        self.attempts = 0;
    }

    /// Attempts made in the current sequence.
    #[must_use]
    pub const fn attempts(&self) -> u32 {
        self.attempts
    }

    /// Un-jittered delay for the given zero-based attempt.
    #[must_use]
    pub fn base_delay(&self, attempt: u32) -> Duration {
        let exponent = i32::try_from(attempt).unwrap_or(i32::MAX);
        let factor = self.config.multiplier.max(1.0).powi(exponent);
        let scaled = self.config.initial_delay.as_secs_f64() * factor;

        if !scaled.is_finite() || scaled >= self.config.max_delay.as_secs_f64() {
            return self.config.max_delay;
        }
        Duration::from_secs_f64(scaled)
    }

    fn jitter(&self, delay: Duration) -> Duration {
        if self.config.jitter_factor <= 0.0 {
            return delay;
        }

        let base = delay.as_secs_f64();
        let spread = base * self.config.jitter_factor;
        let offset: f64 = rand::rng().random_range(-spread..=spread);
        Duration::from_secs_f64((base + offset).max(0.001))
    }
}
