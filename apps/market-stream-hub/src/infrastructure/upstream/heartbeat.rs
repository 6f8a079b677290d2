//! Upstream Keepalive
//!
//! Tracks liveness of the exchange connection. The session loop sends a
//! ping every `ping_interval`; any inbound frame (data, ping or pong)
//! counts as activity. If nothing arrives for `pong_timeout` the
//! connection is considered dead and the loop exits.
//!
//! The tracker is plain state driven by the session's `select!` loop, so
//! it can be tested without a socket. Time comes from the tokio clock and
//! follows it when paused.

use std::time::Duration;

use tokio::time::Instant;

/// Default interval between keepalive pings.
pub const DEFAULT_PING_INTERVAL: Duration = Duration::from_secs(20);

/// Default silence allowed before the connection is declared dead.
pub const DEFAULT_PONG_TIMEOUT: Duration = Duration::from_secs(60);

/// Configuration for keepalive behavior.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HeartbeatConfig {
    /// Interval between ping frames.
    pub ping_interval: Duration,
    /// Maximum silence before the connection is considered dead.
    pub pong_timeout: Duration,
}

impl Default for HeartbeatConfig {
    fn default() -> Self {
        Self {
            ping_interval: DEFAULT_PING_INTERVAL,
            pong_timeout: DEFAULT_PONG_TIMEOUT,
        }
    }
}

impl HeartbeatConfig {
    /// Create a new configuration with custom values.
    #[must_use]
    pub const fn new(ping_interval: Duration, pong_timeout: Duration) -> Self {
        Self {
            ping_interval,
            pong_timeout,
        }
    }
}

/// What the session loop should do on a keepalive tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeartbeatAction {
    /// Send a ping frame.
    SendPing,
    /// The peer has been silent too long; drop the connection.
    Expired {
        /// Time since the last inbound frame.
        silent_for: Duration,
    },
}

/// Per-connection liveness tracker.
#[derive(Debug)]
pub struct HeartbeatState {
    config: HeartbeatConfig,
    last_activity: Instant,
    pings_sent: u64,
}

impl HeartbeatState {
    /// Create a tracker for a freshly opened connection.
    #[must_use]
    pub fn new(config: HeartbeatConfig) -> Self {
        Self::starting_at(config, Instant::now())
    }

    /// Create a tracker whose last activity is `now`.
    #[must_use]
    pub const fn starting_at(config: HeartbeatConfig, now: Instant) -> Self {
        Self {
            config,
            last_activity: now,
            pings_sent: 0,
        }
    }

    /// Record an inbound frame.
    pub fn record_activity(&mut self) {
        self.record_activity_at(Instant::now());
    }

    /// Record an inbound frame observed at `now`.
    pub const fn record_activity_at(&mut self, now: Instant) {
        self.last_activity = now;
    }

    /// Decide what to do on a ping tick.
    #[must_use]
    pub fn on_tick(&mut self) -> HeartbeatAction {
        self.on_tick_at(Instant::now())
    }

    /// Decide what to do on a ping tick observed at `now`.
    #[must_use]
    pub fn on_tick_at(&mut self, now: Instant) -> HeartbeatAction {
        let silent_for = now.saturating_duration_since(self.last_activity);
        if silent_for > self.config.pong_timeout {
            return HeartbeatAction::Expired { silent_for };
        }
        self.pings_sent += 1;
        HeartbeatAction::SendPing
    }

    /// Number of pings requested on this connection.
    #[must_use]
    pub const fn pings_sent(&self) -> u64 {
        self.pings_sent
    }

    /// Configured ping interval.
    #[must_use]
    pub const fn ping_interval(&self) -> Duration {
        self.config.ping_interval
    }
}
