//! Reconnection policy shared by the SSE and WebSocket clients.

use std::time::Duration;

/// Default delay between reconnection attempts.
pub const DEFAULT_RECONNECT_INTERVAL: Duration = Duration::from_secs(3);

/// Default number of consecutive reconnection attempts.
pub const DEFAULT_MAX_RECONNECT_ATTEMPTS: u32 = 5;

/// Bounded, fixed-interval reconnection policy.
///
/// After the `k`-th consecutive failure (`1 <= k <= max_attempts`) the session
/// waits exactly `interval` before the next attempt. There is no exponential
/// growth and no jitter. A successful connection resets the failure count.
///
/// A clean remote close and a transport error consume the same budget.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ReconnectPolicy {
    pub interval: Duration,
    pub max_attempts: u32,
    pub enabled: bool,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            interval: DEFAULT_RECONNECT_INTERVAL,
            max_attempts: DEFAULT_MAX_RECONNECT_ATTEMPTS,
            enabled: true,
        }
    }
}

impl ReconnectPolicy {
    /// Create a new policy with defaults
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the delay before each reconnection attempt
    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    /// Set maximum consecutive reconnection attempts
    pub fn with_max_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = attempts;
        self
    }

    /// Enable or disable automatic reconnection
    pub fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    /// Decide what to do after a disconnection, given how many consecutive
    /// reconnection attempts have already been made.
    ///
    /// Returns the delay to wait before the next attempt, or `None` when the
    /// session must terminate.
    pub fn next_delay(&self, attempts_so_far: u32) -> Option<Duration> {
        if self.should_retry(attempts_so_far) {
            Some(self.interval)
        } else {
            None
        }
    }

    /// Check if we should retry based on attempt count
    pub fn should_retry(&self, attempts_so_far: u32) -> bool {
        self.enabled && attempts_so_far < self.max_attempts
    }
}
