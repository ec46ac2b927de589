//! Connection options for the SSE and WebSocket clients.

use crate::reconnect::{ReconnectPolicy, DEFAULT_MAX_RECONNECT_ATTEMPTS, DEFAULT_RECONNECT_INTERVAL};
use std::time::Duration;

/// Options for an SSE session.
#[derive(Clone, Debug)]
#[non_exhaustive]
pub struct SseOptions {
    pub reconnect_interval: Duration,
    pub max_reconnect_attempts: u32,
    pub auto_reconnect: bool,
    pub headers: Vec<(String, String)>,
    /// Send `Last-Event-ID` with the id of the last received event when
    /// reconnecting.
    pub resume_from_last_event_id: bool,
}

impl Default for SseOptions {
    fn default() -> Self {
        Self {
            reconnect_interval: DEFAULT_RECONNECT_INTERVAL,
            max_reconnect_attempts: DEFAULT_MAX_RECONNECT_ATTEMPTS,
            auto_reconnect: true,
            headers: Vec::new(),
            resume_from_last_event_id: false,
        }
    }
}

impl SseOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn reconnect_interval(mut self, interval: Duration) -> Self {
        self.reconnect_interval = interval;
        self
    }

    pub fn max_reconnect_attempts(mut self, attempts: u32) -> Self {
        self.max_reconnect_attempts = attempts;
        self
    }

    pub fn auto_reconnect(mut self, enabled: bool) -> Self {
        self.auto_reconnect = enabled;
        self
    }

    pub fn header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((key.into(), value.into()));
        self
    }

    pub fn resume_from_last_event_id(mut self, enabled: bool) -> Self {
        self.resume_from_last_event_id = enabled;
        self
    }

    pub(crate) fn reconnect_policy(&self) -> ReconnectPolicy {
        ReconnectPolicy {
            interval: self.reconnect_interval,
            max_attempts: self.max_reconnect_attempts,
            enabled: self.auto_reconnect,
        }
    }
}

/// Options for a WebSocket session.
#[derive(Clone, Debug)]
#[non_exhaustive]
pub struct WebSocketOptions {
    pub reconnect_interval: Duration,
    pub max_reconnect_attempts: u32,
    pub auto_reconnect: bool,
    pub headers: Vec<(String, String)>,
    /// Sub-protocols offered in `Sec-WebSocket-Protocol`.
    pub protocols: Vec<String>,
    pub connect_timeout: Option<Duration>,
    /// Interval between heartbeat pings while connected. `None` disables
    /// heartbeats.
    pub ping_interval: Option<Duration>,
}

impl Default for WebSocketOptions {
    fn default() -> Self {
        Self {
            reconnect_interval: DEFAULT_RECONNECT_INTERVAL,
            max_reconnect_attempts: DEFAULT_MAX_RECONNECT_ATTEMPTS,
            auto_reconnect: true,
            headers: Vec::new(),
            protocols: Vec::new(),
            connect_timeout: None,
            ping_interval: None,
        }
    }
}

impl WebSocketOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn reconnect_interval(mut self, interval: Duration) -> Self {
        self.reconnect_interval = interval;
        self
    }

    pub fn max_reconnect_attempts(mut self, attempts: u32) -> Self {
        self.max_reconnect_attempts = attempts;
        self
    }

    pub fn auto_reconnect(mut self, enabled: bool) -> Self {
        self.auto_reconnect = enabled;
        self
    }

    pub fn header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((key.into(), value.into()));
        self
    }

    pub fn protocol(mut self, protocol: impl Into<String>) -> Self {
        self.protocols.push(protocol.into());
        self
    }

    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = Some(timeout);
        self
    }

    pub fn ping_interval(mut self, interval: Duration) -> Self {
        self.ping_interval = Some(interval);
        self
    }

    pub(crate) fn reconnect_policy(&self) -> ReconnectPolicy {
        ReconnectPolicy {
            interval: self.reconnect_interval,
            max_attempts: self.max_reconnect_attempts,
            enabled: self.auto_reconnect,
        }
    }
}
