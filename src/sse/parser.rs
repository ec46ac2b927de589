//! Server-Sent Events (SSE) frame parser.

use chrono::{DateTime, Utc};
use serde::Serialize;

/// Event name consumers see when a record carries no `event:` field.
pub const DEFAULT_EVENT_NAME: &str = "message";

/// One parsed Server-Sent-Event record.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SseEvent {
    pub id: Option<String>,
    /// Raw `event:` field; see [`event_name`](Self::event_name).
    pub event: Option<String>,
    /// `data:` lines joined with `\n`.
    pub data: String,
    /// Reconnection time requested by the server, in milliseconds.
    pub retry: Option<u64>,
    pub received_at: DateTime<Utc>,
}

impl SseEvent {
    /// Event name, defaulting to `"message"`.
    pub fn event_name(&self) -> &str {
        self.event.as_deref().unwrap_or(DEFAULT_EVENT_NAME)
    }

    /// Deserialize the data payload as JSON.
    #[cfg(feature = "json")]
    pub fn json<T: serde::de::DeserializeOwned>(&self) -> crate::error::Result<T> {
        Ok(serde_json::from_str(&self.data)?)
    }
}

/// Incremental SSE parser fed one decoded line at a time.
///
/// The parser keeps no assumption about how lines were split into network
/// chunks, so it can be driven straight from a [`LineFramer`]. It is
/// deliberately permissive: unknown fields, comments and malformed `retry:`
/// values are skipped without error.
///
/// [`LineFramer`]: crate::LineFramer
#[derive(Debug, Default)]
pub struct SseFrameParser {
    data: String,
    id: Option<String>,
    event: Option<String>,
    retry: Option<u64>,
    started: bool,
}

impl SseFrameParser {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one line (terminator already stripped). Returns an event when
    /// the line completed one.
    pub fn feed_line(&mut self, line: &str) -> Option<SseEvent> {
        let line = if self.started {
            line
        } else {
            self.started = true;
            line.strip_prefix('\u{feff}').unwrap_or(line)
        };

        if line.is_empty() {
            return self.dispatch();
        }

        if line.starts_with(':') {
            // comment
        } else if let Some(rest) = line.strip_prefix("data:") {
            self.data.push_str(rest.strip_prefix(' ').unwrap_or(rest));
            self.data.push('\n');
        } else if let Some(rest) = line.strip_prefix("id:") {
            self.id = Some(rest.trim().to_string());
        } else if let Some(rest) = line.strip_prefix("event:") {
            self.event = Some(rest.trim().to_string());
        } else if let Some(rest) = line.strip_prefix("retry:") {
            if let Ok(retry) = rest.trim().parse::<u64>() {
                self.retry = Some(retry);
            }
        }
        // Ignore other fields

        None
    }

    /// Whether field lines have been buffered without a terminating blank
    /// line yet.
    pub fn has_pending(&self) -> bool {
        !self.data.is_empty() || self.id.is_some() || self.event.is_some() || self.retry.is_some()
    }

    /// Drop any partially assembled record.
    pub fn reset(&mut self) {
        self.data.clear();
        self.id = None;
        self.event = None;
        self.retry = None;
    }

    /// Dispatch the current buffered event.
    fn dispatch(&mut self) -> Option<SseEvent> {
        if self.data.is_empty() {
            self.reset();
            return None;
        }

        let mut data = std::mem::take(&mut self.data);
        if data.ends_with('\n') {
            data.pop();
        }

        Some(SseEvent {
            id: self.id.take(),
            event: self.event.take(),
            data,
            retry: self.retry.take(),
            received_at: Utc::now(),
        })
    }
}
