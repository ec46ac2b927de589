//! WebSocket message model delivered to subscribers.

use bytes::Bytes;
use chrono::{DateTime, Utc};

/// Close code for a normal closure.
pub const NORMAL_CLOSURE: u16 = 1000;

/// Close code reported when the peer went away without a close frame.
pub const ABNORMAL_CLOSURE: u16 = 1006;

/// What a [`WebSocketMessage`] carries.
///
/// `Text` and `Binary` come from the peer, classified by wire frame type.
/// `Open`, `Close` and `Error` are synthesized by the client around each
/// connection. `Ping` is emitted both for heartbeats the client sends and for
/// pings the peer sends; `Pong` only comes from the peer.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum WsPayload {
    Text(String),
    Binary(Bytes),
    /// Connection established; carries the URL.
    Open(String),
    Close { code: u16, reason: String },
    Error(String),
    Ping(Bytes),
    Pong(Bytes),
}

/// One message on a WebSocket session's output.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct WebSocketMessage {
    pub payload: WsPayload,
    pub received_at: DateTime<Utc>,
}

impl WebSocketMessage {
    /// Stamp `payload` with the current time.
    pub fn new(payload: WsPayload) -> Self {
        Self {
            payload,
            received_at: Utc::now(),
        }
    }

    pub fn text(text: impl Into<String>) -> Self {
        Self::new(WsPayload::Text(text.into()))
    }

    pub fn binary(data: impl Into<Bytes>) -> Self {
        Self::new(WsPayload::Binary(data.into()))
    }

    pub(crate) fn open(url: &str) -> Self {
        Self::new(WsPayload::Open(url.to_string()))
    }

    pub(crate) fn close(code: u16, reason: impl Into<String>) -> Self {
        Self::new(WsPayload::Close {
            code,
            reason: reason.into(),
        })
    }

    pub(crate) fn error(message: impl Into<String>) -> Self {
        Self::new(WsPayload::Error(message.into()))
    }

    /// Text content of a `Text` message.
    pub fn as_text(&self) -> Option<&str> {
        match &self.payload {
            WsPayload::Text(text) => Some(text),
            _ => None,
        }
    }

    /// Payload of a `Binary` message.
    pub fn as_binary(&self) -> Option<&Bytes> {
        match &self.payload {
            WsPayload::Binary(data) => Some(data),
            _ => None,
        }
    }

    /// Whether the message was synthesized by the client rather than
    /// received from the peer.
    pub fn is_lifecycle(&self) -> bool {
        matches!(
            self.payload,
            WsPayload::Open(_) | WsPayload::Close { .. } | WsPayload::Error(_)
        )
    }

    /// Deserialize a `Text` message as JSON.
    #[cfg(feature = "json")]
    pub fn json<T: serde::de::DeserializeOwned>(&self) -> crate::error::Result<T> {
        match &self.payload {
            WsPayload::Text(text) => Ok(serde_json::from_str(text)?),
            WsPayload::Binary(data) => Ok(serde_json::from_slice(data)?),
            other => Err(crate::error::StreamError::Protocol(format!(
                "cannot decode {:?} as json",
                other
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_accessors() {
        let msg = WebSocketMessage::text("hi");
        assert_eq!(msg.as_text(), Some("hi"));
        assert!(msg.as_binary().is_none());
        assert!(!msg.is_lifecycle());

        let msg = WebSocketMessage::binary(vec![1u8, 2, 3]);
        assert_eq!(msg.as_binary().unwrap().as_ref(), &[1, 2, 3]);

        assert!(WebSocketMessage::open("ws://x").is_lifecycle());
        assert!(WebSocketMessage::close(NORMAL_CLOSURE, "").is_lifecycle());
        assert!(WebSocketMessage::error("boom").is_lifecycle());
    }

    #[cfg(feature = "json")]
    #[test]
    fn test_json_payloads() {
        let value: serde_json::Value = WebSocketMessage::text(r#"{"a":1}"#).json().unwrap();
        assert_eq!(value["a"], 1);

        let value: Vec<u8> = WebSocketMessage::binary(&b"[1,2]"[..]).json().unwrap();
        assert_eq!(value, vec![1, 2]);

        let err = WebSocketMessage::open("ws://x")
            .json::<serde_json::Value>()
            .unwrap_err();
        assert!(matches!(err, crate::error::StreamError::Protocol(_)));
    }
}
