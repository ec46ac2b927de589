//! Error types for the livefeed clients.

use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio_tungstenite::tungstenite;

/// Error for invalid HTTP header configuration.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum InvalidHeaderError {
    #[error("invalid header name: {0}")]
    InvalidName(String),
    #[error("invalid header value: {0}")]
    InvalidValue(String),
}

/// Main error type for streaming, SSE and WebSocket operations.
///
/// The type is `Clone` because a session's terminal error is delivered to
/// every subscriber of its output sequence. Errors from the underlying
/// libraries are held behind an `Arc` for that reason.
#[derive(Debug, Clone, Error)]
pub enum StreamError {
    #[error("transport error: {message}")]
    Transport {
        status: Option<u16>,
        message: String,
    },

    #[error("network error: {0}")]
    Network(#[source] Arc<reqwest::Error>),

    #[error("websocket error: {0}")]
    WebSocket(#[source] Arc<tungstenite::Error>),

    #[error("timed out after {0:?}")]
    Timeout(Duration),

    #[error("not connected")]
    NotConnected,

    #[error("already connected")]
    AlreadyConnected,

    #[error("protocol error: {0}")]
    Protocol(String),

    #[error("incomplete body: expected {expected} bytes, received {received}")]
    IncompleteBody { expected: u64, received: u64 },

    #[error(transparent)]
    InvalidHeader(#[from] InvalidHeaderError),

    #[error("json error: {0}")]
    Json(String),
}

/// Result alias used throughout the crate.
pub type Result<T, E = StreamError> = std::result::Result<T, E>;

impl StreamError {
    /// Create error from HTTP status code
    pub fn from_status(status: u16, url: &str) -> Self {
        let message = match status {
            400 => format!("bad request: {}", url),
            401 => format!("unauthorized: {}", url),
            403 => format!("forbidden: {}", url),
            404 => format!("not found: {}", url),
            429 => format!("rate limited: {}", url),
            _ if status >= 500 => format!("server error {}: {}", status, url),
            _ => format!("unexpected status {}: {}", status, url),
        };
        StreamError::Transport {
            status: Some(status),
            message,
        }
    }

    /// Create a transport error without a status code.
    pub fn transport(message: impl Into<String>) -> Self {
        StreamError::Transport {
            status: None,
            message: message.into(),
        }
    }

    /// Convert a `reqwest` failure of a request that ran under `deadline`.
    ///
    /// reqwest does not say which deadline fired, so a timeout is only
    /// reported as [`StreamError::Timeout`] when the caller knows it.
    pub(crate) fn from_reqwest(err: reqwest::Error, deadline: Option<Duration>) -> Self {
        match deadline {
            Some(limit) if err.is_timeout() => StreamError::Timeout(limit),
            _ => StreamError::Network(Arc::new(err)),
        }
    }

    /// Whether a connection-level retry could plausibly succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            StreamError::Transport { status, .. } => match status {
                Some(status) => *status == 408 || *status == 429 || *status >= 500,
                None => true,
            },
            StreamError::Network(_) => true,
            StreamError::WebSocket(_) => true,
            StreamError::Timeout(_) => true,
            StreamError::IncompleteBody { .. } => true,
            _ => false,
        }
    }

    /// HTTP status code if applicable
    pub fn status_code(&self) -> Option<u16> {
        match self {
            StreamError::Transport { status, .. } => *status,
            StreamError::Network(err) => err.status().map(|s| s.as_u16()),
            _ => None,
        }
    }
}

impl From<reqwest::Error> for StreamError {
    fn from(err: reqwest::Error) -> Self {
        StreamError::from_reqwest(err, None)
    }
}

impl From<tungstenite::Error> for StreamError {
    fn from(err: tungstenite::Error) -> Self {
        match err {
            tungstenite::Error::Http(response) => StreamError::Transport {
                status: Some(response.status().as_u16()),
                message: format!("websocket handshake rejected with {}", response.status()),
            },
            other => StreamError::WebSocket(Arc::new(other)),
        }
    }
}

#[cfg(feature = "json")]
impl From<serde_json::Error> for StreamError {
    fn from(err: serde_json::Error) -> Self {
        StreamError::Json(err.to_string())
    }
}
