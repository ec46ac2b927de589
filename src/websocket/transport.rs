//! WebSocket transport seam.
//!
//! The client drives a [`WsConnection`]: a sink and a stream of [`WsFrame`]s
//! obtained from a [`WsConnector`]. [`TungsteniteConnector`] is the
//! production implementation.

use crate::error::{InvalidHeaderError, Result, StreamError};
use async_trait::async_trait;
use bytes::Bytes;
use futures::{future, Sink, SinkExt, Stream, StreamExt};
use http::header::{HeaderMap, HeaderValue, SEC_WEBSOCKET_PROTOCOL};
use std::pin::Pin;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::Message;

/// Close code used when the peer's close frame carried no status.
pub const NO_STATUS_RECEIVED: u16 = 1005;

/// A WebSocket frame as seen by the client, independent of the library
/// that put it on the wire.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum WsFrame {
    Text(String),
    Binary(Bytes),
    Ping(Bytes),
    Pong(Bytes),
    Close { code: u16, reason: String },
}

impl WsFrame {
    fn into_message(self) -> Message {
        match self {
            WsFrame::Text(text) => Message::Text(text),
            WsFrame::Binary(data) => Message::Binary(data.to_vec()),
            WsFrame::Ping(data) => Message::Ping(data.to_vec()),
            WsFrame::Pong(data) => Message::Pong(data.to_vec()),
            WsFrame::Close { code, reason } => Message::Close(Some(CloseFrame {
                code: CloseCode::from(code),
                reason: reason.into(),
            })),
        }
    }

    fn from_message(message: Message) -> Option<Self> {
        match message {
            Message::Text(text) => Some(WsFrame::Text(text)),
            Message::Binary(data) => Some(WsFrame::Binary(Bytes::from(data))),
            Message::Ping(data) => Some(WsFrame::Ping(Bytes::from(data))),
            Message::Pong(data) => Some(WsFrame::Pong(Bytes::from(data))),
            Message::Close(Some(frame)) => Some(WsFrame::Close {
                code: u16::from(frame.code),
                reason: frame.reason.into_owned(),
            }),
            Message::Close(None) => Some(WsFrame::Close {
                code: NO_STATUS_RECEIVED,
                reason: String::new(),
            }),
            // raw frames are never yielded when reading
            Message::Frame(_) => None,
        }
    }
}

/// Everything needed to open one WebSocket connection.
#[derive(Clone, Debug)]
pub struct WsRequest {
    /// `ws://` or `wss://` URL.
    pub url: String,
    pub headers: HeaderMap,
    /// Offered sub-protocols, in preference order.
    pub protocols: Vec<String>,
}

pub type FrameSink = Pin<Box<dyn Sink<WsFrame, Error = StreamError> + Send>>;
pub type FrameStream = Pin<Box<dyn Stream<Item = Result<WsFrame>> + Send>>;

/// An established connection, split into its write and read halves.
pub struct WsConnection {
    pub sink: FrameSink,
    pub stream: FrameStream,
    /// Sub-protocol the server selected, if any.
    pub protocol: Option<String>,
}

impl std::fmt::Debug for WsConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WsConnection")
            .field("protocol", &self.protocol)
            .finish_non_exhaustive()
    }
}

/// Opens WebSocket connections.
#[async_trait]
pub trait WsConnector: Send + Sync {
    async fn connect(&self, request: &WsRequest) -> Result<WsConnection>;
}

/// [`WsConnector`] backed by `tokio-tungstenite`.
#[derive(Clone, Debug, Default)]
pub struct TungsteniteConnector;

#[async_trait]
impl WsConnector for TungsteniteConnector {
    async fn connect(&self, request: &WsRequest) -> Result<WsConnection> {
        let mut handshake = request.url.as_str().into_client_request()?;
        for (name, value) in request.headers.iter() {
            handshake.headers_mut().insert(name.clone(), value.clone());
        }
        if !request.protocols.is_empty() {
            let offered = request.protocols.join(", ");
            let value = HeaderValue::from_str(&offered)
                .map_err(|_| InvalidHeaderError::InvalidValue(offered.clone()))?;
            handshake.headers_mut().insert(SEC_WEBSOCKET_PROTOCOL, value);
        }

        let (socket, response) = tokio_tungstenite::connect_async(handshake).await?;
        let protocol = response
            .headers()
            .get(SEC_WEBSOCKET_PROTOCOL)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);

        let (write, read) = socket.split();
        let sink = write
            .sink_map_err(StreamError::from)
            .with(|frame: WsFrame| future::ready(Ok::<_, StreamError>(frame.into_message())));
        let stream = read.filter_map(|message| {
            future::ready(match message {
                Ok(message) => WsFrame::from_message(message).map(Ok),
                Err(err) => Some(Err(StreamError::from(err))),
            })
        });

        Ok(WsConnection {
            sink: Box::pin(sink),
            stream: Box::pin(stream),
            protocol,
        })
    }
}
