//! WebSocket client: message model, transport seam and the reconnecting
//! client.

mod client;
mod message;
mod transport;

pub use client::WebSocketClient;
pub use message::{WebSocketMessage, WsPayload, ABNORMAL_CLOSURE, NORMAL_CLOSURE};
pub use transport::{
    FrameSink, FrameStream, TungsteniteConnector, WsConnection, WsConnector, WsFrame, WsRequest,
    NO_STATUS_RECEIVED,
};
