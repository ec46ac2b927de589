//! Livefeed
//!
//! Resilient clients for long-lived, incrementally delivered data over HTTP:
//! streaming bodies read line by line, downloads with live progress, speed and
//! ETA, Server-Sent Events and WebSocket sessions that reconnect on their own.
//!
//! SSE and WebSocket sessions share one reconnect contract: a fixed interval
//! between attempts, a bounded number of consecutive attempts and a counter
//! that resets on every successful connection. Their output is multicast, so
//! any number of [`Subscription`]s can observe one session.
//!
//! # Quick Start
//!
//! ```rust,no_run
//! use livefeed::{Client, SseOptions, StreamRequest};
//! use futures::StreamExt;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let client = Client::builder()
//!         .base_url("https://api.example.com")
//!         .default_header("Authorization", "Bearer token")
//!         .build()?;
//!
//!     // Line-oriented streaming body
//!     let mut lines = client.stream_lines(StreamRequest::get("/logs/tail")).await?;
//!     while let Some(line) = lines.next().await {
//!         println!("{}", line?);
//!     }
//!
//!     // Download with progress
//!     let mut progress = client
//!         .download_with_progress(StreamRequest::get("/files/model.bin"))
//!         .await?;
//!     while let Some(sample) = progress.next().await {
//!         let sample = sample?;
//!         println!("{:?}% at {:?} B/s", sample.percent(), sample.speed_bytes_per_second);
//!     }
//!
//!     // Server-Sent Events
//!     let (sse, mut events) = client.connect_sse("/events", SseOptions::default())?;
//!     while let Some(event) = events.next().await {
//!         let event = event?;
//!         println!("{}: {}", event.event_name(), event.data);
//!     }
//!     sse.disconnect();
//!
//!     Ok(())
//! }
//! ```

#[macro_use]
mod log;

mod client;
mod error;
mod lines;
mod multicast;
mod options;
mod progress;
mod reconnect;
mod session;
mod source;
pub mod sse;
pub mod websocket;

pub use client::{Client, ClientBuilder};
pub use error::{InvalidHeaderError, Result, StreamError};
pub use lines::{LineFramer, LineStream};
pub use multicast::Subscription;
pub use options::{SseOptions, WebSocketOptions};
pub use progress::{
    DownloadChunk, DownloadProgress, DownloadStream, ProgressEstimator, ProgressStream,
    DEFAULT_SAMPLE_WINDOW,
};
pub use reconnect::{ReconnectPolicy, DEFAULT_MAX_RECONNECT_ATTEMPTS, DEFAULT_RECONNECT_INTERVAL};
pub use session::ConnectionState;
pub use source::{ByteChunkSource, ByteStream, ReqwestSource, StreamRequest, StreamResponse};
pub use sse::{SseClient, SseEvent, SseFrameParser};
pub use websocket::{
    TungsteniteConnector, WebSocketClient, WebSocketMessage, WsConnector, WsFrame, WsPayload,
    WsRequest,
};
