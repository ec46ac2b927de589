//! Server-Sent Events: frame parser and reconnecting client.

mod client;
mod parser;

pub use client::SseClient;
pub use parser::{SseEvent, SseFrameParser, DEFAULT_EVENT_NAME};
