//! Line framing for streamed text bodies.

use crate::error::Result;
use crate::source::ByteStream;
use bytes::Bytes;
use futures::{ready, Stream, StreamExt};
use std::collections::VecDeque;
use std::pin::Pin;
use std::task::{Context, Poll};

/// Splits a sequence of byte chunks into `\n`-terminated lines.
///
/// Splitting happens on raw bytes, so a multi-byte UTF-8 character cut in half
/// by a chunk boundary is reassembled before decoding. The terminator and an
/// optional preceding `\r` are stripped. Invalid UTF-8 is decoded lossily.
#[derive(Debug, Default)]
pub struct LineFramer {
    buffer: Vec<u8>,
    /// Bytes at the front of `buffer` already known to contain no `\n`.
    scanned: usize,
}

impl LineFramer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed a chunk and return every line it completed, in order.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<String> {
        self.buffer.extend_from_slice(chunk);

        let mut lines = Vec::new();
        let mut start = 0;
        let mut search_from = self.scanned;
        while let Some(pos) = self.buffer[search_from..].iter().position(|b| *b == b'\n') {
            let end = search_from + pos;
            lines.push(decode_line(&self.buffer[start..end]));
            start = end + 1;
            search_from = start;
        }

        self.buffer.drain(..start);
        self.scanned = self.buffer.len();
        lines
    }

    /// Flush the trailing partial line once the source has completed.
    pub fn finish(&mut self) -> Option<String> {
        self.scanned = 0;
        if self.buffer.is_empty() {
            return None;
        }
        let line = decode_line(&self.buffer);
        self.buffer.clear();
        Some(line)
    }

    /// Number of buffered bytes not yet terminated by a newline.
    pub fn pending_len(&self) -> usize {
        self.buffer.len()
    }
}

fn decode_line(raw: &[u8]) -> String {
    let raw = raw.strip_suffix(b"\r").unwrap_or(raw);
    String::from_utf8_lossy(raw).into_owned()
}

/// Lazy, forward-only stream of text lines over a byte-chunk stream.
///
/// A transport error is yielded once and ends the stream; the unterminated
/// partial line, if any, is dropped in that case.
pub struct LineStream<S = ByteStream> {
    inner: S,
    framer: LineFramer,
    pending: VecDeque<String>,
    finished: bool,
}

impl<S> LineStream<S>
where
    S: Stream<Item = Result<Bytes>> + Unpin,
{
    pub fn new(inner: S) -> Self {
        Self {
            inner,
            framer: LineFramer::new(),
            pending: VecDeque::new(),
            finished: false,
        }
    }
}

impl<S> Stream for LineStream<S>
where
    S: Stream<Item = Result<Bytes>> + Unpin,
{
    type Item = Result<String>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        loop {
            if let Some(line) = this.pending.pop_front() {
                return Poll::Ready(Some(Ok(line)));
            }
            if this.finished {
                return Poll::Ready(None);
            }

            match ready!(this.inner.poll_next_unpin(cx)) {
                Some(Ok(chunk)) => this.pending.extend(this.framer.push(&chunk)),
                Some(Err(err)) => {
                    this.finished = true;
                    return Poll::Ready(Some(Err(err)));
                }
                None => {
                    this.finished = true;
                    if let Some(line) = this.framer.finish() {
                        return Poll::Ready(Some(Ok(line)));
                    }
                }
            }
        }
    }
}
