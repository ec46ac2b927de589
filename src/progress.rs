//! Download progress estimation over a byte-chunk stream.

use crate::error::{Result, StreamError};
use crate::source::{ByteChunkSource, ByteStream, StreamRequest};
use bytes::Bytes;
use futures::{ready, Stream, StreamExt};
use serde::Serialize;
use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Duration;
use tokio::time::Instant;

/// Default length of the speed sampling window.
pub const DEFAULT_SAMPLE_WINDOW: Duration = Duration::from_secs(1);

/// Snapshot of a download in progress.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DownloadProgress {
    pub downloaded_bytes: u64,
    /// Declared size, `None` when the server sent no length.
    pub total_bytes: Option<u64>,
    pub speed_bytes_per_second: Option<f64>,
    pub remaining_seconds: Option<f64>,
}

impl DownloadProgress {
    /// Completed share in `[0, 1]`, or `None` when the total is unknown or zero.
    pub fn fraction(&self) -> Option<f64> {
        match self.total_bytes {
            Some(total) if total > 0 => {
                Some((self.downloaded_bytes as f64 / total as f64).min(1.0))
            }
            _ => None,
        }
    }

    pub fn percent(&self) -> Option<f64> {
        self.fraction().map(|f| f * 100.0)
    }

    pub fn is_complete(&self) -> bool {
        matches!(self.total_bytes, Some(total) if self.downloaded_bytes >= total)
    }
}

/// A received body chunk together with the progress it produced.
#[derive(Clone, Debug)]
pub struct DownloadChunk {
    pub data: Bytes,
    pub progress: DownloadProgress,
}

/// Accumulates byte counts and derives speed over fixed sampling windows.
///
/// The first window opens at the first recorded chunk. Whenever a chunk
/// arrives at least one window length after the window opened, the speed is
/// recomputed from the bytes received since then and a new window opens.
/// Between recomputations the last speed is carried forward.
#[derive(Debug)]
pub struct ProgressEstimator {
    total: Option<u64>,
    downloaded: u64,
    window: Duration,
    window_start: Option<(Instant, u64)>,
    speed: Option<f64>,
}

impl ProgressEstimator {
    pub fn new(total: Option<u64>) -> Self {
        Self {
            total,
            downloaded: 0,
            window: DEFAULT_SAMPLE_WINDOW,
            window_start: None,
            speed: None,
        }
    }

    pub fn with_window(mut self, window: Duration) -> Self {
        self.window = window;
        self
    }

    pub fn downloaded(&self) -> u64 {
        self.downloaded
    }

    pub fn total(&self) -> Option<u64> {
        self.total
    }

    /// Record a chunk received now.
    pub fn record(&mut self, len: usize) -> DownloadProgress {
        self.record_at(len, Instant::now())
    }

    /// Record a chunk received at `now`.
    pub fn record_at(&mut self, len: usize, now: Instant) -> DownloadProgress {
        self.downloaded += len as u64;

        match self.window_start {
            None => self.window_start = Some((now, self.downloaded)),
            Some((started, bytes_at_start)) => {
                let elapsed = now.saturating_duration_since(started);
                if elapsed >= self.window {
                    let elapsed_ms = elapsed.as_millis();
                    if elapsed_ms > 0 {
                        let delta = self.downloaded - bytes_at_start;
                        self.speed = Some(delta as f64 * 1000.0 / elapsed_ms as f64);
                    }
                    self.window_start = Some((now, self.downloaded));
                }
            }
        }

        self.snapshot()
    }

    fn snapshot(&self) -> DownloadProgress {
        let remaining_seconds = match (self.total, self.speed) {
            (Some(total), Some(speed)) if speed > 0.0 => {
                Some(total.saturating_sub(self.downloaded) as f64 / speed)
            }
            _ => None,
        };

        DownloadProgress {
            downloaded_bytes: self.downloaded,
            total_bytes: self.total,
            speed_bytes_per_second: self.speed,
            remaining_seconds,
        }
    }
}

/// Stream of [`DownloadChunk`]s, one per received body chunk.
///
/// When the body ends short of a declared length the stream yields
/// [`StreamError::IncompleteBody`] after the last chunk.
pub struct DownloadStream<S = ByteStream> {
    inner: S,
    estimator: ProgressEstimator,
    finished: bool,
}

impl<S> DownloadStream<S>
where
    S: Stream<Item = Result<Bytes>> + Unpin,
{
    pub fn new(inner: S, estimator: ProgressEstimator) -> Self {
        Self {
            inner,
            estimator,
            finished: false,
        }
    }

    /// Drop the payload and keep only the progress samples.
    pub fn into_progress(self) -> ProgressStream<S> {
        ProgressStream { inner: self }
    }
}

impl<S> Stream for DownloadStream<S>
where
    S: Stream<Item = Result<Bytes>> + Unpin,
{
    type Item = Result<DownloadChunk>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        if this.finished {
            return Poll::Ready(None);
        }

        match ready!(this.inner.poll_next_unpin(cx)) {
            Some(Ok(data)) => {
                let progress = this.estimator.record(data.len());
                Poll::Ready(Some(Ok(DownloadChunk { data, progress })))
            }
            Some(Err(err)) => {
                this.finished = true;
                Poll::Ready(Some(Err(err)))
            }
            None => {
                this.finished = true;
                match this.estimator.total() {
                    Some(expected) if this.estimator.downloaded() < expected => {
                        Poll::Ready(Some(Err(StreamError::IncompleteBody {
                            expected,
                            received: this.estimator.downloaded(),
                        })))
                    }
                    _ => Poll::Ready(None),
                }
            }
        }
    }
}

/// Progress-only view of a [`DownloadStream`].
pub struct ProgressStream<S = ByteStream> {
    inner: DownloadStream<S>,
}

impl<S> Stream for ProgressStream<S>
where
    S: Stream<Item = Result<Bytes>> + Unpin,
{
    type Item = Result<DownloadProgress>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        let item = ready!(Pin::new(&mut this.inner).poll_next(cx));
        Poll::Ready(item.map(|chunk| chunk.map(|c| c.progress)))
    }
}

/// Issue `request` and wrap its body in a [`DownloadStream`].
///
/// A non-2xx status fails before any body byte is read.
pub(crate) async fn open_download(
    source: &dyn ByteChunkSource,
    request: StreamRequest,
    window: Duration,
) -> Result<DownloadStream> {
    let url = request.url.clone();
    let response = source.send(request).await?.error_for_status(&url)?;
    let total = response.content_length();
    debug!(url = %url, total = ?total, "download started");

    let estimator = ProgressEstimator::new(total).with_window(window);
    Ok(DownloadStream::new(response.body, estimator))
}
