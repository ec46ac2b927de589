//! Reconnecting SSE client.

use super::parser::{SseEvent, SseFrameParser};
use crate::error::{Result, StreamError};
use crate::lines::LineStream;
use crate::multicast::Subscription;
use crate::options::SseOptions;
use crate::reconnect::ReconnectPolicy;
use crate::session::{AfterDisconnect, ConnectionState, SessionCore};
use crate::source::{
    overlay_headers, ByteChunkSource, HeaderLayers, HeaderProvider, StreamRequest,
};
use futures::StreamExt;
use http::header::{HeaderMap, HeaderName, HeaderValue, ACCEPT, CACHE_CONTROL};
use parking_lot::Mutex;
use std::sync::Arc;

const HEADER_LAST_EVENT_ID: &str = "last-event-id";

/// One SSE logical session over a [`ByteChunkSource`].
///
/// [`connect`](Self::connect) spawns a driver task that issues the request,
/// parses the event stream and reconnects according to the session's
/// [`SseOptions`]. Events are multicast to every live [`Subscription`].
///
/// Dropping the client disconnects it.
pub struct SseClient {
    source: Arc<dyn ByteChunkSource>,
    default_headers: HeaderMap,
    header_provider: Option<HeaderProvider>,
    core: Arc<SessionCore<SseEvent>>,
    last_event_id: Arc<Mutex<Option<String>>>,
}

impl std::fmt::Debug for SseClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SseClient")
            .field("state", &self.core.state())
            .field("default_headers", &self.default_headers)
            .field("has_header_provider", &self.header_provider.is_some())
            .finish_non_exhaustive()
    }
}

impl SseClient {
    pub fn new(source: Arc<dyn ByteChunkSource>) -> Self {
        Self::with_default_headers(source, HeaderMap::new())
    }

    /// Create a client whose requests start from `default_headers`.
    pub fn with_default_headers(source: Arc<dyn ByteChunkSource>, default_headers: HeaderMap) -> Self {
        Self {
            source,
            default_headers,
            header_provider: None,
            core: Arc::new(SessionCore::new("sse")),
            last_event_id: Arc::new(Mutex::new(None)),
        }
    }

    /// Headers re-evaluated on every connection attempt, layered over the
    /// defaults and under the session's own headers.
    pub(crate) fn with_header_provider(mut self, provider: Option<HeaderProvider>) -> Self {
        self.header_provider = provider;
        self
    }

    /// Open a session against `url`.
    ///
    /// Returns a subscription to the session's events. Fails immediately with
    /// [`StreamError::AlreadyConnected`] while a session is running, or with
    /// [`StreamError::InvalidHeader`] if an option header is malformed.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn connect(&self, url: impl Into<String>, options: SseOptions) -> Result<Subscription<SseEvent>> {
        let url = url.into();
        let headers = request_headers(&self.default_headers, self.header_provider.clone(), &options)?;
        let (generation, subscription) = self.core.begin()?;
        *self.last_event_id.lock() = None;

        let driver = SseDriver {
            source: Arc::clone(&self.source),
            core: Arc::clone(&self.core),
            last_event_id: Arc::clone(&self.last_event_id),
            policy: options.reconnect_policy(),
            resume: options.resume_from_last_event_id,
            url,
            headers,
            generation,
        };
        let task = tokio::spawn(driver.run());
        self.core.attach(generation, task);

        Ok(subscription)
    }

    /// Subscribe to events produced from now on.
    pub fn subscribe(&self) -> Subscription<SseEvent> {
        self.core.subscribe()
    }

    /// Stop the session: cancel any in-flight read or pending reconnect and
    /// end every subscription. Safe to call in any state, any number of times.
    pub fn disconnect(&self) {
        let (_, task) = self.core.shutdown(None);
        if let Some(task) = task {
            task.abort();
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.core.state()
    }

    /// Consecutive reconnection attempts since the last successful connect.
    pub fn reconnect_attempts(&self) -> u32 {
        self.core.attempts()
    }

    /// Id of the most recent event that carried one.
    pub fn last_event_id(&self) -> Option<String> {
        self.last_event_id.lock().clone()
    }
}

impl Drop for SseClient {
    fn drop(&mut self) {
        self.disconnect();
    }
}

/// `Accept` and `Cache-Control` first, then client defaults, then the
/// provider, then the session's own headers; later layers win.
fn request_headers(
    defaults: &HeaderMap,
    provider: Option<HeaderProvider>,
    options: &SseOptions,
) -> Result<HeaderLayers> {
    let mut base = HeaderMap::new();
    base.insert(ACCEPT, HeaderValue::from_static("text/event-stream"));
    base.insert(CACHE_CONTROL, HeaderValue::from_static("no-cache"));
    overlay_headers(&mut base, defaults);
    Ok(HeaderLayers::new(base, provider, &options.headers)?)
}

struct SseDriver {
    source: Arc<dyn ByteChunkSource>,
    core: Arc<SessionCore<SseEvent>>,
    last_event_id: Arc<Mutex<Option<String>>>,
    policy: ReconnectPolicy,
    resume: bool,
    url: String,
    headers: HeaderLayers,
    generation: u64,
}

impl SseDriver {
    async fn run(self) {
        loop {
            if !self.core.set_connecting(self.generation) {
                return;
            }

            let failure = self.run_connection().await;

            match self.core.after_disconnect(self.generation, &self.policy, failure) {
                AfterDisconnect::Retry { delay, .. } => tokio::time::sleep(delay).await,
                AfterDisconnect::Stop => return,
            }
        }
    }

    /// One connection attempt, start to end. Returns the error that ended it,
    /// or `None` for a clean end of stream.
    async fn run_connection(&self) -> Option<StreamError> {
        let mut request = StreamRequest::get(self.url.as_str());
        request.headers = self.headers.resolve();
        if self.resume {
            let last_id = self.last_event_id.lock().clone();
            if let Some(value) = last_id.and_then(|id| HeaderValue::from_str(&id).ok()) {
                request
                    .headers
                    .insert(HeaderName::from_static(HEADER_LAST_EVENT_ID), value);
            }
        }

        info!(url = %self.url, "SSE connecting");
        let response = match self.source.send(request).await {
            Ok(response) => response,
            Err(err) => return Some(err),
        };
        if response.status != 200 {
            return Some(StreamError::from_status(response.status, &self.url));
        }

        if !self.core.set_connected(self.generation, None) {
            return None;
        }

        let mut lines = LineStream::new(response.body);
        let mut parser = SseFrameParser::new();
        while let Some(line) = lines.next().await {
            let line = match line {
                Ok(line) => line,
                Err(err) => return Some(err),
            };
            let Some(event) = parser.feed_line(&line) else {
                continue;
            };

            debug!(event = event.event_name(), id = ?event.id, "SSE event received");
            if let Some(id) = &event.id {
                *self.last_event_id.lock() = Some(id.clone());
            }
            if !self.core.publish(self.generation, event) {
                return None;
            }
        }

        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::mock::{ScriptedResponse, ScriptedSource, Step};
    use std::time::Duration;
    use tokio::time::Instant;

    fn client(source: &Arc<ScriptedSource>) -> SseClient {
        SseClient::new(Arc::clone(source) as Arc<dyn ByteChunkSource>)
    }

    fn fast_options(max_attempts: u32) -> SseOptions {
        SseOptions::new()
            .reconnect_interval(Duration::from_millis(100))
            .max_reconnect_attempts(max_attempts)
    }

    #[tokio::test(start_paused = true)]
    async fn test_events_forwarded_with_required_headers() {
        let source = Arc::new(ScriptedSource::new(vec![Step::Respond(
            ScriptedResponse::ok()
                .text(&["data: hel", "lo\n\nevent: ping\ndata: 1\n\n"])
                .hang(),
        )]));
        let client = client(&source);

        let options = SseOptions::new()
            .header("X-Api-Key", "k")
            .header("Cache-Control", "no-store");
        let mut events = client.connect("http://example.com/events", options).unwrap();

        let first = events.recv().await.unwrap().unwrap();
        assert_eq!(first.event_name(), "message");
        assert_eq!(first.data, "hello");
        let second = events.recv().await.unwrap().unwrap();
        assert_eq!(second.event_name(), "ping");
        assert_eq!(second.data, "1");
        assert_eq!(client.state(), ConnectionState::Connected);

        let request = &source.requests()[0];
        assert_eq!(request.method, http::Method::GET);
        assert_eq!(request.url, "http://example.com/events");
        assert_eq!(request.headers.get("accept").unwrap(), "text/event-stream");
        assert_eq!(request.headers.get("cache-control").unwrap(), "no-store");
        assert_eq!(request.headers.get("x-api-key").unwrap(), "k");

        client.disconnect();
        assert!(events.recv().await.is_none());
        assert_eq!(client.state(), ConnectionState::Closed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_exhausted_budget_terminates_with_error() {
        let source = Arc::new(ScriptedSource::default());
        let client = client(&source);
        let start = Instant::now();

        let items: Vec<_> = client
            .connect("http://example.com/events", fast_options(3))
            .unwrap()
            .collect()
            .await;

        assert_eq!(items.len(), 1);
        assert!(matches!(items[0], Err(StreamError::Transport { .. })));
        // one initial attempt plus exactly three reconnects
        assert_eq!(source.calls(), 4);
        assert_eq!(client.state(), ConnectionState::Closed);

        let elapsed = start.elapsed();
        assert!(elapsed >= Duration::from_millis(300));
        assert!(elapsed < Duration::from_millis(400));
    }

    #[tokio::test(start_paused = true)]
    async fn test_success_resets_attempt_counter() {
        let source = Arc::new(ScriptedSource::new(vec![
            Step::Fail(StreamError::transport("refused")),
            Step::Fail(StreamError::transport("refused")),
            Step::Respond(ScriptedResponse::ok().text(&["data: a\n\n"])),
        ]));
        let client = client(&source);

        let items: Vec<_> = client
            .connect("http://example.com/events", fast_options(3))
            .unwrap()
            .collect()
            .await;

        assert_eq!(items.len(), 2);
        assert_eq!(items[0].as_ref().unwrap().data, "a");
        assert!(items[1].is_err());
        // 2 failures, 1 success, then a full budget of 3 retries
        assert_eq!(source.calls(), 6);
    }

    #[tokio::test(start_paused = true)]
    async fn test_clean_end_without_auto_reconnect_completes() {
        let source = Arc::new(ScriptedSource::new(vec![Step::Respond(
            ScriptedResponse::ok().text(&["data: a\n\n", "data: unterminated"]),
        )]));
        let client = client(&source);

        let items: Vec<_> = client
            .connect(
                "http://example.com/events",
                SseOptions::new().auto_reconnect(false),
            )
            .unwrap()
            .collect()
            .await;

        assert_eq!(items.len(), 1);
        assert_eq!(items[0].as_ref().unwrap().data, "a");
        assert_eq!(source.calls(), 1);
        assert_eq!(client.state(), ConnectionState::Closed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_non_200_status_is_a_failure() {
        let source = Arc::new(ScriptedSource::new(vec![Step::Respond(
            ScriptedResponse::status(204),
        )]));
        let client = client(&source);

        let items: Vec<_> = client
            .connect(
                "http://example.com/events",
                SseOptions::new().auto_reconnect(false),
            )
            .unwrap()
            .collect()
            .await;

        assert_eq!(items.len(), 1);
        assert_eq!(items[0].as_ref().unwrap_err().status_code(), Some(204));
    }

    #[tokio::test(start_paused = true)]
    async fn test_stream_error_mid_session_reconnects() {
        let source = Arc::new(ScriptedSource::new(vec![
            Step::Respond(
                ScriptedResponse::ok()
                    .text(&["data: one\n\n"])
                    .then_error(StreamError::transport("reset")),
            ),
            Step::Respond(ScriptedResponse::ok().text(&["data: two\n\n"]).hang()),
        ]));
        let client = client(&source);
        let mut events = client
            .connect("http://example.com/events", fast_options(5))
            .unwrap();

        assert_eq!(events.recv().await.unwrap().unwrap().data, "one");
        assert_eq!(events.recv().await.unwrap().unwrap().data, "two");
        assert_eq!(source.calls(), 2);
        assert_eq!(client.reconnect_attempts(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_disconnect_right_after_connect() {
        let source = Arc::new(ScriptedSource::new(vec![Step::Stall]));
        let client = client(&source);

        let mut events = client
            .connect("http://example.com/events", fast_options(5))
            .unwrap();
        client.disconnect();

        assert_eq!(client.state(), ConnectionState::Closed);
        assert!(events.recv().await.is_none());

        tokio::time::sleep(Duration::from_secs(60)).await;
        assert!(source.calls() <= 1);
        assert_eq!(client.state(), ConnectionState::Closed);

        client.disconnect();
    }

    #[tokio::test(start_paused = true)]
    async fn test_disconnect_when_idle_is_noop() {
        let source = Arc::new(ScriptedSource::default());
        let client = client(&source);
        client.disconnect();
        client.disconnect();
        assert_eq!(client.state(), ConnectionState::Closed);
        assert_eq!(source.calls(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_connect_while_connected_is_rejected() {
        let source = Arc::new(ScriptedSource::new(vec![Step::Stall]));
        let client = client(&source);

        let _events = client
            .connect("http://example.com/events", SseOptions::default())
            .unwrap();
        let err = client
            .connect("http://example.com/events", SseOptions::default())
            .unwrap_err();
        assert!(matches!(err, StreamError::AlreadyConnected));
    }

    #[tokio::test(start_paused = true)]
    async fn test_reconnect_resumes_from_last_event_id() {
        let source = Arc::new(ScriptedSource::new(vec![
            Step::Respond(ScriptedResponse::ok().text(&["id: 7\ndata: a\n\n"])),
            Step::Respond(ScriptedResponse::ok().text(&["data: b\n\n"]).hang()),
        ]));
        let client = client(&source);
        let mut events = client
            .connect(
                "http://example.com/events",
                fast_options(5).resume_from_last_event_id(true),
            )
            .unwrap();

        assert_eq!(events.recv().await.unwrap().unwrap().data, "a");
        assert_eq!(events.recv().await.unwrap().unwrap().data, "b");
        assert_eq!(client.last_event_id().as_deref(), Some("7"));

        let requests = source.requests();
        assert!(requests[0].headers.get("last-event-id").is_none());
        assert_eq!(requests[1].headers.get("last-event-id").unwrap(), "7");
    }

    #[tokio::test(start_paused = true)]
    async fn test_header_provider_runs_on_every_attempt() {
        use std::sync::atomic::{AtomicUsize, Ordering};

        let source = Arc::new(ScriptedSource::new(vec![
            Step::Respond(ScriptedResponse::ok().text(&["data: a\n\n"])),
            Step::Respond(ScriptedResponse::ok().text(&["data: b\n\n"]).hang()),
        ]));
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        let provider: HeaderProvider = Arc::new(move || {
            let n = counter.fetch_add(1, Ordering::SeqCst);
            let mut headers = HeaderMap::new();
            headers.insert(
                http::header::AUTHORIZATION,
                HeaderValue::from_str(&format!("token-{}", n)).unwrap(),
            );
            headers.insert("x-scope", HeaderValue::from_static("provider"));
            headers
        });
        let client = client(&source).with_header_provider(Some(provider));

        let mut events = client
            .connect(
                "http://example.com/events",
                fast_options(5).header("X-Scope", "session"),
            )
            .unwrap();
        assert_eq!(events.recv().await.unwrap().unwrap().data, "a");
        assert_eq!(events.recv().await.unwrap().unwrap().data, "b");

        let requests = source.requests();
        assert_eq!(requests.len(), 2);
        assert_eq!(requests[0].headers.get("authorization").unwrap(), "token-0");
        assert_eq!(requests[1].headers.get("authorization").unwrap(), "token-1");
        assert_eq!(requests[1].headers.get("x-scope").unwrap(), "session");
        assert_eq!(requests[1].headers.get("accept").unwrap(), "text/event-stream");
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_every_subscriber_sees_events() {
        let source = Arc::new(ScriptedSource::new(vec![Step::Respond(
            ScriptedResponse::ok().text(&["data: shared\n\n"]).hang(),
        )]));
        let client = client(&source);

        let mut first = client
            .connect("http://example.com/events", SseOptions::default())
            .unwrap();
        let mut second = client.subscribe();

        assert_eq!(first.recv().await.unwrap().unwrap().data, "shared");
        assert_eq!(second.recv().await.unwrap().unwrap().data, "shared");
    }

    #[tokio::test]
    async fn test_invalid_option_header_fails_synchronously() {
        let source = Arc::new(ScriptedSource::default());
        let client = client(&source);

        let err = client
            .connect(
                "http://example.com/events",
                SseOptions::new().header("bad header", "x"),
            )
            .unwrap_err();
        assert!(matches!(err, StreamError::InvalidHeader(_)));
        assert_eq!(client.state(), ConnectionState::Idle);
    }
}
