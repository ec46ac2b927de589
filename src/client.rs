//! HTTP client and configuration.

use crate::error::{InvalidHeaderError, Result};
use crate::lines::LineStream;
use crate::multicast::Subscription;
use crate::options::{SseOptions, WebSocketOptions};
use crate::progress::{open_download, DownloadStream, ProgressStream, DEFAULT_SAMPLE_WINDOW};
use crate::source::{
    overlay_headers, parse_header, ByteChunkSource, HeaderProvider, ReqwestSource, StreamRequest,
};
use crate::sse::{SseClient, SseEvent};
use crate::websocket::{TungsteniteConnector, WebSocketClient, WebSocketMessage, WsConnector};
use http::header::HeaderMap;
use std::sync::Arc;
use std::time::Duration;

/// Entry point for streaming requests, downloads, SSE and WebSocket sessions.
///
/// The client is cloneable and can be shared across threads. Clones share the
/// underlying connection pool.
#[derive(Clone)]
pub struct Client {
    pub(crate) source: Arc<dyn ByteChunkSource>,
    pub(crate) connector: Arc<dyn WsConnector>,
    pub(crate) base_url: Option<String>,
    pub(crate) default_headers: HeaderMap,
    pub(crate) header_provider: Option<HeaderProvider>,
    pub(crate) timeout: Option<Duration>,
    pub(crate) progress_window: Duration,
}

impl std::fmt::Debug for Client {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Client")
            .field("base_url", &self.base_url)
            .field("default_headers", &self.default_headers)
            .field("has_header_provider", &self.header_provider.is_some())
            .field("timeout", &self.timeout)
            .field("progress_window", &self.progress_window)
            .finish()
    }
}

impl Client {
    /// Create a new client with default settings.
    ///
    /// # Panics
    ///
    /// Panics if the HTTP client fails to build. Use `Client::builder().build()`
    /// for fallible construction.
    pub fn new() -> Self {
        ClientBuilder::new()
            .build()
            .expect("Failed to build default HTTP client")
    }

    /// Create a client builder for customization.
    pub fn builder() -> ClientBuilder {
        ClientBuilder::new()
    }

    /// Resolve `url` against the base URL.
    ///
    /// The url can be:
    /// - A full URL: "https://example.com/feed" or "wss://example.com/socket"
    /// - A path (if base_url was set): "/feed"
    pub fn resolve_url(&self, url: &str) -> String {
        let absolute = ["http://", "https://", "ws://", "wss://"]
            .iter()
            .any(|scheme| url.starts_with(scheme));
        if absolute {
            url.to_string()
        } else if let Some(base) = &self.base_url {
            format!("{}{}", base.trim_end_matches('/'), url)
        } else {
            url.to_string()
        }
    }

    /// Resolve `url` and switch `http`/`https` to `ws`/`wss`.
    pub fn websocket_url(&self, url: &str) -> String {
        let resolved = self.resolve_url(url);
        if let Some(rest) = resolved.strip_prefix("https://") {
            format!("wss://{}", rest)
        } else if let Some(rest) = resolved.strip_prefix("http://") {
            format!("ws://{}", rest)
        } else {
            resolved
        }
    }

    /// Get headers for a request, including dynamic headers if configured.
    pub(crate) fn get_headers(&self) -> HeaderMap {
        let mut headers = self.default_headers.clone();
        if let Some(provider) = &self.header_provider {
            overlay_headers(&mut headers, &provider());
        }
        headers
    }

    /// Resolve the URL and layer the request's own headers over the client's.
    fn prepare(&self, mut request: StreamRequest) -> StreamRequest {
        request.url = self.resolve_url(&request.url);
        let mut headers = self.get_headers();
        overlay_headers(&mut headers, &request.headers);
        request.headers = headers;
        if request.timeout.is_none() {
            request.timeout = self.timeout;
        }
        request
    }

    /// Issue `request` and read its body as text lines.
    ///
    /// A non-2xx status fails before any line is produced.
    pub async fn stream_lines(&self, request: StreamRequest) -> Result<LineStream> {
        let request = self.prepare(request);
        let url = request.url.clone();
        let response = self.source.send(request).await?.error_for_status(&url)?;
        Ok(LineStream::new(response.body))
    }

    /// Issue `request` and report one [`DownloadProgress`] per body chunk.
    ///
    /// [`DownloadProgress`]: crate::DownloadProgress
    pub async fn download_with_progress(&self, request: StreamRequest) -> Result<ProgressStream> {
        Ok(self.download_chunks(request).await?.into_progress())
    }

    /// Like [`download_with_progress`](Self::download_with_progress), but
    /// yields the body bytes along with each progress sample.
    pub async fn download_chunks(&self, request: StreamRequest) -> Result<DownloadStream> {
        let request = self.prepare(request);
        open_download(self.source.as_ref(), request, self.progress_window).await
    }

    /// A fresh SSE client sharing this client's transport and headers. The
    /// header provider, if any, runs again on every connection attempt.
    ///
    /// URLs given to [`SseClient::connect`] are used as-is; see
    /// [`connect_sse`](Self::connect_sse) for base-URL resolution.
    pub fn sse(&self) -> SseClient {
        SseClient::with_default_headers(Arc::clone(&self.source), self.default_headers.clone())
            .with_header_provider(self.header_provider.clone())
    }

    /// Resolve `url` and open an SSE session on a fresh [`SseClient`].
    ///
    /// Keep the returned client alive for as long as the session should run;
    /// dropping it disconnects.
    pub fn connect_sse(
        &self,
        url: &str,
        options: SseOptions,
    ) -> Result<(SseClient, Subscription<SseEvent>)> {
        let client = self.sse();
        let events = client.connect(self.resolve_url(url), options)?;
        Ok((client, events))
    }

    /// A fresh WebSocket client sharing this client's connector and headers.
    /// The header provider, if any, runs again on every handshake.
    pub fn websocket(&self) -> WebSocketClient {
        WebSocketClient::with_default_headers(Arc::clone(&self.connector), self.default_headers.clone())
            .with_header_provider(self.header_provider.clone())
    }

    /// Resolve `url` (switching `http`/`https` to `ws`/`wss`) and open a
    /// WebSocket session on a fresh [`WebSocketClient`].
    pub fn connect_websocket(
        &self,
        url: &str,
        options: WebSocketOptions,
    ) -> Result<(WebSocketClient, Subscription<WebSocketMessage>)> {
        let client = self.websocket();
        let messages = client.connect(self.websocket_url(url), options)?;
        Ok((client, messages))
    }
}

impl Default for Client {
    fn default() -> Self {
        Self::new()
    }
}

/// Builder for configuring a Client.
#[must_use = "builders do nothing unless you call .build()"]
pub struct ClientBuilder {
    base_url: Option<String>,
    default_headers: HeaderMap,
    timeout: Option<Duration>,
    connect_timeout: Option<Duration>,
    header_provider: Option<HeaderProvider>,
    source: Option<Arc<dyn ByteChunkSource>>,
    connector: Option<Arc<dyn WsConnector>>,
    progress_window: Duration,
}

impl ClientBuilder {
    /// Create a new client builder.
    pub fn new() -> Self {
        Self {
            base_url: None,
            default_headers: HeaderMap::new(),
            timeout: None,
            connect_timeout: None,
            header_provider: None,
            source: None,
            connector: None,
            progress_window: DEFAULT_SAMPLE_WINDOW,
        }
    }

    /// Set the base URL for relative paths.
    pub fn base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = Some(url.into());
        self
    }

    /// Add a default header for all requests.
    ///
    /// Invalid header names or values are silently ignored. Use
    /// [`try_default_header`](Self::try_default_header) if you need error handling.
    pub fn default_header(mut self, key: &str, value: &str) -> Self {
        if let Ok((name, val)) = parse_header(key, value) {
            self.default_headers.insert(name, val);
        }
        self
    }

    /// Add a default header, returning an error if the name or value is invalid.
    pub fn try_default_header(
        mut self,
        key: &str,
        value: &str,
    ) -> std::result::Result<Self, InvalidHeaderError> {
        let (name, val) = parse_header(key, value)?;
        self.default_headers.insert(name, val);
        Ok(self)
    }

    /// Set all default headers.
    pub fn default_headers(mut self, headers: HeaderMap) -> Self {
        self.default_headers = headers;
        self
    }

    /// Default deadline for [`Client::stream_lines`] and downloads, body
    /// included. Requests that set their own timeout keep it. SSE and
    /// WebSocket sessions are not affected.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// TCP/TLS connect timeout of the built-in HTTP transport.
    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = Some(timeout);
        self
    }

    /// Set a dynamic header provider, called for every request, SSE
    /// connection attempt and WebSocket handshake.
    pub fn header_provider<F>(mut self, provider: F) -> Self
    where
        F: Fn() -> HeaderMap + Send + Sync + 'static,
    {
        self.header_provider = Some(Arc::new(provider));
        self
    }

    /// Use a custom HTTP transport instead of the built-in `reqwest` one.
    pub fn source<S: ByteChunkSource + 'static>(mut self, source: Arc<S>) -> Self {
        self.source = Some(source);
        self
    }

    /// Use a custom WebSocket connector instead of `tokio-tungstenite`.
    pub fn connector<C: WsConnector + 'static>(mut self, connector: Arc<C>) -> Self {
        self.connector = Some(connector);
        self
    }

    /// Sampling window of the download speed estimate.
    pub fn progress_window(mut self, window: Duration) -> Self {
        self.progress_window = window;
        self
    }

    /// Build the client.
    ///
    /// Returns an error if the underlying HTTP client fails to build
    /// (e.g., due to TLS configuration issues).
    pub fn build(self) -> Result<Client> {
        let source = match self.source {
            Some(source) => source,
            None => {
                let mut builder = reqwest::Client::builder()
                    .pool_max_idle_per_host(10)
                    .pool_idle_timeout(Duration::from_secs(90));

                if let Some(timeout) = self.connect_timeout {
                    builder = builder.connect_timeout(timeout);
                }

                Arc::new(ReqwestSource::new(builder.build()?))
            }
        };
        let connector = self
            .connector
            .unwrap_or_else(|| Arc::new(TungsteniteConnector));

        Ok(Client {
            source,
            connector,
            base_url: self.base_url,
            default_headers: self.default_headers,
            header_provider: self.header_provider,
            timeout: self.timeout,
            progress_window: self.progress_window,
        })
    }
}

impl Default for ClientBuilder {
    fn default() -> Self {
        Self::new()
    }
}
