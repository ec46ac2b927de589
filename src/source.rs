//! Byte-chunk sources: issue an HTTP request, get back status, headers and an
//! asynchronous sequence of body chunks.

use crate::error::{InvalidHeaderError, Result, StreamError};
use async_trait::async_trait;
use bytes::Bytes;
use futures::{Stream, StreamExt};
use http::header::{HeaderMap, HeaderName, HeaderValue, CONTENT_LENGTH};
use http::Method;
use std::fmt;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

/// Dynamic headers, evaluated again for every request or connection attempt.
pub(crate) type HeaderProvider = Arc<dyn Fn() -> HeaderMap + Send + Sync>;

/// Boxed stream of body chunks.
pub type ByteStream = Pin<Box<dyn Stream<Item = Result<Bytes>> + Send>>;

/// A fully-resolved request descriptor.
#[derive(Clone, Debug)]
#[must_use]
pub struct StreamRequest {
    pub method: Method,
    pub url: String,
    pub headers: HeaderMap,
    pub body: Option<Bytes>,
    /// Deadline for the whole exchange, body included. Leave unset for
    /// long-lived streams.
    pub timeout: Option<Duration>,
}

impl StreamRequest {
    pub fn new(method: Method, url: impl Into<String>) -> Self {
        Self {
            method,
            url: url.into(),
            headers: HeaderMap::new(),
            body: None,
            timeout: None,
        }
    }

    pub fn get(url: impl Into<String>) -> Self {
        Self::new(Method::GET, url)
    }

    pub fn post(url: impl Into<String>) -> Self {
        Self::new(Method::POST, url)
    }

    /// Add a header, replacing any previous value for the same name.
    ///
    /// Invalid header names or values are silently ignored. Use
    /// [`try_header`](Self::try_header) if you need error handling.
    pub fn header(mut self, key: &str, value: &str) -> Self {
        if let (Ok(name), Ok(val)) = (
            HeaderName::from_bytes(key.as_bytes()),
            HeaderValue::from_str(value),
        ) {
            self.headers.insert(name, val);
        }
        self
    }

    /// Add a header, returning an error if the name or value is invalid.
    pub fn try_header(mut self, key: &str, value: &str) -> Result<Self, InvalidHeaderError> {
        let (name, val) = parse_header(key, value)?;
        self.headers.insert(name, val);
        Ok(self)
    }

    pub fn body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = Some(body.into());
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}

/// Response head plus the lazily-read body.
pub struct StreamResponse {
    pub status: u16,
    pub headers: HeaderMap,
    pub body: ByteStream,
}

impl fmt::Debug for StreamResponse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StreamResponse")
            .field("status", &self.status)
            .field("headers", &self.headers)
            .finish_non_exhaustive()
    }
}

impl StreamResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// Declared body length, if the server sent `Content-Length`.
    pub fn content_length(&self) -> Option<u64> {
        self.headers
            .get(CONTENT_LENGTH)
            .and_then(|v| v.to_str().ok())
            .and_then(|s| s.trim().parse::<u64>().ok())
    }

    /// Fail with a transport error unless the status is 2xx.
    pub fn error_for_status(self, url: &str) -> Result<Self> {
        if self.is_success() {
            Ok(self)
        } else {
            Err(StreamError::from_status(self.status, url))
        }
    }
}

/// Anything that can turn a [`StreamRequest`] into a streamed response.
#[async_trait]
pub trait ByteChunkSource: Send + Sync {
    async fn send(&self, request: StreamRequest) -> Result<StreamResponse>;
}

/// [`ByteChunkSource`] backed by `reqwest`.
#[derive(Clone, Debug, Default)]
pub struct ReqwestSource {
    inner: reqwest::Client,
}

impl ReqwestSource {
    pub fn new(inner: reqwest::Client) -> Self {
        Self { inner }
    }
}

#[async_trait]
impl ByteChunkSource for ReqwestSource {
    async fn send(&self, request: StreamRequest) -> Result<StreamResponse> {
        let mut req = self
            .inner
            .request(request.method, request.url.as_str())
            .headers(request.headers);

        if let Some(body) = request.body {
            req = req.body(body);
        }
        let deadline = request.timeout;
        if let Some(timeout) = deadline {
            req = req.timeout(timeout);
        }

        let resp = req
            .send()
            .await
            .map_err(|err| StreamError::from_reqwest(err, deadline))?;
        let status = resp.status().as_u16();
        let headers = resp.headers().clone();
        let body = resp
            .bytes_stream()
            .map(move |chunk| chunk.map_err(|err| StreamError::from_reqwest(err, deadline)));

        Ok(StreamResponse {
            status,
            headers,
            body: Box::pin(body),
        })
    }
}

pub(crate) fn parse_header(
    key: &str,
    value: &str,
) -> Result<(HeaderName, HeaderValue), InvalidHeaderError> {
    let name = HeaderName::from_bytes(key.as_bytes())
        .map_err(|_| InvalidHeaderError::InvalidName(key.to_string()))?;
    let val = HeaderValue::from_str(value)
        .map_err(|_| InvalidHeaderError::InvalidValue(value.to_string()))?;
    Ok((name, val))
}

/// Overlay `(name, value)` pairs onto `headers`; later entries win.
pub(crate) fn merge_headers(
    headers: &mut HeaderMap,
    pairs: &[(String, String)],
) -> Result<(), InvalidHeaderError> {
    for (key, value) in pairs {
        let (name, val) = parse_header(key, value)?;
        headers.insert(name, val);
    }
    Ok(())
}

/// Overlay every entry of `layer` onto `headers`.
pub(crate) fn overlay_headers(headers: &mut HeaderMap, layer: &HeaderMap) {
    for (name, value) in layer.iter() {
        headers.insert(name.clone(), value.clone());
    }
}

/// Headers of a long-lived session.
///
/// Static headers first, then whatever the provider returns at the time of
/// the attempt, then the session's own headers; later layers win.
#[derive(Clone)]
pub(crate) struct HeaderLayers {
    base: HeaderMap,
    provider: Option<HeaderProvider>,
    overrides: HeaderMap,
}

impl HeaderLayers {
    pub(crate) fn new(
        base: HeaderMap,
        provider: Option<HeaderProvider>,
        pairs: &[(String, String)],
    ) -> Result<Self, InvalidHeaderError> {
        let mut overrides = HeaderMap::new();
        merge_headers(&mut overrides, pairs)?;
        Ok(Self {
            base,
            provider,
            overrides,
        })
    }

    /// Headers for the next attempt. Calls the provider, if any.
    pub(crate) fn resolve(&self) -> HeaderMap {
        let mut headers = self.base.clone();
        if let Some(provider) = &self.provider {
            overlay_headers(&mut headers, &provider());
        }
        overlay_headers(&mut headers, &self.overrides);
        headers
    }
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_builder_headers() {
        let req = StreamRequest::get("http://example.com/feed")
            .header("X-Trace", "abc")
            .header("bad header", "ignored")
            .timeout(Duration::from_secs(5));

        assert_eq!(req.method, Method::GET);
        assert_eq!(req.headers.get("x-trace").unwrap(), "abc");
        assert_eq!(req.headers.len(), 1);
        assert_eq!(req.timeout, Some(Duration::from_secs(5)));
    }

    #[test]
    fn test_try_header_rejects_invalid_name() {
        let err = StreamRequest::post("http://example.com")
            .try_header("bad header", "v")
            .unwrap_err();
        assert_eq!(err, InvalidHeaderError::InvalidName("bad header".into()));
    }

    #[test]
    fn test_merge_headers_later_wins() {
        let mut headers = HeaderMap::new();
        headers.insert("accept", HeaderValue::from_static("text/event-stream"));
        merge_headers(
            &mut headers,
            &[("Accept".into(), "application/json".into()), ("x-a".into(), "1".into())],
        )
        .unwrap();
        assert_eq!(headers.get("accept").unwrap(), "application/json");
        assert_eq!(headers.get("x-a").unwrap(), "1");
    }

    #[test]
    fn test_header_layers_call_provider_per_resolve() {
        use std::sync::atomic::{AtomicUsize, Ordering};

        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        let provider: HeaderProvider = Arc::new(move || {
            let n = counter.fetch_add(1, Ordering::SeqCst);
            let mut headers = HeaderMap::new();
            headers.insert("authorization", HeaderValue::from_str(&format!("token-{}", n)).unwrap());
            headers.insert("x-layer", HeaderValue::from_static("provider"));
            headers
        });
        let mut base = HeaderMap::new();
        base.insert("x-layer", HeaderValue::from_static("base"));
        base.insert("x-client", HeaderValue::from_static("livefeed"));

        let layers = HeaderLayers::new(
            base,
            Some(provider),
            &[("X-Session".into(), "s1".into())],
        )
        .unwrap();

        let first = layers.resolve();
        let second = layers.resolve();
        assert_eq!(first.get("authorization").unwrap(), "token-0");
        assert_eq!(second.get("authorization").unwrap(), "token-1");
        assert_eq!(first.get("x-layer").unwrap(), "provider");
        assert_eq!(first.get("x-client").unwrap(), "livefeed");
        assert_eq!(first.get("x-session").unwrap(), "s1");
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_header_layers_reject_invalid_override() {
        let err = HeaderLayers::new(HeaderMap::new(), None, &[("bad header".into(), "x".into())])
            .err()
            .unwrap();
        assert_eq!(err, InvalidHeaderError::InvalidName("bad header".into()));
    }

    #[test]
    fn test_content_length_and_status() {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_LENGTH, HeaderValue::from_static("1024"));
        let resp = StreamResponse {
            status: 206,
            headers,
            body: Box::pin(futures::stream::empty()),
        };
        assert!(resp.is_success());
        assert_eq!(resp.content_length(), Some(1024));

        let resp = StreamResponse {
            status: 500,
            headers: HeaderMap::new(),
            body: Box::pin(futures::stream::empty()),
        };
        let err = resp.error_for_status("http://x").unwrap_err();
        assert_eq!(err.status_code(), Some(500));
    }
}
