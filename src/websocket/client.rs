//! Reconnecting WebSocket client with heartbeats.

use super::message::{WebSocketMessage, WsPayload, ABNORMAL_CLOSURE, NORMAL_CLOSURE};
use super::transport::{WsConnection, WsConnector, WsFrame, WsRequest};
use crate::error::{Result, StreamError};
use crate::multicast::Subscription;
use crate::options::WebSocketOptions;
use crate::reconnect::ReconnectPolicy;
use crate::session::{AfterDisconnect, ConnectionState, SessionCore};
use crate::source::{HeaderLayers, HeaderProvider};
use bytes::Bytes;
use futures::{SinkExt, StreamExt};
use http::header::HeaderMap;
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::{Instant, Interval};

/// How long `disconnect` waits for the close frame to be written before it
/// tears the connection down.
const CLOSE_GRACE: Duration = Duration::from_secs(1);

enum Command {
    Send(WsFrame),
    Ping(Bytes),
    Close { code: u16, reason: String },
}

/// One WebSocket logical session.
///
/// [`connect`](Self::connect) spawns a driver task that owns the socket, the
/// heartbeat timer and the reconnect timer. Every connection is announced with
/// a synthetic [`WsPayload::Open`] and ends with a synthetic
/// [`WsPayload::Close`] or [`WsPayload::Error`].
///
/// Outbound operations are only accepted while [`ConnectionState::Connected`].
///
/// # Example
///
/// ```rust,no_run
/// use livefeed::{WebSocketClient, WebSocketOptions, WsPayload};
/// use std::time::Duration;
///
/// # async fn example() -> Result<(), livefeed::StreamError> {
/// let client = WebSocketClient::default();
/// let mut messages = client.connect(
///     "wss://example.com/socket",
///     WebSocketOptions::new().ping_interval(Duration::from_secs(20)),
/// )?;
///
/// while let Some(message) = messages.recv().await {
///     match message?.payload {
///         WsPayload::Open(_) => client.send_text("hello")?,
///         WsPayload::Text(text) => println!("{}", text),
///         _ => {}
///     }
/// }
/// # Ok(())
/// # }
/// ```
pub struct WebSocketClient {
    connector: Arc<dyn WsConnector>,
    default_headers: HeaderMap,
    header_provider: Option<HeaderProvider>,
    core: Arc<SessionCore<WebSocketMessage>>,
    commands: Mutex<Option<mpsc::UnboundedSender<Command>>>,
}

impl std::fmt::Debug for WebSocketClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WebSocketClient")
            .field("state", &self.core.state())
            .finish_non_exhaustive()
    }
}

impl Default for WebSocketClient {
    fn default() -> Self {
        Self::new(Arc::new(super::TungsteniteConnector))
    }
}

impl WebSocketClient {
    pub fn new(connector: Arc<dyn WsConnector>) -> Self {
        Self::with_default_headers(connector, HeaderMap::new())
    }

    /// Create a client whose handshakes start from `default_headers`.
    pub fn with_default_headers(connector: Arc<dyn WsConnector>, default_headers: HeaderMap) -> Self {
        Self {
            connector,
            default_headers,
            header_provider: None,
            core: Arc::new(SessionCore::new("websocket")),
            commands: Mutex::new(None),
        }
    }

    /// Headers re-evaluated for every handshake.
    pub(crate) fn with_header_provider(mut self, provider: Option<HeaderProvider>) -> Self {
        self.header_provider = provider;
        self
    }

    /// Open a session against a `ws://` or `wss://` URL.
    ///
    /// Fails immediately with [`StreamError::AlreadyConnected`] while a
    /// session is running. Must be called from within a Tokio runtime.
    pub fn connect(
        &self,
        url: impl Into<String>,
        options: WebSocketOptions,
    ) -> Result<Subscription<WebSocketMessage>> {
        let headers = HeaderLayers::new(
            self.default_headers.clone(),
            self.header_provider.clone(),
            &options.headers,
        )?;
        let request = WsRequest {
            url: url.into(),
            headers: HeaderMap::new(),
            protocols: options.protocols.clone(),
        };

        let (generation, subscription) = self.core.begin()?;
        let (tx, rx) = mpsc::unbounded_channel();
        *self.commands.lock() = Some(tx);

        let driver = WsDriver {
            connector: Arc::clone(&self.connector),
            core: Arc::clone(&self.core),
            policy: options.reconnect_policy(),
            connect_timeout: options.connect_timeout,
            ping_interval: options.ping_interval,
            request,
            headers,
            generation,
        };
        let task = tokio::spawn(driver.run(rx));
        self.core.attach(generation, task);

        Ok(subscription)
    }

    /// Subscribe to messages produced from now on.
    pub fn subscribe(&self) -> Subscription<WebSocketMessage> {
        self.core.subscribe()
    }

    pub fn send_text(&self, text: impl Into<String>) -> Result<()> {
        self.command(Command::Send(WsFrame::Text(text.into())))
    }

    pub fn send_binary(&self, data: impl Into<Bytes>) -> Result<()> {
        self.command(Command::Send(WsFrame::Binary(data.into())))
    }

    /// Send a ping frame. A synthetic [`WsPayload::Ping`] is emitted once the
    /// frame has been written.
    pub fn ping(&self, payload: impl Into<Bytes>) -> Result<()> {
        self.command(Command::Ping(payload.into()))
    }

    fn command(&self, command: Command) -> Result<()> {
        if !self.core.state().is_connected() {
            return Err(StreamError::NotConnected);
        }
        match self.commands.lock().as_ref() {
            Some(tx) => tx.send(command).map_err(|_| StreamError::NotConnected),
            None => Err(StreamError::NotConnected),
        }
    }

    /// Close with a normal-closure code and no reason.
    pub async fn disconnect(&self) {
        self.disconnect_with(NORMAL_CLOSURE, "").await
    }

    /// Stop the session.
    ///
    /// If connected, a close frame with `code` and `reason` is written first.
    /// Pending reconnects, heartbeats and reads are cancelled, a synthetic
    /// `Close` message is emitted and every subscription ends. Safe to call in
    /// any state, any number of times.
    pub async fn disconnect_with(&self, code: u16, reason: impl Into<String>) {
        let reason = reason.into();
        let commands = self.commands.lock().take();
        let (previous, task) = self
            .core
            .shutdown(Some(WebSocketMessage::close(code, reason.clone())));
        let Some(mut task) = task else {
            return;
        };

        if previous.is_connected() {
            if let Some(tx) = commands {
                if tx.send(Command::Close { code, reason }).is_ok()
                    && tokio::time::timeout(CLOSE_GRACE, &mut task).await.is_ok()
                {
                    return;
                }
            }
        }
        task.abort();
    }

    pub fn state(&self) -> ConnectionState {
        self.core.state()
    }

    /// Consecutive reconnection attempts since the last successful connect.
    pub fn reconnect_attempts(&self) -> u32 {
        self.core.attempts()
    }
}

impl Drop for WebSocketClient {
    fn drop(&mut self) {
        let commands = self.commands.get_mut().take();
        let (previous, task) = self
            .core
            .shutdown(Some(WebSocketMessage::close(NORMAL_CLOSURE, "")));
        let Some(task) = task else {
            return;
        };
        // a connected driver closes the socket itself once the channel is gone
        if !previous.is_connected() || commands.is_none() {
            task.abort();
        }
    }
}

/// How a connection ended.
enum Exit {
    /// Lost: reconnect policy applies. `None` for a clean close.
    Disconnected(Option<StreamError>),
    /// Closed on request; the session is over.
    Shutdown,
}

struct WsDriver {
    connector: Arc<dyn WsConnector>,
    core: Arc<SessionCore<WebSocketMessage>>,
    policy: ReconnectPolicy,
    connect_timeout: Option<Duration>,
    ping_interval: Option<Duration>,
    /// Handshake template; its headers are filled in per attempt.
    request: WsRequest,
    headers: HeaderLayers,
    generation: u64,
}

impl WsDriver {
    async fn run(self, mut commands: mpsc::UnboundedReceiver<Command>) {
        loop {
            if !self.core.set_connecting(self.generation) {
                return;
            }

            let failure = match self.open().await {
                Ok(connection) => match self.serve(connection, &mut commands).await {
                    Exit::Disconnected(failure) => failure,
                    Exit::Shutdown => return,
                },
                Err(err) => {
                    self.emit(WebSocketMessage::error(err.to_string()));
                    Some(err)
                }
            };

            // commands queued for the lost connection are not replayed
            while commands.try_recv().is_ok() {}

            match self.core.after_disconnect(self.generation, &self.policy, failure) {
                AfterDisconnect::Retry { delay, .. } => tokio::time::sleep(delay).await,
                AfterDisconnect::Stop => return,
            }
        }
    }

    async fn open(&self) -> Result<WsConnection> {
        info!(url = %self.request.url, "WebSocket connecting");
        let mut request = self.request.clone();
        request.headers = self.headers.resolve();
        let connect = self.connector.connect(&request);
        match self.connect_timeout {
            Some(limit) => tokio::time::timeout(limit, connect)
                .await
                .map_err(|_| StreamError::Timeout(limit))?,
            None => connect.await,
        }
    }

    async fn serve(
        &self,
        connection: WsConnection,
        commands: &mut mpsc::UnboundedReceiver<Command>,
    ) -> Exit {
        debug!(protocol = ?connection.protocol, "WebSocket handshake complete");
        let WsConnection {
            mut sink,
            mut stream,
            ..
        } = connection;

        let opened = WebSocketMessage::open(&self.request.url);
        if !self.core.set_connected(self.generation, Some(opened)) {
            let _ = sink.close().await;
            return Exit::Shutdown;
        }

        let mut heartbeat = self
            .ping_interval
            .map(|period| tokio::time::interval_at(Instant::now() + period, period));

        loop {
            tokio::select! {
                biased;

                command = commands.recv() => {
                    let command = match command {
                        Some(command) => command,
                        None => Command::Close { code: NORMAL_CLOSURE, reason: String::new() },
                    };
                    match command {
                        Command::Send(frame) => {
                            if let Err(err) = sink.send(frame).await {
                                return self.lost(err);
                            }
                        }
                        Command::Ping(payload) => {
                            if let Err(err) = self.send_ping(&mut sink, payload).await {
                                return self.lost(err);
                            }
                        }
                        Command::Close { code, reason } => {
                            let _ = sink.send(WsFrame::Close { code, reason }).await;
                            let _ = sink.close().await;
                            return Exit::Shutdown;
                        }
                    }
                }

                _ = next_tick(&mut heartbeat) => {
                    if let Err(err) = self.send_ping(&mut sink, Bytes::new()).await {
                        warn!(error = %err, "heartbeat ping failed");
                        return self.lost(err);
                    }
                }

                frame = stream.next() => {
                    match frame {
                        Some(Ok(WsFrame::Text(text))) => self.emit(WebSocketMessage::text(text)),
                        Some(Ok(WsFrame::Binary(data))) => self.emit(WebSocketMessage::binary(data)),
                        Some(Ok(WsFrame::Ping(data))) => {
                            self.emit(WebSocketMessage::new(WsPayload::Ping(data)))
                        }
                        Some(Ok(WsFrame::Pong(data))) => {
                            self.emit(WebSocketMessage::new(WsPayload::Pong(data)))
                        }
                        Some(Ok(WsFrame::Close { code, reason })) => {
                            info!(code, reason = %reason, "WebSocket closed by peer");
                            self.emit(WebSocketMessage::close(code, reason));
                            // flushes the close reply queued by the transport
                            let _ = sink.close().await;
                            return Exit::Disconnected(None);
                        }
                        Some(Err(err)) => return self.lost(err),
                        None => {
                            self.emit(WebSocketMessage::close(ABNORMAL_CLOSURE, "connection closed"));
                            return Exit::Disconnected(None);
                        }
                    }
                }
            }
        }
    }

    async fn send_ping(&self, sink: &mut super::transport::FrameSink, payload: Bytes) -> Result<()> {
        sink.send(WsFrame::Ping(payload.clone())).await?;
        self.emit(WebSocketMessage::new(WsPayload::Ping(payload)));
        Ok(())
    }

    fn lost(&self, err: StreamError) -> Exit {
        self.emit(WebSocketMessage::error(err.to_string()));
        Exit::Disconnected(Some(err))
    }

    /// Publish unless a newer session has taken over; a stale driver keeps
    /// running until it is told to close or aborted.
    fn emit(&self, message: WebSocketMessage) {
        self.core.publish(self.generation, message);
    }
}

async fn next_tick(heartbeat: &mut Option<Interval>) {
    match heartbeat {
        Some(interval) => {
            interval.tick().await;
        }
        None => std::future::pending().await,
    }
}
