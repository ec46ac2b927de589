//! Connection state and session bookkeeping shared by the SSE and WebSocket
//! clients.

use crate::error::{Result, StreamError};
use crate::multicast::{Multicast, Subscription};
use crate::reconnect::ReconnectPolicy;
use parking_lot::Mutex;
use std::fmt;
use std::time::Duration;
use tokio::task::JoinHandle;

/// Lifecycle state of a client session.
///
/// ```text
/// Idle -> Connecting -> Connected -> Reconnecting <-> Connecting
///                                  \-> Closed
/// ```
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ConnectionState {
    /// Never connected.
    Idle,
    /// A connection attempt is in flight.
    Connecting,
    /// The transport is up and delivering data.
    Connected,
    /// Waiting out the reconnect interval.
    Reconnecting,
    /// Terminated; will not reconnect on its own.
    Closed,
}

impl ConnectionState {
    /// Whether a session is running (connecting, connected or waiting to
    /// reconnect).
    pub fn is_active(&self) -> bool {
        matches!(
            self,
            ConnectionState::Connecting | ConnectionState::Connected | ConnectionState::Reconnecting
        )
    }

    pub fn is_connected(&self) -> bool {
        matches!(self, ConnectionState::Connected)
    }

    pub fn is_closed(&self) -> bool {
        matches!(self, ConnectionState::Closed)
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ConnectionState::Idle => "idle",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Connected => "connected",
            ConnectionState::Reconnecting => "reconnecting",
            ConnectionState::Closed => "closed",
        };
        f.write_str(name)
    }
}

/// What a driver does after its connection went away.
#[derive(Debug, PartialEq, Eq)]
pub(crate) enum AfterDisconnect {
    /// Sleep for `delay`, then attempt again.
    Retry { delay: Duration, attempt: u32 },
    /// The session is over; the driver must return.
    Stop,
}

struct SessionState {
    connection: ConnectionState,
    attempts: u32,
    /// Bumped by every `begin` and `shutdown`; a driver holding an older
    /// value is stale and may no longer touch the session.
    generation: u64,
    task: Option<JoinHandle<()>>,
}

/// State machine plus output multicast of one client.
///
/// All transitions go through this type under one lock that is never held
/// across an `.await`. The generation check makes `shutdown` atomic with
/// respect to the driver: once it has run, the old driver can neither publish,
/// change state, nor schedule another attempt.
pub(crate) struct SessionCore<T> {
    #[cfg_attr(not(feature = "tracing"), allow(dead_code))]
    label: &'static str,
    state: Mutex<SessionState>,
    output: Multicast<T>,
}

impl<T: Clone> SessionCore<T> {
    pub(crate) fn new(label: &'static str) -> Self {
        Self {
            label,
            state: Mutex::new(SessionState {
                connection: ConnectionState::Idle,
                attempts: 0,
                generation: 0,
                task: None,
            }),
            output: Multicast::new(),
        }
    }

    pub(crate) fn state(&self) -> ConnectionState {
        self.state.lock().connection
    }

    pub(crate) fn attempts(&self) -> u32 {
        self.state.lock().attempts
    }

    pub(crate) fn subscribe(&self) -> Subscription<T> {
        self.output.subscribe()
    }

    /// Start a new session. Fails if one is already running.
    pub(crate) fn begin(&self) -> Result<(u64, Subscription<T>)> {
        let mut state = self.state.lock();
        if state.connection.is_active() {
            return Err(StreamError::AlreadyConnected);
        }
        state.generation += 1;
        state.connection = ConnectionState::Connecting;
        state.attempts = 0;
        self.output.reopen();
        Ok((state.generation, self.output.subscribe()))
    }

    /// Store the driver task so `shutdown` can cancel it.
    pub(crate) fn attach(&self, generation: u64, task: JoinHandle<()>) {
        let mut state = self.state.lock();
        if state.generation == generation {
            state.task = Some(task);
        } else {
            task.abort();
        }
    }

    pub(crate) fn set_connecting(&self, generation: u64) -> bool {
        self.transition(generation, ConnectionState::Connecting)
    }

    /// Enter `Connected`, reset the failure count and publish `opened`
    /// (if any) before anything else from this connection.
    pub(crate) fn set_connected(&self, generation: u64, opened: Option<T>) -> bool {
        let mut state = self.state.lock();
        if state.generation != generation {
            return false;
        }
        state.connection = ConnectionState::Connected;
        state.attempts = 0;
        if let Some(item) = opened {
            self.output.publish(item);
        }
        info!(client = self.label, "connected");
        true
    }

    fn transition(&self, generation: u64, to: ConnectionState) -> bool {
        let mut state = self.state.lock();
        if state.generation != generation {
            return false;
        }
        state.connection = to;
        true
    }

    /// Publish an item unless the driver is stale.
    pub(crate) fn publish(&self, generation: u64, item: T) -> bool {
        let state = self.state.lock();
        if state.generation != generation {
            return false;
        }
        self.output.publish(item);
        true
    }

    /// Apply the reconnect policy after a disconnection.
    ///
    /// `failure` is the error that ended the connection, `None` for a clean
    /// end of stream. Both consume the same budget. When the session
    /// terminates, `failure` (if any) becomes the terminal item of every
    /// subscription.
    pub(crate) fn after_disconnect(
        &self,
        generation: u64,
        policy: &ReconnectPolicy,
        failure: Option<StreamError>,
    ) -> AfterDisconnect {
        let mut state = self.state.lock();
        if state.generation != generation {
            return AfterDisconnect::Stop;
        }

        match policy.next_delay(state.attempts) {
            Some(delay) => {
                state.attempts += 1;
                state.connection = ConnectionState::Reconnecting;
                warn!(
                    client = self.label,
                    attempt = state.attempts,
                    delay_ms = delay.as_millis() as u64,
                    error = ?failure,
                    "reconnecting"
                );
                AfterDisconnect::Retry {
                    delay,
                    attempt: state.attempts,
                }
            }
            None => {
                state.connection = ConnectionState::Closed;
                // the driver is the caller; dropping the handle detaches it
                state.task = None;
                match failure {
                    Some(err) => {
                        warn!(client = self.label, error = %err, "giving up");
                        self.output.fail(err);
                    }
                    None => {
                        info!(client = self.label, "stream ended");
                        self.output.close();
                    }
                }
                AfterDisconnect::Stop
            }
        }
    }

    /// Close the session from the caller's side.
    ///
    /// Publishes `farewell` (if any) while a session is active, closes the
    /// output and returns the previous state with the driver task, which the
    /// caller must cancel or await. Safe to call in any state.
    pub(crate) fn shutdown(&self, farewell: Option<T>) -> (ConnectionState, Option<JoinHandle<()>>) {
        let mut state = self.state.lock();
        let previous = state.connection;
        state.generation += 1;
        state.connection = ConnectionState::Closed;
        if previous.is_active() {
            if let Some(item) = farewell {
                self.output.publish(item);
            }
            info!(client = self.label, from = %previous, "disconnected");
        }
        self.output.close();
        (previous, state.task.take())
    }
}
