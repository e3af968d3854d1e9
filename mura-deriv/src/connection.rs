//! Deriv WebSocket connection
//!
//! One persistent socket to one fixed endpoint, shared by every feature of
//! the dashboard. Outgoing frames are queued on a command channel and written
//! only while the socket is open; incoming text frames are fanned out to every
//! listener together with connection state transitions.

use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant};
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tracing::{debug, error, info, warn};
use url::Url;

use mura_core::{encode, MuraError, MuraResult, Request};

/// Deriv WebSocket endpoint (app id appended as a query parameter)
const DERIV_WS_URL: &str = "wss://ws.binaryws.com/websockets/v3";

/// Public demo application id
const DEFAULT_APP_ID: &str = "1089";

/// Fixed delay between reconnect attempts
const RECONNECT_INTERVAL: Duration = Duration::from_secs(3);

/// Deriv drops connections idle for two minutes
const PING_INTERVAL: Duration = Duration::from_secs(30);

/// Frames that may wait for the socket to open
const COMMAND_BUFFER: usize = 256;

/// Events a slow listener may fall behind before it starts losing them
const EVENT_BUFFER: usize = 1024;

// ============================================================================
// Configuration
// ============================================================================

/// Connection state as seen by listeners
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    /// Attempting to connect
    Connecting,
    /// Connected, frames flow both ways
    Open,
    /// Disconnected; a reconnect follows unless the connection was shut down
    Closed,
    /// Reconnect attempts exhausted, not retrying
    Error,
}

/// Fixed-interval reconnect policy
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconnectPolicy {
    /// Delay before every attempt
    pub interval: Duration,
    /// Consecutive failed attempts allowed; `None` retries forever
    pub max_attempts: Option<u32>,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            interval: RECONNECT_INTERVAL,
            max_attempts: None,
        }
    }
}

impl ReconnectPolicy {
    /// Whether another attempt is allowed after `failures` consecutive failures
    pub fn allows(&self, failures: u32) -> bool {
        self.max_attempts.map_or(true, |max| failures <= max)
    }
}

/// Configuration for DerivConnection
#[derive(Clone, Debug)]
pub struct ConnectionConfig {
    pub endpoint: Url,
    pub reconnect: ReconnectPolicy,
    pub ping_interval: Duration,
}

impl ConnectionConfig {
    pub fn new(endpoint: Url) -> Self {
        Self {
            endpoint,
            reconnect: ReconnectPolicy::default(),
            ping_interval: PING_INTERVAL,
        }
    }

    pub fn with_reconnect(mut self, reconnect: ReconnectPolicy) -> Self {
        self.reconnect = reconnect;
        self
    }

    pub fn with_ping_interval(mut self, ping_interval: Duration) -> Self {
        self.ping_interval = ping_interval;
        self
    }

    /// Endpoint for an application id on the public Deriv server
    pub fn endpoint_for_app(app_id: &str) -> MuraResult<Url> {
        Url::parse_with_params(DERIV_WS_URL, &[("app_id", app_id)])
            .map_err(|e| MuraError::config(format!("Invalid endpoint: {}", e)))
    }
}

fn env_parse<T: std::str::FromStr>(name: &str) -> Option<T> {
    let raw = std::env::var(name).ok()?;
    match raw.parse() {
        Ok(value) => Some(value),
        Err(_) => {
            warn!("[Deriv WS] Ignoring invalid {}={}", name, raw);
            None
        }
    }
}

impl ConnectionConfig {
    /// Reads `DERIV_WS_URL` (else `DERIV_APP_ID`), `DERIV_RECONNECT_INTERVAL_MS`,
    /// `DERIV_MAX_RECONNECT_ATTEMPTS` and `DERIV_PING_INTERVAL_SECS`
    pub fn from_env() -> MuraResult<Self> {
        let endpoint = match std::env::var("DERIV_WS_URL") {
            Ok(raw) => Url::parse(&raw)
                .map_err(|e| MuraError::config(format!("Invalid DERIV_WS_URL '{}': {}", raw, e)))?,
            Err(_) => {
                let app_id =
                    std::env::var("DERIV_APP_ID").unwrap_or_else(|_| DEFAULT_APP_ID.to_string());
                Self::endpoint_for_app(&app_id)?
            }
        };

        let reconnect = ReconnectPolicy {
            interval: env_parse::<u64>("DERIV_RECONNECT_INTERVAL_MS")
                .map(Duration::from_millis)
                .unwrap_or(RECONNECT_INTERVAL),
            max_attempts: env_parse::<u32>("DERIV_MAX_RECONNECT_ATTEMPTS"),
        };

        let ping_interval = env_parse::<u64>("DERIV_PING_INTERVAL_SECS")
            .filter(|secs| *secs > 0)
            .map(Duration::from_secs)
            .unwrap_or(PING_INTERVAL);

        Ok(Self {
            endpoint,
            reconnect,
            ping_interval,
        })
    }
}

// ============================================================================
// Connection
// ============================================================================

/// Something that happened on the connection
#[derive(Debug, Clone, PartialEq)]
pub enum ConnectionEvent {
    /// A raw text frame, undecoded
    Frame(Arc<str>),
    /// A state transition
    State(ConnectionState),
}

/// Shared handle to the single Deriv WebSocket
pub struct DerivConnection {
    config: ConnectionConfig,
    /// Fan-out of frames and state changes
    event_tx: broadcast::Sender<ConnectionEvent>,
    /// Encoded frames waiting to be written
    command_tx: mpsc::Sender<String>,
    /// Taken by the connection task on the first `connect()`
    command_rx: Mutex<Option<mpsc::Receiver<String>>>,
    state: Arc<RwLock<ConnectionState>>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl DerivConnection {
    /// Create a connection handle; nothing is opened until `connect()`
    pub fn new(config: ConnectionConfig) -> Arc<Self> {
        let (event_tx, _) = broadcast::channel(EVENT_BUFFER);
        let (command_tx, command_rx) = mpsc::channel(COMMAND_BUFFER);

        Arc::new(Self {
            config,
            event_tx,
            command_tx,
            command_rx: Mutex::new(Some(command_rx)),
            state: Arc::new(RwLock::new(ConnectionState::Closed)),
            task: Mutex::new(None),
        })
    }

    /// Open the socket, or do nothing if it was already started
    ///
    /// Must be called from within a tokio runtime.
    pub fn connect(&self) {
        let Some(command_rx) = self.command_rx.lock().take() else {
            debug!("[Deriv WS] connect() called on a started connection");
            return;
        };

        let config = self.config.clone();
        let event_tx = self.event_tx.clone();
        let state = Arc::clone(&self.state);

        let handle = tokio::spawn(async move {
            Self::connection_loop(config, event_tx, command_rx, state).await;
        });
        *self.task.lock() = Some(handle);
    }

    /// Queue a request
    ///
    /// Frames are written in order as soon as the socket is open; frames
    /// queued while disconnected wait for the next successful connect.
    /// Fails only once the connection has been shut down.
    pub async fn send(&self, request: &Request) -> MuraResult<()> {
        let frame = encode(request).map_err(|e| MuraError::parse(e.to_string()))?;
        debug!("[Deriv WS] Queueing {}", request.op());
        self.command_tx
            .send(frame)
            .await
            .map_err(|_| MuraError::network("connection has been shut down"))
    }

    /// Listen to every frame and state change from now on
    pub fn subscribe_events(&self) -> broadcast::Receiver<ConnectionEvent> {
        self.event_tx.subscribe()
    }

    pub fn state(&self) -> ConnectionState {
        *self.state.read()
    }

    pub fn endpoint(&self) -> &Url {
        &self.config.endpoint
    }

    /// Tear the connection down for good
    pub fn shutdown(&self) {
        self.command_rx.lock().take();
        if let Some(handle) = self.task.lock().take() {
            handle.abort();
        }
        Self::set_state(&self.state, &self.event_tx, ConnectionState::Closed);
        info!("[Deriv WS] Connection shut down");
    }

    fn set_state(
        state: &RwLock<ConnectionState>,
        event_tx: &broadcast::Sender<ConnectionEvent>,
        next: ConnectionState,
    ) {
        *state.write() = next;
        let _ = event_tx.send(ConnectionEvent::State(next));
    }

    /// Main connection loop with fixed-interval reconnection
    async fn connection_loop(
        config: ConnectionConfig,
        event_tx: broadcast::Sender<ConnectionEvent>,
        mut command_rx: mpsc::Receiver<String>,
        state: Arc<RwLock<ConnectionState>>,
    ) {
        let mut failures = 0u32;
        let ping_frame = match encode(&Request::ping()) {
            Ok(frame) => frame,
            Err(e) => {
                error!("[Deriv WS] Failed to encode ping: {}", e);
                return;
            }
        };

        loop {
            info!("[Deriv WS] Connecting to {}", config.endpoint);
            Self::set_state(&state, &event_tx, ConnectionState::Connecting);

            match connect_async(config.endpoint.as_str()).await {
                Ok((ws_stream, _)) => {
                    info!("[Deriv WS] Connected successfully");
                    failures = 0;
                    Self::set_state(&state, &event_tx, ConnectionState::Open);

                    let (mut write, mut read) = ws_stream.split();
                    let mut keepalive =
                        interval_at(Instant::now() + config.ping_interval, config.ping_interval);

                    loop {
                        tokio::select! {
                            // Handle incoming messages
                            msg = read.next() => {
                                match msg {
                                    Some(Ok(Message::Text(text))) => {
                                        let _ = event_tx.send(ConnectionEvent::Frame(Arc::from(text.as_str())));
                                    }
                                    Some(Ok(Message::Ping(data))) => {
                                        if let Err(e) = write.send(Message::Pong(data)).await {
                                            warn!("[Deriv WS] Failed to send pong: {}", e);
                                            break;
                                        }
                                    }
                                    Some(Ok(Message::Close(_))) => {
                                        info!("[Deriv WS] Connection closed by server");
                                        break;
                                    }
                                    Some(Err(e)) => {
                                        error!("[Deriv WS] Error: {}", e);
                                        break;
                                    }
                                    None => {
                                        info!("[Deriv WS] Stream ended");
                                        break;
                                    }
                                    _ => {}
                                }
                            }

                            // Handle outgoing frames
                            frame = command_rx.recv() => {
                                let Some(frame) = frame else {
                                    info!("[Deriv WS] All senders dropped, closing");
                                    let _ = write.send(Message::Close(None)).await;
                                    Self::set_state(&state, &event_tx, ConnectionState::Closed);
                                    return;
                                };
                                if let Err(e) = write.send(Message::Text(frame.into())).await {
                                    warn!("[Deriv WS] Failed to send frame: {}", e);
                                    break;
                                }
                            }

                            // Keep the session alive
                            _ = keepalive.tick() => {
                                debug!("[Deriv WS] Sending keep-alive ping");
                                if let Err(e) = write.send(Message::Text(ping_frame.clone().into())).await {
                                    warn!("[Deriv WS] Failed to send ping: {}", e);
                                    break;
                                }
                            }
                        }
                    }

                    Self::set_state(&state, &event_tx, ConnectionState::Closed);
                }
                Err(e) => {
                    error!("[Deriv WS] Connection failed: {}", e);
                    Self::set_state(&state, &event_tx, ConnectionState::Closed);
                }
            }

            failures += 1;
            if !config.reconnect.allows(failures) {
                error!("[Deriv WS] Max reconnect attempts reached");
                Self::set_state(&state, &event_tx, ConnectionState::Error);
                return;
            }

            info!(
                "[Deriv WS] Reconnecting in {:?} (attempt {})",
                config.reconnect.interval, failures
            );
            tokio::time::sleep(config.reconnect.interval).await;
        }
    }
}

impl Drop for DerivConnection {
    fn drop(&mut self) {
        if let Some(handle) = self.task.get_mut().take() {
            handle.abort();
        }
    }
}

impl std::fmt::Debug for DerivConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DerivConnection")
            .field("config", &self.config)
            .field("state", &self.state())
            .finish()
    }
}
