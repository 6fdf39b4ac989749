//! # WebSocket Shadow Transport
//!
//! [`ShadowTransport`] over a WebSocket link to the shadow gateway, with
//! automatic reconnection and backoff.
//!
//! ## Task Layout
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                    WebSocket Shadow Transport                           │
//! │                                                                         │
//! │  sync loop task                        link task (spawned)              │
//! │  ───────────────                       ──────────────────               │
//! │  WsShadowTransport                     ShadowLink                       │
//! │    poll() ◄──── incoming frames ────── read half                        │
//! │    send_report() ── outgoing frames ─► write half                       │
//! │    state ◄──────── watch ───────────── connect / backoff / reconnect    │
//! │    acks: token → deadline                                               │
//! │                                                                         │
//! │  Handlers only ever run inside poll(), on the sync loop task.          │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Connection Lifecycle
//! ```text
//! ┌────────────┐  spawn   ┌────────────┐ success ┌────────────┐
//! │Disconnected│ ───────► │ Connecting │ ──────► │ Connected  │ ─ subscribe
//! └────────────┘          └─────┬──────┘         └─────┬──────┘   topics
//!                               │ failure              │ lost
//!                               ▼                      ▼
//!                         ┌────────────┐  timer  ┌────────────┐
//!                         │  Backoff   │ ──────► │Reconnecting│ ─► Connecting
//!                         └─────┬──────┘         └────────────┘
//!                               │ retries exhausted / shutdown
//!                               ▼
//!                         ┌────────────┐
//!                         │  Stopped   │  poll() reports Fatal(-1)
//!                         └────────────┘
//! ```

use backoff::backoff::Backoff;
use backoff::ExponentialBackoff;
use futures_util::{SinkExt, StreamExt};
use std::collections::HashMap;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, watch};
use tokio::time::{timeout, Instant};
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, error, info, warn};

use crate::config::AgentConfig;
use crate::error::{SyncError, SyncResult, FATAL_LINK_STOPPED};
use crate::protocol::{InboundFrame, OutboundFrame};
use crate::transport::{AckStatus, EchoReport, InboundHandler, PollStatus, ShadowTransport};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

// =============================================================================
// Connection State
// =============================================================================

/// Connection state of the link task.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Backoff,
    Reconnecting,
    /// The link task has exited and will not reconnect.
    Stopped,
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConnectionState::Disconnected => write!(f, "disconnected"),
            ConnectionState::Connecting => write!(f, "connecting"),
            ConnectionState::Connected => write!(f, "connected"),
            ConnectionState::Backoff => write!(f, "backoff"),
            ConnectionState::Reconnecting => write!(f, "reconnecting"),
            ConnectionState::Stopped => write!(f, "stopped"),
        }
    }
}

// =============================================================================
// Transport Configuration
// =============================================================================

/// Configuration for the WebSocket transport.
#[derive(Debug, Clone)]
pub struct TransportConfig {
    /// WebSocket URL of the shadow gateway.
    pub url: String,

    /// Connection timeout, also the bound of [`WsShadowTransport::connect`].
    pub connect_timeout: Duration,

    pub initial_backoff: Duration,
    pub max_backoff: Duration,

    /// Maximum reconnection attempts (0 = infinite).
    pub max_retries: u32,

    /// Ping interval for keepalive.
    pub ping_interval: Duration,

    /// Time after which an unacknowledged report is reported as timed out.
    pub ack_timeout: Duration,

    /// Topics subscribed after every (re)connect.
    pub topics: Vec<String>,
}

impl Default for TransportConfig {
    fn default() -> Self {
        TransportConfig {
            url: String::new(),
            connect_timeout: Duration::from_secs(10),
            initial_backoff: Duration::from_millis(500),
            max_backoff: Duration::from_secs(60),
            max_retries: 0, // Infinite
            ping_interval: Duration::from_secs(30),
            ack_timeout: Duration::from_secs(2),
            topics: Vec::new(),
        }
    }
}

impl TransportConfig {
    /// Builds the transport settings for `thing_name` from the agent config.
    pub fn from_agent_config(config: &AgentConfig, thing_name: &str) -> SyncResult<Self> {
        let url = config
            .shadow_url()
            .ok_or_else(|| SyncError::InvalidConfig("Shadow URL required".into()))?;

        Ok(TransportConfig {
            url: url.to_string(),
            connect_timeout: Duration::from_secs(config.shadow.connect_timeout_secs),
            initial_backoff: Duration::from_millis(config.shadow.initial_backoff_ms),
            max_backoff: Duration::from_secs(config.shadow.max_backoff_secs),
            max_retries: config.shadow.max_retries,
            ack_timeout: Duration::from_secs(config.shadow.ack_timeout_secs),
            topics: vec![config.pulse_topic(thing_name)],
            ..Default::default()
        })
    }
}

// =============================================================================
// Ack Tracking
// =============================================================================

/// Client tokens of sent reports and their acknowledgement deadlines.
#[derive(Debug)]
struct AckTracker {
    timeout: Duration,
    pending: HashMap<String, Instant>,
}

impl AckTracker {
    fn new(timeout: Duration) -> Self {
        AckTracker {
            timeout,
            pending: HashMap::new(),
        }
    }

    fn track(&mut self, client_token: &str, now: Instant) {
        self.pending
            .insert(client_token.to_string(), now + self.timeout);
    }

    /// Forgets `client_token`, returning whether it was outstanding.
    fn resolve(&mut self, client_token: &str) -> bool {
        self.pending.remove(client_token).is_some()
    }

    /// Removes and returns tokens whose deadline has passed, oldest first.
    fn expire(&mut self, now: Instant) -> Vec<String> {
        let mut expired: Vec<(Instant, String)> = self
            .pending
            .iter()
            .filter(|(_, deadline)| **deadline <= now)
            .map(|(token, deadline)| (*deadline, token.clone()))
            .collect();
        expired.sort();

        expired
            .into_iter()
            .map(|(_, token)| {
                self.pending.remove(&token);
                token
            })
            .collect()
    }
}

// =============================================================================
// WebSocket Shadow Transport
// =============================================================================

/// WebSocket shadow transport with automatic reconnection.
///
/// ## Usage
/// ```rust,ignore
/// let config = TransportConfig::from_agent_config(&agent_config, &thing_name)?;
/// let mut transport = WsShadowTransport::spawn(config);
/// transport.connect().await?;
///
/// let status = transport.poll(Duration::from_millis(200), &mut engine).await;
/// ```
pub struct WsShadowTransport {
    connect_timeout: Duration,
    outgoing_tx: mpsc::Sender<OutboundFrame>,
    incoming_rx: mpsc::Receiver<InboundFrame>,
    state_rx: watch::Receiver<ConnectionState>,
    shutdown_tx: mpsc::Sender<()>,
    acks: AckTracker,
    link_down: bool,
}

impl WsShadowTransport {
    /// Creates the transport and spawns its link task.
    pub fn spawn(config: TransportConfig) -> Self {
        let (outgoing_tx, outgoing_rx) = mpsc::channel::<OutboundFrame>(100);
        let (incoming_tx, incoming_rx) = mpsc::channel::<InboundFrame>(100);
        let (shutdown_tx, shutdown_rx) = mpsc::channel::<()>(1);
        let (state_tx, state_rx) = watch::channel(ConnectionState::Disconnected);

        let connect_timeout = config.connect_timeout;
        let acks = AckTracker::new(config.ack_timeout);

        let link = ShadowLink {
            config,
            state: state_tx,
            outgoing_rx,
            incoming_tx,
            shutdown_rx,
        };
        tokio::spawn(link.run());

        WsShadowTransport {
            connect_timeout,
            outgoing_tx,
            incoming_rx,
            state_rx,
            shutdown_tx,
            acks,
            link_down: false,
        }
    }

    /// Returns the current connection state.
    pub fn state(&self) -> ConnectionState {
        *self.state_rx.borrow()
    }

    /// Waits for the first connection, up to the configured connect timeout.
    pub async fn connect(&mut self) -> SyncResult<()> {
        let wait = self
            .state_rx
            .wait_for(|s| matches!(s, ConnectionState::Connected | ConnectionState::Stopped));

        let state = match timeout(self.connect_timeout, wait).await {
            Ok(Ok(state)) => *state,
            Ok(Err(_)) => ConnectionState::Stopped,
            Err(_) => return Err(SyncError::Timeout(self.connect_timeout.as_secs())),
        };

        match state {
            ConnectionState::Connected => Ok(()),
            other => Err(SyncError::ConnectionFailed(format!(
                "Shadow link {} before connecting",
                other
            ))),
        }
    }

    /// Triggers graceful shutdown of the link task.
    pub async fn shutdown(&self) -> SyncResult<()> {
        self.shutdown_tx
            .send(())
            .await
            .map_err(|_| SyncError::ChannelError("Failed to send shutdown signal".into()))
    }

    fn deliver<H: InboundHandler>(&mut self, frame: InboundFrame, handler: &mut H) {
        match frame {
            InboundFrame::Delta(delta) => handler.on_delta(delta.state.get().as_bytes()),
            InboundFrame::Message(msg) => handler.on_message(&msg.topic, msg.payload.as_bytes()),
            InboundFrame::UpdateAck(ack) => {
                if self.acks.resolve(&ack.client_token) {
                    handler.on_update_ack(&ack.client_token, ack.status);
                } else {
                    debug!(client_token = %ack.client_token, "Ack for unknown client token");
                }
            }
        }
    }

    fn link_status(&mut self) -> PollStatus {
        match self.state() {
            ConnectionState::Connected if self.link_down => {
                self.link_down = false;
                PollStatus::Reconnected
            }
            ConnectionState::Connected => PollStatus::Success,
            ConnectionState::Stopped => PollStatus::Fatal(FATAL_LINK_STOPPED),
            _ => {
                self.link_down = true;
                PollStatus::Reconnecting
            }
        }
    }
}

impl ShadowTransport for WsShadowTransport {
    async fn poll<H: InboundHandler>(&mut self, wait: Duration, handler: &mut H) -> PollStatus {
        match timeout(wait, self.incoming_rx.recv()).await {
            Ok(Some(frame)) => {
                self.deliver(frame, handler);
                while let Ok(frame) = self.incoming_rx.try_recv() {
                    self.deliver(frame, handler);
                }
            }
            Ok(None) => {
                error!("Shadow link task has stopped");
                return PollStatus::Fatal(FATAL_LINK_STOPPED);
            }
            Err(_) => {}
        }

        for token in self.acks.expire(Instant::now()) {
            handler.on_update_ack(&token, AckStatus::Timeout);
        }

        self.link_status()
    }

    async fn send_report(&mut self, thing_name: &str, report: &EchoReport<'_>) -> SyncResult<()> {
        let document = std::str::from_utf8(report.document)
            .map_err(|e| SyncError::SerializationFailed(e.to_string()))?;
        let frame = OutboundFrame::update(thing_name, report.client_token, document);

        self.outgoing_tx
            .send(frame)
            .await
            .map_err(|_| SyncError::ChannelError("Outgoing channel closed".into()))?;

        self.acks.track(report.client_token, Instant::now());
        debug!(client_token = %report.client_token, "Queued shadow update");
        Ok(())
    }

    async fn close(&mut self) {
        let _ = self.shutdown().await;
    }
}

// =============================================================================
// Link Task
// =============================================================================

/// How a connection ended.
enum LinkEnd {
    Shutdown,
    Lost,
}

/// Background task owning the socket.
struct ShadowLink {
    config: TransportConfig,
    state: watch::Sender<ConnectionState>,
    outgoing_rx: mpsc::Receiver<OutboundFrame>,
    incoming_tx: mpsc::Sender<InboundFrame>,
    shutdown_rx: mpsc::Receiver<()>,
}

impl ShadowLink {
    /// Main link loop.
    async fn run(mut self) {
        info!(url = %self.config.url, "Shadow link starting");

        let mut backoff = self.create_backoff();
        let mut retry_count = 0u32;

        loop {
            if self.shutdown_rx.try_recv().is_ok() {
                info!("Shadow link received shutdown signal");
                break;
            }

            self.state.send_replace(ConnectionState::Connecting);

            match self.connect_with_timeout().await {
                Ok(ws_stream) => {
                    backoff.reset();
                    retry_count = 0;

                    match self.connection_loop(ws_stream).await {
                        Ok(LinkEnd::Shutdown) => break,
                        Ok(LinkEnd::Lost) => warn!("Connection closed by gateway"),
                        Err(e) => warn!(?e, "Connection loop ended"),
                    }
                }
                Err(e) if e.is_retryable() => {
                    warn!(error = %e, "Failed to connect");
                }
                Err(e) => {
                    error!(error = %e, "Failed to connect, check URL and TLS setup");
                }
            }

            self.state.send_replace(ConnectionState::Backoff);

            if self.config.max_retries > 0 {
                retry_count += 1;
                if retry_count >= self.config.max_retries {
                    error!(
                        max_retries = self.config.max_retries,
                        "Max reconnection attempts reached"
                    );
                    break;
                }
            }

            if let Some(duration) = backoff.next_backoff() {
                debug!(?duration, attempt = retry_count, "Waiting before reconnect");

                tokio::select! {
                    _ = tokio::time::sleep(duration) => {
                        self.state.send_replace(ConnectionState::Reconnecting);
                    }
                    _ = self.shutdown_rx.recv() => {
                        info!("Shutdown during backoff");
                        break;
                    }
                }
            } else {
                error!("Backoff exhausted");
                break;
            }
        }

        self.state.send_replace(ConnectionState::Stopped);
        info!("Shadow link stopped");
    }

    async fn connect_with_timeout(&self) -> SyncResult<WsStream> {
        let connect_future = connect_async(self.config.url.as_str());

        match timeout(self.config.connect_timeout, connect_future).await {
            Ok(Ok((ws_stream, response))) => {
                debug!(status = ?response.status(), "WebSocket handshake complete");
                Ok(ws_stream)
            }
            Ok(Err(e)) => Err(SyncError::from(e)),
            Err(_) => Err(SyncError::Timeout(self.config.connect_timeout.as_secs())),
        }
    }

    /// Subscribes, then pumps frames until the connection ends.
    async fn connection_loop(&mut self, ws_stream: WsStream) -> SyncResult<LinkEnd> {
        let (mut write, mut read) = ws_stream.split();

        for topic in &self.config.topics {
            let json = OutboundFrame::subscribe(topic).to_json()?;
            write.send(WsMessage::Text(json.into())).await?;
            debug!(%topic, "Subscribed");
        }

        self.state.send_replace(ConnectionState::Connected);
        info!("Shadow link connected");

        let period = self.config.ping_interval;
        let mut ping_interval = tokio::time::interval_at(Instant::now() + period, period);
        ping_interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                outgoing = self.outgoing_rx.recv() => match outgoing {
                    Some(frame) => {
                        let json = frame.to_json()?;
                        debug!(frame_type = frame.type_name(), "Sending frame");
                        write.send(WsMessage::Text(json.into())).await?;
                    }
                    None => {
                        info!("Transport dropped, closing connection");
                        let _ = write.send(WsMessage::Close(None)).await;
                        return Ok(LinkEnd::Shutdown);
                    }
                },

                incoming = read.next() => match incoming {
                    Some(Ok(WsMessage::Text(text))) => match InboundFrame::from_json(&text) {
                        Ok(frame) => {
                            debug!(frame_type = frame.type_name(), "Received frame");
                            if self.incoming_tx.send(frame).await.is_err() {
                                warn!("Incoming frame receiver dropped");
                                return Ok(LinkEnd::Shutdown);
                            }
                        }
                        Err(e) => {
                            warn!(?e, "Failed to parse frame");
                        }
                    },
                    Some(Ok(WsMessage::Ping(data))) => {
                        write.send(WsMessage::Pong(data)).await?;
                    }
                    Some(Ok(WsMessage::Pong(_))) => {
                        debug!("Received pong");
                    }
                    Some(Ok(WsMessage::Close(frame))) => {
                        info!(?frame, "Received close frame");
                        return Ok(LinkEnd::Lost);
                    }
                    Some(Ok(WsMessage::Binary(_))) => {
                        warn!("Received unexpected binary message");
                    }
                    Some(Ok(WsMessage::Frame(_))) => {}
                    Some(Err(e)) => {
                        error!(?e, "WebSocket error");
                        return Err(SyncError::from(e));
                    }
                    None => return Ok(LinkEnd::Lost),
                },

                _ = ping_interval.tick() => {
                    write.send(WsMessage::Ping(Vec::new().into())).await?;
                    debug!("Sent ping");
                }

                _ = self.shutdown_rx.recv() => {
                    info!("Shutdown signal received, closing connection");
                    let _ = write.send(WsMessage::Close(None)).await;
                    return Ok(LinkEnd::Shutdown);
                }
            }
        }
    }

    /// Creates the exponential backoff configuration.
    fn create_backoff(&self) -> ExponentialBackoff {
        ExponentialBackoff {
            initial_interval: self.config.initial_backoff,
            max_interval: self.config.max_backoff,
            multiplier: 2.0,
            max_elapsed_time: None,
            ..Default::default()
        }
    }
}
