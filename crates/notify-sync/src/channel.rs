//! Push channel to the notification server.
//!
//! One logical Socket.IO connection per authenticated session, carried over a
//! WebSocket. The channel owns a background task that performs the handshake,
//! answers keepalive pings, decodes server events into [`ChannelEvent`]s and
//! reconnects with a bounded number of fixed-delay retries after a drop.
//!
//! ```text
//! Disconnected --connect()--> Connecting --handshake ok--> Connected
//!      ^                         |   ^                         |
//!      |  retries exhausted,     |   +------transport drop-----+
//!      |  rejected, disconnect() |                             |
//!      +-------------------------+<-------disconnect()---------+
//! ```

use futures::{SinkExt, StreamExt};
use parking_lot::Mutex;
use serde::Serialize;
use serde_json::{Value, json};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::{broadcast, mpsc, watch};
use tokio::time::Instant;
use tokio_tungstenite::tungstenite::{self, protocol::Message};
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace, warn};
use url::Url;

use crate::error::{Result, SyncError};
use crate::protocol::{
    ClientCommand, DEFAULT_NAMESPACE, EnginePacket, OpenInfo, ServerEvent, SocketPacket,
};
use crate::tls::{ensure_crypto_provider, is_secure};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Bound on the graceful close sent when the channel is torn down.
const CLOSE_TIMEOUT: Duration = Duration::from_secs(1);

/// A session that stays up this long earns a fresh retry budget.
const STABLE_SESSION: Duration = Duration::from_secs(30);

/// Connection state of the push channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ChannelState {
    Disconnected,
    Connecting,
    Connected,
}

/// Items published on the channel's event stream.
#[derive(Debug, Clone)]
pub enum ChannelEvent {
    /// The connection state changed.
    StateChanged(ChannelState),
    /// The handshake completed. `reconnect` is false for the first
    /// connection of a `connect()` call and true for every automatic recovery.
    Connected { session_id: String, reconnect: bool },
    /// The server refused the credentials. The channel will not retry.
    Rejected { reason: String },
    /// An application event pushed by the server.
    Server(ServerEvent),
}

/// Transport settings for the push channel.
#[derive(Debug, Clone)]
pub struct ChannelConfig {
    /// Base server URL (`http`, `https`, `ws` or `wss`)
    pub server_url: Url,
    /// Automatic retries before giving up. Failed handshakes and drops of
    /// sessions shorter than `stable_session` both use one up.
    pub reconnect_attempts: u32,
    /// Fixed delay between retries
    pub reconnect_delay: Duration,
    /// Uptime after which a dropped session no longer counts against the retries
    pub stable_session: Duration,
    /// Upper bound for the Engine.IO + Socket.IO handshake
    pub handshake_timeout: Duration,
    /// Capacity of the broadcast event stream
    pub event_buffer: usize,
}

impl ChannelConfig {
    pub fn new(server_url: Url) -> Self {
        Self {
            server_url,
            reconnect_attempts: 5,
            reconnect_delay: Duration::from_secs(1),
            stable_session: STABLE_SESSION,
            handshake_timeout: Duration::from_secs(10),
            event_buffer: 256,
        }
    }

    /// Socket.IO endpoint derived from the server URL.
    pub fn socket_url(&self) -> Result<Url> {
        let mut url = self.server_url.clone();
        let scheme = match url.scheme() {
            "http" | "ws" => "ws",
            "https" | "wss" => "wss",
            other => {
                return Err(SyncError::connection(format!(
                    "unsupported server URL scheme '{other}'"
                )));
            }
        };
        url.set_scheme(scheme)
            .map_err(|_| SyncError::connection("failed to set WebSocket scheme"))?;

        let path = format!("{}/socket.io/", url.path().trim_end_matches('/'));
        url.set_path(&path);
        url.query_pairs_mut()
            .clear()
            .append_pair("EIO", "4")
            .append_pair("transport", "websocket");
        Ok(url)
    }
}

/// State shared between the channel handle and its session task.
///
/// Every session task carries the generation it was spawned with; updates from
/// a task that has been superseded by `disconnect()` or a newer `connect()`
/// are discarded.
struct Shared {
    generation: Mutex<u64>,
    state_tx: watch::Sender<ChannelState>,
    event_tx: broadcast::Sender<ChannelEvent>,
}

impl Shared {
    fn next_generation(&self) -> u64 {
        let mut generation = self.generation.lock();
        *generation += 1;
        *generation
    }

    fn set_state(&self, generation: u64, state: ChannelState) {
        let current = self.generation.lock();
        if *current != generation {
            return;
        }
        let changed = self.state_tx.send_if_modified(|s| {
            let changed = *s != state;
            *s = state;
            changed
        });
        if changed {
            debug!(?state, "Channel state changed");
            let _ = self.event_tx.send(ChannelEvent::StateChanged(state));
        }
    }

    fn emit(&self, generation: u64, event: ChannelEvent) {
        let current = self.generation.lock();
        if *current != generation {
            return;
        }
        // No subscribers is fine
        let _ = self.event_tx.send(event);
    }
}

/// Handle to a running session task.
struct Session {
    command_tx: mpsc::UnboundedSender<ClientCommand>,
    cancel: CancellationToken,
}

impl Session {
    fn shutdown(self) {
        // The task closes the socket gracefully on cancellation and exits.
        self.cancel.cancel();
    }
}

/// Auto-reconnecting push channel.
pub struct TransportChannel {
    config: ChannelConfig,
    shared: Arc<Shared>,
    session: Mutex<Option<Session>>,
}

impl TransportChannel {
    pub fn new(config: ChannelConfig) -> Self {
        let (state_tx, _) = watch::channel(ChannelState::Disconnected);
        let (event_tx, _) = broadcast::channel(config.event_buffer.max(1));
        Self {
            config,
            shared: Arc::new(Shared {
                generation: Mutex::new(0),
                state_tx,
                event_tx,
            }),
            session: Mutex::new(None),
        }
    }

    pub fn config(&self) -> &ChannelConfig {
        &self.config
    }

    /// Current connection state.
    pub fn state(&self) -> ChannelState {
        *self.shared.state_tx.borrow()
    }

    /// Watch connection state changes.
    pub fn watch_state(&self) -> watch::Receiver<ChannelState> {
        self.shared.state_tx.subscribe()
    }

    /// Subscribe to the channel's event stream.
    pub fn subscribe(&self) -> broadcast::Receiver<ChannelEvent> {
        self.shared.event_tx.subscribe()
    }

    /// Start the channel with the given bearer token.
    ///
    /// A call while the channel is connecting or connected is a no-op. Must be
    /// called from within a Tokio runtime.
    pub fn connect(&self, token: &str) -> Result<()> {
        let mut session = self.session.lock();

        let state = self.state();
        if state != ChannelState::Disconnected {
            info!(?state, "Channel already active, ignoring connect");
            return Ok(());
        }

        // A finished task from an earlier run may still be parked here.
        if let Some(stale) = session.take() {
            stale.shutdown();
        }

        let url = self.config.socket_url()?;
        if is_secure(&url) {
            ensure_crypto_provider();
        }
        let generation = self.shared.next_generation();
        let (command_tx, command_rx) = mpsc::unbounded_channel();
        let cancel = CancellationToken::new();

        self.shared.set_state(generation, ChannelState::Connecting);
        info!(url = %url, "Connecting notification channel");

        tokio::spawn(
            SessionTask {
                generation,
                url,
                token: token.to_string(),
                config: self.config.clone(),
                shared: self.shared.clone(),
                cancel: cancel.clone(),
                command_rx,
            }
            .run(),
        );

        *session = Some(Session { command_tx, cancel });
        Ok(())
    }

    /// Tear the channel down. Safe to call when already disconnected.
    pub fn disconnect(&self) {
        let Some(session) = self.session.lock().take() else {
            debug!("Channel already disconnected");
            return;
        };
        let generation = self.shared.next_generation();
        session.shutdown();
        self.shared.set_state(generation, ChannelState::Disconnected);
        info!("Notification channel disconnected");
    }

    /// Ask the server to push a fresh `notification_count`.
    pub fn request_unread_count(&self) {
        self.send_command(ClientCommand::RequestNotificationCount);
    }

    /// Mark one notification read over the channel.
    pub fn mark_notification_read(&self, id: &str) {
        self.send_command(ClientCommand::MarkNotificationRead(id.to_string()));
    }

    /// Mark every notification read over the channel.
    pub fn mark_all_read(&self) {
        self.send_command(ClientCommand::MarkAllRead);
    }

    fn send_command(&self, command: ClientCommand) {
        if self.state() != ChannelState::Connected {
            debug!(command = command.name(), "Channel not connected, dropping command");
            return;
        }
        if let Some(session) = self.session.lock().as_ref() {
            if session.command_tx.send(command).is_err() {
                debug!("Session task gone, command dropped");
            }
        }
    }
}

impl Drop for TransportChannel {
    fn drop(&mut self) {
        if let Some(session) = self.session.get_mut().take() {
            session.shutdown();
        }
    }
}

/// Why a handshake attempt failed.
enum HandshakeError {
    /// Credentials refused; do not retry
    Rejected(String),
    /// Anything else; retry
    Failed(SyncError),
}

impl From<SyncError> for HandshakeError {
    fn from(e: SyncError) -> Self {
        Self::Failed(e)
    }
}

impl From<tungstenite::Error> for HandshakeError {
    fn from(e: tungstenite::Error) -> Self {
        Self::Failed(e.into())
    }
}

/// How a connected session ended.
enum PumpExit {
    Cancelled,
    Dropped(String),
    ServerDisconnect,
}

struct Established {
    stream: WsStream,
    open: OpenInfo,
    session_id: String,
}

struct SessionTask {
    generation: u64,
    url: Url,
    token: String,
    config: ChannelConfig,
    shared: Arc<Shared>,
    cancel: CancellationToken,
    command_rx: mpsc::UnboundedReceiver<ClientCommand>,
}

impl SessionTask {
    async fn run(mut self) {
        let mut attempt = 0u32;
        let mut connected_before = false;

        loop {
            if self.cancel.is_cancelled() {
                break;
            }
            self.shared.set_state(self.generation, ChannelState::Connecting);

            let result = tokio::select! {
                _ = self.cancel.cancelled() => break,
                result = tokio::time::timeout(self.config.handshake_timeout, handshake(&self.url, &self.token)) => result,
            };

            match result {
                Ok(Ok(established)) => {
                    info!(
                        session_id = %established.session_id,
                        reconnect = connected_before,
                        "Notification channel connected"
                    );
                    self.shared.set_state(self.generation, ChannelState::Connected);
                    self.shared.emit(
                        self.generation,
                        ChannelEvent::Connected {
                            session_id: established.session_id,
                            reconnect: connected_before,
                        },
                    );
                    connected_before = true;
                    let connected_at = Instant::now();

                    match self.pump(established.stream, &established.open).await {
                        PumpExit::Cancelled => break,
                        PumpExit::ServerDisconnect => {
                            warn!("Server closed the notification session, not reconnecting");
                            self.shared.set_state(self.generation, ChannelState::Disconnected);
                            break;
                        }
                        PumpExit::Dropped(reason) => {
                            if connected_at.elapsed() >= self.config.stable_session {
                                attempt = 0;
                            }
                            warn!(%reason, attempt, "Notification channel dropped");
                            self.shared.set_state(self.generation, ChannelState::Connecting);
                        }
                    }
                }
                Ok(Err(HandshakeError::Rejected(reason))) => {
                    error!(%reason, "Notification channel handshake rejected");
                    self.shared
                        .emit(self.generation, ChannelEvent::Rejected { reason });
                    self.shared.set_state(self.generation, ChannelState::Disconnected);
                    break;
                }
                Ok(Err(HandshakeError::Failed(e))) => {
                    warn!(error = %e, attempt, "Notification channel connection failed");
                }
                Err(_) => {
                    warn!(
                        timeout = ?self.config.handshake_timeout,
                        attempt,
                        "Notification channel handshake timed out"
                    );
                }
            }

            if attempt >= self.config.reconnect_attempts {
                error!(
                    attempts = self.config.reconnect_attempts,
                    "Max reconnect attempts reached for notification channel"
                );
                self.shared.set_state(self.generation, ChannelState::Disconnected);
                break;
            }
            attempt += 1;

            tokio::select! {
                _ = tokio::time::sleep(self.config.reconnect_delay) => {},
                _ = self.cancel.cancelled() => break,
            }
        }
        debug!(generation = self.generation, "Channel session task stopped");
    }

    async fn pump(&mut self, mut stream: WsStream, open: &OpenInfo) -> PumpExit {
        let keepalive = Duration::from_millis(open.ping_interval + open.ping_timeout);
        let mut deadline = Instant::now() + keepalive;

        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => {
                    close_gracefully(&mut stream).await;
                    return PumpExit::Cancelled;
                }

                command = self.command_rx.recv() => {
                    let Some(command) = command else {
                        close_gracefully(&mut stream).await;
                        return PumpExit::Cancelled;
                    };
                    if let Err(e) = send_text(&mut stream, command.to_packet().to_frame()).await {
                        return PumpExit::Dropped(format!("failed to send {}: {e}", command.name()));
                    }
                    trace!(command = command.name(), "Sent client command");
                }

                _ = tokio::time::sleep_until(deadline) => {
                    return PumpExit::Dropped(format!("no ping from server within {keepalive:?}"));
                }

                frame = stream.next() => {
                    match frame {
                        Some(Ok(Message::Text(text))) => {
                            match EnginePacket::decode(&text.to_string()) {
                                Ok(EnginePacket::Ping(data)) => {
                                    deadline = Instant::now() + keepalive;
                                    if let Err(e) = send_text(&mut stream, EnginePacket::Pong(data).encode()).await {
                                        return PumpExit::Dropped(format!("failed to send pong: {e}"));
                                    }
                                    trace!("Answered server ping");
                                }
                                Ok(EnginePacket::Message(body)) => {
                                    if let Some(exit) = self.handle_message(&body) {
                                        return exit;
                                    }
                                }
                                Ok(EnginePacket::Close) => {
                                    return PumpExit::Dropped("server closed the engine.io session".to_string());
                                }
                                Ok(other) => trace!(?other, "Ignoring engine.io packet"),
                                Err(e) => warn!(error = %e, "Dropping malformed frame"),
                            }
                        }
                        Some(Ok(Message::Close(frame))) => {
                            return PumpExit::Dropped(format!("close frame received: {frame:?}"));
                        }
                        Some(Ok(other)) => trace!(?other, "Ignoring non-text WebSocket message"),
                        Some(Err(e)) => return PumpExit::Dropped(format!("WebSocket error: {e}")),
                        None => return PumpExit::Dropped("WebSocket stream closed".to_string()),
                    }
                }
            }
        }
    }

    fn handle_message(&self, body: &str) -> Option<PumpExit> {
        match SocketPacket::decode(body) {
            Ok(SocketPacket::Event {
                namespace, args, ..
            }) if namespace == DEFAULT_NAMESPACE => match ServerEvent::from_args(&args) {
                Ok(Some(event)) => {
                    debug!(event = event.name(), "Received server event");
                    self.shared.emit(self.generation, ChannelEvent::Server(event));
                }
                Ok(None) => debug!(?args, "Ignoring unhandled server event"),
                Err(e) => warn!(error = %e, "Dropping malformed server event"),
            },
            Ok(SocketPacket::Disconnect { namespace }) if namespace == DEFAULT_NAMESPACE => {
                return Some(PumpExit::ServerDisconnect);
            }
            Ok(other) => trace!(?other, "Ignoring socket.io packet"),
            Err(e) => warn!(error = %e, "Dropping malformed socket.io packet"),
        }
        None
    }
}

async fn handshake(url: &Url, token: &str) -> std::result::Result<Established, HandshakeError> {
    let (mut stream, _) = connect_async(url.as_str()).await.map_err(|e| match e {
        tungstenite::Error::Http(ref response)
            if matches!(response.status().as_u16(), 401 | 403) =>
        {
            HandshakeError::Rejected(format!("HTTP {}", response.status()))
        }
        other => HandshakeError::from(other),
    })?;

    let open = loop {
        let text = next_text(&mut stream).await?;
        match EnginePacket::decode(&text)? {
            EnginePacket::Open(info) => break info,
            other => debug!(?other, "Ignoring packet before engine.io open"),
        }
    };

    let auth = SocketPacket::connect(Some(json!({ "token": token })));
    send_text(&mut stream, auth.to_frame()).await?;

    loop {
        let text = next_text(&mut stream).await?;
        match EnginePacket::decode(&text)? {
            EnginePacket::Ping(data) => send_text(&mut stream, EnginePacket::Pong(data).encode()).await?,
            EnginePacket::Message(body) => match SocketPacket::decode(&body) {
                Ok(SocketPacket::Connect { namespace, data }) if namespace == DEFAULT_NAMESPACE => {
                    let session_id = data
                        .as_ref()
                        .and_then(|d| d.get("sid"))
                        .and_then(Value::as_str)
                        .map(str::to_string)
                        .unwrap_or_else(|| open.sid.clone());
                    return Ok(Established {
                        stream,
                        open,
                        session_id,
                    });
                }
                Ok(SocketPacket::ConnectError { data, .. }) => {
                    let reason = data
                        .as_ref()
                        .and_then(|d| d.get("message"))
                        .and_then(Value::as_str)
                        .unwrap_or("connection refused")
                        .to_string();
                    return Err(HandshakeError::Rejected(reason));
                }
                Ok(other) => debug!(?other, "Ignoring packet during handshake"),
                Err(e) => warn!(error = %e, "Dropping malformed packet during handshake"),
            },
            EnginePacket::Close => {
                return Err(SyncError::connection("server closed during handshake").into());
            }
            _ => {}
        }
    }
}

async fn next_text(stream: &mut WsStream) -> std::result::Result<String, HandshakeError> {
    loop {
        match stream.next().await {
            Some(Ok(Message::Text(text))) => return Ok(text.to_string()),
            Some(Ok(Message::Close(_))) | None => {
                return Err(SyncError::connection("connection closed during handshake").into());
            }
            Some(Ok(_)) => continue,
            Some(Err(e)) => return Err(e.into()),
        }
    }
}

async fn send_text(stream: &mut WsStream, frame: String) -> std::result::Result<(), tungstenite::Error> {
    stream.send(Message::Text(frame.into())).await
}

async fn close_gracefully(stream: &mut WsStream) {
    let bye = SocketPacket::Disconnect {
        namespace: DEFAULT_NAMESPACE.to_string(),
    };
    let close = async {
        let _ = send_text(stream, bye.to_frame()).await;
        let _ = stream.close(None).await;
    };
    if tokio::time::timeout(CLOSE_TIMEOUT, close).await.is_err() {
        debug!("Graceful close timed out");
    }
}
