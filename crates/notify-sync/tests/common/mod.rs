//! In-process Socket.IO server speaking just enough Engine.IO v4 for the
//! notification channel.

#![allow(dead_code)]

use futures::{SinkExt, StreamExt};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::http::StatusCode;
use tokio_tungstenite::tungstenite::protocol::Message;
use tokio_tungstenite::{accept_async, accept_hdr_async};

/// What the server does with the next incoming connection.
#[derive(Debug, Clone)]
pub enum Behavior {
    /// Complete the handshake and keep the session open
    Accept,
    /// Complete the handshake, then drop the connection at once
    AcceptThenDrop,
    /// Close the TCP connection without a WebSocket upgrade
    Refuse,
    /// Answer the upgrade with HTTP 401
    Unauthorized,
    /// Upgrade, then refuse the namespace connect with this message
    RejectAuth(String),
}

enum Control {
    Frame(String),
    Drop,
}

#[derive(Default)]
struct State {
    behaviors: Mutex<VecDeque<Behavior>>,
    attempts: AtomicUsize,
    tokens: Mutex<Vec<String>>,
    frames: Mutex<Vec<String>>,
    current: Mutex<Option<mpsc::UnboundedSender<Control>>>,
}

pub struct MockSocketServer {
    addr: SocketAddr,
    state: Arc<State>,
    task: JoinHandle<()>,
}

impl MockSocketServer {
    pub async fn start() -> Self {
        Self::with_behaviors(Vec::new()).await
    }

    /// Connections beyond the scripted ones are accepted.
    pub async fn with_behaviors(behaviors: Vec<Behavior>) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let state = Arc::new(State::default());
        state.behaviors.lock().extend(behaviors);

        let task = tokio::spawn({
            let state = state.clone();
            async move {
                let mut connection = 0usize;
                while let Ok((stream, _)) = listener.accept().await {
                    connection += 1;
                    state.attempts.fetch_add(1, Ordering::SeqCst);
                    let behavior = state
                        .behaviors
                        .lock()
                        .pop_front()
                        .unwrap_or(Behavior::Accept);
                    tokio::spawn(serve(stream, behavior, connection, state.clone()));
                }
            }
        });

        Self { addr, state, task }
    }

    /// Base URL for `SyncConfig::server_url`.
    pub fn url(&self) -> String {
        format!("http://{}", self.addr)
    }

    /// TCP connections seen so far.
    pub fn attempts(&self) -> usize {
        self.state.attempts.load(Ordering::SeqCst)
    }

    /// Tokens presented in namespace connect packets.
    pub fn tokens(&self) -> Vec<String> {
        self.state.tokens.lock().clone()
    }

    /// Text frames received after the handshake, across all sessions.
    pub fn frames(&self) -> Vec<String> {
        self.state.frames.lock().clone()
    }

    /// Number of received client events with the given name.
    pub fn event_count(&self, name: &str) -> usize {
        let prefix = format!("42[\"{name}\"");
        self.frames().iter().filter(|f| f.starts_with(&prefix)).count()
    }

    /// Send a raw Engine.IO frame to the current session.
    pub fn send_raw(&self, frame: impl Into<String>) {
        if let Some(tx) = self.state.current.lock().as_ref() {
            let _ = tx.send(Control::Frame(frame.into()));
        }
    }

    /// Emit a Socket.IO event on the default namespace.
    pub fn emit(&self, name: &str, payload: serde_json::Value) {
        let args = serde_json::json!([name, payload]);
        self.send_raw(format!("42{args}"));
    }

    /// Emit a Socket.IO event without a payload.
    pub fn emit_bare(&self, name: &str) {
        let args = serde_json::json!([name]);
        self.send_raw(format!("42{args}"));
    }

    /// Abruptly drop the current session's TCP connection.
    pub fn drop_session(&self) {
        if let Some(tx) = self.state.current.lock().take() {
            let _ = tx.send(Control::Drop);
        }
    }
}

impl Drop for MockSocketServer {
    fn drop(&mut self) {
        self.task.abort();
    }
}

async fn serve(stream: TcpStream, behavior: Behavior, connection: usize, state: Arc<State>) {
    let hang_up = matches!(behavior, Behavior::AcceptThenDrop);
    let reject = match behavior {
        Behavior::Refuse => return,
        Behavior::Unauthorized => {
            let callback = |_: &Request, _: Response| -> Result<Response, ErrorResponse> {
                let mut response = ErrorResponse::new(Some("unauthorized".to_string()));
                *response.status_mut() = StatusCode::UNAUTHORIZED;
                Err(response)
            };
            let _ = accept_hdr_async(stream, callback).await;
            return;
        }
        Behavior::RejectAuth(message) => Some(message),
        Behavior::Accept | Behavior::AcceptThenDrop => None,
    };

    let Ok(mut ws) = accept_async(stream).await else {
        return;
    };
    let open = r#"0{"sid":"engine-sid","upgrades":[],"pingInterval":25000,"pingTimeout":20000,"maxPayload":1000000}"#;
    if ws.send(Message::Text(open.into())).await.is_err() {
        return;
    }

    // Wait for the namespace connect.
    loop {
        match ws.next().await {
            Some(Ok(Message::Text(text))) if text.as_str().starts_with("40") => {
                let auth: serde_json::Value =
                    serde_json::from_str(&text.as_str()[2..]).unwrap_or_default();
                if let Some(token) = auth.get("token").and_then(|t| t.as_str()) {
                    state.tokens.lock().push(token.to_string());
                }
                break;
            }
            Some(Ok(_)) => continue,
            _ => return,
        }
    }

    if let Some(message) = reject {
        let frame = format!("44{}", serde_json::json!({ "message": message }));
        let _ = ws.send(Message::Text(frame.into())).await;
        let _ = ws.close(None).await;
        return;
    }

    let ack = format!("40{}", serde_json::json!({ "sid": format!("socket-{connection}") }));
    if hang_up {
        let _ = ws.send(Message::Text(ack.into())).await;
        return;
    }

    // Registered before the ack so pushes right after Connected are delivered.
    let (tx, mut rx) = mpsc::unbounded_channel();
    *state.current.lock() = Some(tx);

    if ws.send(Message::Text(ack.into())).await.is_err() {
        return;
    }

    loop {
        tokio::select! {
            control = rx.recv() => match control {
                Some(Control::Frame(frame)) => {
                    if ws.send(Message::Text(frame.into())).await.is_err() {
                        break;
                    }
                }
                Some(Control::Drop) | None => break,
            },
            incoming = ws.next() => match incoming {
                Some(Ok(Message::Text(text))) => state.frames.lock().push(text.to_string()),
                Some(Ok(Message::Close(_))) | None | Some(Err(_)) => break,
                Some(Ok(_)) => {}
            },
        }
    }
}

/// Poll `condition` until it holds or five seconds pass.
pub async fn eventually(mut condition: impl FnMut() -> bool) {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while !condition() {
        assert!(
            tokio::time::Instant::now() < deadline,
            "condition not met within 5s"
        );
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
}

/// Await `future` with a five second bound.
pub async fn within<T>(future: impl Future<Output = T>) -> T {
    tokio::time::timeout(Duration::from_secs(5), future)
        .await
        .expect("timed out")
}
