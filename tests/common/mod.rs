//! Common test utilities
//!
//! Provides a mock CareLink event server that tests point the live client
//! at: it records every inbound frame, can push frames to connected
//! clients, and can close connections with a chosen close code.

#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures_util::{SinkExt, StreamExt};
use parking_lot::RwLock;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tokio_tungstenite::{accept_async, WebSocketStream};

/// How the mock server treats incoming connections
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServerMode {
    /// Accept the handshake and answer `{"type":"ping"}` with a pong
    AnswerPings,
    /// Accept the handshake but never answer pings
    SilencePings,
    /// Accept TCP, then drop the socket so the handshake fails
    RejectHandshake,
}

enum ConnCommand {
    Send(String),
    Close(u16),
}

/// Mock event server for integration tests
pub struct MockEventServer {
    addr: SocketAddr,
    shutdown_tx: Option<mpsc::Sender<()>>,
    received: Arc<RwLock<Vec<String>>>,
    accepted_at: Arc<RwLock<Vec<Instant>>>,
    connections: Arc<RwLock<Vec<mpsc::Sender<ConnCommand>>>>,
}

impl MockEventServer {
    /// Start a mock server on an ephemeral port
    pub async fn start(mode: ServerMode) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (shutdown_tx, mut shutdown_rx) = mpsc::channel::<()>(1);
        let received = Arc::new(RwLock::new(Vec::new()));
        let accepted_at = Arc::new(RwLock::new(Vec::new()));
        let connections: Arc<RwLock<Vec<mpsc::Sender<ConnCommand>>>> =
            Arc::new(RwLock::new(Vec::new()));

        let received_task = received.clone();
        let accepted_task = accepted_at.clone();
        let connections_task = connections.clone();

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    accept_result = listener.accept() => {
                        if let Ok((stream, _)) = accept_result {
                            accepted_task.write().push(Instant::now());
                            if mode == ServerMode::RejectHandshake {
                                drop(stream);
                                continue;
                            }
                            let received = received_task.clone();
                            let (conn_tx, conn_rx) = mpsc::channel(32);
                            connections_task.write().push(conn_tx);
                            tokio::spawn(async move {
                                if let Ok(ws_stream) = accept_async(stream).await {
                                    handle_connection(ws_stream, received, conn_rx, mode).await;
                                }
                            });
                        }
                    }
                    _ = shutdown_rx.recv() => {
                        break;
                    }
                }
            }
        });

        Self {
            addr,
            shutdown_tx: Some(shutdown_tx),
            received,
            accepted_at,
            connections,
        }
    }

    /// The WebSocket URL for this mock server
    pub fn ws_url(&self) -> String {
        format!("ws://{}", self.addr)
    }

    /// Text frames received by the server, in order
    pub fn frames(&self) -> Vec<String> {
        self.received.read().clone()
    }

    /// Total connections accepted so far
    pub fn connection_count(&self) -> usize {
        self.accepted_at.read().len()
    }

    /// When each connection was accepted
    pub fn accept_times(&self) -> Vec<Instant> {
        self.accepted_at.read().clone()
    }

    /// Broadcast a text frame to every live connection
    pub async fn push(&self, text: &str) {
        let senders = self.connections.read().clone();
        for tx in senders {
            let _ = tx.send(ConnCommand::Send(text.to_string())).await;
        }
    }

    /// Close every live connection with `code`
    pub async fn close_all(&self, code: u16) {
        let senders = self.connections.read().clone();
        for tx in senders {
            let _ = tx.send(ConnCommand::Close(code)).await;
        }
    }

    /// Poll until at least `n` connections have been accepted
    pub async fn wait_for_connections(&self, n: usize, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        while Instant::now() < deadline {
            if self.connection_count() >= n {
                return true;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        self.connection_count() >= n
    }

    /// Poll until a received frame satisfies `pred`
    pub async fn wait_for_frame(&self, pred: impl Fn(&str) -> bool, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        while Instant::now() < deadline {
            if self.frames().iter().any(|frame| pred(frame)) {
                return true;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        self.frames().iter().any(|frame| pred(frame))
    }
}

impl Drop for MockEventServer {
    fn drop(&mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.try_send(());
        }
    }
}

/// Handle one accepted WebSocket connection
async fn handle_connection(
    ws_stream: WebSocketStream<TcpStream>,
    received: Arc<RwLock<Vec<String>>>,
    mut commands: mpsc::Receiver<ConnCommand>,
    mode: ServerMode,
) {
    let (mut write, mut read) = ws_stream.split();

    loop {
        tokio::select! {
            msg = read.next() => {
                match msg {
                    Some(Ok(WsMessage::Text(text))) => {
                        received.write().push(text.clone());
                        if mode == ServerMode::AnswerPings {
                            if let Ok(value) = serde_json::from_str::<serde_json::Value>(&text) {
                                if value.get("type").and_then(|t| t.as_str()) == Some("ping") {
                                    let pong = r#"{"type":"pong"}"#.to_string();
                                    if write.send(WsMessage::Text(pong)).await.is_err() {
                                        break;
                                    }
                                }
                            }
                        }
                    }
                    Some(Ok(WsMessage::Close(_))) | Some(Err(_)) | None => break,
                    _ => {}
                }
            }

            cmd = commands.recv() => {
                match cmd {
                    Some(ConnCommand::Send(text)) => {
                        if write.send(WsMessage::Text(text)).await.is_err() {
                            break;
                        }
                    }
                    Some(ConnCommand::Close(code)) => {
                        let frame = CloseFrame {
                            code: CloseCode::from(code),
                            reason: "test close".into(),
                        };
                        let _ = write.send(WsMessage::Close(Some(frame))).await;
                        break;
                    }
                    None => break,
                }
            }
        }
    }
}
