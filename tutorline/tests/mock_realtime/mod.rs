//! Mock realtime endpoint
//!
//! A local WebSocket server speaking the realtime event protocol. It records
//! handshake headers and every client event, greets each connection with
//! `session.created`, acknowledges `session.update`, and lets the test push
//! server events, close with a code, or drop the socket without a close frame.

// Each test binary uses a different subset of the helpers
#![allow(dead_code)]

use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use parking_lot::Mutex;
use serde_json::{Value, json};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio_tungstenite::accept_hdr_async;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::http;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;

/// Action pushed to the live connection.
#[derive(Debug)]
pub enum ServerCommand {
    Text(String),
    Close(u16, String),
    Drop,
}

/// Client event received by the server.
#[derive(Debug, Clone)]
pub struct Received {
    pub connection: u32,
    pub event: Value,
}

/// Handshake details of one connection.
#[derive(Debug, Clone)]
pub struct Handshake {
    pub uri: String,
    pub authorization: Option<String>,
    pub beta: Option<String>,
}

#[derive(Default)]
struct MockState {
    connections: AtomicU32,
    handshakes: Mutex<Vec<Handshake>>,
    received: Mutex<Vec<Received>>,
    control: Mutex<Option<mpsc::UnboundedSender<ServerCommand>>>,
    reject_status: Mutex<Option<u16>>,
    closed_by_client: AtomicU32,
}

pub struct MockRealtimeServer {
    url: String,
    state: Arc<MockState>,
}

impl MockRealtimeServer {
    pub async fn start() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let state = Arc::new(MockState::default());

        let accept_state = state.clone();
        tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                tokio::spawn(handle_connection(stream, accept_state.clone()));
            }
        });

        Self {
            url: format!("ws://{addr}/v1/realtime"),
            state,
        }
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    /// Successful WebSocket upgrades so far.
    pub fn connections(&self) -> u32 {
        self.state.connections.load(Ordering::SeqCst)
    }

    /// Connections the client closed with a close frame.
    pub fn closed_by_client(&self) -> u32 {
        self.state.closed_by_client.load(Ordering::SeqCst)
    }

    pub fn handshakes(&self) -> Vec<Handshake> {
        self.state.handshakes.lock().clone()
    }

    pub fn received(&self) -> Vec<Received> {
        self.state.received.lock().clone()
    }

    /// Event types received, in order.
    pub fn received_types(&self) -> Vec<String> {
        self.received()
            .iter()
            .filter_map(|r| r.event["type"].as_str().map(str::to_string))
            .collect()
    }

    /// Reject further handshakes with this HTTP status.
    pub fn reject_with(&self, status: u16) {
        *self.state.reject_status.lock() = Some(status);
    }

    pub fn send(&self, event: Value) {
        self.command(ServerCommand::Text(event.to_string()));
    }

    pub fn close_with(&self, code: u16, reason: &str) {
        self.command(ServerCommand::Close(code, reason.to_string()));
    }

    /// Drop the TCP connection without a close frame.
    pub fn drop_connection(&self) {
        self.command(ServerCommand::Drop);
    }

    fn command(&self, command: ServerCommand) {
        let control = self.state.control.lock().clone();
        control
            .expect("no live connection")
            .send(command)
            .expect("connection task gone");
    }
}

async fn handle_connection(stream: TcpStream, state: Arc<MockState>) {
    let reject = *state.reject_status.lock();
    let callback_state = state.clone();
    let callback = move |request: &Request, response: Response| -> Result<Response, ErrorResponse> {
        let header = |name: &str| {
            request
                .headers()
                .get(name)
                .and_then(|v| v.to_str().ok())
                .map(str::to_string)
        };
        callback_state.handshakes.lock().push(Handshake {
            uri: request.uri().to_string(),
            authorization: header("authorization"),
            beta: header("openai-beta"),
        });
        match reject {
            Some(status) => Err(http::Response::builder()
                .status(status)
                .body(Some("rejected".to_string()))
                .unwrap()),
            None => Ok(response),
        }
    };

    let Ok(ws) = accept_hdr_async(stream, callback).await else {
        return;
    };
    let (mut write, mut read) = ws.split();

    let (tx, mut rx) = mpsc::unbounded_channel();
    *state.control.lock() = Some(tx);
    let connection = state.connections.fetch_add(1, Ordering::SeqCst) + 1;

    let created = json!({
        "type": "session.created",
        "session": { "id": format!("sess_{connection}"), "model": "mock" }
    });
    if write.send(Message::Text(created.to_string().into())).await.is_err() {
        return;
    }

    loop {
        tokio::select! {
            command = rx.recv() => match command {
                Some(ServerCommand::Text(text)) => {
                    if write.send(Message::Text(text.into())).await.is_err() {
                        return;
                    }
                }
                Some(ServerCommand::Close(code, reason)) => {
                    let frame = CloseFrame {
                        code: CloseCode::from(code),
                        reason: reason.into(),
                    };
                    let _ = write.send(Message::Close(Some(frame))).await;
                    // Let the client observe the frame before the socket goes
                    tokio::time::sleep(Duration::from_millis(50)).await;
                    return;
                }
                Some(ServerCommand::Drop) | None => return,
            },

            message = read.next() => match message {
                Some(Ok(Message::Text(text))) => {
                    let Ok(event) = serde_json::from_str::<Value>(text.as_str()) else {
                        continue;
                    };
                    let is_update = event["type"] == "session.update";
                    state.received.lock().push(Received { connection, event });
                    if is_update {
                        let updated = json!({ "type": "session.updated", "session": {} });
                        if write.send(Message::Text(updated.to_string().into())).await.is_err() {
                            return;
                        }
                    }
                }
                Some(Ok(Message::Close(_))) => {
                    state.closed_by_client.fetch_add(1, Ordering::SeqCst);
                    return;
                }
                Some(Ok(_)) => {}
                Some(Err(_)) | None => return,
            }
        }
    }
}

/// Poll until `condition` holds or the timeout expires.
pub async fn wait_until(timeout: Duration, mut condition: impl FnMut() -> bool) -> bool {
    let deadline = tokio::time::Instant::now() + timeout;
    while tokio::time::Instant::now() < deadline {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    condition()
}
