//! In-process Socket.IO server for integration tests.
#![allow(dead_code)]

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use axum::extract::ws::{Message, WebSocket};
use axum::extract::{Query, State, WebSocketUpgrade};
use axum::response::IntoResponse;
use axum::routing::get;
use dashmap::DashMap;
use futures::{SinkExt, StreamExt};
use serde_json::{Value, json};
use tokio::sync::{Mutex, mpsc};

use trivia_client::config::{ClientConfig, ReconnectConfig};

/// Something the mock server observed.
#[derive(Debug, Clone, PartialEq)]
pub enum Record {
    Opened { sid: String, query: HashMap<String, String> },
    Connected { sid: String },
    Event { sid: String, name: String, data: Value },
    Pong { sid: String },
    ClientDisconnect { sid: String },
    Closed { sid: String },
}

/// Scripted replies: given the sender's sid, event name and data, the frames
/// to send back to that socket.
pub type Script = Arc<dyn Fn(&str, &str, &Value) -> Vec<String> + Send + Sync>;

#[derive(Clone)]
pub struct MockOptions {
    pub ping_interval: u64,
    pub ping_timeout: u64,
    pub refuse: Option<String>,
    pub script: Script,
}

impl Default for MockOptions {
    fn default() -> Self {
        Self {
            ping_interval: 25_000,
            ping_timeout: 20_000,
            refuse: None,
            script: Arc::new(|_, _, _| Vec::new()),
        }
    }
}

enum Outgoing {
    Frame(String),
    Close,
}

struct ServerState {
    options: MockOptions,
    sockets: DashMap<String, mpsc::UnboundedSender<Outgoing>>,
    records: mpsc::UnboundedSender<Record>,
}

pub struct MockServer {
    pub addr: SocketAddr,
    state: Arc<ServerState>,
    records: Mutex<mpsc::UnboundedReceiver<Record>>,
}

impl MockServer {
    pub async fn start(options: MockOptions) -> Self {
        let (records_tx, records_rx) = mpsc::unbounded_channel();
        let state = Arc::new(ServerState {
            options,
            sockets: DashMap::new(),
            records: records_tx,
        });

        let app = Router::new()
            .route("/socket.io/", get(ws_handler))
            .with_state(state.clone());
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        Self {
            addr,
            state,
            records: Mutex::new(records_rx),
        }
    }

    pub fn url(&self) -> String {
        format!("http://{}", self.addr)
    }

    /// Client config pointed at this server with fast reconnects.
    pub fn client_config(&self) -> ClientConfig {
        ClientConfig {
            server_url: self.url(),
            player_name: Some("ada".into()),
            connect_timeout_ms: 2_000,
            request_timeout_ms: 2_000,
            reconnection: ReconnectConfig {
                enabled: true,
                attempts: 3,
                delay_ms: 20,
                delay_max_ms: 50,
                randomization_factor: 0.0,
            },
            ..ClientConfig::default()
        }
    }

    pub async fn next_record(&self) -> Record {
        let mut records = self.records.lock().await;
        tokio::time::timeout(Duration::from_secs(5), records.recv())
            .await
            .expect("timed out waiting for the server")
            .expect("server stopped")
    }

    /// Skip records until one matches.
    pub async fn expect(&self, pred: impl Fn(&Record) -> bool) -> Record {
        loop {
            let record = self.next_record().await;
            if pred(&record) {
                return record;
            }
        }
    }

    pub async fn connected_sid(&self) -> String {
        match self.expect(|r| matches!(r, Record::Connected { .. })).await {
            Record::Connected { sid } => sid,
            _ => unreachable!(),
        }
    }

    pub async fn next_event(&self) -> (String, Value) {
        match self.expect(|r| matches!(r, Record::Event { .. })).await {
            Record::Event { name, data, .. } => (name, data),
            _ => unreachable!(),
        }
    }

    pub fn send_raw(&self, sid: &str, frame: impl Into<String>) {
        if let Some(peer) = self.state.sockets.get(sid) {
            let _ = peer.send(Outgoing::Frame(frame.into()));
        }
    }

    pub fn emit(&self, sid: &str, name: &str, data: Value) {
        self.send_raw(sid, event_frame(name, data));
    }

    /// Socket.IO disconnect of the namespace.
    pub fn kick(&self, sid: &str) {
        self.send_raw(sid, "41");
    }

    /// Close the websocket without a namespace disconnect.
    pub fn drop_transport(&self, sid: &str) {
        if let Some(peer) = self.state.sockets.get(sid) {
            let _ = peer.send(Outgoing::Close);
        }
    }

    pub fn socket_count(&self) -> usize {
        self.state.sockets.len()
    }
}

pub fn event_frame(name: &str, data: Value) -> String {
    format!("42{}", json!([name, data]))
}

async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<Arc<ServerState>>,
    Query(params): Query<HashMap<String, String>>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state, params))
}

async fn handle_socket(socket: WebSocket, state: Arc<ServerState>, query: HashMap<String, String>) {
    let (mut sender, mut receiver) = socket.split();
    let sid = uuid::Uuid::new_v4().simple().to_string();
    let (tx, mut rx) = mpsc::unbounded_channel();
    state.sockets.insert(sid.clone(), tx);
    let _ = state.records.send(Record::Opened { sid: sid.clone(), query });

    let open = json!({
        "sid": sid,
        "upgrades": [],
        "pingInterval": state.options.ping_interval,
        "pingTimeout": state.options.ping_timeout,
        "maxPayload": 1_000_000,
    });
    if sender.send(Message::Text(format!("0{open}").into())).await.is_err() {
        state.sockets.remove(&sid);
        return;
    }

    loop {
        tokio::select! {
            out = rx.recv() => match out {
                Some(Outgoing::Frame(frame)) => {
                    if sender.send(Message::Text(frame.into())).await.is_err() {
                        break;
                    }
                }
                Some(Outgoing::Close) | None => {
                    let _ = sender.send(Message::Close(None)).await;
                    break;
                }
            },
            msg = receiver.next() => {
                let text = match msg {
                    Some(Ok(Message::Text(text))) => text,
                    Some(Ok(Message::Close(_))) | Some(Err(_)) | None => break,
                    Some(Ok(_)) => continue,
                };
                let text = text.as_str();

                if text == "40" || text.starts_with("40{") {
                    let reply = match &state.options.refuse {
                        Some(message) => format!("44{}", json!({ "message": message })),
                        None => format!("40{}", json!({ "sid": sid })),
                    };
                    let _ = sender.send(Message::Text(reply.into())).await;
                    if state.options.refuse.is_none() {
                        let _ = state.records.send(Record::Connected { sid: sid.clone() });
                    }
                } else if text == "3" {
                    let _ = state.records.send(Record::Pong { sid: sid.clone() });
                } else if text == "41" {
                    let _ = state.records.send(Record::ClientDisconnect { sid: sid.clone() });
                } else if let Some(body) = text.strip_prefix("42") {
                    let Ok(Value::Array(items)) = serde_json::from_str::<Value>(body) else {
                        continue;
                    };
                    let name = items.first().and_then(Value::as_str).unwrap_or_default().to_string();
                    let data = items.get(1).cloned().unwrap_or(Value::Null);
                    for frame in (state.options.script)(&sid, &name, &data) {
                        let _ = sender.send(Message::Text(frame.into())).await;
                    }
                    let _ = state.records.send(Record::Event { sid: sid.clone(), name, data });
                }
            }
        }
    }

    state.sockets.remove(&sid);
    let _ = state.records.send(Record::Closed { sid });
}
