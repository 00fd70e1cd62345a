/*
[INPUT]:  Test configuration and mock server requirements
[OUTPUT]: Shared test utilities, fixtures, and an in-process mock feed
[POS]:    Test infrastructure - shared across all test modules
[UPDATE]: When adding new test patterns or fixtures
*/

//! Common test utilities for huobi-stream-adapter tests

#![allow(dead_code)]

use std::collections::HashMap;
use std::io::Write;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use flate2::Compression;
use flate2::write::GzEncoder;
use futures_util::{SinkExt, StreamExt};
use huobi_stream_adapter::SessionConfig;
use serde_json::{Value, json};
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::accept_async;
use tokio_tungstenite::tungstenite::Message;
use wiremock::MockServer;

pub const TEST_ACCESS_KEY: &str = "e2xxxxxx-99xxxxxx-84xxxxxx-7xxxx";
pub const TEST_SECRET: &str = "b0xxxxxx-c6xxxxxx-94xxxxxx-dxxxx";

/// Setup a mock HTTP server for testing
pub async fn setup_mock_server() -> MockServer {
    MockServer::start().await
}

/// Session tuned for fast tests; heartbeat stays out of the way
pub fn test_session_config() -> SessionConfig {
    SessionConfig {
        heartbeat_interval: Duration::from_secs(5),
        receive_timeout: Duration::from_secs(30),
        auto_reconnect: true,
        reconnect_delay: Duration::from_millis(20),
        queue_capacity: 64,
        request_timeout: Some(Duration::from_secs(5)),
    }
}

pub fn gzip(text: &str) -> Vec<u8> {
    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(text.as_bytes()).unwrap();
    encoder.finish().unwrap()
}

/// Poll `condition` every 10ms for up to 5s
pub async fn wait_until<F: FnMut() -> bool>(mut condition: F) -> bool {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while tokio::time::Instant::now() < deadline {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    condition()
}

/// How the mock feed answers client frames
#[derive(Debug, Clone)]
pub struct FeedBehavior {
    pub ack_subscriptions: bool,
    pub answer_requests: bool,
    /// The first N connections never answer pings
    pub silent_connections: usize,
}

impl Default for FeedBehavior {
    fn default() -> Self {
        Self {
            ack_subscriptions: true,
            answer_requests: true,
            silent_connections: 0,
        }
    }
}

#[derive(Debug, Default)]
struct Journal {
    connections: usize,
    frames: Vec<(usize, Value)>,
}

enum Command {
    Send(Value),
    SendRaw(Vec<u8>),
    Drop,
}

/// In-process Huobi-style feed: gzips every frame it sends and records every
/// frame the client sends, tagged with the connection index.
pub struct MockFeedServer {
    addr: SocketAddr,
    journal: Arc<Mutex<Journal>>,
    controls: Arc<Mutex<HashMap<usize, mpsc::UnboundedSender<Command>>>>,
    accept_task: JoinHandle<()>,
}

impl MockFeedServer {
    pub async fn start() -> Self {
        Self::with_behavior(FeedBehavior::default()).await
    }

    pub async fn with_behavior(behavior: FeedBehavior) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let journal = Arc::new(Mutex::new(Journal::default()));
        let controls = Arc::new(Mutex::new(HashMap::new()));

        let accept_task = tokio::spawn({
            let journal = journal.clone();
            let controls = controls.clone();
            async move {
                while let Ok((tcp, _)) = listener.accept().await {
                    let Ok(ws) = accept_async(tcp).await else {
                        continue;
                    };
                    let conn = {
                        let mut journal = journal.lock().unwrap();
                        journal.connections += 1;
                        journal.connections - 1
                    };
                    let (tx, rx) = mpsc::unbounded_channel();
                    controls.lock().unwrap().insert(conn, tx);
                    tokio::spawn(serve_connection(
                        conn,
                        ws,
                        rx,
                        behavior.clone(),
                        journal.clone(),
                    ));
                }
            }
        });

        Self {
            addr,
            journal,
            controls,
            accept_task,
        }
    }

    pub fn url(&self) -> String {
        format!("ws://{}", self.addr)
    }

    pub fn connections(&self) -> usize {
        self.journal.lock().unwrap().connections
    }

    pub fn frames_on(&self, conn: usize) -> Vec<Value> {
        self.journal
            .lock()
            .unwrap()
            .frames
            .iter()
            .filter(|(c, _)| *c == conn)
            .map(|(_, frame)| frame.clone())
            .collect()
    }

    /// Topics of every `sub` frame seen on `conn`, in arrival order
    pub fn subs_on(&self, conn: usize) -> Vec<String> {
        self.frames_on(conn)
            .iter()
            .filter_map(|frame| frame.get("sub").and_then(Value::as_str))
            .map(str::to_string)
            .collect()
    }

    /// `(topic, id)` of every `req` frame seen on `conn`
    pub fn requests_on(&self, conn: usize) -> Vec<(String, String)> {
        self.frames_on(conn)
            .iter()
            .filter_map(|frame| {
                let topic = frame.get("req")?.as_str()?;
                let id = frame.get("id")?.as_str()?;
                Some((topic.to_string(), id.to_string()))
            })
            .collect()
    }

    pub fn pongs_on(&self, conn: usize) -> Vec<i64> {
        self.frames_on(conn)
            .iter()
            .filter_map(|frame| frame.get("pong").and_then(Value::as_i64))
            .collect()
    }

    /// Push a frame to the client on `conn`
    pub fn send(&self, conn: usize, frame: Value) {
        if let Some(tx) = self.controls.lock().unwrap().get(&conn) {
            let _ = tx.send(Command::Send(frame));
        }
    }

    /// Push `bytes` on `conn` as a binary frame without compressing them
    pub fn send_raw(&self, conn: usize, bytes: Vec<u8>) {
        if let Some(tx) = self.controls.lock().unwrap().get(&conn) {
            let _ = tx.send(Command::SendRaw(bytes));
        }
    }

    /// Close `conn` from the server side
    pub fn drop_connection(&self, conn: usize) {
        if let Some(tx) = self.controls.lock().unwrap().remove(&conn) {
            let _ = tx.send(Command::Drop);
        }
    }
}

impl Drop for MockFeedServer {
    fn drop(&mut self) {
        self.accept_task.abort();
    }
}

async fn serve_connection(
    conn: usize,
    ws: tokio_tungstenite::WebSocketStream<tokio::net::TcpStream>,
    mut commands: mpsc::UnboundedReceiver<Command>,
    behavior: FeedBehavior,
    journal: Arc<Mutex<Journal>>,
) {
    let (mut write, mut read) = ws.split();
    loop {
        tokio::select! {
            command = commands.recv() => match command {
                Some(Command::Send(frame)) => {
                    if write.send(Message::binary(gzip(&frame.to_string()))).await.is_err() {
                        break;
                    }
                }
                Some(Command::SendRaw(bytes)) => {
                    if write.send(Message::binary(bytes)).await.is_err() {
                        break;
                    }
                }
                Some(Command::Drop) | None => {
                    let _ = write.send(Message::Close(None)).await;
                    break;
                }
            },
            message = read.next() => {
                let text = match message {
                    Some(Ok(Message::Text(text))) => text,
                    Some(Ok(Message::Close(_))) | Some(Err(_)) | None => break,
                    Some(Ok(_)) => continue,
                };
                let Ok(frame) = serde_json::from_str::<Value>(text.as_str()) else {
                    continue;
                };
                journal.lock().unwrap().frames.push((conn, frame.clone()));

                if let Some(reply) = answer(conn, &frame, &behavior) {
                    if write.send(Message::binary(gzip(&reply.to_string()))).await.is_err() {
                        break;
                    }
                }
            }
        }
    }
}

/// Canned server reply to one client frame
fn answer(conn: usize, frame: &Value, behavior: &FeedBehavior) -> Option<Value> {
    if let Some(ts) = frame.get("ping").and_then(Value::as_i64) {
        if conn < behavior.silent_connections {
            return None;
        }
        return Some(json!({ "pong": ts }));
    }

    if let Some(topic) = frame.get("sub").and_then(Value::as_str) {
        if topic.starts_with("bad.") {
            return Some(json!({
                "id": topic,
                "subbed": topic,
                "status": "error",
                "err-msg": format!("invalid topic {topic}"),
            }));
        }
        if topic.starts_with("notice.") {
            return Some(json!({
                "id": topic,
                "status": "error",
                "err-code": "bad-request",
                "err-msg": "bad-request",
            }));
        }
        if behavior.ack_subscriptions {
            return Some(json!({ "id": topic, "subbed": topic, "status": "ok", "ts": 1 }));
        }
        return None;
    }

    if let Some(topic) = frame.get("req").and_then(Value::as_str) {
        if !behavior.answer_requests {
            return None;
        }
        let id = frame.get("id").and_then(Value::as_str).unwrap_or_default();
        if topic.starts_with("bad.") {
            return Some(json!({
                "rep": topic,
                "id": id,
                "status": "error",
                "err-msg": "invalid request",
            }));
        }
        return Some(json!({
            "rep": topic,
            "id": id,
            "status": "ok",
            "data": { "topic": topic },
        }));
    }

    None
}

/// Push frame for `channel` as the feed would send it
pub fn push_frame(channel: &str, ts: i64) -> Value {
    json!({ "ch": channel, "ts": ts, "tick": { "id": ts } })
}
