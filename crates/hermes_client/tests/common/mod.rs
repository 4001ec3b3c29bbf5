//! Helpers shared by the async integration tests.

#![allow(dead_code)]

use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use hermes_client::{ClientError, ClientStatus, FrameHandler, Settings, StreamingClient};
use tokio::net::TcpListener;
use tokio_tungstenite::accept_async;
use tokio_tungstenite::tungstenite::Message;

/// What a handler saw, in order.
#[derive(Debug, Clone, PartialEq)]
pub enum Seen {
    Sources(Vec<String>, Option<String>),
    Token(String, Option<String>),
    Done,
    Error(String),
}

#[derive(Clone, Default)]
pub struct RecordingHandler {
    pub seen: Arc<Mutex<Vec<Seen>>>,
}

impl RecordingHandler {
    pub fn events(&self) -> Vec<Seen> {
        self.seen.lock().unwrap().clone()
    }
}

impl FrameHandler for RecordingHandler {
    fn on_sources(&mut self, sources: Vec<String>, mode: Option<String>) {
        self.seen.lock().unwrap().push(Seen::Sources(sources, mode));
    }

    fn on_token(&mut self, content: String, mode: Option<String>) {
        self.seen.lock().unwrap().push(Seen::Token(content, mode));
    }

    fn on_done(&mut self) {
        self.seen.lock().unwrap().push(Seen::Done);
    }

    fn on_error(&mut self, error: ClientError) {
        self.seen.lock().unwrap().push(Seen::Error(error.to_string()));
    }
}

/// Settings for tests: no health probe, fast reconnects.
pub fn test_settings(api_url: &str, ws_url: &str) -> Settings {
    Settings {
        api_url: api_url.into(),
        ws_url: ws_url.into(),
        health_check: false,
        connect_timeout: Duration::from_secs(2),
        health_timeout: Duration::from_millis(500),
        max_reconnect_attempts: 3,
        reconnect_backoff: Duration::from_millis(20),
    }
}

/// Pick a free port by binding to :0 and releasing it.
pub fn free_port() -> u16 {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    listener.local_addr().unwrap().port()
}

/// Bind a listener and spawn a WebSocket server that accepts one connection
/// and, for each entry of `turns`, waits for a question then replies with
/// that entry's frames. Returns the ws base URL.
pub async fn spawn_ws_server(turns: Vec<Vec<&'static str>>) -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    tokio::spawn(async move {
        let (tcp, _) = listener.accept().await.unwrap();
        let ws = accept_async(tcp).await.unwrap();
        let (mut write, mut read) = ws.split();
        for frames in turns {
            let _ = read.next().await;
            for frame in frames {
                write.send(Message::Text(frame.into())).await.unwrap();
            }
        }
        // Hold the connection open until the client goes away.
        while read.next().await.is_some() {}
    });
    format!("ws://127.0.0.1:{}", port)
}

pub async fn wait_for(
    client: &StreamingClient,
    f: impl FnMut(&ClientStatus) -> bool,
) -> ClientStatus {
    tokio::time::timeout(Duration::from_secs(5), client.wait_for(f))
        .await
        .expect("status condition timed out")
        .expect("client alive")
}
