//! In-process SignalR gateway for integration tests.
//!
//! Speaks just enough of the JSON hub protocol to complete the handshake,
//! record client invocations, push server events and drop connections on
//! command.

#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use parking_lot::Mutex;
use serde_json::{Value, json};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::broadcast;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};

use projectx_realtime::RealtimeConfig;

const RS: char = '\u{1e}';

/// One invocation received from the client.
#[derive(Debug, Clone, PartialEq)]
pub struct Invoke {
    pub target: String,
    pub arguments: Vec<Value>,
}

#[derive(Debug, Clone)]
enum Command {
    Push(String),
    Drop,
}

/// A fake gateway serving both hub paths on one port.
pub struct FakeGateway {
    addr: SocketAddr,
    invokes: Arc<Mutex<Vec<Invoke>>>,
    requests: Arc<Mutex<Vec<String>>>,
    connections: Arc<AtomicUsize>,
    handshake_error: Arc<Mutex<Option<String>>>,
    control: broadcast::Sender<Command>,
}

impl FakeGateway {
    /// Bind to a random local port and start accepting.
    pub async fn start() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (control, _) = broadcast::channel(64);

        let gateway = Self {
            addr,
            invokes: Arc::new(Mutex::new(Vec::new())),
            requests: Arc::new(Mutex::new(Vec::new())),
            connections: Arc::new(AtomicUsize::new(0)),
            handshake_error: Arc::new(Mutex::new(None)),
            control,
        };

        let invokes = Arc::clone(&gateway.invokes);
        let requests = Arc::clone(&gateway.requests);
        let connections = Arc::clone(&gateway.connections);
        let handshake_error = Arc::clone(&gateway.handshake_error);
        let control = gateway.control.clone();
        tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                tokio::spawn(serve(
                    stream,
                    Arc::clone(&invokes),
                    Arc::clone(&requests),
                    Arc::clone(&connections),
                    handshake_error.lock().clone(),
                    control.subscribe(),
                ));
            }
        });

        gateway
    }

    /// Hub URL in the `http://` form the client maps to `ws://`.
    pub fn hub_url(&self, path: &str) -> String {
        format!("http://{}{path}", self.addr)
    }

    /// Client configuration pointed at this gateway with fast backoff.
    pub fn config(&self) -> RealtimeConfig {
        RealtimeConfig {
            market_hub_url: self.hub_url("/hubs/market"),
            user_hub_url: self.hub_url("/hubs/user"),
            reconnect_delay_initial: Duration::from_millis(20),
            reconnect_delay_max: Duration::from_millis(100),
            connect_timeout: Duration::from_secs(2),
            auto_connect: false,
            ..RealtimeConfig::default()
        }
    }

    /// Reject later handshakes with `error`.
    pub fn reject_handshakes(&self, error: &str) {
        *self.handshake_error.lock() = Some(error.to_string());
    }

    /// Push an invocation record to every open connection.
    pub fn push_event(&self, target: &str, arguments: Value) {
        let record = json!({ "type": 1, "target": target, "arguments": arguments });
        let _ = self.control.send(Command::Push(format!("{record}{RS}")));
    }

    /// Push a raw frame to every open connection.
    pub fn push_raw(&self, frame: &str) {
        let _ = self.control.send(Command::Push(frame.to_string()));
    }

    /// Drop every open connection without a close handshake.
    pub fn drop_connections(&self) {
        let _ = self.control.send(Command::Drop);
    }

    /// Invocations received so far.
    pub fn invokes(&self) -> Vec<Invoke> {
        self.invokes.lock().clone()
    }

    /// Invocations received for `target`.
    pub fn invokes_of(&self, target: &str) -> Vec<Invoke> {
        self.invokes
            .lock()
            .iter()
            .filter(|invoke| invoke.target == target)
            .cloned()
            .collect()
    }

    /// Request URIs (path and query) of every WebSocket upgrade.
    pub fn requests(&self) -> Vec<String> {
        self.requests.lock().clone()
    }

    /// Number of completed hub handshakes.
    pub fn connections(&self) -> usize {
        self.connections.load(Ordering::SeqCst)
    }
}

async fn serve(
    stream: TcpStream,
    invokes: Arc<Mutex<Vec<Invoke>>>,
    requests: Arc<Mutex<Vec<String>>>,
    connections: Arc<AtomicUsize>,
    handshake_error: Option<String>,
    mut control: broadcast::Receiver<Command>,
) {
    let record_request = |request: &Request, response: Response| -> Result<Response, ErrorResponse> {
        requests.lock().push(request.uri().to_string());
        Ok(response)
    };
    let Ok(mut ws) = tokio_tungstenite::accept_hdr_async(stream, record_request).await else {
        return;
    };

    // Handshake request: {"protocol":"json","version":1}
    let Some(Ok(Message::Text(_handshake))) = ws.next().await else {
        return;
    };
    if let Some(error) = handshake_error {
        let reply = json!({ "error": error });
        let _ = ws.send(Message::text(format!("{reply}{RS}"))).await;
        let _ = ws.close(None).await;
        return;
    }
    if ws.send(Message::text(format!("{{}}{RS}"))).await.is_err() {
        return;
    }
    connections.fetch_add(1, Ordering::SeqCst);

    loop {
        tokio::select! {
            command = control.recv() => match command {
                Ok(Command::Push(frame)) => {
                    if ws.send(Message::text(frame)).await.is_err() {
                        return;
                    }
                }
                Ok(Command::Drop) | Err(_) => return,
            },
            msg = ws.next() => match msg {
                Some(Ok(Message::Text(text))) => {
                    for record in text.as_str().split(RS).filter(|r| !r.is_empty()) {
                        let Ok(value) = serde_json::from_str::<Value>(record) else {
                            continue;
                        };
                        match value["type"].as_u64() {
                            Some(1) => invokes.lock().push(Invoke {
                                target: value["target"].as_str().unwrap_or_default().to_string(),
                                arguments: value["arguments"].as_array().cloned().unwrap_or_default(),
                            }),
                            Some(7) => return,
                            _ => {}
                        }
                    }
                }
                Some(Ok(_)) => {}
                Some(Err(_)) | None => return,
            },
        }
    }
}

/// Poll `condition` until it holds or `timeout` elapses.
pub async fn eventually(timeout: Duration, mut condition: impl FnMut() -> bool) -> bool {
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        if condition() {
            return true;
        }
        if tokio::time::Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

/// Default wait for asynchronous effects.
pub const WAIT: Duration = Duration::from_secs(5);

/// Grace period used to assert that nothing further happens.
pub const SETTLE: Duration = Duration::from_millis(150);
