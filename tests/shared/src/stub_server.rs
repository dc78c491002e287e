//! Scripted JSON-RPC server for end-to-end tests.
//!
//! The server answers requests through a handler closure and records everything it
//! receives. Tests can push notifications or raw bytes to every live connection and
//! cut connections to exercise reconnection. It listens on real TCP
//! ([`StubServer::start`]) or serves in-memory pipes handed out by a
//! [`MemoryConnector`] ([`StubServer::in_memory`]).

use async_trait::async_trait;
use futures::StreamExt;
use parking_lot::{Mutex, RwLock};
use serde_json::{Value, json};
use std::collections::HashSet;
use std::io;
use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::task::{Context, Poll};
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt, DuplexStream, ReadBuf};
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::codec::FramedRead;
use tracing::debug;

use kodi_jsonrpc_client::{BoxedStream, Connector, JsonCodec};

/// How the server answers one request
#[derive(Debug, Clone)]
pub enum Reply {
    /// Respond with this `result`
    Result(Value),
    /// Respond with an error object
    Error { code: i64, message: String },
    /// Write these bytes verbatim
    Raw(String),
    /// Do not answer
    Silent,
}

impl Reply {
    /// Bytes to write for `request`. Requests without an `id` only get raw replies.
    fn render(self, request: &Value) -> Option<Vec<u8>> {
        let id = request.get("id").filter(|id| !id.is_null());
        let message = match (self, id) {
            (Reply::Raw(text), _) => return Some(text.into_bytes()),
            (Reply::Silent, _) | (_, None) => return None,
            (Reply::Result(result), Some(id)) => {
                json!({"id": id, "jsonrpc": "2.0", "result": result})
            }
            (Reply::Error { code, message }, Some(id)) => json!({
                "id": id,
                "jsonrpc": "2.0",
                "error": {"code": code, "message": message}
            }),
        };
        // Kodi writes messages back to back without a separator
        Some(message.to_string().into_bytes())
    }
}

pub type Handler = Arc<dyn Fn(&Value) -> Reply + Send + Sync>;

/// Answers the way a Kodi server of protocol `major` would for a handful of methods.
///
/// - `JSONRPC.Version` reports `major.14.3`
/// - `JSONRPC.Ping` answers `"pong"`
/// - `Test.Echo` answers with its params
/// - `Test.Silent` is never answered
/// - anything else, `Test.Error` included, fails with -32601
pub fn kodi_handler(major: u64) -> Handler {
    Arc::new(move |request: &Value| {
        let method = request.get("method").and_then(Value::as_str).unwrap_or_default();
        match method {
            "JSONRPC.Version" => Reply::Result(json!({
                "version": {"major": major, "minor": 14, "patch": 3}
            })),
            "JSONRPC.Ping" => Reply::Result(json!("pong")),
            "Test.Echo" => Reply::Result(request.get("params").cloned().unwrap_or(json!({}))),
            "Test.Silent" => Reply::Silent,
            _ => Reply::Error {
                code: -32601,
                message: "Method not found.".to_string(),
            },
        }
    })
}

enum Command {
    Write(Vec<u8>),
    Disconnect,
}

struct ServerState {
    handler: RwLock<Handler>,
    received: Mutex<Vec<Value>>,
    connections: AtomicUsize,
    dials: AtomicUsize,
    refusing: AtomicBool,
    broken_writes: Mutex<HashSet<usize>>,
    peers: Mutex<Vec<mpsc::UnboundedSender<Command>>>,
}

impl ServerState {
    fn new(handler: Handler) -> Arc<Self> {
        Arc::new(Self {
            handler: RwLock::new(handler),
            received: Mutex::new(Vec::new()),
            connections: AtomicUsize::new(0),
            dials: AtomicUsize::new(0),
            refusing: AtomicBool::new(false),
            broken_writes: Mutex::new(HashSet::new()),
            peers: Mutex::new(Vec::new()),
        })
    }

    fn broadcast(&self, make: impl Fn() -> Command) -> usize {
        let mut peers = self.peers.lock();
        peers.retain(|peer| peer.send(make()).is_ok());
        peers.len()
    }
}

fn spawn_connection<S>(state: Arc<ServerState>, stream: S)
where
    S: AsyncRead + AsyncWrite + Send + 'static,
{
    let (commands_tx, mut commands) = mpsc::unbounded_channel();
    state.peers.lock().push(commands_tx);
    let connection = state.connections.fetch_add(1, Ordering::SeqCst) + 1;

    tokio::spawn(async move {
        let (read_half, mut write_half) = tokio::io::split(stream);
        let mut frames = FramedRead::new(read_half, JsonCodec::default());
        debug!(connection, "Stub connection opened");

        loop {
            tokio::select! {
                frame = frames.next() => match frame {
                    Some(Ok(Ok(request))) => {
                        state.received.lock().push(request.clone());
                        let handler = state.handler.read().clone();
                        if let Some(bytes) = handler(&request).render(&request)
                            && write_half.write_all(&bytes).await.is_err()
                        {
                            break;
                        }
                    }
                    Some(Ok(Err(_))) => continue,
                    Some(Err(_)) | None => break,
                },
                command = commands.recv() => match command {
                    Some(Command::Write(bytes)) => {
                        if write_half.write_all(&bytes).await.is_err() {
                            break;
                        }
                    }
                    Some(Command::Disconnect) | None => break,
                },
            }
        }
        debug!(connection, "Stub connection closed");
    });
}

pub struct StubServer {
    state: Arc<ServerState>,
    address: String,
    accept_task: Option<JoinHandle<()>>,
}

impl StubServer {
    /// Listen on an ephemeral TCP port of 127.0.0.1
    pub async fn start(handler: Handler) -> io::Result<Self> {
        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let address = listener.local_addr()?.to_string();
        let state = ServerState::new(handler);

        let accept_state = state.clone();
        let accept_task = tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                let _ = stream.set_nodelay(true);
                spawn_connection(accept_state.clone(), stream);
            }
        });

        Ok(Self {
            state,
            address,
            accept_task: Some(accept_task),
        })
    }

    /// A TCP server answering like Kodi with protocol `major`
    pub async fn kodi(major: u64) -> io::Result<Self> {
        Self::start(kodi_handler(major)).await
    }

    /// Serve in-memory pipes dialled through the returned connector
    pub fn in_memory(handler: Handler) -> (Self, MemoryConnector) {
        let state = ServerState::new(handler);
        let connector = MemoryConnector {
            state: state.clone(),
        };
        (
            Self {
                state,
                address: "memory".to_string(),
                accept_task: None,
            },
            connector,
        )
    }

    pub fn address(&self) -> &str {
        &self.address
    }

    pub fn set_handler(&self, handler: Handler) {
        *self.state.handler.write() = handler;
    }

    /// Every request received so far, across all connections
    pub fn received(&self) -> Vec<Value> {
        self.state.received.lock().clone()
    }

    pub fn received_methods(&self) -> Vec<String> {
        self.received()
            .iter()
            .filter_map(|request| request.get("method").and_then(Value::as_str))
            .map(str::to_string)
            .collect()
    }

    /// Connections accepted so far
    pub fn connections(&self) -> usize {
        self.state.connections.load(Ordering::SeqCst)
    }

    /// Dial attempts through the memory connector, refused ones included
    pub fn dials(&self) -> usize {
        self.state.dials.load(Ordering::SeqCst)
    }

    /// Make the memory connector refuse (or accept again) new dials
    pub fn set_refusing(&self, refusing: bool) {
        self.state.refusing.store(refusing, Ordering::SeqCst);
    }

    /// Make client writes fail on the `dial`-th memory connection, counting from 1.
    ///
    /// Reads on that connection keep working.
    pub fn break_writes(&self, dial: usize) {
        self.state.broken_writes.lock().insert(dial);
    }

    /// Push a notification to every live connection
    pub fn notify(&self, method: &str, params: Value) -> usize {
        let message = json!({"jsonrpc": "2.0", "method": method, "params": params}).to_string();
        self.send_raw(&message)
    }

    /// Write bytes verbatim to every live connection
    pub fn send_raw(&self, text: &str) -> usize {
        let bytes = text.as_bytes().to_vec();
        self.state.broadcast(|| Command::Write(bytes.clone()))
    }

    /// Drop every live connection
    pub fn disconnect_all(&self) {
        self.state.broadcast(|| Command::Disconnect);
        self.state.peers.lock().clear();
    }

    /// Wait until at least `count` connections have been accepted
    pub async fn wait_for_connections(&self, count: usize, timeout: Duration) -> bool {
        wait_until(timeout, || self.connections() >= count).await
    }

    /// Wait until `method` has been received at least `count` times
    pub async fn wait_for_requests(&self, method: &str, count: usize, timeout: Duration) -> bool {
        wait_until(timeout, || {
            self.received_methods()
                .iter()
                .filter(|received| received.as_str() == method)
                .count()
                >= count
        })
        .await
    }
}

impl Drop for StubServer {
    fn drop(&mut self) {
        if let Some(task) = self.accept_task.take() {
            task.abort();
        }
        self.state.broadcast(|| Command::Disconnect);
    }
}

/// Dials in-memory pipes served by the [`StubServer`] it came from
#[derive(Clone)]
pub struct MemoryConnector {
    state: Arc<ServerState>,
}

#[async_trait]
impl Connector for MemoryConnector {
    fn endpoint(&self) -> String {
        "memory".to_string()
    }

    async fn connect(&self) -> io::Result<BoxedStream> {
        let dial = self.state.dials.fetch_add(1, Ordering::SeqCst) + 1;
        if self.state.refusing.load(Ordering::SeqCst) {
            return Err(io::Error::new(
                io::ErrorKind::ConnectionRefused,
                "stub server refusing connections",
            ));
        }
        let (client, server) = tokio::io::duplex(64 * 1024);
        spawn_connection(self.state.clone(), server);
        Ok(Box::new(MemoryStream {
            inner: client,
            dial,
            state: self.state.clone(),
        }))
    }
}

/// Client end of an in-memory pipe
struct MemoryStream {
    inner: DuplexStream,
    dial: usize,
    state: Arc<ServerState>,
}

impl AsyncRead for MemoryStream {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        Pin::new(&mut self.inner).poll_read(cx, buf)
    }
}

impl AsyncWrite for MemoryStream {
    fn poll_write(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        if self.state.broken_writes.lock().contains(&self.dial) {
            return Poll::Ready(Err(io::Error::new(
                io::ErrorKind::BrokenPipe,
                format!("writes broken on dial {}", self.dial),
            )));
        }
        Pin::new(&mut self.inner).poll_write(cx, buf)
    }

    fn poll_flush(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.inner).poll_flush(cx)
    }

    fn poll_shutdown(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.inner).poll_shutdown(cx)
    }
}

/// Poll `condition` every 10 ms until it holds or `timeout` elapses
pub async fn wait_until(timeout: Duration, condition: impl Fn() -> bool) -> bool {
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

/// An address nothing listens on
pub fn unreachable_address() -> String {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").expect("bind ephemeral port");
    let address = listener.local_addr().expect("local address").to_string();
    drop(listener);
    address
}
