//! Connection facade

use parking_lot::Mutex;
use serde_json::{Map, Value};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, info, warn};

use kodi_jsonrpc::{JsonRpcRequest, JsonRpcVersion, ServerVersion, VERSION_METHOD};

use crate::codec::JsonCodec;
use crate::config::ConnectionConfig;
use crate::error::{ClientError, ClientResult};
use crate::logging::set_log_level;
use crate::notifications::{NotificationQueue, Notifications};
use crate::pending::{PendingRequests, ResponseHandle};
use crate::reader::run_reader;
use crate::reconnect::Reconnector;
use crate::transport::{Connector, TcpConnector};
use crate::writer::run_writer;

/// State shared between the facade and its loops
pub(crate) struct Shared {
    pub(crate) reconnector: Reconnector,
    pub(crate) pending: Arc<PendingRequests>,
    pub(crate) notifications: Arc<NotificationQueue>,
    /// In-flight notification deliveries
    pub(crate) deliveries: TaskTracker,
    /// Cancelled once close begins; never reset
    pub(crate) closing: CancellationToken,
}

/// Persistent, auto-reconnecting connection to a JSON-RPC server
pub struct Connection {
    shared: Arc<Shared>,
    config: ConnectionConfig,
    /// Taken on close so later sends fail and the writer drains
    outbound: Mutex<Option<mpsc::Sender<JsonRpcRequest>>>,
    writer_task: Mutex<Option<JoinHandle<()>>>,
    reader_task: Mutex<Option<JoinHandle<()>>>,
    closed: AtomicBool,
    server_version: ServerVersion,
}

impl Connection {
    /// Connect to `address` over TCP with default settings.
    ///
    /// `timeout` bounds establishing the transport and waiting for the handshake
    /// response; zero means no limit.
    pub async fn connect(address: impl Into<String>, timeout: Duration) -> ClientResult<Self> {
        ConnectionBuilder::new()
            .with_address(address)
            .with_timeout(timeout)
            .connect()
            .await
    }

    async fn establish(config: ConnectionConfig, connector: Arc<dyn Connector>) -> ClientResult<Self> {
        config.validate()?;
        if let Some(level) = config.logging.level {
            set_log_level(level);
        }
        info!(address = %connector.endpoint(), "Connecting to server");

        let closing = CancellationToken::new();
        let reconnector = Reconnector::new(
            connector,
            JsonCodec::new(config.codec.max_frame_length),
            config.timeouts.connect_limit(),
            config.retry.backoff,
            closing.clone(),
        );
        reconnector.reconnect(0).await?;

        let shared = Arc::new(Shared {
            reconnector,
            pending: Arc::new(PendingRequests::new()),
            notifications: Arc::new(NotificationQueue::new(
                config.queues.notification_capacity,
                config.queues.notification_grace,
            )),
            deliveries: TaskTracker::new(),
            closing,
        });

        let (outbound_tx, outbound_rx) = mpsc::channel(config.queues.outbound_capacity);
        let writer = tokio::spawn(run_writer(shared.clone(), outbound_rx));
        let reader = tokio::spawn(run_reader(shared.clone()));

        let mut connection = Self {
            shared,
            config,
            outbound: Mutex::new(Some(outbound_tx)),
            writer_task: Mutex::new(Some(writer)),
            reader_task: Mutex::new(Some(reader)),
            closed: AtomicBool::new(false),
            server_version: ServerVersion::default(),
        };

        match connection.handshake().await {
            Ok(version) => {
                info!(address = %connection.address(), version = %version, "Server handshake complete");
                connection.server_version = version;
                Ok(connection)
            }
            Err(e) => {
                warn!(error = %e, "Server handshake failed");
                connection.close().await;
                Err(e)
            }
        }
    }

    async fn handshake(&self) -> ClientResult<ServerVersion> {
        let mut handle = self.send(JsonRpcRequest::new(VERSION_METHOD), true).await?;
        let limit = self
            .config
            .timeouts
            .handshake_limit()
            .unwrap_or(Duration::ZERO);
        let result = handle.read(limit).await?;

        let version = ServerVersion::from_result(&result)?;
        if !version.meets(self.config.min_major_version) {
            return Err(ClientError::ProtocolVersion {
                found: version,
                minimum: self.config.min_major_version,
            });
        }
        Ok(version)
    }

    /// Queue `request` for sending.
    ///
    /// With `want_response` an identifier is assigned and the returned handle can be
    /// read once; otherwise the request goes out without an identifier and the handle
    /// is never pending. Only waits when the outbound queue is full.
    pub async fn send(
        &self,
        mut request: JsonRpcRequest,
        want_response: bool,
    ) -> ClientResult<ResponseHandle> {
        if self.is_closed() {
            return Err(ClientError::ClosedConnection);
        }
        let sender = self.outbound.lock().clone();
        let Some(sender) = sender else {
            return Err(ClientError::ClosedConnection);
        };

        request.version = JsonRpcVersion::V2_0;
        let handle = if want_response {
            let (id, receiver) = self.shared.pending.register();
            request.id = Some(id);
            ResponseHandle::pending(id, receiver, self.shared.pending.clone())
        } else {
            request.id = None;
            ResponseHandle::none()
        };

        debug!(
            method = %request.method,
            id = ?request.id,
            "Queueing request"
        );
        // On failure the handle is dropped here, retiring its slot
        sender
            .send(request)
            .await
            .map_err(|_| ClientError::ClosedConnection)?;
        Ok(handle)
    }

    /// Send `request` and wait for its result mapping
    pub async fn call(
        &self,
        request: JsonRpcRequest,
        timeout: Duration,
    ) -> ClientResult<Map<String, Value>> {
        self.send(request, true).await?.read(timeout).await
    }

    /// Send `request` without asking for a response
    pub async fn notify(&self, request: JsonRpcRequest) -> ClientResult<()> {
        self.send(request, false).await.map(|_| ())
    }

    /// Close the connection.
    ///
    /// Queued writes and in-flight notification deliveries get up to the configured
    /// drain timeout each. Requests still awaiting a response fail with
    /// [`ClientError::ClosedConnection`]. Calling this more than once is a no-op.
    pub async fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        info!(address = %self.address(), "Closing connection");
        let drain = self.config.timeouts.drain;

        self.shared.closing.cancel();
        self.outbound.lock().take();

        let writer = self.writer_task.lock().take();
        if let Some(mut writer) = writer
            && timeout(drain, &mut writer).await.is_err()
        {
            warn!(drain_ms = drain.as_millis() as u64, "Writer did not drain in time");
            writer.abort();
        }

        self.shared.deliveries.close();
        if timeout(drain, self.shared.deliveries.wait()).await.is_err() {
            warn!(
                in_flight = self.shared.deliveries.len(),
                "Notification deliveries did not finish in time"
            );
        }
        self.shared.notifications.close();

        self.shared.reconnector.shutdown(drain).await;
        let failed = self.shared.pending.clear();
        if failed > 0 {
            debug!(failed, "Failed requests still awaiting a response");
        }

        let reader = self.reader_task.lock().take();
        if let Some(mut reader) = reader
            && timeout(drain, &mut reader).await.is_err()
        {
            reader.abort();
        }

        info!(address = %self.address(), "Disconnected from server");
    }

    /// Whether a transport is currently installed and the connection is open
    pub fn is_connected(&self) -> bool {
        !self.is_closed() && self.shared.reconnector.is_connected()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Version reported by the server during the handshake
    pub fn server_version(&self) -> ServerVersion {
        self.server_version
    }

    pub fn address(&self) -> &str {
        &self.config.address
    }

    pub fn config(&self) -> &ConnectionConfig {
        &self.config
    }

    /// Requests still waiting for a response
    pub fn pending_requests(&self) -> usize {
        self.shared.pending.len()
    }

    /// Times the transport has been re-established since the initial connect
    pub fn reconnect_count(&self) -> u64 {
        self.shared.reconnector.reconnect_count()
    }

    /// Consumer handle for server notifications
    pub fn notifications(&self) -> Notifications {
        Notifications::new(self.shared.notifications.clone())
    }

    /// Snapshot of the connection state
    pub fn status(&self) -> ConnectionStatus {
        ConnectionStatus {
            connected: self.is_connected(),
            closed: self.is_closed(),
            endpoint: self.shared.reconnector.endpoint(),
            server_version: self.server_version,
            pending_requests: self.pending_requests(),
            reconnects: self.reconnect_count(),
            dropped_notifications: self.shared.notifications.dropped(),
        }
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        // No await here: cancel everything and let the tasks unwind
        debug!(address = %self.config.address, "Connection dropped without close, tearing down");
        self.shared.closing.cancel();
        self.outbound.lock().take();
        self.shared.notifications.close();
        self.shared.reconnector.abort();
        self.shared.pending.clear();
        if let Some(writer) = self.writer_task.lock().take() {
            writer.abort();
        }
        if let Some(reader) = self.reader_task.lock().take() {
            reader.abort();
        }
    }
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("address", &self.config.address)
            .field("connected", &self.is_connected())
            .field("closed", &self.is_closed())
            .field("server_version", &self.server_version)
            .finish()
    }
}

/// Point-in-time view of a connection
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionStatus {
    pub connected: bool,
    pub closed: bool,
    pub endpoint: String,
    pub server_version: ServerVersion,
    pub pending_requests: usize,
    pub reconnects: u64,
    pub dropped_notifications: u64,
}

impl ConnectionStatus {
    /// Whether requests can currently be sent and answered
    pub fn is_ready(&self) -> bool {
        self.connected && !self.closed
    }

    /// One-line summary for logs
    pub fn summary(&self) -> String {
        let state = if self.closed {
            "closed"
        } else if self.connected {
            "connected"
        } else {
            "reconnecting"
        };
        format!(
            "{} to {} (protocol {}), {} pending, {} reconnects",
            state, self.endpoint, self.server_version, self.pending_requests, self.reconnects
        )
    }
}

/// Builder for [`Connection`]
pub struct ConnectionBuilder {
    config: ConnectionConfig,
    connector: Option<Arc<dyn Connector>>,
}

impl ConnectionBuilder {
    pub fn new() -> Self {
        Self {
            config: ConnectionConfig::default(),
            connector: None,
        }
    }

    /// Set the server address used by the default TCP connector
    pub fn with_address(mut self, address: impl Into<String>) -> Self {
        self.config.address = address.into();
        self
    }

    /// Replace the whole configuration
    pub fn with_config(mut self, config: ConnectionConfig) -> Self {
        self.config = config;
        self
    }

    /// Dial through a custom connector instead of TCP
    pub fn with_connector(mut self, connector: impl Connector) -> Self {
        self.connector = Some(Arc::new(connector));
        self
    }

    /// Bound connecting and the handshake; zero means no limit
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.config.timeouts.connect = timeout;
        self
    }

    /// Establish the transport, start the loops and perform the handshake
    pub async fn connect(self) -> ClientResult<Connection> {
        let connector = match self.connector {
            Some(connector) => connector,
            None => Arc::new(TcpConnector::new(self.config.address.clone())),
        };
        Connection::establish(self.config, connector).await
    }
}

impl Default for ConnectionBuilder {
    fn default() -> Self {
        Self::new()
    }
}
