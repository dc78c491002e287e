//! Reconnection controller.
//!
//! Both loops report transport failures here instead of redialing on their own. Each
//! installed [`Link`] carries a generation number; a caller passes the generation it
//! saw fail, and if a newer link is already installed by the time it holds the dial
//! guard it gets that link back without a second dial.

use parking_lot::Mutex as SyncMutex;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::{Mutex, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::codec::JsonCodec;
use crate::error::{ClientError, ClientResult};
use crate::transport::{BoxedStream, Connector, Link};

pub(crate) struct Reconnector {
    connector: Arc<dyn Connector>,
    codec: JsonCodec,
    connect_timeout: Option<Duration>,
    backoff: Duration,
    link: watch::Sender<Option<Arc<Link>>>,
    dial_guard: Mutex<()>,
    connected: AtomicBool,
    generation: AtomicU64,
    closing: CancellationToken,
}

impl Reconnector {
    pub(crate) fn new(
        connector: Arc<dyn Connector>,
        codec: JsonCodec,
        connect_timeout: Option<Duration>,
        backoff: Duration,
        closing: CancellationToken,
    ) -> Self {
        let (link, _) = watch::channel(None);
        Self {
            connector,
            codec,
            connect_timeout,
            backoff,
            link,
            dial_guard: Mutex::new(()),
            connected: AtomicBool::new(false),
            generation: AtomicU64::new(0),
            closing,
        }
    }

    pub(crate) fn endpoint(&self) -> String {
        self.connector.endpoint()
    }

    pub(crate) fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    /// Successful dials after the first
    pub(crate) fn reconnect_count(&self) -> u64 {
        self.generation.load(Ordering::SeqCst).saturating_sub(1)
    }

    pub(crate) fn current(&self) -> Option<Arc<Link>> {
        self.link.borrow().clone()
    }

    /// The installed link, waiting out a reconnect in progress.
    ///
    /// An installed link is returned even while closing so queued writes can drain.
    pub(crate) async fn link(&self) -> ClientResult<Arc<Link>> {
        let mut installed = self.link.subscribe();
        loop {
            if let Some(link) = installed.borrow_and_update().clone() {
                return Ok(link);
            }
            if self.closing.is_cancelled() {
                return Err(ClientError::ClosedConnection);
            }
            tokio::select! {
                changed = installed.changed() => {
                    if changed.is_err() {
                        return Err(ClientError::ClosedConnection);
                    }
                }
                _ = self.closing.cancelled() => {}
            }
        }
    }

    /// Replace the link of generation `failed_generation` with a working one.
    ///
    /// Pass 0 for the initial connect.
    pub(crate) async fn reconnect(&self, failed_generation: u64) -> ClientResult<Arc<Link>> {
        self.connected.store(false, Ordering::SeqCst);

        let _guard = tokio::select! {
            guard = self.dial_guard.lock() => guard,
            _ = self.closing.cancelled() => return Err(ClientError::ClosedConnection),
        };
        if self.closing.is_cancelled() {
            return Err(ClientError::ClosedConnection);
        }

        if let Some(current) = self.current()
            && current.generation() > failed_generation
        {
            debug!(
                generation = current.generation(),
                failed_generation, "Link already replaced"
            );
            self.connected.store(true, Ordering::SeqCst);
            return Ok(current);
        }

        if let Some(stale) = self.link.send_replace(None) {
            debug!(generation = stale.generation(), "Discarding failed link");
            stale.cancel();
        }

        let stream = self.dial().await?;
        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        let link = Arc::new(Link::new(generation, stream, self.codec.clone()));
        self.link.send_replace(Some(link.clone()));
        self.connected.store(true, Ordering::SeqCst);

        if generation == 1 {
            info!(address = %self.endpoint(), "Connected to server");
        } else {
            info!(address = %self.endpoint(), generation, "Reconnected to server");
        }
        Ok(link)
    }

    async fn dial(&self) -> ClientResult<BoxedStream> {
        let endpoint = self.endpoint();
        let last_error: SyncMutex<Option<String>> = SyncMutex::new(None);

        let attempts = async {
            let mut attempt: u32 = 0;
            loop {
                attempt += 1;
                match self.connector.connect().await {
                    Ok(stream) => return stream,
                    Err(e) => {
                        warn!(
                            address = %endpoint,
                            attempt,
                            error = %e,
                            backoff_ms = self.backoff.as_millis() as u64,
                            "Connection attempt failed"
                        );
                        *last_error.lock() = Some(e.to_string());
                        tokio::time::sleep(self.backoff).await;
                    }
                }
            }
        };

        let bounded = async {
            match self.connect_timeout {
                Some(limit) => tokio::time::timeout(limit, attempts).await.ok(),
                None => Some(attempts.await),
            }
        };

        tokio::select! {
            _ = self.closing.cancelled() => {
                debug!(address = %endpoint, "Dial abandoned, connection closing");
                Err(ClientError::ClosedConnection)
            }
            stream = bounded => stream.ok_or_else(|| {
                let reason = match last_error.lock().take() {
                    Some(e) => format!("timed out after {:?}, last error: {e}", self.connect_timeout.unwrap_or_default()),
                    None => format!("timed out after {:?}", self.connect_timeout.unwrap_or_default()),
                };
                warn!(address = %endpoint, %reason, "Giving up on connection");
                ClientError::connect(endpoint.clone(), reason)
            }),
        }
    }

    /// Close and drop the installed link. The caller must have cancelled `closing`.
    pub(crate) async fn shutdown(&self, grace: Duration) {
        let _guard = self.dial_guard.lock().await;
        self.connected.store(false, Ordering::SeqCst);

        if let Some(link) = self.link.send_replace(None) {
            match tokio::time::timeout(grace, link.close()).await {
                Ok(Ok(())) => debug!(generation = link.generation(), "Link closed"),
                Ok(Err(e)) => debug!(error = %e, "Link close failed"),
                Err(_) => debug!("Link close timed out"),
            }
            link.cancel();
        }
    }

    /// Cancel the installed link without waiting
    pub(crate) fn abort(&self) {
        self.connected.store(false, Ordering::SeqCst);
        if let Some(link) = self.link.send_replace(None) {
            link.cancel();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::io;
    use std::sync::atomic::AtomicUsize;

    /// Hands out in-memory streams, failing the first `failures` dials
    struct CountingConnector {
        dials: AtomicUsize,
        failures: usize,
        peers: SyncMutex<Vec<tokio::io::DuplexStream>>,
    }

    impl CountingConnector {
        fn new(failures: usize) -> Arc<Self> {
            Arc::new(Self {
                dials: AtomicUsize::new(0),
                failures,
                peers: SyncMutex::new(Vec::new()),
            })
        }

        fn dials(&self) -> usize {
            self.dials.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl Connector for CountingConnector {
        fn endpoint(&self) -> String {
            "memory".to_string()
        }

        async fn connect(&self) -> io::Result<BoxedStream> {
            let attempt = self.dials.fetch_add(1, Ordering::SeqCst);
            if attempt < self.failures {
                return Err(io::Error::new(io::ErrorKind::ConnectionRefused, "refused"));
            }
            let (client, server) = tokio::io::duplex(1024);
            self.peers.lock().push(server);
            Ok(Box::new(client))
        }
    }

    fn reconnector(connector: Arc<CountingConnector>, timeout: Option<Duration>) -> Reconnector {
        Reconnector::new(
            connector,
            JsonCodec::default(),
            timeout,
            Duration::from_millis(10),
            CancellationToken::new(),
        )
    }

    #[tokio::test]
    async fn test_initial_connect_and_retry() {
        let connector = CountingConnector::new(2);
        let controller = reconnector(connector.clone(), None);

        let link = controller.reconnect(0).await.unwrap();

        assert_eq!(link.generation(), 1);
        assert_eq!(connector.dials(), 3);
        assert!(controller.is_connected());
        assert_eq!(controller.reconnect_count(), 0);
    }

    #[tokio::test]
    async fn test_concurrent_reconnects_dial_once() {
        let connector = CountingConnector::new(0);
        let controller = Arc::new(reconnector(connector.clone(), None));
        let first = controller.reconnect(0).await.unwrap();

        let a = {
            let controller = controller.clone();
            let generation = first.generation();
            tokio::spawn(async move { controller.reconnect(generation).await })
        };
        let b = {
            let controller = controller.clone();
            let generation = first.generation();
            tokio::spawn(async move { controller.reconnect(generation).await })
        };

        let a = a.await.unwrap().unwrap();
        let b = b.await.unwrap().unwrap();
        assert_eq!(a.generation(), 2);
        assert_eq!(b.generation(), 2);
        assert_eq!(connector.dials(), 2);
        assert!(first.is_cancelled());
        assert_eq!(controller.reconnect_count(), 1);
    }

    #[tokio::test]
    async fn test_timeout_budget() {
        let connector = CountingConnector::new(usize::MAX);
        let controller = reconnector(connector, Some(Duration::from_millis(50)));

        let started = std::time::Instant::now();
        let result = controller.reconnect(0).await;

        assert!(matches!(result, Err(ClientError::Connect { .. })));
        assert!(started.elapsed() >= Duration::from_millis(50));
        assert!(!controller.is_connected());
    }

    #[tokio::test]
    async fn test_closing_abandons_dial() {
        let connector = CountingConnector::new(usize::MAX);
        let closing = CancellationToken::new();
        let controller = Arc::new(Reconnector::new(
            connector,
            JsonCodec::default(),
            None,
            Duration::from_millis(10),
            closing.clone(),
        ));

        let pending = {
            let controller = controller.clone();
            tokio::spawn(async move { controller.reconnect(0).await })
        };
        tokio::time::sleep(Duration::from_millis(30)).await;
        closing.cancel();

        assert!(matches!(
            pending.await.unwrap(),
            Err(ClientError::ClosedConnection)
        ));
        assert!(matches!(
            controller.reconnect(0).await,
            Err(ClientError::ClosedConnection)
        ));
        assert!(matches!(
            controller.link().await,
            Err(ClientError::ClosedConnection)
        ));
    }

    #[tokio::test]
    async fn test_shutdown_removes_link() {
        let connector = CountingConnector::new(0);
        let closing = CancellationToken::new();
        let controller = Reconnector::new(
            connector,
            JsonCodec::default(),
            None,
            Duration::from_millis(10),
            closing.clone(),
        );
        let link = controller.reconnect(0).await.unwrap();
        assert_eq!(controller.link().await.unwrap().generation(), 1);

        closing.cancel();
        controller.shutdown(Duration::from_millis(100)).await;

        assert!(link.is_cancelled());
        assert!(controller.current().is_none());
        assert!(!controller.is_connected());
    }
}
