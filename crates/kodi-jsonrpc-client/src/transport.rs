//! Transport abstraction.
//!
//! A [`Connector`] dials a fresh byte stream; a [`Link`] wraps one established stream
//! with the JSON codec. Links are never repaired in place: when one fails the
//! reconnection controller installs a new one with a higher generation.

use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use std::io;
use tokio::io::{AsyncRead, AsyncWrite, ReadHalf, WriteHalf};
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tokio_util::codec::{FramedRead, FramedWrite};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use kodi_jsonrpc::JsonRpcRequest;

use crate::codec::{DecodedFrame, JsonCodec};
use crate::error::TransportError;

/// Bidirectional byte stream a link can run over
pub trait AsyncStream: AsyncRead + AsyncWrite + Send + Unpin + 'static {}

impl<T> AsyncStream for T where T: AsyncRead + AsyncWrite + Send + Unpin + 'static {}

pub type BoxedStream = Box<dyn AsyncStream>;

/// Produces new transport streams on demand
#[async_trait]
pub trait Connector: Send + Sync + 'static {
    /// Human-readable endpoint, used in logs and errors
    fn endpoint(&self) -> String;

    /// Open one new stream
    async fn connect(&self) -> io::Result<BoxedStream>;
}

/// Dials `host:port` over TCP
#[derive(Debug, Clone)]
pub struct TcpConnector {
    address: String,
}

impl TcpConnector {
    pub fn new(address: impl Into<String>) -> Self {
        Self {
            address: address.into(),
        }
    }
}

#[async_trait]
impl Connector for TcpConnector {
    fn endpoint(&self) -> String {
        self.address.clone()
    }

    async fn connect(&self) -> io::Result<BoxedStream> {
        let stream = TcpStream::connect(&self.address).await?;
        stream.set_nodelay(true)?;
        debug!(address = %self.address, "TCP connection established");
        Ok(Box::new(stream))
    }
}

/// One installed transport generation
pub struct Link {
    generation: u64,
    reader: Mutex<FramedRead<ReadHalf<BoxedStream>, JsonCodec>>,
    writer: Mutex<FramedWrite<WriteHalf<BoxedStream>, JsonCodec>>,
    cancel: CancellationToken,
}

impl Link {
    pub fn new(generation: u64, stream: BoxedStream, codec: JsonCodec) -> Self {
        let (read_half, write_half) = tokio::io::split(stream);
        Self {
            generation,
            reader: Mutex::new(FramedRead::new(read_half, codec.clone())),
            writer: Mutex::new(FramedWrite::new(write_half, codec)),
            cancel: CancellationToken::new(),
        }
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Encode and flush one request
    pub async fn write(&self, request: &JsonRpcRequest) -> Result<(), TransportError> {
        let mut writer = self.writer.lock().await;
        tokio::select! {
            _ = self.cancel.cancelled() => Err(TransportError::Closed),
            result = writer.send(request) => result,
        }
    }

    /// Decode the next frame. End of stream is reported as [`TransportError::Eof`].
    pub async fn read(&self) -> Result<DecodedFrame, TransportError> {
        let mut reader = self.reader.lock().await;
        tokio::select! {
            _ = self.cancel.cancelled() => Err(TransportError::Closed),
            frame = reader.next() => frame.unwrap_or(Err(TransportError::Eof)),
        }
    }

    /// Flush and shut down the write side
    pub async fn close(&self) -> Result<(), TransportError> {
        let mut writer = self.writer.lock().await;
        tokio::select! {
            _ = self.cancel.cancelled() => Err(TransportError::Closed),
            result = SinkExt::<&JsonRpcRequest>::close(&mut *writer) => result,
        }
    }

    /// Abort any read or write in progress and fail later ones
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }
}

impl std::fmt::Debug for Link {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Link")
            .field("generation", &self.generation)
            .field("cancelled", &self.is_cancelled())
            .finish()
    }
}
