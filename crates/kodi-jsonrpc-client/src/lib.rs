//! # Kodi JSON-RPC Client
//!
//! A persistent JSON-RPC client for the Kodi/XBMC raw socket interface. One
//! [`Connection`] multiplexes concurrent requests over a single TCP stream, delivers
//! server-pushed notifications through a bounded queue, and repairs the transport on
//! failure without callers noticing beyond added latency.
//!
//! ## Features
//!
//! - **Multiplexing**: any number of tasks can send and await responses concurrently
//! - **Transparent reconnection**: a single guarded controller redials with a fixed backoff
//! - **Notifications**: drop-oldest queue so a slow consumer never stalls responses
//! - **Version handshake**: servers older than the configured protocol major are refused
//! - **Pluggable transport**: any [`Connector`] producing an async byte stream
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use kodi_jsonrpc_client::prelude::*;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let connection = Connection::connect("127.0.0.1:9090", Duration::from_secs(5)).await?;
//!     println!("Server speaks protocol {}", connection.server_version());
//!
//!     let players = connection
//!         .call(JsonRpcRequest::new("Player.GetActivePlayers"), Duration::from_secs(5))
//!         .await?;
//!     println!("Active players: {:?}", players);
//!
//!     let notifications = connection.notifications();
//!     if let Some(notification) = notifications.recv().await {
//!         println!("{} ({:?})", notification.method, notification.item_type());
//!     }
//!
//!     connection.close().await;
//!     Ok(())
//! }
//! ```
//!
//! ## Fire and forget
//!
//! ```rust,no_run
//! # use kodi_jsonrpc_client::prelude::*;
//! # async fn example(connection: &Connection) -> ClientResult<()> {
//! connection
//!     .notify(JsonRpcRequest::new("GUI.ShowNotification")
//!         .with_param("title", "Hello")
//!         .with_param("message", "From Rust"))
//!     .await?;
//! # Ok(())
//! # }
//! ```

pub mod codec;
pub mod config;
pub mod connection;
pub mod error;
pub mod logging;
pub mod notifications;
pub mod pending;
pub mod prelude;
pub mod transport;

mod reader;
mod reconnect;
mod writer;

// Re-export main types
pub use codec::{DecodedFrame, JsonCodec};
pub use config::{
    CodecConfig, ConnectionConfig, LoggingConfig, QueueConfig, RetryConfig, TimeoutConfig,
};
pub use connection::{Connection, ConnectionBuilder, ConnectionStatus};
pub use error::{ClientError, ClientResult, ProtocolError, TransportError};
pub use logging::{LogLevel, init_logging, log_level, set_log_level};
pub use notifications::Notifications;
pub use pending::ResponseHandle;
pub use transport::{AsyncStream, BoxedStream, Connector, Link, TcpConnector};

// Re-export protocol types for convenience
pub use kodi_jsonrpc::{
    JsonRpcRequest, Notification, NotificationData, NotificationItem, NotificationParams,
    Params, RequestId, ServerVersion, ValueError, ValueExt,
};
