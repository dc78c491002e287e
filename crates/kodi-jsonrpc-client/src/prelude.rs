//! # Client Prelude
//!
//! Convenient re-exports of the most commonly used types.
//!
//! ```rust
//! use kodi_jsonrpc_client::prelude::*;
//! ```

// Core client types
pub use crate::config::ConnectionConfig;
pub use crate::connection::{Connection, ConnectionBuilder, ConnectionStatus};
pub use crate::error::{ClientError, ClientResult};
pub use crate::logging::{LogLevel, init_logging, set_log_level};
pub use crate::notifications::Notifications;
pub use crate::pending::ResponseHandle;

// Transport types
pub use crate::transport::{Connector, TcpConnector};

// Protocol types
pub use kodi_jsonrpc::{JsonRpcRequest, Notification, ServerVersion, ValueExt};

pub use std::time::Duration;
