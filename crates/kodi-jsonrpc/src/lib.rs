//! # Kodi JSON-RPC Message Types
//!
//! Transport-agnostic JSON-RPC 2.0 types for talking to a Kodi/XBMC server over its
//! raw socket interface. This crate has no I/O; it describes what goes over the wire
//! and how incoming messages are classified.
//!
//! ## Features
//! - Requests with optional identifiers (fire-and-forget when absent)
//! - Classification of incoming messages into responses, notifications and unparseable input
//! - Notification payloads with the recognized `params.data.item.type` shape and
//!   pass-through of every other field
//! - Typed extraction from dynamic JSON values that fails instead of panicking

pub mod error;
pub mod notification;
pub mod request;
pub mod response;
pub mod types;
pub mod value;
pub mod version;

// Re-export main types
pub use error::{JsonRpcErrorCode, JsonRpcErrorObject, MessageError};
pub use notification::{
    Notification, NotificationData, NotificationItem, NotificationParams, RawNotification,
};
pub use request::{JsonRpcRequest, Params};
pub use response::{JsonRpcMessage, JsonRpcResponse};
pub use types::{JsonRpcVersion, RequestId};
pub use value::{ValueError, ValueExt, lookup_path};
pub use version::ServerVersion;

/// JSON-RPC 2.0 version constant
pub const JSONRPC_VERSION: &str = "2.0";

/// Method used for the capability handshake
pub const VERSION_METHOD: &str = "JSONRPC.Version";
