//! Error types for client operations

use kodi_jsonrpc::{JsonRpcErrorCode, JsonRpcErrorObject, ServerVersion, ValueError};
use serde_json::Value;
use thiserror::Error;

/// Result type for client operations
pub type ClientResult<T> = Result<T, ClientError>;

/// Errors surfaced to callers of [`Connection`](crate::Connection)
#[derive(Error, Debug)]
pub enum ClientError {
    /// The transport could not be established within the configured timeout
    #[error("Failed to connect to {address}: {reason}")]
    Connect { address: String, reason: String },

    /// The server speaks a protocol version older than the supported minimum
    #[error("Server protocol version {found} is below the minimum supported major version {minimum}")]
    ProtocolVersion {
        found: ServerVersion,
        minimum: u64,
    },

    /// Close has begun, or the operation was interrupted by it
    #[error("Connection is closed")]
    ClosedConnection,

    /// The handle was already read or never had a pending slot
    #[error("No pending response to read")]
    NoPendingResponse,

    #[error("Timed out waiting for response")]
    ReadTimeout,

    /// Server returned an error object
    #[error("Server error (code {code}): {message}")]
    Remote {
        code: i64,
        message: String,
        data: Option<Value>,
    },

    /// Transport-level errors
    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    /// Protocol-level errors
    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),
}

/// Transport-specific errors
#[derive(Error, Debug)]
pub enum TransportError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Connection closed by peer")]
    Eof,

    #[error("Incoming message of {size} bytes exceeds the {limit} byte limit")]
    FrameTooLarge { size: usize, limit: usize },

    #[error("Failed to encode message: {0}")]
    Encode(#[from] serde_json::Error),

    /// The link was cancelled locally
    #[error("Transport closed")]
    Closed,
}

/// Protocol-specific errors
#[derive(Error, Debug)]
pub enum ProtocolError {
    #[error("Invalid JSON-RPC response: {0}")]
    InvalidResponse(String),

    #[error("Unexpected response shape: {0}")]
    Value(#[from] ValueError),
}

impl ClientError {
    /// Create a configuration error
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config(message.into())
    }

    pub fn connect(address: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Connect {
            address: address.into(),
            reason: reason.into(),
        }
    }

    /// Check if the error is retryable
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Connect { .. } => true,
            Self::ReadTimeout => true,
            Self::Transport(TransportError::Io(_) | TransportError::Eof) => true,
            // Implementation-defined server errors may be temporary
            Self::Remote { .. } => matches!(
                self.error_kind(),
                Some(JsonRpcErrorCode::ServerError(_))
            ),
            _ => false,
        }
    }

    /// Check if the error is a protocol-level issue
    pub fn is_protocol_error(&self) -> bool {
        matches!(self, Self::Protocol(_) | Self::ProtocolVersion { .. })
    }

    /// Get the error code if this is a server error
    pub fn error_code(&self) -> Option<i64> {
        match self {
            Self::Remote { code, .. } => Some(*code),
            _ => None,
        }
    }

    /// The standard JSON-RPC category of a server error
    pub fn error_kind(&self) -> Option<JsonRpcErrorCode> {
        self.error_code().map(JsonRpcErrorCode::from_code)
    }
}

impl From<JsonRpcErrorObject> for ClientError {
    fn from(error: JsonRpcErrorObject) -> Self {
        Self::Remote {
            code: error.code,
            message: error.message,
            data: error.data,
        }
    }
}

impl From<ValueError> for ClientError {
    fn from(error: ValueError) -> Self {
        Self::Protocol(ProtocolError::Value(error))
    }
}
