//! Configuration types for the connection

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::error::{ClientError, ClientResult};
use crate::logging::LogLevel;

/// Default Kodi raw socket address
pub const DEFAULT_ADDRESS: &str = "127.0.0.1:9090";

/// Lowest `JSONRPC.Version` major this client speaks to
pub const DEFAULT_MIN_MAJOR_VERSION: u64 = 6;

/// Main connection configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ConnectionConfig {
    /// `host:port` of the server
    pub address: String,

    /// Timeout configurations
    pub timeouts: TimeoutConfig,

    /// Reconnection configuration
    pub retry: RetryConfig,

    /// Queue sizing
    pub queues: QueueConfig,

    /// Wire codec limits
    pub codec: CodecConfig,

    /// Minimum accepted server major version
    pub min_major_version: u64,

    /// Logging configuration
    pub logging: LoggingConfig,
}

/// Timeout configuration. A zero `connect` or `handshake` means "no limit".
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TimeoutConfig {
    /// Overall budget for establishing (or re-establishing) the transport
    #[serde(with = "duration_serde")]
    pub connect: Duration,

    /// Wait for the `JSONRPC.Version` response; falls back to `connect` when zero
    #[serde(with = "duration_serde")]
    pub handshake: Duration,

    /// Upper bound on draining queued writes and deliveries during close
    #[serde(with = "duration_serde")]
    pub drain: Duration,
}

/// Reconnection configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Fixed delay between failed dial attempts
    #[serde(with = "duration_serde")]
    pub backoff: Duration,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct QueueConfig {
    /// Requests buffered ahead of the writer
    pub outbound_capacity: usize,

    /// Notifications buffered for the consumer
    pub notification_capacity: usize,

    /// How long a delivery waits for space before evicting the oldest notification
    #[serde(with = "duration_serde")]
    pub notification_grace: Duration,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CodecConfig {
    /// Largest incoming message accepted, in bytes
    pub max_frame_length: usize,
}

/// Logging configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Process-wide log level applied when the connection is established.
    /// `None` leaves the current level alone.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub level: Option<LogLevel>,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            address: DEFAULT_ADDRESS.to_string(),
            timeouts: TimeoutConfig::default(),
            retry: RetryConfig::default(),
            queues: QueueConfig::default(),
            codec: CodecConfig::default(),
            min_major_version: DEFAULT_MIN_MAJOR_VERSION,
            logging: LoggingConfig::default(),
        }
    }
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            connect: Duration::ZERO,
            handshake: Duration::ZERO,
            drain: Duration::from_secs(5),
        }
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            backoff: Duration::from_secs(1),
        }
    }
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            outbound_capacity: 256,
            notification_capacity: 16,
            notification_grace: Duration::from_millis(200),
        }
    }
}

impl Default for CodecConfig {
    fn default() -> Self {
        Self {
            max_frame_length: 16 * 1024 * 1024,
        }
    }
}

impl TimeoutConfig {
    /// Connect budget, `None` when unbounded
    pub fn connect_limit(&self) -> Option<Duration> {
        non_zero(self.connect)
    }

    /// Handshake budget, falling back to the connect budget
    pub fn handshake_limit(&self) -> Option<Duration> {
        non_zero(self.handshake).or_else(|| self.connect_limit())
    }
}

impl ConnectionConfig {
    /// Configuration for `address` with every other setting at its default
    pub fn with_address(address: impl Into<String>) -> Self {
        Self {
            address: address.into(),
            ..Self::default()
        }
    }

    /// Reject settings the connection cannot run with
    pub fn validate(&self) -> ClientResult<()> {
        if self.address.trim().is_empty() {
            return Err(ClientError::config("address must not be empty"));
        }
        if self.queues.outbound_capacity == 0 {
            return Err(ClientError::config("queues.outbound_capacity must be non-zero"));
        }
        if self.queues.notification_capacity == 0 {
            return Err(ClientError::config(
                "queues.notification_capacity must be non-zero",
            ));
        }
        if self.timeouts.drain.is_zero() {
            return Err(ClientError::config("timeouts.drain must be non-zero"));
        }
        if self.codec.max_frame_length == 0 {
            return Err(ClientError::config("codec.max_frame_length must be non-zero"));
        }
        Ok(())
    }
}

fn non_zero(duration: Duration) -> Option<Duration> {
    (!duration.is_zero()).then_some(duration)
}

// Helper module for Duration serialization
mod duration_serde {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_u64(duration.as_millis() as u64)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let millis = u64::deserialize(deserializer)?;
        Ok(Duration::from_millis(millis))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_defaults() {
        let config = ConnectionConfig::default();

        assert_eq!(config.address, "127.0.0.1:9090");
        assert_eq!(config.timeouts.connect_limit(), None);
        assert_eq!(config.timeouts.handshake_limit(), None);
        assert_eq!(config.retry.backoff, Duration::from_secs(1));
        assert_eq!(config.queues.notification_capacity, 16);
        assert_eq!(config.queues.notification_grace, Duration::from_millis(200));
        assert_eq!(config.min_major_version, 6);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_handshake_falls_back_to_connect() {
        let mut timeouts = TimeoutConfig {
            connect: Duration::from_secs(3),
            ..TimeoutConfig::default()
        };
        assert_eq!(timeouts.handshake_limit(), Some(Duration::from_secs(3)));

        timeouts.handshake = Duration::from_millis(500);
        assert_eq!(timeouts.handshake_limit(), Some(Duration::from_millis(500)));
    }

    #[test]
    fn test_validation() {
        let mut config = ConnectionConfig::with_address("  ");
        assert!(matches!(config.validate(), Err(ClientError::Config(_))));

        config.address = "kodi.local:9090".to_string();
        config.queues.notification_capacity = 0;
        assert!(matches!(config.validate(), Err(ClientError::Config(_))));
    }

    #[test]
    fn test_config_serialization() {
        let config = ConnectionConfig::default();
        let json = serde_json::to_value(&config).unwrap();

        assert_eq!(json["timeouts"]["drain"], json!(5000));
        assert!(json["logging"].get("level").is_none());

        let partial: ConnectionConfig = serde_json::from_value(json!({
            "address": "10.0.0.5:9090",
            "queues": {"notification_capacity": 4}
        }))
        .unwrap();
        assert_eq!(partial.address, "10.0.0.5:9090");
        assert_eq!(partial.queues.notification_capacity, 4);
        assert_eq!(partial.queues.outbound_capacity, 256);
        assert_eq!(partial.logging.level, None);

        let verbose: ConnectionConfig =
            serde_json::from_value(json!({"logging": {"level": "debug"}})).unwrap();
        assert_eq!(verbose.logging.level, Some(LogLevel::Debug));
    }
}
