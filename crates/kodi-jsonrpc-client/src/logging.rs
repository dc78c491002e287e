//! Process-wide log level control.
//!
//! The client logs through `tracing`. [`init_logging`] installs a formatting subscriber
//! whose level filter can be swapped at runtime by [`set_log_level`]. Applications with
//! their own subscriber can skip `init_logging`; the setter then only records the level.

use once_cell::sync::OnceCell;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::atomic::{AtomicU8, Ordering};
use tracing::level_filters::LevelFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{Registry, fmt as tracing_fmt, reload};

use crate::error::{ClientError, ClientResult};

/// Log severity
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Debug,
    #[default]
    Info,
    Warn,
    Error,
    /// Same filter as `Error`; tracing has no separate fatal level
    Fatal,
}

impl LogLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Warn => "warn",
            LogLevel::Error => "error",
            LogLevel::Fatal => "fatal",
        }
    }

    /// The `tracing` filter this level corresponds to
    pub fn to_filter(self) -> LevelFilter {
        match self {
            LogLevel::Debug => LevelFilter::DEBUG,
            LogLevel::Info => LevelFilter::INFO,
            LogLevel::Warn => LevelFilter::WARN,
            LogLevel::Error | LogLevel::Fatal => LevelFilter::ERROR,
        }
    }

    fn to_u8(self) -> u8 {
        match self {
            LogLevel::Debug => 0,
            LogLevel::Info => 1,
            LogLevel::Warn => 2,
            LogLevel::Error => 3,
            LogLevel::Fatal => 4,
        }
    }

    fn from_u8(raw: u8) -> Self {
        match raw {
            0 => LogLevel::Debug,
            1 => LogLevel::Info,
            2 => LogLevel::Warn,
            3 => LogLevel::Error,
            _ => LogLevel::Fatal,
        }
    }
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for LogLevel {
    type Err = ClientError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "debug" => Ok(LogLevel::Debug),
            "info" => Ok(LogLevel::Info),
            "warn" | "warning" => Ok(LogLevel::Warn),
            "error" => Ok(LogLevel::Error),
            "fatal" => Ok(LogLevel::Fatal),
            other => Err(ClientError::config(format!("unknown log level '{other}'"))),
        }
    }
}

static CURRENT_LEVEL: AtomicU8 = AtomicU8::new(1);
static RELOAD_HANDLE: OnceCell<reload::Handle<LevelFilter, Registry>> = OnceCell::new();

/// Install a formatting subscriber at `level`.
///
/// Fails if another global subscriber is already installed.
pub fn init_logging(level: LogLevel) -> ClientResult<()> {
    CURRENT_LEVEL.store(level.to_u8(), Ordering::Relaxed);

    let (filter, handle) = reload::Layer::new(level.to_filter());
    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_fmt::layer().with_target(true))
        .try_init()
        .map_err(|e| ClientError::config(format!("failed to install log subscriber: {e}")))?;

    // try_init succeeds at most once per process
    let _ = RELOAD_HANDLE.set(handle);
    Ok(())
}

/// Change the process-wide log level
pub fn set_log_level(level: LogLevel) {
    CURRENT_LEVEL.store(level.to_u8(), Ordering::Relaxed);
    if let Some(handle) = RELOAD_HANDLE.get()
        && let Err(e) = handle.modify(|filter| *filter = level.to_filter())
    {
        tracing::warn!(error = %e, "Failed to update log level");
    }
}

/// The current process-wide log level
pub fn log_level() -> LogLevel {
    LogLevel::from_u8(CURRENT_LEVEL.load(Ordering::Relaxed))
}
