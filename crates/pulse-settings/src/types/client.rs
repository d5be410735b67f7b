//! Client and logging settings.

use std::time::Duration;

use pulse_core::backoff::BackoffConfig;
use pulse_core::constants::CLIENT_QUEUE_CAPACITY;
use pulse_core::logging::LogFormat;
use serde::{Deserialize, Serialize};

/// Client connection settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ClientSettings {
    /// Server address as `host:port`.
    pub addr: String,
    /// Outbound queue capacity; full queues drop the newest message.
    pub queue_capacity: usize,
    /// Interval between demo messages, in milliseconds.
    pub send_interval_ms: u64,
    /// Reconnect policy.
    pub reconnect: BackoffConfig,
}

impl Default for ClientSettings {
    fn default() -> Self {
        Self {
            addr: "127.0.0.1:8080".to_string(),
            queue_capacity: CLIENT_QUEUE_CAPACITY,
            send_interval_ms: 5000,
            reconnect: BackoffConfig::default(),
        }
    }
}

impl ClientSettings {
    /// Demo send interval.
    pub fn send_interval(&self) -> Duration {
        Duration::from_millis(self.send_interval_ms)
    }
}

/// Log verbosity.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    /// Most verbose.
    Trace,
    /// Debug.
    Debug,
    /// Default.
    #[default]
    Info,
    /// Warnings and errors.
    Warn,
    /// Errors only.
    Error,
}

impl LogLevel {
    /// Convert to a tracing filter string.
    pub fn as_filter_str(&self) -> &'static str {
        match self {
            Self::Trace => "trace",
            Self::Debug => "debug",
            Self::Info => "info",
            Self::Warn => "warn",
            Self::Error => "error",
        }
    }
}

/// Logging configuration.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LoggingSettings {
    /// Minimum level when `RUST_LOG` is unset.
    pub level: LogLevel,
    /// Output format on stderr.
    pub format: LogFormat,
}
