//! Settings type definitions.
//!
//! All types use `#[serde(rename_all = "camelCase", default)]`, so partial
//! JSON is accepted and missing fields take their compiled default.

mod client;
mod codec;
mod server;

pub use client::*;
pub use codec::*;
pub use server::*;

use serde::{Deserialize, Serialize};

use crate::errors::{Result, SettingsError};

/// Root settings for the `pulse` server and `pulse-client`.
///
/// ```json
/// {
///   "server": { "port": 9000, "backend": "poller" },
///   "heartbeat": { "livenessTimeoutMs": 20000, "periodMs": 10000 },
///   "codec": { "encryption": "rc4", "compressThreshold": 1024 }
/// }
/// ```
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PulseSettings {
    /// Settings schema version.
    pub version: String,
    /// Listener, backend and per-connection limits.
    pub server: ServerSettings,
    /// Liveness sweep.
    pub heartbeat: HeartbeatSettings,
    /// Wire codec defaults.
    pub codec: CodecSettings,
    /// Client side.
    pub client: ClientSettings,
    /// Log output.
    pub logging: LoggingSettings,
}

impl Default for PulseSettings {
    fn default() -> Self {
        Self {
            version: "0.1.0".to_string(),
            server: ServerSettings::default(),
            heartbeat: HeartbeatSettings::default(),
            codec: CodecSettings::default(),
            client: ClientSettings::default(),
            logging: LoggingSettings::default(),
        }
    }
}

impl PulseSettings {
    /// Reject combinations the server cannot run with.
    pub fn validate(&self) -> Result<()> {
        fn invalid(msg: impl Into<String>) -> Result<()> {
            Err(SettingsError::InvalidValue(msg.into()))
        }

        let hb = &self.heartbeat;
        if hb.liveness_timeout_ms == 0 {
            return invalid("heartbeat.livenessTimeoutMs must be positive");
        }
        if hb.period_ms == 0 || hb.period_ms > hb.liveness_timeout_ms {
            return invalid(format!(
                "heartbeat.periodMs must be in 1..={}",
                hb.liveness_timeout_ms
            ));
        }

        let srv = &self.server;
        if srv.ping_period_ms == 0 || srv.ping_period_ms >= hb.liveness_timeout_ms {
            return invalid("server.pingPeriodMs must be positive and below the liveness timeout");
        }
        if srv.read_timeout_ms == 0 || srv.handshake_timeout_ms == 0 {
            return invalid("server timeouts must be positive");
        }
        if srv.queue_capacity == 0 {
            return invalid("server.queueCapacity must be at least 1");
        }
        if srv.poller_threads == 0 {
            return invalid("server.pollerThreads must be at least 1");
        }
        if srv.max_message_size < pulse_core::constants::HEADER_LEN {
            return invalid("server.maxMessageSize must fit the 4-byte header");
        }
        if self.client.queue_capacity == 0 {
            return invalid("client.queueCapacity must be at least 1");
        }

        let _ = self.codec.build_codec(srv.max_message_size)?;
        Ok(())
    }
}
