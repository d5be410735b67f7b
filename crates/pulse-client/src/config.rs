//! Runtime client configuration.

use std::time::Duration;

use pulse_core::backoff::BackoffConfig;
use pulse_core::constants::{CLIENT_QUEUE_CAPACITY, HANDSHAKE_TIMEOUT, PING_PERIOD, READ_TIMEOUT};
use pulse_settings::PulseSettings;

/// Configuration for [`PulseClient`](crate::PulseClient).
#[derive(Clone, Debug)]
pub struct ClientConfig {
    /// `host:port`, or a full `ws://` URL.
    pub addr: String,
    /// Outbound queue capacity; a full queue drops the newest message.
    pub queue_capacity: usize,
    /// Bound on dialing plus the WebSocket handshake.
    pub connect_timeout: Duration,
    /// Read deadline, refreshed by every inbound frame, ping or pong.
    pub read_timeout: Duration,
    /// Interval between client Pings.
    pub ping_period: Duration,
    /// Reconnect policy.
    pub reconnect: BackoffConfig,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            addr: "127.0.0.1:8080".into(),
            queue_capacity: CLIENT_QUEUE_CAPACITY,
            connect_timeout: HANDSHAKE_TIMEOUT,
            read_timeout: READ_TIMEOUT,
            ping_period: PING_PERIOD,
            reconnect: BackoffConfig::default(),
        }
    }
}

impl From<&PulseSettings> for ClientConfig {
    fn from(settings: &PulseSettings) -> Self {
        Self {
            addr: settings.client.addr.clone(),
            queue_capacity: settings.client.queue_capacity,
            connect_timeout: settings.server.handshake_timeout(),
            read_timeout: settings.server.read_timeout(),
            ping_period: settings.server.ping_period(),
            reconnect: settings.client.reconnect.clone(),
        }
    }
}

impl ClientConfig {
    /// WebSocket URL to dial.
    pub fn url(&self) -> String {
        if self.addr.starts_with("ws://") || self.addr.starts_with("wss://") {
            self.addr.clone()
        } else {
            format!("ws://{}/ws", self.addr)
        }
    }
}
