//! Server loop, backpressure, and heartbeat settings.

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use pulse_core::constants::{
    HANDSHAKE_TIMEOUT, LIVENESS_TIMEOUT, MAX_MESSAGE_SIZE, PING_PERIOD, READ_TIMEOUT,
    SERVER_QUEUE_CAPACITY, sweep_period_for,
};
use serde::{Deserialize, Serialize};

/// Which I/O backend drives connections.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    /// Readiness poller: a few threads serve every socket.
    Poller,
    /// One read task and one write task per connection.
    #[default]
    Tasks,
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Poller => write!(f, "poller"),
            Self::Tasks => write!(f, "tasks"),
        }
    }
}

impl FromStr for BackendKind {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "poller" | "epoll" | "mio" => Ok(Self::Poller),
            "tasks" | "task" | "dedicated" => Ok(Self::Tasks),
            other => Err(format!("unknown backend '{other}' (expected poller or tasks)")),
        }
    }
}

/// What happens when an outbound queue is full.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum OverflowPolicy {
    /// Evict the oldest queued message to make room.
    #[default]
    DropOldest,
    /// Reject the incoming message.
    DropNewest,
    /// Close the connection.
    Disconnect,
}

/// What happens when an inbound frame fails to decode.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum DecodeErrorPolicy {
    /// Close the connection.
    #[default]
    Disconnect,
    /// Log, count, and skip the frame.
    DropMessage,
}

/// Network and per-connection limits.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ServerSettings {
    /// Bind address.
    pub host: String,
    /// WebSocket listen port (0 picks an ephemeral port).
    pub port: u16,
    /// HTTP port for `/health` and `/metrics` (0 disables).
    pub health_port: u16,
    /// I/O backend.
    pub backend: BackendKind,
    /// Poll threads for the poller backend.
    pub poller_threads: usize,
    /// Upper bound on the WebSocket handshake, in milliseconds.
    pub handshake_timeout_ms: u64,
    /// Read deadline, refreshed by every inbound frame, in milliseconds.
    pub read_timeout_ms: u64,
    /// WebSocket Ping interval of the per-connection writer, in milliseconds.
    pub ping_period_ms: u64,
    /// Largest accepted WebSocket message in bytes.
    pub max_message_size: usize,
    /// Outbound queue capacity per connection.
    pub queue_capacity: usize,
    /// Behavior when the outbound queue is full.
    pub overflow_policy: OverflowPolicy,
    /// Behavior on an undecodable inbound frame.
    pub decode_error_policy: DecodeErrorPolicy,
}

#[allow(clippy::cast_possible_truncation)]
fn millis(d: Duration) -> u64 {
    d.as_millis() as u64
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8080,
            health_port: 8081,
            backend: BackendKind::default(),
            poller_threads: 1,
            handshake_timeout_ms: millis(HANDSHAKE_TIMEOUT),
            read_timeout_ms: millis(READ_TIMEOUT),
            ping_period_ms: millis(PING_PERIOD),
            max_message_size: MAX_MESSAGE_SIZE,
            queue_capacity: SERVER_QUEUE_CAPACITY,
            overflow_policy: OverflowPolicy::DropOldest,
            decode_error_policy: DecodeErrorPolicy::Disconnect,
        }
    }
}

impl ServerSettings {
    /// `host:port` for the WebSocket listener.
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Handshake timeout.
    pub fn handshake_timeout(&self) -> Duration {
        Duration::from_millis(self.handshake_timeout_ms)
    }

    /// Read timeout.
    pub fn read_timeout(&self) -> Duration {
        Duration::from_millis(self.read_timeout_ms)
    }

    /// Writer ping period.
    pub fn ping_period(&self) -> Duration {
        Duration::from_millis(self.ping_period_ms)
    }
}

/// Heartbeat sweep settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct HeartbeatSettings {
    /// Silence tolerated before eviction, in milliseconds.
    pub liveness_timeout_ms: u64,
    /// Sweep period in milliseconds.
    pub period_ms: u64,
    /// Send a WebSocket Ping to every live connection on each sweep.
    pub ping_on_sweep: bool,
}

impl Default for HeartbeatSettings {
    fn default() -> Self {
        Self {
            liveness_timeout_ms: millis(LIVENESS_TIMEOUT),
            period_ms: millis(sweep_period_for(LIVENESS_TIMEOUT)),
            ping_on_sweep: false,
        }
    }
}

impl HeartbeatSettings {
    /// Liveness timeout.
    pub fn liveness_timeout(&self) -> Duration {
        Duration::from_millis(self.liveness_timeout_ms)
    }

    /// Sweep period.
    pub fn period(&self) -> Duration {
        Duration::from_millis(self.period_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn server_defaults() {
        let s = ServerSettings::default();
        assert_eq!(s.port, 8080);
        assert_eq!(s.health_port, 8081);
        assert_eq!(s.backend, BackendKind::Tasks);
        assert_eq!(s.handshake_timeout(), Duration::from_secs(10));
        assert_eq!(s.read_timeout(), Duration::from_secs(35));
        assert_eq!(s.ping_period(), Duration::from_secs(10));
        assert_eq!(s.max_message_size, 65_536);
        assert_eq!(s.overflow_policy, OverflowPolicy::DropOldest);
        assert_eq!(s.decode_error_policy, DecodeErrorPolicy::Disconnect);
        assert_eq!(s.bind_addr(), "0.0.0.0:8080");
    }

    #[test]
    fn server_serde_camel_case() {
        let json = serde_json::to_value(ServerSettings::default()).unwrap();
        assert_eq!(json["backend"], "tasks");
        assert_eq!(json["overflowPolicy"], "dropOldest");
        assert_eq!(json["decodeErrorPolicy"], "disconnect");
        assert!(json.get("queueCapacity").is_some());
        assert!(json.get("readTimeoutMs").is_some());
    }

    #[test]
    fn server_partial_json() {
        let s: ServerSettings =
            serde_json::from_value(serde_json::json!({"port": 9000, "backend": "poller"})).unwrap();
        assert_eq!(s.port, 9000);
        assert_eq!(s.backend, BackendKind::Poller);
        assert_eq!(s.queue_capacity, 2048);
    }

    #[test]
    fn backend_from_str() {
        assert_eq!("poller".parse::<BackendKind>().unwrap(), BackendKind::Poller);
        assert_eq!("TASKS".parse::<BackendKind>().unwrap(), BackendKind::Tasks);
        assert!("threads".parse::<BackendKind>().is_err());
    }

    #[test]
    fn heartbeat_period_is_half_timeout() {
        let h = HeartbeatSettings::default();
        assert_eq!(h.liveness_timeout(), Duration::from_secs(30));
        assert_eq!(h.period(), Duration::from_secs(15));
        assert!(!h.ping_on_sweep);
    }
}
