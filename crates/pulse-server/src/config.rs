//! Runtime server configuration.

use std::time::Duration;

use pulse_core::constants::{
    HANDSHAKE_TIMEOUT, LIVENESS_TIMEOUT, MAX_MESSAGE_SIZE, PING_PERIOD, READ_TIMEOUT,
    SERVER_QUEUE_CAPACITY, sweep_period_for,
};
use pulse_settings::{BackendKind, DecodeErrorPolicy, OverflowPolicy, PulseSettings};

/// Configuration for [`PulseServer`](crate::server::PulseServer).
///
/// Built from [`PulseSettings`] by the binary; tests construct it directly.
#[derive(Clone, Debug)]
pub struct ServerConfig {
    /// Host to bind (default `"127.0.0.1"`).
    pub host: String,
    /// Port to bind (default `0` for auto-assign).
    pub port: u16,
    /// I/O backend.
    pub backend: BackendKind,
    /// Poll threads for [`BackendKind::Poller`].
    pub poller_threads: usize,
    /// Upper bound on the WebSocket handshake.
    pub handshake_timeout: Duration,
    /// Read deadline, refreshed by every inbound frame, ping or pong.
    pub read_timeout: Duration,
    /// WebSocket Ping interval of the per-connection writer.
    pub ping_period: Duration,
    /// Largest WebSocket message accepted, header included.
    pub max_message_size: usize,
    /// Outbound queue capacity per connection.
    pub queue_capacity: usize,
    /// Behavior when an outbound queue is full.
    pub overflow_policy: OverflowPolicy,
    /// Behavior on an undecodable inbound frame.
    pub decode_error_policy: DecodeErrorPolicy,
    /// Silence tolerated before the heartbeat sweep evicts a connection.
    pub liveness_timeout: Duration,
    /// Heartbeat sweep period.
    pub heartbeat_period: Duration,
    /// Ping every live connection on each sweep.
    pub ping_on_sweep: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".into(),
            port: 0,
            backend: BackendKind::Tasks,
            poller_threads: 1,
            handshake_timeout: HANDSHAKE_TIMEOUT,
            read_timeout: READ_TIMEOUT,
            ping_period: PING_PERIOD,
            max_message_size: MAX_MESSAGE_SIZE,
            queue_capacity: SERVER_QUEUE_CAPACITY,
            overflow_policy: OverflowPolicy::DropOldest,
            decode_error_policy: DecodeErrorPolicy::Disconnect,
            liveness_timeout: LIVENESS_TIMEOUT,
            heartbeat_period: sweep_period_for(LIVENESS_TIMEOUT),
            ping_on_sweep: false,
        }
    }
}

impl From<&PulseSettings> for ServerConfig {
    fn from(settings: &PulseSettings) -> Self {
        let srv = &settings.server;
        let hb = &settings.heartbeat;
        Self {
            host: srv.host.clone(),
            port: srv.port,
            backend: srv.backend,
            poller_threads: srv.poller_threads,
            handshake_timeout: srv.handshake_timeout(),
            read_timeout: srv.read_timeout(),
            ping_period: srv.ping_period(),
            max_message_size: srv.max_message_size,
            queue_capacity: srv.queue_capacity,
            overflow_policy: srv.overflow_policy,
            decode_error_policy: srv.decode_error_policy,
            liveness_timeout: hb.liveness_timeout(),
            heartbeat_period: hb.period(),
            ping_on_sweep: hb.ping_on_sweep,
        }
    }
}

impl ServerConfig {
    /// `host:port` for the listener.
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_bind_loopback_ephemeral() {
        let cfg = ServerConfig::default();
        assert_eq!(cfg.bind_addr(), "127.0.0.1:0");
        assert_eq!(cfg.backend, BackendKind::Tasks);
    }

    #[test]
    fn heartbeat_defaults_follow_liveness_timeout() {
        let cfg = ServerConfig::default();
        assert_eq!(cfg.liveness_timeout, Duration::from_secs(30));
        assert_eq!(cfg.heartbeat_period, Duration::from_secs(15));
        assert!(cfg.read_timeout > cfg.liveness_timeout);
    }

    #[test]
    fn from_settings() {
        let mut settings = PulseSettings::default();
        settings.server.port = 9001;
        settings.server.backend = BackendKind::Poller;
        settings.server.queue_capacity = 100;
        settings.heartbeat.liveness_timeout_ms = 4000;
        settings.heartbeat.period_ms = 2000;
        settings.heartbeat.ping_on_sweep = true;

        let cfg = ServerConfig::from(&settings);
        assert_eq!(cfg.bind_addr(), "0.0.0.0:9001");
        assert_eq!(cfg.backend, BackendKind::Poller);
        assert_eq!(cfg.queue_capacity, 100);
        assert_eq!(cfg.liveness_timeout, Duration::from_secs(4));
        assert_eq!(cfg.heartbeat_period, Duration::from_secs(2));
        assert!(cfg.ping_on_sweep);
    }
}
