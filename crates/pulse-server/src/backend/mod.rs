//! Interchangeable I/O strategies behind one contract.
//!
//! A backend takes an accepted TCP stream, performs the WebSocket upgrade,
//! registers the connection through [`ServerCore`] and then delivers every
//! inbound binary message to it until the connection dies.

use std::net::SocketAddr;
use std::sync::Arc;

use async_trait::async_trait;
use pulse_settings::BackendKind;
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::protocol::WebSocketConfig;

use crate::config::ServerConfig;
use crate::connection::Connection;
use crate::errors::Result;
use crate::lifecycle::ServerCore;

pub mod poller;
pub mod tasks;

pub use poller::PollerBackend;
pub use tasks::TaskBackend;

/// One I/O strategy.
#[async_trait]
pub trait IoBackend: Send + Sync {
    /// Which strategy this is.
    fn kind(&self) -> BackendKind;

    /// Upgrade `stream` and start serving it.
    ///
    /// On error the socket is dropped and nothing was registered.
    async fn accept(&self, stream: TcpStream, peer: SocketAddr) -> Result<Arc<Connection>>;

    /// Stop serving every connection and release backend resources.
    async fn shutdown(&self);
}

/// Build the backend selected by `config.backend`.
pub fn build(core: Arc<ServerCore>, config: &ServerConfig) -> Result<Arc<dyn IoBackend>> {
    Ok(match config.backend {
        BackendKind::Tasks => Arc::new(TaskBackend::new(core, config)),
        BackendKind::Poller => Arc::new(PollerBackend::new(core, config)?),
    })
}

/// WebSocket limits shared by both backends.
pub(crate) fn ws_config(config: &ServerConfig) -> WebSocketConfig {
    WebSocketConfig::default()
        .max_message_size(Some(config.max_message_size))
        .max_frame_size(Some(config.max_message_size))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::Registry;
    use pulse_codec::FrameCodec;
    use pulse_settings::DecodeErrorPolicy;

    fn core() -> Arc<ServerCore> {
        let handler = |_: &Arc<Connection>, _: pulse_codec::Envelope| {};
        Arc::new(ServerCore::new(
            Registry::new(),
            Arc::new(handler),
            Arc::new(FrameCodec::default()),
            DecodeErrorPolicy::Disconnect,
        ))
    }

    #[tokio::test]
    async fn build_selects_configured_backend() {
        let tasks = build(core(), &ServerConfig::default()).unwrap();
        assert_eq!(tasks.kind(), BackendKind::Tasks);
        tasks.shutdown().await;

        let config = ServerConfig {
            backend: BackendKind::Poller,
            poller_threads: 2,
            ..ServerConfig::default()
        };
        let poller = build(core(), &config).unwrap();
        assert_eq!(poller.kind(), BackendKind::Poller);
        poller.shutdown().await;
    }

    #[test]
    fn ws_config_caps_message_size() {
        let config = ServerConfig {
            max_message_size: 1024,
            ..ServerConfig::default()
        };
        let ws = ws_config(&config);
        assert_eq!(ws.max_message_size, Some(1024));
        assert_eq!(ws.max_frame_size, Some(1024));
    }
}
