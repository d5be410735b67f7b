//! Demo business logic: answer every request with a greeting and count
//! traffic in the shared store.

use std::sync::Arc;

use pulse_codec::{Envelope, MessageType};
use pulse_server::{Connection, MessageHandler, SharedStore};
use serde_json::Value;
use tracing::{debug, info, warn};

/// Payload of every Response.
pub const REPLY: &[u8] = b"hello client";

/// Store key counting decoded messages across all connections.
pub const MESSAGES_KEY: &str = "messages:received";
/// Store key tracking connections currently open.
pub const ACTIVE_KEY: &str = "connections:active";

/// Per-connection property holding that connection's message count.
const RECEIVED_PROP: &str = "received";

/// Replies `hello client` to requests; logs notifies.
pub struct EchoHandler {
    store: Arc<dyn SharedStore>,
}

impl EchoHandler {
    pub fn new(store: Arc<dyn SharedStore>) -> Self {
        Self { store }
    }
}

impl MessageHandler for EchoHandler {
    fn on_connect(&self, conn: &Arc<Connection>) {
        conn.put(RECEIVED_PROP, 0);
        if let Err(e) = self.store.incr(ACTIVE_KEY) {
            warn!(conn_id = %conn.id(), error = %e, "store unavailable");
        }
    }

    fn on_message(&self, conn: &Arc<Connection>, envelope: Envelope) {
        let received = conn.get(RECEIVED_PROP).and_then(|v| v.as_u64()).unwrap_or(0) + 1;
        conn.put(RECEIVED_PROP, received);
        let total = self.store.incr(MESSAGES_KEY).unwrap_or_else(|e| {
            warn!(conn_id = %conn.id(), error = %e, "store unavailable");
            0
        });

        match envelope.message_type() {
            Some(MessageType::Request) => {
                if let Err(e) = conn.reply(&envelope.header, REPLY) {
                    warn!(conn_id = %conn.id(), error = %e, "reply failed");
                }
            }
            Some(MessageType::Notify) => info!(
                conn_id = %conn.id(),
                type_id = envelope.type_id(),
                payload = %String::from_utf8_lossy(&envelope.payload),
                total,
                "notify"
            ),
            other => debug!(conn_id = %conn.id(), msg_type = ?other, "ignoring client frame"),
        }
    }

    fn on_disconnect(&self, conn: &Arc<Connection>) {
        let received = conn.get(RECEIVED_PROP).unwrap_or(Value::Null);
        if let Err(e) = self.store.decr(ACTIVE_KEY) {
            warn!(conn_id = %conn.id(), error = %e, "store unavailable");
        }
        info!(conn_id = %conn.id(), %received, "session summary");
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use pulse_client::{ClientConfig, ClientHandler, PulseClient};
    use pulse_codec::FrameCodec;
    use pulse_server::{MemoryStore, PulseServer, ServerConfig};
    use tokio::sync::mpsc;
    use tokio::time::timeout;

    use super::*;

    const TIMEOUT: Duration = Duration::from_secs(5);

    struct Inbox(mpsc::UnboundedSender<Envelope>);

    impl ClientHandler for Inbox {
        fn on_message(&self, envelope: Envelope) {
            let _ = self.0.send(envelope);
        }
    }

    async fn eventually(what: &str, check: impl Fn() -> bool) {
        timeout(TIMEOUT, async {
            while !check() {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .unwrap_or_else(|_| panic!("{what} never happened"));
    }

    #[tokio::test]
    async fn requests_are_answered_and_counted() {
        let store = Arc::new(MemoryStore::new());
        let server = PulseServer::new(
            ServerConfig::default(),
            Arc::new(EchoHandler::new(store.clone())),
            FrameCodec::default(),
        );
        let (addr, handle) = server.listen().await.unwrap();

        let (tx, mut inbox) = mpsc::unbounded_channel();
        let config = ClientConfig {
            addr: addr.to_string(),
            ..ClientConfig::default()
        };
        let client = PulseClient::new(config, FrameCodec::default(), Arc::new(Inbox(tx)));
        let session = client.connect().await.unwrap();

        assert!(client.send(MessageType::Request, 3, b"hello server"));
        let reply = timeout(TIMEOUT, inbox.recv()).await.unwrap().unwrap();
        assert_eq!(reply.message_type(), Some(MessageType::Response));
        assert_eq!(reply.type_id(), 3);
        assert_eq!(reply.payload, REPLY);

        assert!(client.notify(1, b"Hello Server!"));
        eventually("two messages counted", || {
            store.get(MESSAGES_KEY).unwrap().as_deref() == Some("2")
        })
        .await;
        let conn = server.registry().snapshot().remove(0);
        assert_eq!(conn.get(RECEIVED_PROP), Some(Value::from(2)));
        assert_eq!(store.get(ACTIVE_KEY).unwrap().as_deref(), Some("1"));

        session.close();
        session.closed().await;
        eventually("connection released", || {
            store.get(ACTIVE_KEY).unwrap().as_deref() == Some("0")
        })
        .await;

        server.shutdown().shutdown();
        let _ = handle.await;
    }
}
