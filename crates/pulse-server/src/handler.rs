//! Application callback contract.

use std::sync::Arc;

use pulse_codec::Envelope;

use crate::connection::Connection;

/// Business-logic hooks invoked by the I/O backends.
///
/// Calls for one connection are serialized and arrive in network order.
/// Under the poller backend these run on a poll thread: they must not
/// block, and slow work should be handed to a spawned task.
pub trait MessageHandler: Send + Sync + 'static {
    /// A connection was upgraded and registered.
    fn on_connect(&self, _conn: &Arc<Connection>) {}

    /// One decoded inbound application frame.
    fn on_message(&self, conn: &Arc<Connection>, envelope: Envelope);

    /// The connection was torn down. Runs exactly once per connection,
    /// after it left the registry and before its property bag is cleared.
    fn on_disconnect(&self, _conn: &Arc<Connection>) {}
}

impl<F> MessageHandler for F
where
    F: Fn(&Arc<Connection>, Envelope) + Send + Sync + 'static,
{
    fn on_message(&self, conn: &Arc<Connection>, envelope: Envelope) {
        self(conn, envelope);
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;
    use crate::testing::detached;
    use pulse_codec::{Header, MessageType};

    #[test]
    fn closures_are_handlers() {
        let seen = Arc::new(AtomicUsize::new(0));
        let counter = seen.clone();
        let handler = move |_: &Arc<Connection>, env: Envelope| {
            let _ = counter.fetch_add(env.payload.len(), Ordering::Relaxed);
        };
        let (conn, _mock) = detached(1);
        let conn = Arc::new(conn);
        handler.on_connect(&conn);
        handler.on_message(
            &conn,
            Envelope {
                header: Header::new(MessageType::Notify, 1),
                payload: b"abc".to_vec(),
            },
        );
        handler.on_disconnect(&conn);
        assert_eq!(seen.load(Ordering::Relaxed), 3);
    }
}
