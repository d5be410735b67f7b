//! Live connection table and fan-out.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::RwLock;
use pulse_codec::FrameCodec;
use tracing::{debug, warn};

use crate::connection::{CloseReason, Connection, ConnectionId, Transport};

/// Connections currently registered, indexed by id.
///
/// Ids are assigned here, start at 1 and are never reused within a process.
pub struct Registry {
    connections: RwLock<HashMap<ConnectionId, Arc<Connection>>>,
    next_id: AtomicU64,
}

impl Registry {
    /// Create an empty registry.
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            connections: RwLock::new(HashMap::new()),
            next_id: AtomicU64::new(1),
        })
    }

    /// Assign an id, build the connection and add it.
    pub fn register(
        self: &Arc<Self>,
        peer: SocketAddr,
        transport: Box<dyn Transport>,
        codec: Arc<FrameCodec>,
    ) -> Arc<Connection> {
        let id = ConnectionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let conn = Arc::new(Connection::new(
            id,
            peer,
            codec,
            transport,
            Arc::downgrade(self),
        ));
        let _ = self.connections.write().insert(id, conn.clone());
        debug!(conn_id = %id, %peer, "registered connection");
        conn
    }

    /// Remove an id. Removing an absent id is a no-op.
    pub fn remove(&self, id: ConnectionId) -> Option<Arc<Connection>> {
        self.connections.write().remove(&id)
    }

    /// Look up a live connection.
    pub fn get(&self, id: ConnectionId) -> Option<Arc<Connection>> {
        self.connections.read().get(&id).cloned()
    }

    /// Number of registered connections.
    pub fn len(&self) -> usize {
        self.connections.read().len()
    }

    /// Whether nothing is registered.
    pub fn is_empty(&self) -> bool {
        self.connections.read().is_empty()
    }

    /// Point-in-time copy; the lock is not held while the caller iterates.
    pub fn snapshot(&self) -> Vec<Arc<Connection>> {
        self.connections.read().values().cloned().collect()
    }

    /// Close every registered connection.
    pub fn close_all(&self, reason: CloseReason) -> usize {
        let conns = self.snapshot();
        let closed = conns.iter().filter(|c| c.close_with(reason)).count();
        debug!(closed, %reason, "closed all connections");
        closed
    }

    /// Push `payload` to every connection. Returns how many accepted it.
    pub fn broadcast_push(&self, type_id: u16, payload: &[u8]) -> usize {
        let conns = self.snapshot();
        let recipients = conns.len();
        let mut delivered = 0;
        for conn in &conns {
            match conn.push(type_id, payload) {
                Ok(()) => delivered += 1,
                Err(e) => warn!(conn_id = %conn.id(), error = %e, "failed to push to client"),
            }
        }
        debug!(type_id, recipients, delivered, "broadcast push");
        delivered
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{MockTransport, peer};
    use pulse_codec::decode_frame;

    fn register(registry: &Arc<Registry>) -> (Arc<Connection>, Arc<MockTransport>) {
        let mock = MockTransport::new();
        let conn = registry.register(peer(), Box::new(mock.clone()), Arc::new(FrameCodec::default()));
        (conn, mock)
    }

    #[test]
    fn ids_start_at_one_and_increase() {
        let registry = Registry::new();
        let (a, _) = register(&registry);
        let (b, _) = register(&registry);
        assert_eq!(a.id(), ConnectionId(1));
        assert_eq!(b.id(), ConnectionId(2));
        assert_eq!(registry.len(), 2);
    }

    #[test]
    fn ids_are_not_reused_after_removal() {
        let registry = Registry::new();
        let (a, _) = register(&registry);
        a.close();
        let (b, _) = register(&registry);
        assert_ne!(a.id(), b.id());
    }

    #[test]
    fn close_removes_from_registry() {
        let registry = Registry::new();
        let (conn, _) = register(&registry);
        assert!(registry.get(conn.id()).is_some());
        conn.close();
        assert!(registry.get(conn.id()).is_none());
        assert!(registry.is_empty());
    }

    #[test]
    fn remove_is_idempotent() {
        let registry = Registry::new();
        let (conn, _) = register(&registry);
        assert!(registry.remove(conn.id()).is_some());
        assert!(registry.remove(conn.id()).is_none());
        assert!(registry.remove(ConnectionId(999)).is_none());
    }

    #[test]
    fn snapshot_is_detached_from_later_changes() {
        let registry = Registry::new();
        let (a, _) = register(&registry);
        let (_b, _) = register(&registry);
        let snap = registry.snapshot();
        a.close();
        assert_eq!(snap.len(), 2);
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn broadcast_reaches_every_connection() {
        let registry = Registry::new();
        let (_a, ma) = register(&registry);
        let (_b, mb) = register(&registry);
        assert_eq!(registry.broadcast_push(4, b"news"), 2);
        for mock in [ma, mb] {
            let env = decode_frame(&mock.frames()[0]).unwrap();
            assert_eq!(env.type_id(), 4);
            assert_eq!(env.payload, b"news");
        }
    }

    #[test]
    fn broadcast_skips_failing_connections() {
        let registry = Registry::new();
        let (_a, ma) = register(&registry);
        let (_b, mb) = register(&registry);
        ma.fail_writes();
        assert_eq!(registry.broadcast_push(1, b"x"), 1);
        assert_eq!(mb.frames().len(), 1);
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn broadcast_to_empty_registry() {
        assert_eq!(Registry::new().broadcast_push(1, b"x"), 0);
    }

    #[test]
    fn close_all_empties_registry() {
        let registry = Registry::new();
        let (a, ma) = register(&registry);
        let (_b, _) = register(&registry);
        assert_eq!(registry.close_all(CloseReason::Shutdown), 2);
        assert!(registry.is_empty());
        assert_eq!(a.close_reason(), Some(CloseReason::Shutdown));
        assert_eq!(ma.close_count(), 1);
        assert_eq!(registry.close_all(CloseReason::Shutdown), 0);
    }

    #[test]
    fn concurrent_registration() {
        let registry = Registry::new();
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let registry = registry.clone();
                std::thread::spawn(move || {
                    (0..50).map(|_| register(&registry).0.id()).collect::<Vec<_>>()
                })
            })
            .collect();
        let mut ids: Vec<_> = handles.into_iter().flat_map(|h| h.join().unwrap()).collect();
        ids.sort();
        ids.dedup();
        assert_eq!(ids.len(), 400);
        assert_eq!(registry.len(), 400);
    }
}
