//! One accepted, upgraded socket.
//!
//! A [`Connection`] owns its send path (through a backend-provided
//! [`Transport`]), its last-activity timestamp and a caller-owned property
//! bag. All methods take `&self`; it is shared as `Arc<Connection>` between
//! the backend, the registry, the heartbeat monitor and handlers.

use std::collections::HashMap;
use std::fmt;
use std::net::SocketAddr;
use std::sync::{Arc, Weak};
use std::sync::atomic::{AtomicBool, AtomicU16, AtomicU64, Ordering};
use std::time::Duration;

use metrics::counter;
use parking_lot::Mutex;
use pulse_codec::header::next_msg_id;
use pulse_codec::{FrameCodec, Header, MessageType};
use serde_json::Value;
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::errors::{Result, ServerError};
use crate::metrics::WS_MESSAGES_DROPPED_TOTAL;
use crate::queue::PushOutcome;
use crate::registry::Registry;

/// Registry-unique connection identifier, never reused.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(pub u64);

impl ConnectionId {
    /// Raw value.
    pub fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

/// Why a connection was closed. Only the first reason is kept.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum CloseReason {
    /// Peer sent a Close frame or hung up.
    PeerClosed,
    /// Transport read failed.
    ReadError,
    /// Read deadline expired.
    Timeout,
    /// Undecodable frame or protocol violation.
    Decode,
    /// Transport write failed.
    WriteError,
    /// Evicted by the heartbeat sweep.
    Evicted,
    /// Server shutdown.
    Shutdown,
    /// Outbound queue full under the `disconnect` policy.
    Capacity,
    /// Closed by application code.
    Local,
}

impl CloseReason {
    /// Stable label for logs and metrics.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::PeerClosed => "peer_closed",
            Self::ReadError => "read_error",
            Self::Timeout => "timeout",
            Self::Decode => "decode",
            Self::WriteError => "write_error",
            Self::Evicted => "evicted",
            Self::Shutdown => "shutdown",
            Self::Capacity => "capacity",
            Self::Local => "local",
        }
    }
}

impl fmt::Display for CloseReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Backend-specific send path of a connection.
///
/// Implementations must not block indefinitely: either enqueue or write
/// to a non-blocking socket.
pub trait Transport: Send + Sync {
    /// Hand one encoded application frame to the backend.
    fn send_frame(&self, frame: Vec<u8>) -> Result<PushOutcome>;
    /// Send a WebSocket Ping.
    fn ping(&self) -> Result<()>;
    /// Close the underlying socket. Called exactly once.
    fn close(&self);
    /// Outbound capacity, reported in [`ServerError::Capacity`].
    fn capacity(&self) -> usize;
}

/// A live (or recently closed) client connection.
pub struct Connection {
    id: ConnectionId,
    peer: SocketAddr,
    codec: Arc<FrameCodec>,
    transport: Box<dyn Transport>,
    registry: Weak<Registry>,
    connected_at: Instant,
    last_activity: Mutex<Instant>,
    closed: AtomicBool,
    released: AtomicBool,
    close_reason: Mutex<Option<CloseReason>>,
    properties: Mutex<HashMap<String, Value>>,
    msg_id: AtomicU16,
    dropped: AtomicU64,
}

impl Connection {
    pub(crate) fn new(
        id: ConnectionId,
        peer: SocketAddr,
        codec: Arc<FrameCodec>,
        transport: Box<dyn Transport>,
        registry: Weak<Registry>,
    ) -> Self {
        let now = Instant::now();
        Self {
            id,
            peer,
            codec,
            transport,
            registry,
            connected_at: now,
            last_activity: Mutex::new(now),
            closed: AtomicBool::new(false),
            released: AtomicBool::new(false),
            close_reason: Mutex::new(None),
            properties: Mutex::new(HashMap::new()),
            msg_id: AtomicU16::new(0),
            dropped: AtomicU64::new(0),
        }
    }

    /// Identifier.
    pub fn id(&self) -> ConnectionId {
        self.id
    }

    /// Remote address.
    pub fn peer(&self) -> SocketAddr {
        self.peer
    }

    /// Codec used for this connection's frames.
    pub fn codec(&self) -> &FrameCodec {
        &self.codec
    }

    // ── Sending ─────────────────────────────────────────────────────

    /// Encode and send a frame exactly as `header` describes.
    pub fn send(&self, header: &Header, payload: &[u8]) -> Result<()> {
        let frame = self
            .codec
            .encode(header, payload)
            .map_err(ServerError::Encode)?;
        self.send_frame(frame)
    }

    /// Send an unsolicited Push with the next message id and codec defaults.
    pub fn push(&self, type_id: u16, payload: &[u8]) -> Result<()> {
        let header = self
            .codec
            .header_for(MessageType::Push, type_id, self.next_msg_id(), payload.len());
        self.send(&header, payload)
    }

    /// Answer `request` with a Response carrying its type id and message id.
    pub fn reply(&self, request: &Header, payload: &[u8]) -> Result<()> {
        let header = self.codec.header_for(
            MessageType::Response,
            request.type_id,
            request.msg_id,
            payload.len(),
        );
        self.send(&header, payload)
    }

    /// Send an already-encoded frame.
    ///
    /// Overflow under a dropping policy is logged and counted but is not an
    /// error for the caller. A write failure or a full queue under the
    /// `disconnect` policy closes the connection.
    pub fn send_frame(&self, frame: Vec<u8>) -> Result<()> {
        if self.is_closed() {
            return Err(ServerError::Closed);
        }
        match self.transport.send_frame(frame) {
            Ok(PushOutcome::Queued) => Ok(()),
            Ok(outcome @ (PushOutcome::DroppedOldest | PushOutcome::DroppedNewest)) => {
                let total = self.dropped.fetch_add(1, Ordering::Relaxed) + 1;
                counter!(WS_MESSAGES_DROPPED_TOTAL).increment(1);
                warn!(conn_id = %self.id, ?outcome, dropped = total, "outbound queue full, message dropped");
                Ok(())
            }
            Ok(PushOutcome::Full) => {
                let _ = self.dropped.fetch_add(1, Ordering::Relaxed);
                counter!(WS_MESSAGES_DROPPED_TOTAL).increment(1);
                warn!(conn_id = %self.id, "outbound queue full, disconnecting");
                let _ = self.close_with(CloseReason::Capacity);
                Err(ServerError::Capacity {
                    capacity: self.transport.capacity(),
                })
            }
            Ok(PushOutcome::Closed) => Err(ServerError::Closed),
            Err(e) => {
                warn!(conn_id = %self.id, error = %e, "write failed");
                let _ = self.close_with(CloseReason::WriteError);
                Err(e)
            }
        }
    }

    /// Send a WebSocket Ping.
    pub fn ping(&self) -> Result<()> {
        if self.is_closed() {
            return Err(ServerError::Closed);
        }
        self.transport.ping().inspect_err(|e| {
            debug!(conn_id = %self.id, error = %e, "ping failed");
            let _ = self.close_with(CloseReason::WriteError);
        })
    }

    /// Next Push message id, wrapping modulo 8192.
    ///
    /// Starts at 1, the same sequence a client uses for its own requests.
    pub fn next_msg_id(&self) -> u16 {
        // fetch_update with an always-Some closure cannot fail
        match self
            .msg_id
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |id| Some(next_msg_id(id)))
        {
            Ok(prev) | Err(prev) => next_msg_id(prev),
        }
    }

    /// Messages lost to outbound overflow.
    pub fn dropped_messages(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    // ── Closing ─────────────────────────────────────────────────────

    /// Close with [`CloseReason::Local`].
    pub fn close(&self) {
        let _ = self.close_with(CloseReason::Local);
    }

    /// Close the connection. Idempotent and safe to race.
    ///
    /// The first caller records `reason`, removes the id from the registry
    /// and closes the transport; every later call returns `false` and does
    /// nothing.
    pub fn close_with(&self, reason: CloseReason) -> bool {
        if self.closed.swap(true, Ordering::AcqRel) {
            return false;
        }
        *self.close_reason.lock() = Some(reason);
        if let Some(registry) = self.registry.upgrade() {
            let _ = registry.remove(self.id);
        }
        self.transport.close();
        debug!(conn_id = %self.id, %reason, "connection closed");
        true
    }

    /// Whether the connection has been closed.
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// The reason recorded by the first close.
    pub fn close_reason(&self) -> Option<CloseReason> {
        *self.close_reason.lock()
    }

    /// Returns `true` only for the first caller; guards once-only teardown.
    pub(crate) fn mark_released(&self) -> bool {
        !self.released.swap(true, Ordering::AcqRel)
    }

    // ── Liveness ────────────────────────────────────────────────────

    /// Record inbound activity now.
    pub fn touch(&self) {
        *self.last_activity.lock() = Instant::now();
    }

    /// `now - last_activity <= timeout`.
    pub fn is_alive(&self, timeout: Duration) -> bool {
        self.idle() <= timeout
    }

    /// Time since the last inbound activity.
    pub fn idle(&self) -> Duration {
        self.last_activity.lock().elapsed()
    }

    /// Time since the connection was registered.
    pub fn age(&self) -> Duration {
        self.connected_at.elapsed()
    }

    // ── Property bag ────────────────────────────────────────────────

    /// Store a value; last write wins.
    pub fn put(&self, key: impl Into<String>, value: impl Into<Value>) {
        let _ = self.properties.lock().insert(key.into(), value.into());
    }

    /// Read a value.
    pub fn get(&self, key: &str) -> Option<Value> {
        self.properties.lock().get(key).cloned()
    }

    /// Remove a value, returning it.
    pub fn take(&self, key: &str) -> Option<Value> {
        self.properties.lock().remove(key)
    }

    pub(crate) fn clear_properties(&self) {
        self.properties.lock().clear();
    }
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("id", &self.id)
            .field("peer", &self.peer)
            .field("closed", &self.is_closed())
            .finish_non_exhaustive()
    }
}
