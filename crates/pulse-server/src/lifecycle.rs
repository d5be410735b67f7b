//! Backend-independent connection lifecycle: register, deliver, release.

use std::net::SocketAddr;
use std::sync::Arc;

use metrics::{counter, gauge, histogram};
use pulse_codec::FrameCodec;
use pulse_settings::DecodeErrorPolicy;
use tracing::{debug, info, warn};

use crate::connection::{CloseReason, Connection, Transport};
use crate::errors::{Result, ServerError};
use crate::handler::MessageHandler;
use crate::metrics::{
    WS_CONNECTION_DURATION_SECONDS, WS_CONNECTIONS_ACTIVE, WS_CONNECTIONS_TOTAL,
    WS_DECODE_ERRORS_TOTAL, WS_DISCONNECTIONS_TOTAL, WS_MESSAGES_RECEIVED_TOTAL,
};
use crate::registry::Registry;

/// State shared by every backend.
pub struct ServerCore {
    registry: Arc<Registry>,
    handler: Arc<dyn MessageHandler>,
    codec: Arc<FrameCodec>,
    decode_policy: DecodeErrorPolicy,
}

impl ServerCore {
    /// Bundle the registry, the application handler and the codec.
    pub fn new(
        registry: Arc<Registry>,
        handler: Arc<dyn MessageHandler>,
        codec: Arc<FrameCodec>,
        decode_policy: DecodeErrorPolicy,
    ) -> Self {
        Self {
            registry,
            handler,
            codec,
            decode_policy,
        }
    }

    /// Connection registry.
    pub fn registry(&self) -> &Arc<Registry> {
        &self.registry
    }

    /// Frame codec.
    pub fn codec(&self) -> &Arc<FrameCodec> {
        &self.codec
    }

    /// Register an upgraded socket and fire `on_connect`.
    pub fn attach(&self, peer: SocketAddr, transport: Box<dyn Transport>) -> Arc<Connection> {
        let conn = self.registry.register(peer, transport, self.codec.clone());
        counter!(WS_CONNECTIONS_TOTAL).increment(1);
        gauge!(WS_CONNECTIONS_ACTIVE).increment(1.0);
        info!(conn_id = %conn.id(), %peer, "client connected");
        self.handler.on_connect(&conn);
        conn
    }

    /// Decode one inbound binary message and hand it to the handler.
    ///
    /// An `Err` means the connection must be released with
    /// [`CloseReason::Decode`].
    pub fn deliver(&self, conn: &Arc<Connection>, data: &[u8]) -> Result<()> {
        let envelope = match self.codec.decode(data) {
            Ok(envelope) => envelope,
            Err(e) => {
                counter!(WS_DECODE_ERRORS_TOTAL).increment(1);
                warn!(conn_id = %conn.id(), len = data.len(), error = %e, "undecodable frame");
                return match self.decode_policy {
                    DecodeErrorPolicy::Disconnect => Err(ServerError::Decode(e)),
                    DecodeErrorPolicy::DropMessage => Ok(()),
                };
            }
        };
        conn.touch();
        counter!(WS_MESSAGES_RECEIVED_TOTAL).increment(1);
        debug!(
            conn_id = %conn.id(),
            type_id = envelope.type_id(),
            msg_id = envelope.msg_id(),
            len = envelope.payload.len(),
            "frame received"
        );
        self.handler.on_message(conn, envelope);
        Ok(())
    }

    /// A frame the protocol does not allow (e.g. text). Same policy as
    /// decode failures.
    pub fn protocol_violation(&self, conn: &Arc<Connection>, what: &str) -> Result<()> {
        counter!(WS_DECODE_ERRORS_TOTAL).increment(1);
        warn!(conn_id = %conn.id(), what, "protocol violation");
        match self.decode_policy {
            DecodeErrorPolicy::Disconnect => Err(ServerError::Protocol(what.to_owned())),
            DecodeErrorPolicy::DropMessage => Ok(()),
        }
    }

    /// Close `conn` and run teardown once.
    ///
    /// Every backend path that notices a dead connection calls this; only
    /// the first call fires `on_disconnect` and updates metrics.
    pub fn release(&self, conn: &Arc<Connection>, reason: CloseReason) {
        let _ = conn.close_with(reason);
        if !conn.mark_released() {
            return;
        }
        let recorded = conn.close_reason().unwrap_or(reason);
        gauge!(WS_CONNECTIONS_ACTIVE).decrement(1.0);
        counter!(WS_DISCONNECTIONS_TOTAL, "reason" => recorded.as_str()).increment(1);
        histogram!(WS_CONNECTION_DURATION_SECONDS).record(conn.age().as_secs_f64());
        self.handler.on_disconnect(conn);
        conn.clear_properties();
        info!(
            conn_id = %conn.id(),
            peer = %conn.peer(),
            reason = %recorded,
            dropped = conn.dropped_messages(),
            "client disconnected"
        );
    }
}
