//! Protocol-wide defaults shared by the server and the client.

use std::time::Duration;

/// Maximum silence tolerated from a peer before it is presumed dead.
pub const LIVENESS_TIMEOUT: Duration = Duration::from_secs(30);

/// Interval between WebSocket Ping frames sent by a connection's writer.
pub const PING_PERIOD: Duration = Duration::from_secs(10);

/// Read deadline armed on accept and refreshed by every inbound frame.
pub const READ_TIMEOUT: Duration = Duration::from_secs(35);

/// Upper bound on the WebSocket opening handshake.
pub const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(10);

/// Size of the packed application header, in bytes.
pub const HEADER_LEN: usize = 4;

/// Largest WebSocket message accepted, header included.
pub const MAX_MESSAGE_SIZE: usize = 64 * 1024;

/// Default shared secret for the XOR and RC4 transforms.
pub const DEFAULT_SECRET_KEY: &str = "asdef123";

/// Default outbound queue capacity per server connection.
pub const SERVER_QUEUE_CAPACITY: usize = 2048;

/// Default outbound queue capacity for the client.
pub const CLIENT_QUEUE_CAPACITY: usize = 256;

/// Recommended heartbeat sweep period for a liveness timeout: half of it.
#[must_use]
pub fn sweep_period_for(timeout: Duration) -> Duration {
    (timeout / 2).max(Duration::from_millis(1))
}
