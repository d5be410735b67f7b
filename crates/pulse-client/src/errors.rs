//! Client error types.

use pulse_codec::CodecError;
use thiserror::Error;

/// Failures while connecting or keeping a session alive.
#[derive(Debug, Error)]
pub enum ClientError {
    /// Dial or WebSocket handshake failed.
    #[error("connect to {addr} failed: {reason}")]
    Connect {
        /// Target address.
        addr: String,
        /// What went wrong.
        reason: String,
    },
    /// An operation exceeded its deadline.
    #[error("{0} timed out")]
    Timeout(&'static str),
    /// Outbound payload could not be encoded.
    #[error("encode failed: {0}")]
    Codec(#[from] CodecError),
    /// The reconnect budget ran out.
    #[error("gave up after {attempts} reconnect attempt(s)")]
    ReconnectExhausted {
        /// Attempts made for this outage.
        attempts: u32,
    },
    /// [`PulseClient::shutdown`](crate::PulseClient::shutdown) was called.
    #[error("client stopped")]
    Stopped,
}

/// Convenience alias.
pub type Result<T> = std::result::Result<T, ClientError>;
