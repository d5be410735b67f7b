//! Server error types.
//!
//! Every variant except [`ServerError::Bind`] is local to one connection:
//! the affected connection is torn down and nothing else is disturbed.

use std::io;

use pulse_codec::CodecError;
use thiserror::Error;

/// Failures while accepting, reading, or writing a connection.
#[derive(Debug, Error)]
pub enum ServerError {
    /// WebSocket handshake failed; the socket was never registered.
    #[error("websocket upgrade failed: {0}")]
    Upgrade(String),
    /// Inbound frame could not be decoded.
    #[error("decode failed: {0}")]
    Decode(#[from] CodecError),
    /// Outbound payload could not be encoded.
    #[error("encode failed: {0}")]
    Encode(#[source] CodecError),
    /// Peer sent something the protocol does not allow (e.g. a text frame).
    #[error("protocol violation: {0}")]
    Protocol(String),
    /// Transport write failed.
    #[error("write failed: {0}")]
    Write(String),
    /// An operation exceeded its deadline.
    #[error("{0} timed out")]
    Timeout(&'static str),
    /// Outbound queue full under the `disconnect` policy.
    #[error("outbound queue full (capacity {capacity})")]
    Capacity {
        /// Queue capacity.
        capacity: usize,
    },
    /// The connection is already closed.
    #[error("connection closed")]
    Closed,
    /// Listener could not bind; fatal at startup.
    #[error("failed to bind {addr}: {source}")]
    Bind {
        /// Requested address.
        addr: String,
        /// Underlying error.
        #[source]
        source: io::Error,
    },
    /// Metrics recorder could not be installed.
    #[error("metrics recorder: {0}")]
    Metrics(String),
    /// Other I/O failure.
    #[error(transparent)]
    Io(#[from] io::Error),
}

/// Result type for server operations.
pub type Result<T> = std::result::Result<T, ServerError>;
