//! Codec error types.

use thiserror::Error;

/// Failures while transforming or parsing an application frame.
#[derive(Debug, Error)]
pub enum CodecError {
    /// Frame shorter than the 4-byte header.
    #[error("frame truncated: {len} bytes, header needs 4")]
    Truncated {
        /// Bytes actually received.
        len: usize,
    },
    /// XOR transform requested with an empty key.
    #[error("cipher key is empty")]
    EmptyKey,
    /// RC4 key length outside 1..=256 bytes.
    #[error("invalid RC4 key size {0}")]
    KeySize(usize),
    /// Header names a cipher this codec does not implement.
    #[error("unsupported encryption type {0}")]
    UnsupportedEncryption(u8),
    /// Compressed payload is not a valid zlib stream.
    #[error("corrupt compressed stream: {0}")]
    CorruptStream(#[source] std::io::Error),
    /// Payload exceeds the configured size limit.
    #[error("payload of {size} bytes exceeds limit of {limit}")]
    TooLarge {
        /// Observed size (a lower bound when decompression was cut short).
        size: usize,
        /// Configured limit.
        limit: usize,
    },
}

/// Result type for codec operations.
pub type Result<T> = std::result::Result<T, CodecError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn truncated_display() {
        let err = CodecError::Truncated { len: 2 };
        assert_eq!(err.to_string(), "frame truncated: 2 bytes, header needs 4");
    }

    #[test]
    fn key_size_display() {
        assert_eq!(CodecError::KeySize(300).to_string(), "invalid RC4 key size 300");
    }

    #[test]
    fn corrupt_stream_keeps_source() {
        use std::error::Error as _;
        let io = std::io::Error::new(std::io::ErrorKind::InvalidData, "bad header");
        let err = CodecError::CorruptStream(io);
        assert!(err.source().is_some());
        assert!(err.to_string().contains("bad header"));
    }
}
