//! Application frame assembly.
//!
//! Outbound: compress (if flagged) → encrypt (if flagged) → prefix header.
//! Inbound: split header → decrypt → decompress. The order is fixed so the
//! cipher always runs over the smaller, compressed form.

use pulse_core::constants::{DEFAULT_SECRET_KEY, HEADER_LEN, MAX_MESSAGE_SIZE};

use crate::cipher;
use crate::compress;
use crate::errors::{CodecError, Result};
use crate::header::{Encryption, Header, MessageType};

/// A decoded application frame.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Envelope {
    /// Header as read from the wire.
    pub header: Header,
    /// Plain payload after decryption and decompression.
    pub payload: Vec<u8>,
}

impl Envelope {
    /// Typed message type, if defined.
    pub fn message_type(&self) -> Option<MessageType> {
        self.header.message_type()
    }

    /// Caller-defined logical type.
    pub fn type_id(&self) -> u16 {
        self.header.type_id
    }

    /// Sequence / correlation number.
    pub fn msg_id(&self) -> u16 {
        self.header.msg_id
    }
}

/// Key, defaults and limits for one side of a conversation.
#[derive(Clone, Debug)]
pub struct FrameCodec {
    key: Vec<u8>,
    encryption: Encryption,
    compress_threshold: Option<usize>,
    max_payload: usize,
}

impl Default for FrameCodec {
    fn default() -> Self {
        Self {
            key: DEFAULT_SECRET_KEY.as_bytes().to_vec(),
            encryption: Encryption::None,
            compress_threshold: None,
            max_payload: MAX_MESSAGE_SIZE,
        }
    }
}

impl FrameCodec {
    /// Codec with the default key, no encryption, no compression.
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the shared secret.
    ///
    /// Validated against the chosen encryption scheme so a bad key fails
    /// at configuration time instead of on the first frame.
    pub fn with_key(mut self, key: impl Into<Vec<u8>>) -> Result<Self> {
        self.key = key.into();
        self.check_key()?;
        Ok(self)
    }

    /// Default scheme applied by [`FrameCodec::outbound`].
    pub fn with_encryption(mut self, encryption: Encryption) -> Result<Self> {
        self.encryption = encryption;
        self.check_key()?;
        Ok(self)
    }

    /// Compress outbound payloads of at least `threshold` bytes. `None` disables.
    #[must_use]
    pub fn with_compress_threshold(mut self, threshold: Option<usize>) -> Self {
        self.compress_threshold = threshold;
        self
    }

    /// Largest decoded payload accepted.
    #[must_use]
    pub fn with_max_payload(mut self, max_payload: usize) -> Self {
        self.max_payload = max_payload;
        self
    }

    /// Default encryption scheme.
    pub fn encryption(&self) -> Encryption {
        self.encryption
    }

    /// Compression threshold, if enabled.
    pub fn compress_threshold(&self) -> Option<usize> {
        self.compress_threshold
    }

    /// Decoded payload limit.
    pub fn max_payload(&self) -> usize {
        self.max_payload
    }

    fn check_key(&self) -> Result<()> {
        match self.encryption {
            Encryption::None => Ok(()),
            Encryption::Xor if self.key.is_empty() => Err(CodecError::EmptyKey),
            Encryption::Xor => Ok(()),
            Encryption::Rc4 => cipher::Rc4::new(&self.key).map(|_| ()),
        }
    }

    /// Header for an outbound message using this codec's defaults.
    pub fn header_for(&self, msg_type: MessageType, type_id: u16, msg_id: u16, len: usize) -> Header {
        let compress = self.compress_threshold.is_some_and(|t| len >= t);
        Header::new(msg_type, type_id)
            .with_msg_id(msg_id)
            .with_compress(compress)
            .with_encryption(self.encryption)
    }

    /// Encode with the codec's default compression and encryption.
    pub fn outbound(
        &self,
        msg_type: MessageType,
        type_id: u16,
        msg_id: u16,
        payload: &[u8],
    ) -> Result<Vec<u8>> {
        let header = self.header_for(msg_type, type_id, msg_id, payload.len());
        self.encode(&header, payload)
    }

    /// Encode exactly as `header` says.
    pub fn encode(&self, header: &Header, payload: &[u8]) -> Result<Vec<u8>> {
        let header = header.masked();
        let body = if header.is_compressed() {
            compress::compress(payload)?
        } else {
            payload.to_vec()
        };
        let body = self.apply_cipher(header.encryption()?, body)?;

        let mut frame = Vec::with_capacity(HEADER_LEN + body.len());
        frame.extend_from_slice(&header.to_bytes());
        frame.extend_from_slice(&body);
        Ok(frame)
    }

    /// Decode one frame.
    pub fn decode(&self, frame: &[u8]) -> Result<Envelope> {
        let Some((head, body)) = frame.split_first_chunk::<HEADER_LEN>() else {
            return Err(CodecError::Truncated { len: frame.len() });
        };
        let header = Header::from_bytes(*head);
        let body = self.apply_cipher(header.encryption()?, body.to_vec())?;
        let payload = if header.is_compressed() {
            compress::decompress(&body, self.max_payload)?
        } else {
            if body.len() > self.max_payload {
                return Err(CodecError::TooLarge {
                    size: body.len(),
                    limit: self.max_payload,
                });
            }
            body
        };
        Ok(Envelope { header, payload })
    }

    fn apply_cipher(&self, encryption: Encryption, body: Vec<u8>) -> Result<Vec<u8>> {
        match encryption {
            Encryption::None => Ok(body),
            Encryption::Xor => cipher::xor(&body, &self.key),
            Encryption::Rc4 => cipher::rc4(&body, &self.key),
        }
    }
}

/// Encode with a default [`FrameCodec`].
pub fn encode_frame(header: &Header, payload: &[u8]) -> Result<Vec<u8>> {
    FrameCodec::default().encode(header, payload)
}

/// Decode with a default [`FrameCodec`].
pub fn decode_frame(frame: &[u8]) -> Result<Envelope> {
    FrameCodec::default().decode(frame)
}
