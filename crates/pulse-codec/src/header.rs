//! 32-bit packed message header.
//!
//! Bit layout, least significant bit first:
//!
//! | bits  | field    | width | range    |
//! |-------|----------|-------|----------|
//! | 0–3   | msg_type | 4     | 0–15     |
//! | 4     | compress | 1     | 0–1      |
//! | 5–8   | enc_type | 4     | 0–15     |
//! | 9–18  | type_id  | 10    | 0–1023   |
//! | 19–31 | msg_id   | 13    | 0–8191   |
//!
//! Out-of-range field values are masked to their width on encode, never
//! rejected. Two type ids that differ only above bit 10 collide on the wire.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::errors::{CodecError, Result};

const MSG_TYPE_MASK: u32 = 0x0F;
const COMPRESS_MASK: u32 = 0x01;
const ENC_TYPE_MASK: u32 = 0x0F;
const TYPE_ID_MASK: u32 = 0x3FF;
const MSG_ID_MASK: u32 = 0x1FFF;

const COMPRESS_SHIFT: u32 = 4;
const ENC_TYPE_SHIFT: u32 = 5;
const TYPE_ID_SHIFT: u32 = 9;
const MSG_ID_SHIFT: u32 = 19;

/// Largest representable type id.
pub const MAX_TYPE_ID: u16 = 1023;
/// Largest representable message id; sequences wrap after it.
pub const MAX_MSG_ID: u16 = 8191;

/// Interaction pattern of a message.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
#[repr(u8)]
pub enum MessageType {
    /// Client request; the server answers with a [`MessageType::Response`].
    Request = 0,
    /// Fire-and-forget client notification.
    Notify = 1,
    /// Server answer to a request.
    Response = 2,
    /// Unsolicited server message.
    Push = 3,
}

impl MessageType {
    /// Typed view of a raw 4-bit value.
    pub fn from_raw(raw: u8) -> Option<Self> {
        match raw {
            0 => Some(Self::Request),
            1 => Some(Self::Notify),
            2 => Some(Self::Response),
            3 => Some(Self::Push),
            _ => None,
        }
    }
}

/// Confidentiality transform applied to the payload.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
#[repr(u8)]
pub enum Encryption {
    /// Plain payload.
    #[default]
    None = 0,
    /// XOR against the cyclically repeated key.
    Xor = 1,
    /// RC4 keystream.
    Rc4 = 2,
}

impl Encryption {
    /// Typed view of a raw 4-bit value.
    pub fn from_raw(raw: u8) -> Result<Self> {
        match raw {
            0 => Ok(Self::None),
            1 => Ok(Self::Xor),
            2 => Ok(Self::Rc4),
            other => Err(CodecError::UnsupportedEncryption(other)),
        }
    }
}

impl fmt::Display for Encryption {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::None => write!(f, "none"),
            Self::Xor => write!(f, "xor"),
            Self::Rc4 => write!(f, "rc4"),
        }
    }
}

/// Unpacked header fields.
///
/// Fields hold raw values; [`Header::encode`] masks them.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct Header {
    /// Message type (4 bits).
    pub msg_type: u8,
    /// Compression flag (1 bit).
    pub compress: u8,
    /// Encryption type (4 bits).
    pub enc_type: u8,
    /// Caller-defined logical type (10 bits).
    pub type_id: u16,
    /// Sequence / correlation number (13 bits).
    pub msg_id: u16,
}

impl Header {
    /// Plain, uncompressed header for `msg_type` and `type_id`.
    pub fn new(msg_type: MessageType, type_id: u16) -> Self {
        Self {
            msg_type: msg_type as u8,
            type_id,
            ..Self::default()
        }
    }

    /// Set the message id.
    #[must_use]
    pub fn with_msg_id(mut self, msg_id: u16) -> Self {
        self.msg_id = msg_id;
        self
    }

    /// Set the compression flag.
    #[must_use]
    pub fn with_compress(mut self, compress: bool) -> Self {
        self.compress = u8::from(compress);
        self
    }

    /// Set the encryption scheme.
    #[must_use]
    pub fn with_encryption(mut self, encryption: Encryption) -> Self {
        self.enc_type = encryption as u8;
        self
    }

    /// Pack into 32 bits, masking each field to its width.
    pub fn encode(&self) -> u32 {
        let mut packed = u32::from(self.msg_type) & MSG_TYPE_MASK;
        packed |= (u32::from(self.compress) & COMPRESS_MASK) << COMPRESS_SHIFT;
        packed |= (u32::from(self.enc_type) & ENC_TYPE_MASK) << ENC_TYPE_SHIFT;
        packed |= (u32::from(self.type_id) & TYPE_ID_MASK) << TYPE_ID_SHIFT;
        packed |= (u32::from(self.msg_id) & MSG_ID_MASK) << MSG_ID_SHIFT;
        packed
    }

    /// Unpack 32 bits. Total: every input yields a header.
    #[allow(clippy::cast_possible_truncation)]
    pub fn decode(packed: u32) -> Self {
        Self {
            msg_type: (packed & MSG_TYPE_MASK) as u8,
            compress: ((packed >> COMPRESS_SHIFT) & COMPRESS_MASK) as u8,
            enc_type: ((packed >> ENC_TYPE_SHIFT) & ENC_TYPE_MASK) as u8,
            type_id: ((packed >> TYPE_ID_SHIFT) & TYPE_ID_MASK) as u16,
            msg_id: ((packed >> MSG_ID_SHIFT) & MSG_ID_MASK) as u16,
        }
    }

    /// The header as it would read back from the wire.
    #[must_use]
    pub fn masked(&self) -> Self {
        Self::decode(self.encode())
    }

    /// Network byte order.
    pub fn to_bytes(&self) -> [u8; 4] {
        self.encode().to_be_bytes()
    }

    /// Parse from network byte order.
    pub fn from_bytes(bytes: [u8; 4]) -> Self {
        Self::decode(u32::from_be_bytes(bytes))
    }

    /// Typed message type, if it is one of the four defined values.
    pub fn message_type(&self) -> Option<MessageType> {
        MessageType::from_raw(self.msg_type & 0x0F)
    }

    /// Typed encryption scheme.
    pub fn encryption(&self) -> Result<Encryption> {
        Encryption::from_raw(self.enc_type & 0x0F)
    }

    /// Whether the payload is zlib-compressed.
    pub fn is_compressed(&self) -> bool {
        self.compress & 0x01 == 1
    }
}

/// Next message id after `current`, wrapping modulo 8192.
pub fn next_msg_id(current: u16) -> u16 {
    (current.wrapping_add(1)) & (MAX_MSG_ID)
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use proptest::prelude::*;

    #[test]
    fn field_positions_are_bit_exact() {
        assert_eq!(Header { msg_type: 0xF, ..Header::default() }.encode(), 0x0000_000F);
        assert_eq!(Header { compress: 1, ..Header::default() }.encode(), 0x0000_0010);
        assert_eq!(Header { enc_type: 0xF, ..Header::default() }.encode(), 0x0000_01E0);
        assert_eq!(Header { type_id: 0x3FF, ..Header::default() }.encode(), 0x0007_FE00);
        assert_eq!(Header { msg_id: 0x1FFF, ..Header::default() }.encode(), 0xFFF8_0000);
    }

    #[test]
    fn all_fields_maxed_fill_every_bit() {
        let h = Header {
            msg_type: 15,
            compress: 1,
            enc_type: 15,
            type_id: MAX_TYPE_ID,
            msg_id: MAX_MSG_ID,
        };
        assert_eq!(h.encode(), u32::MAX);
        assert_eq!(Header::decode(u32::MAX), h);
    }

    #[test]
    fn notify_type_seven_layout() {
        let h = Header::new(MessageType::Notify, 7);
        assert_eq!(h.encode(), 1 | (7 << 9));
        assert_eq!(h.to_bytes(), [0x00, 0x00, 0x0E, 0x01]);
    }

    #[test]
    fn out_of_range_values_are_masked() {
        let h = Header {
            msg_type: 0x1F,
            compress: 3,
            enc_type: 0x12,
            type_id: 1024 + 5,
            msg_id: 8192 + 9,
        };
        let back = Header::decode(h.encode());
        assert_eq!(back.msg_type, 0xF);
        assert_eq!(back.compress, 1);
        assert_eq!(back.enc_type, 0x2);
        assert_eq!(back.type_id, 5);
        assert_eq!(back.msg_id, 9);
        assert_eq!(back, h.masked());
    }

    #[test]
    fn type_ids_collide_above_width() {
        let a = Header::new(MessageType::Request, 3);
        let b = Header::new(MessageType::Request, 3 + 1024);
        assert_eq!(a.encode(), b.encode());
    }

    #[test]
    fn bytes_are_big_endian() {
        let h = Header::decode(0x0102_0304);
        assert_eq!(h.to_bytes(), [1, 2, 3, 4]);
        assert_eq!(Header::from_bytes([1, 2, 3, 4]), h);
    }

    #[test]
    fn typed_views() {
        let h = Header::new(MessageType::Push, 1)
            .with_encryption(Encryption::Rc4)
            .with_compress(true);
        assert_eq!(h.message_type(), Some(MessageType::Push));
        assert_eq!(h.encryption().unwrap(), Encryption::Rc4);
        assert!(h.is_compressed());

        let unknown = Header { msg_type: 9, enc_type: 7, ..Header::default() };
        assert_eq!(unknown.message_type(), None);
        assert_matches!(unknown.encryption(), Err(CodecError::UnsupportedEncryption(7)));
    }

    #[test]
    fn msg_id_wraps_at_8192() {
        assert_eq!(next_msg_id(0), 1);
        assert_eq!(next_msg_id(8190), 8191);
        assert_eq!(next_msg_id(8191), 0);
    }

    proptest! {
        #[test]
        fn decode_inverts_encode_within_range(
            msg_type in 0u8..16,
            compress in 0u8..2,
            enc_type in 0u8..16,
            type_id in 0u16..1024,
            msg_id in 0u16..8192,
        ) {
            let h = Header { msg_type, compress, enc_type, type_id, msg_id };
            prop_assert_eq!(Header::decode(h.encode()), h);
        }

        #[test]
        fn masked_round_trip_holds_for_any_input(
            msg_type in any::<u8>(),
            compress in any::<u8>(),
            enc_type in any::<u8>(),
            type_id in any::<u16>(),
            msg_id in any::<u16>(),
        ) {
            let h = Header { msg_type, compress, enc_type, type_id, msg_id };
            let masked = h.masked();
            prop_assert_eq!(Header::decode(masked.encode()), masked);
            prop_assert_eq!(masked.encode(), h.encode());
        }

        #[test]
        fn encode_inverts_decode(packed in any::<u32>()) {
            prop_assert_eq!(Header::decode(packed).encode(), packed);
        }
    }
}
