//! # pulse-codec
//!
//! Pure functions for the Pulse application frame:
//!
//! ```text
//! [ 4-byte header, big-endian ][ payload ... ]
//! ```
//!
//! - [`header`]: 32-bit packed header (type, compress flag, cipher, type id, msg id)
//! - [`cipher`]: XOR and RC4 stream transforms (self-inverse)
//! - [`compress`]: zlib compression with an output size guard
//! - [`frame`]: [`FrameCodec`] applying compress → encrypt on the way out and
//!   decrypt → decompress on the way in
//!
//! No I/O and no shared state.

#![deny(unsafe_code)]

pub mod cipher;
pub mod compress;
pub mod errors;
pub mod frame;
pub mod header;

pub use errors::{CodecError, Result};
pub use frame::{Envelope, FrameCodec, decode_frame, encode_frame};
pub use header::{Encryption, Header, MessageType};
