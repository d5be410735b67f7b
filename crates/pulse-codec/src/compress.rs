//! zlib (RFC 1950) payload compression.

use std::io::{self, Write};

use flate2::write::ZlibEncoder;
use flate2::{Compression, Decompress, FlushDecompress, Status};

use crate::errors::{CodecError, Result};

const INFLATE_CHUNK: usize = 8 * 1024;

/// Compress `data` at the default level.
pub fn compress(data: &[u8]) -> Result<Vec<u8>> {
    let mut encoder = ZlibEncoder::new(Vec::with_capacity(data.len() / 2 + 16), Compression::default());
    encoder.write_all(data).map_err(CodecError::CorruptStream)?;
    encoder.finish().map_err(CodecError::CorruptStream)
}

/// Decompress a complete zlib stream, refusing output larger than `limit`.
///
/// Output capacity grows in bounded steps so a small hostile frame cannot
/// inflate without bound. A stream that ends before its trailer is corrupt.
pub fn decompress(data: &[u8], limit: usize) -> Result<Vec<u8>> {
    let mut inflater = Decompress::new(true);
    let mut out = Vec::new();
    loop {
        if out.len() == out.capacity() {
            let room = INFLATE_CHUNK.min(limit.saturating_add(1) - out.len()).max(1);
            out.reserve_exact(room);
        }
        let (in_before, out_before) = (inflater.total_in(), inflater.total_out());
        let offset = usize::try_from(in_before).unwrap_or(data.len()).min(data.len());
        let status = inflater
            .decompress_vec(&data[offset..], &mut out, FlushDecompress::None)
            .map_err(|e| CodecError::CorruptStream(io::Error::new(io::ErrorKind::InvalidData, e)))?;

        if out.len() > limit {
            return Err(CodecError::TooLarge {
                size: out.len(),
                limit,
            });
        }
        if status == Status::StreamEnd {
            return Ok(out);
        }
        if inflater.total_in() == in_before && inflater.total_out() == out_before {
            return Err(CodecError::CorruptStream(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                "zlib stream ended early",
            )));
        }
    }
}
