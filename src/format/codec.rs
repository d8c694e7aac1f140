//! Gzip handling for tile payloads.

use std::io::{Read, Write};

use bytes::Bytes;
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;

/// Value of the `Content-Encoding` header for gzip payloads.
pub const GZIP_ENCODING: &str = "gzip";

/// Gzip member header magic.
const GZIP_MAGIC: &[u8] = &[0x1F, 0x8B];

/// Check whether data starts with the gzip magic bytes.
pub fn is_gzip(data: &[u8]) -> bool {
    data.starts_with(GZIP_MAGIC)
}

/// Gzip-compress a payload.
pub fn gzip(data: &[u8]) -> std::io::Result<Bytes> {
    let mut encoder = GzEncoder::new(Vec::with_capacity(data.len() / 2 + 32), Compression::default());
    encoder.write_all(data)?;
    Ok(Bytes::from(encoder.finish()?))
}

/// Decompress a gzip payload.
pub fn gunzip(data: &[u8]) -> std::io::Result<Bytes> {
    let mut decoder = GzDecoder::new(data);
    let mut out = Vec::with_capacity(data.len() * 4);
    decoder.read_to_end(&mut out)?;
    Ok(Bytes::from(out))
}

/// Decompress the payload if it is a valid gzip stream.
///
/// Returns `None` for anything that is not gzip or fails to decode.
pub fn try_gunzip(data: &[u8]) -> Option<Bytes> {
    if !is_gzip(data) {
        return None;
    }
    gunzip(data).ok()
}
