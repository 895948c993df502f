//! Response-body content decoding
//!
//! Decoding failures downgrade to the raw bytes; they never terminate the
//! pipeline.

use std::io::Read;

use tracing::debug;

/// Decode a response body according to its `Content-Encoding`
///
/// Supports `gzip`, `deflate` and `br`. Unknown encodings and decode
/// failures return the input unchanged.
pub fn decode_body(encoding: Option<&str>, bytes: Vec<u8>) -> Vec<u8> {
    let Some(encoding) = encoding else {
        return bytes;
    };

    match encoding.trim().to_ascii_lowercase().as_str() {
        "gzip" | "x-gzip" => decode_gzip(&bytes).unwrap_or(bytes),
        "deflate" => decode_deflate(&bytes).unwrap_or(bytes),
        "br" => decode_brotli(&bytes).unwrap_or(bytes),
        "" | "identity" => bytes,
        other => {
            debug!("Unknown content-encoding {other:?}, passing body through");
            bytes
        }
    }
}

fn decode_gzip(bytes: &[u8]) -> Option<Vec<u8>> {
    let mut out = Vec::new();
    flate2::read::GzDecoder::new(bytes).read_to_end(&mut out).ok()?;
    Some(out)
}

/// HTTP "deflate" is usually zlib-wrapped but some servers send raw deflate
fn decode_deflate(bytes: &[u8]) -> Option<Vec<u8>> {
    let mut out = Vec::new();
    if flate2::read::ZlibDecoder::new(bytes)
        .read_to_end(&mut out)
        .is_ok()
    {
        return Some(out);
    }

    out.clear();
    flate2::read::DeflateDecoder::new(bytes)
        .read_to_end(&mut out)
        .ok()?;
    Some(out)
}

fn decode_brotli(bytes: &[u8]) -> Option<Vec<u8>> {
    let mut out = Vec::new();
    brotli::Decompressor::new(bytes, 4096)
        .read_to_end(&mut out)
        .ok()?;
    Some(out)
}
