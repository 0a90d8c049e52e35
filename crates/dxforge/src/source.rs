//! Embedding of stand-alone sources into built objects.
//!
//! Every built applet carries the source it was compiled from (gzip'd and
//! base64'd) so the runtime executors can re-evaluate expressions without
//! any other context, and so users can recover the source of a deployed
//! object.

use std::io::{Read, Write};

use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use flate2::Compression;
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;

use crate::error::{Error, Result};

/// Compresses and encodes a source text for embedding under `details`.
pub fn encode_source(text: &str) -> Result<String> {
    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder
        .write_all(text.as_bytes())
        .and_then(|()| encoder.finish())
        .map(|compressed| BASE64.encode(compressed))
        .map_err(|err| Error::Internal(format!("source compression failed: {err}")))
}

/// Recovers a source text embedded by [`encode_source`].
pub fn decode_source(encoded: &str) -> Result<String> {
    let compressed = BASE64
        .decode(encoded)
        .map_err(|err| Error::Internal(format!("embedded source is not base64: {err}")))?;

    let mut text = String::new();
    GzDecoder::new(compressed.as_slice())
        .read_to_string(&mut text)
        .map_err(|err| Error::Internal(format!("embedded source is not gzip: {err}")))?;
    Ok(text)
}
