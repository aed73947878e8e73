//! Transport decoding for incoming audio chunks.
//!
//! Chunks arrive base64-encoded and carry raw little-endian `f32` mono PCM
//! at the fixed session sample rate. Decoding is synchronous and local; a
//! malformed payload fails the append and aborts only the current utterance.

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use thiserror::Error;

/// Bytes per 32-bit float sample on the wire.
pub const BYTES_PER_SAMPLE: usize = 4;

#[derive(Debug, Error)]
pub enum ChunkError {
    /// The transport encoding itself is invalid.
    #[error("invalid chunk payload: {0}")]
    Payload(#[from] base64::DecodeError),
    /// The decoded byte length is not a whole number of `f32` samples.
    #[error("chunk length {len} is not 32-bit sample aligned")]
    Misaligned { len: usize },
}

/// Decode one transport-encoded chunk into mono `f32` samples.
pub fn decode_chunk(encoded: &str) -> Result<Vec<f32>, ChunkError> {
    let bytes = STANDARD.decode(encoded)?;
    decode_samples(&bytes)
}

/// Reinterpret raw little-endian bytes as `f32` samples.
pub fn decode_samples(bytes: &[u8]) -> Result<Vec<f32>, ChunkError> {
    if bytes.len() % BYTES_PER_SAMPLE != 0 {
        return Err(ChunkError::Misaligned { len: bytes.len() });
    }

    let mut samples = Vec::with_capacity(bytes.len() / BYTES_PER_SAMPLE);
    for b in bytes.chunks_exact(BYTES_PER_SAMPLE) {
        samples.push(f32::from_le_bytes([b[0], b[1], b[2], b[3]]));
    }
    Ok(samples)
}
