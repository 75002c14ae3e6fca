//! PCM codec: float samples <-> 16-bit integers <-> base64 text.
//!
//! The wire layout is mono 16-bit little-endian linear PCM, base64 encoded
//! with the standard alphabet and padding. Quantization is asymmetric:
//! negative values scale by 32768 and non-negative values by 32767, which
//! maps [-1, 1] exactly onto the two's-complement range.

use crate::audio::chunk::AudioChunk;
use crate::error::{Result, VoxlinkError};
use base64::Engine;
use base64::engine::general_purpose::STANDARD;

const NEGATIVE_SCALE: f32 = 32768.0;
const POSITIVE_SCALE: f32 = 32767.0;

/// Quantizes one float sample, clamping to [-1, 1] first.
pub fn float_to_pcm16(sample: f32) -> i16 {
    let clamped = sample.clamp(-1.0, 1.0);
    if clamped < 0.0 {
        (clamped * NEGATIVE_SCALE) as i16
    } else {
        (clamped * POSITIVE_SCALE) as i16
    }
}

/// Exact inverse scaling of [`float_to_pcm16`].
pub fn pcm16_to_float(sample: i16) -> f32 {
    if sample < 0 {
        sample as f32 / NEGATIVE_SCALE
    } else {
        sample as f32 / POSITIVE_SCALE
    }
}

pub fn quantize(samples: &[f32]) -> Vec<i16> {
    samples.iter().map(|&s| float_to_pcm16(s)).collect()
}

pub fn dequantize(samples: &[i16]) -> Vec<f32> {
    samples.iter().map(|&s| pcm16_to_float(s)).collect()
}

pub fn pcm16_to_le_bytes(samples: &[i16]) -> Vec<u8> {
    samples.iter().flat_map(|s| s.to_le_bytes()).collect()
}

/// Reassembles little-endian sample pairs. An odd byte count is malformed.
pub fn le_bytes_to_pcm16(bytes: &[u8]) -> Result<Vec<i16>> {
    if bytes.len() % 2 != 0 {
        return Err(VoxlinkError::DecodeFailure {
            message: format!("odd PCM byte count {}", bytes.len()),
        });
    }
    Ok(bytes
        .chunks_exact(2)
        .map(|pair| i16::from_le_bytes([pair[0], pair[1]]))
        .collect())
}

/// float -> i16 -> bytes -> base64.
pub fn encode_samples(samples: &[f32]) -> String {
    STANDARD.encode(pcm16_to_le_bytes(&quantize(samples)))
}

/// base64 -> bytes -> i16 -> float.
pub fn decode_samples(data: &str) -> Result<Vec<f32>> {
    let bytes = STANDARD
        .decode(data.trim())
        .map_err(|e| VoxlinkError::DecodeFailure {
            message: format!("invalid base64: {}", e),
        })?;
    Ok(dequantize(&le_bytes_to_pcm16(&bytes)?))
}

/// Decodes a payload into a chunk at the given rate.
pub fn decode_chunk(data: &str, sample_rate: u32) -> Result<AudioChunk> {
    Ok(AudioChunk::new(decode_samples(data)?, sample_rate))
}
