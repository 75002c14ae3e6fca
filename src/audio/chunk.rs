//! Chunk types handed between pipeline stages.

use crate::audio::codec;
use crate::defaults;
use crate::error::Result;
use std::time::Duration;

/// Immutable buffer of mono samples at a known sample rate.
///
/// Ownership moves with the chunk: capture hands it to the encoder, the
/// transport hands a decoded one to the playback queue.
#[derive(Debug, Clone, PartialEq)]
pub struct AudioChunk {
    samples: Vec<f32>,
    sample_rate: u32,
}

impl AudioChunk {
    /// Creates a chunk from float samples in [-1, 1].
    pub fn new(samples: Vec<f32>, sample_rate: u32) -> Self {
        Self {
            samples,
            sample_rate,
        }
    }

    /// A chunk of `len` zero samples.
    pub fn silence(len: usize, sample_rate: u32) -> Self {
        Self::new(vec![0.0; len], sample_rate)
    }

    pub fn samples(&self) -> &[f32] {
        &self.samples
    }

    pub fn into_samples(self) -> Vec<f32> {
        self.samples
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Playback length in seconds (`len / sample_rate`).
    pub fn duration_secs(&self) -> f64 {
        if self.sample_rate == 0 {
            return 0.0;
        }
        self.samples.len() as f64 / self.sample_rate as f64
    }

    pub fn duration(&self) -> Duration {
        Duration::from_secs_f64(self.duration_secs())
    }
}

/// Wire-ready chunk: base64 of little-endian 16-bit PCM.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncodedChunk {
    /// Position of this chunk within its capture session, starting at 0.
    pub sequence: u64,
    /// Sample rate of the encoded PCM.
    pub sample_rate: u32,
    /// Number of PCM samples carried in `data`.
    pub sample_count: usize,
    /// Base64 text of the PCM bytes.
    pub data: String,
}

impl EncodedChunk {
    /// Encodes `chunk` into its wire representation.
    pub fn encode(sequence: u64, chunk: &AudioChunk) -> Self {
        Self {
            sequence,
            sample_rate: chunk.sample_rate(),
            sample_count: chunk.len(),
            data: codec::encode_samples(chunk.samples()),
        }
    }

    /// MIME type announced to the remote agent, e.g. `audio/pcm;rate=16000`.
    pub fn mime_type(&self) -> String {
        defaults::pcm_mime_type(self.sample_rate)
    }

    /// Decodes the payload back into float samples.
    pub fn decode(&self) -> Result<AudioChunk> {
        codec::decode_chunk(&self.data, self.sample_rate)
    }
}
