//! voxlink - Real-time duplex audio for streaming voice agents
//!
//! Microphone capture to 16kHz PCM wire chunks, and a jitter-buffered
//! scheduler that plays agent audio back gaplessly.

// Enforce error handling discipline: no panicking shortcuts outside tests
#![warn(clippy::unwrap_used)]
#![warn(clippy::expect_used)]
#![warn(clippy::let_underscore_must_use)]

pub mod audio;
#[cfg(feature = "cli")]
pub mod cli;
pub mod clock;
pub mod config;
pub mod defaults;
pub mod error;
mod lock;
pub mod logging;
pub mod playback;
pub mod transport;

// Device seam (source -> engine -> sink)
pub use audio::device::{InputDevice, InputStream};
pub use audio::engine::{CaptureEngine, CaptureHandle, ChunkSink};

// Codec
pub use audio::chunk::{AudioChunk, EncodedChunk};
pub use audio::codec::{decode_chunk, encode_samples};
pub use audio::meter::level_from_samples;
pub use audio::resample::resample;

// Playback
pub use playback::{
    AudioPlayer, BufferState, OutputLine, PlaybackClock, PlaybackScheduler, SchedulerConfig,
};

// Transport
pub use transport::{ParsedServerMessage, RealtimeInput, SessionRegistry, parse_server_message};

// Error handling
pub use error::{Result, VoxlinkError};

// Config
pub use config::Config;

/// Build version string with optional git commit hash.
///
/// Returns `"0.0.1+abc1234"` when git hash is available, `"0.0.1"` otherwise.
pub fn version_string() -> String {
    let version = env!("CARGO_PKG_VERSION");
    match option_env!("GIT_HASH") {
        Some(hash) if !hash.is_empty() => format!("{}+{}", version, hash),
        _ => version.to_string(),
    }
}
