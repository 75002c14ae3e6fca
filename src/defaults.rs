//! Default configuration constants for voxlink.
//!
//! Shared by the config types, the capture engine and the playback scheduler
//! so every layer agrees on the wire format and buffering thresholds.

/// Sample rate of captured (outgoing) audio in Hz.
///
/// The remote agent expects 16kHz mono 16-bit PCM on its input.
pub const CAPTURE_SAMPLE_RATE: u32 = 16_000;

/// Sample rate of agent (incoming) audio in Hz.
pub const PLAYBACK_SAMPLE_RATE: u32 = 24_000;

/// Native samples accumulated before one output block is resampled and emitted.
pub const CAPTURE_BLOCK_SIZE: usize = 4096;

/// Number of recent native samples exposed to the level meter.
pub const ANALYSIS_WINDOW: usize = 2048;

/// Chunks queued before playback starts.
pub const PREBUFFER_CHUNKS: usize = 10;

/// Chunks kept scheduled ahead of the playhead.
pub const LOOKAHEAD_CHUNKS: usize = 3;

/// Queue depth below which scheduling pauses to rebuild the buffer.
pub const REBUFFER_THRESHOLD: usize = 3;

/// Extra depth above the threshold required before scheduling resumes.
pub const REBUFFER_HYSTERESIS: usize = 2;

/// How far the schedule clock may lag behind the output clock before it is reset.
pub const STALE_SCHEDULE_MS: u64 = 1000;

/// Upper bound on queued (unscheduled) playback chunks.
///
/// At ~100ms per chunk this is several minutes of audio, far beyond any
/// real-time producer, so it only trips on a runaway transport.
pub const MAX_QUEUED_CHUNKS: usize = 1500;

/// Level meter polling cadence in milliseconds.
pub const LEVEL_POLL_MS: u64 = 50;

/// Empirical factor mapping RMS (0..1) to the 0..100 level scale.
pub const LEVEL_SCALE: f32 = 200.0;

/// Idle time after which a transport session is evicted.
pub const SESSION_IDLE_TIMEOUT_SECS: u64 = 300;

/// Suggested cadence for sweeping stale transport sessions.
pub const SESSION_SWEEP_INTERVAL_SECS: u64 = 30;

/// Build the MIME type announced for PCM payloads at `sample_rate`.
pub fn pcm_mime_type(sample_rate: u32) -> String {
    format!("audio/pcm;rate={}", sample_rate)
}
