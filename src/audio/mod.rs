//! Capture side of the pipeline: devices, codec and the capture engine.
//!
//! Native device blocks are accumulated, resampled to the wire rate,
//! quantized to 16-bit PCM and base64-encoded before reaching a sink.

#[cfg(feature = "cpal-audio")]
pub mod capture;
pub mod chunk;
pub mod codec;
pub mod device;
pub mod engine;
pub mod meter;
pub mod resample;
pub mod tap;
pub mod wav;

#[cfg(feature = "cpal-audio")]
pub use capture::{CpalInputDevice, Direction, list_devices};
pub use chunk::{AudioChunk, EncodedChunk};
pub use device::{InputDevice, InputStream, MockInputDevice};
pub use engine::{CaptureEngine, CaptureHandle, CaptureProcessor, CaptureSettings, ChunkSink};
pub use meter::{LevelPoller, LiveLevel};
pub use tap::AnalysisTap;
pub use wav::WavInputDevice;
