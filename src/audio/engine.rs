//! Capture engine: live microphone blocks -> fixed-size, rate-corrected,
//! encoded chunks pushed to a caller-supplied sink.
//!
//! Native blocks (any size, e.g. 128-sample quanta) are accumulated until one
//! output block of `block_size` native samples is complete. Each block is
//! resampled to the target rate, quantized to 16-bit PCM, base64 encoded and
//! handed to the sink, strictly in capture order.

use crate::audio::chunk::{AudioChunk, EncodedChunk};
use crate::audio::device::{InputDevice, InputStream};
use crate::audio::resample::resample;
use crate::audio::tap::AnalysisTap;
use crate::config::CaptureConfig;
use crate::defaults;
use crate::error::{Result, VoxlinkError};
use crate::lock::lock_or_recover;
use std::cell::Cell;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use tracing::{debug, warn};

/// Receives encoded chunks as capture produces them.
pub trait ChunkSink: Send {
    fn on_chunk(&mut self, chunk: EncodedChunk);
}

impl<F> ChunkSink for F
where
    F: FnMut(EncodedChunk) + Send,
{
    fn on_chunk(&mut self, chunk: EncodedChunk) {
        self(chunk)
    }
}

/// Collects native samples into fixed-size blocks.
#[derive(Debug, Clone)]
pub struct BlockAccumulator {
    block_size: usize,
    pending: Vec<f32>,
}

impl BlockAccumulator {
    pub fn new(block_size: usize) -> Self {
        let block_size = block_size.max(1);
        Self {
            block_size,
            pending: Vec::with_capacity(block_size),
        }
    }

    /// Adds samples and returns every block completed by them, oldest first.
    pub fn push(&mut self, samples: &[f32]) -> Vec<Vec<f32>> {
        self.pending.extend_from_slice(samples);
        let complete = self.pending.len() / self.block_size;
        if complete == 0 {
            return Vec::new();
        }
        let rest = self.pending.split_off(complete * self.block_size);
        let full = std::mem::replace(&mut self.pending, rest);
        full.chunks_exact(self.block_size)
            .map(<[f32]>::to_vec)
            .collect()
    }

    /// Samples waiting for the next block boundary.
    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    pub fn block_size(&self) -> usize {
        self.block_size
    }
}

/// Block-accumulate -> resample -> quantize -> encode, without any device.
#[derive(Debug, Clone)]
pub struct CaptureProcessor {
    native_rate: u32,
    target_rate: u32,
    accumulator: BlockAccumulator,
    next_sequence: u64,
}

impl CaptureProcessor {
    pub fn new(native_rate: u32, target_rate: u32, block_size: usize) -> Self {
        Self {
            native_rate,
            target_rate,
            accumulator: BlockAccumulator::new(block_size),
            next_sequence: 0,
        }
    }

    /// Feeds native samples; returns the chunks completed by them.
    pub fn process(&mut self, samples: &[f32]) -> Vec<EncodedChunk> {
        self.accumulator
            .push(samples)
            .into_iter()
            .map(|block| {
                let resampled = resample(&block, self.native_rate, self.target_rate);
                let chunk = AudioChunk::new(resampled, self.target_rate);
                let encoded = EncodedChunk::encode(self.next_sequence, &chunk);
                self.next_sequence += 1;
                encoded
            })
            .collect()
    }

    pub fn native_rate(&self) -> u32 {
        self.native_rate
    }

    pub fn target_rate(&self) -> u32 {
        self.target_rate
    }

    pub fn pending_len(&self) -> usize {
        self.accumulator.pending_len()
    }
}

/// Capture parameters independent of device selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CaptureSettings {
    pub target_rate: u32,
    pub block_size: usize,
    pub analysis_window: usize,
}

impl Default for CaptureSettings {
    fn default() -> Self {
        Self {
            target_rate: defaults::CAPTURE_SAMPLE_RATE,
            block_size: defaults::CAPTURE_BLOCK_SIZE,
            analysis_window: defaults::ANALYSIS_WINDOW,
        }
    }
}

impl From<&CaptureConfig> for CaptureSettings {
    fn from(config: &CaptureConfig) -> Self {
        Self {
            target_rate: config.target_rate,
            block_size: config.block_size,
            analysis_window: config.analysis_window,
        }
    }
}

struct CaptureSession {
    processor: CaptureProcessor,
    sink: Box<dyn ChunkSink>,
    stream: Option<Box<dyn InputStream>>,
}

thread_local! {
    /// Session whose sink is running on this thread, 0 when none.
    static DELIVERING: Cell<usize> = const { Cell::new(0) };
}

/// Marks the current thread as inside a session's sink until dropped.
struct DeliveryGuard;

impl DeliveryGuard {
    fn enter(session_id: usize) -> Self {
        DELIVERING.with(|d| d.set(session_id));
        Self
    }
}

impl Drop for DeliveryGuard {
    fn drop(&mut self) {
        DELIVERING.with(|d| d.set(0));
    }
}

fn session_id(session: &Arc<Mutex<CaptureSession>>) -> usize {
    Arc::as_ptr(session) as usize
}

/// Stop handle for one capture session.
///
/// The device callback and [`CaptureHandle::stop`] serialize on the session
/// lock, so once `stop` returns the sink is never invoked again. A sink may
/// stop its own session; the device is then released by the next `stop`
/// issued off the device thread (or by the engine).
#[derive(Clone)]
pub struct CaptureHandle {
    session: Arc<Mutex<CaptureSession>>,
    stopped: Arc<AtomicBool>,
    tap: AnalysisTap,
}

impl CaptureHandle {
    /// Releases the microphone and tears the session down. Idempotent.
    pub fn stop(&self) {
        let first = !self.stopped.swap(true, Ordering::SeqCst);
        self.tap.close();

        if self.on_device_thread() {
            // The session lock is held further up this thread's stack.
            debug!("capture stopped from its sink; device release deferred");
            return;
        }

        let stream = lock_or_recover(&self.session, "capture stop").stream.take();
        // Closing may join the device thread, which needs the session lock.
        if let Some(stream) = stream
            && let Err(e) = stream.close()
        {
            warn!("failed to close input stream: {}", e);
        }
        if first {
            debug!("capture stopped");
        }
    }

    pub fn is_active(&self) -> bool {
        !self.stopped.load(Ordering::SeqCst)
    }

    /// True while this session's sink is running on the calling thread.
    fn on_device_thread(&self) -> bool {
        DELIVERING.with(Cell::get) == session_id(&self.session)
    }

    /// Read-only tap on the live signal; `None` once stopped.
    pub fn analysis_tap(&self) -> Option<AnalysisTap> {
        self.tap.is_live().then(|| self.tap.clone())
    }
}

/// Owns an input device and runs at most one capture session on it.
pub struct CaptureEngine {
    device: Box<dyn InputDevice>,
    settings: CaptureSettings,
    current: Option<CaptureHandle>,
}

impl CaptureEngine {
    pub fn new(device: Box<dyn InputDevice>, settings: CaptureSettings) -> Self {
        Self {
            device,
            settings,
            current: None,
        }
    }

    /// Acquires the device and starts emitting chunks to `sink`.
    ///
    /// # Errors
    /// - `CaptureAlreadyActive` if a session is running; stop it first.
    /// - `DeviceUnavailable` if the device cannot be acquired.
    pub fn start<S>(&mut self, sink: S) -> Result<CaptureHandle>
    where
        S: ChunkSink + 'static,
    {
        if self.is_running() {
            return Err(VoxlinkError::CaptureAlreadyActive);
        }
        // Finish releasing a session its sink stopped.
        self.stop();

        let native_rate = self.device.native_rate()?;
        let processor = CaptureProcessor::new(
            native_rate,
            self.settings.target_rate,
            self.settings.block_size,
        );
        let session = Arc::new(Mutex::new(CaptureSession {
            processor,
            sink: Box::new(sink),
            stream: None,
        }));
        let stopped = Arc::new(AtomicBool::new(false));
        let tap = AnalysisTap::new(self.settings.analysis_window);

        let callback_session = Arc::clone(&session);
        let callback_id = session_id(&session);
        let callback_stopped = Arc::clone(&stopped);
        let callback_tap = tap.clone();
        let opened = self.device.open(Box::new(move |samples: &[f32]| {
            if callback_stopped.load(Ordering::SeqCst) {
                return;
            }
            let mut session = lock_or_recover(&callback_session, "capture callback");
            if callback_stopped.load(Ordering::SeqCst) {
                return;
            }
            callback_tap.write(samples);
            let chunks = session.processor.process(samples);
            let _delivering = DeliveryGuard::enter(callback_id);
            for chunk in chunks {
                if callback_stopped.load(Ordering::SeqCst) {
                    break;
                }
                session.sink.on_chunk(chunk);
            }
        }));

        let stream = match opened {
            Ok(stream) => stream,
            Err(e) => {
                stopped.store(true, Ordering::SeqCst);
                tap.close();
                return Err(e);
            }
        };
        lock_or_recover(&session, "capture start").stream = Some(stream);

        debug!(
            device = %self.device.name(),
            native_rate,
            target_rate = self.settings.target_rate,
            "capture started"
        );

        let handle = CaptureHandle {
            session,
            stopped,
            tap,
        };
        self.current = Some(handle.clone());
        Ok(handle)
    }

    /// Stops the current session, if any. Safe to call repeatedly.
    pub fn stop(&mut self) {
        if let Some(handle) = &self.current {
            handle.stop();
            // From inside the sink the device is still held; keep the handle
            // so a later stop or start can release it.
            if !handle.on_device_thread() {
                self.current = None;
            }
        }
    }

    pub fn is_running(&self) -> bool {
        self.current.as_ref().is_some_and(CaptureHandle::is_active)
    }

    /// Tap on the live signal; `None` when no session is running.
    pub fn analysis_tap(&self) -> Option<AnalysisTap> {
        self.current.as_ref().and_then(CaptureHandle::analysis_tap)
    }

    pub fn settings(&self) -> CaptureSettings {
        self.settings
    }
}

impl Drop for CaptureEngine {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::codec;
    use crate::audio::device::MockInputDevice;

    fn collecting_sink() -> (Arc<Mutex<Vec<EncodedChunk>>>, impl ChunkSink + 'static) {
        let chunks = Arc::new(Mutex::new(Vec::new()));
        let sink_chunks = Arc::clone(&chunks);
        let sink = move |chunk: EncodedChunk| sink_chunks.lock().unwrap().push(chunk);
        (chunks, sink)
    }

    #[test]
    fn accumulator_emits_only_full_blocks() {
        let mut acc = BlockAccumulator::new(4);
        assert!(acc.push(&[1.0, 2.0, 3.0]).is_empty());
        assert_eq!(acc.pending_len(), 3);

        let blocks = acc.push(&[4.0, 5.0, 6.0, 7.0, 8.0, 9.0]);
        assert_eq!(blocks, vec![vec![1.0, 2.0, 3.0, 4.0], vec![5.0, 6.0, 7.0, 8.0]]);
        assert_eq!(acc.pending_len(), 1);
    }

    #[test]
    fn accumulator_block_size_never_zero() {
        let mut acc = BlockAccumulator::new(0);
        assert_eq!(acc.block_size(), 1);
        assert_eq!(acc.push(&[0.5, 0.25]).len(), 2);
    }

    #[test]
    fn processor_resamples_each_block() {
        let mut processor = CaptureProcessor::new(48_000, 16_000, 4096);
        let mut chunks = Vec::new();
        for _ in 0..32 {
            chunks.extend(processor.process(&[0.25; 128]));
        }

        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].sequence, 0);
        assert_eq!(chunks[0].sample_rate, 16_000);
        assert_eq!(chunks[0].sample_count, 1365);

        let decoded = codec::decode_samples(&chunks[0].data).unwrap();
        assert_eq!(decoded.len(), 1365);
        assert!(decoded.iter().all(|&s| (s - 0.25).abs() < 1e-4));
    }

    #[test]
    fn processor_passes_through_matching_rate() {
        let mut processor = CaptureProcessor::new(16_000, 16_000, 4);
        let chunks = processor.process(&[0.0, 0.5, -0.5, 1.0, 0.0]);
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].data, codec::encode_samples(&[0.0, 0.5, -0.5, 1.0]));
        assert_eq!(processor.pending_len(), 1);
    }

    #[test]
    fn sequence_numbers_increase() {
        let mut processor = CaptureProcessor::new(16_000, 16_000, 2);
        let chunks = processor.process(&[0.0; 8]);
        let sequences: Vec<u64> = chunks.iter().map(|c| c.sequence).collect();
        assert_eq!(sequences, vec![0, 1, 2, 3]);
    }

    #[test]
    fn engine_emits_chunks_to_sink() {
        let device = MockInputDevice::new().with_native_rate(48_000);
        let feeder = device.feeder();
        let mut engine = CaptureEngine::new(Box::new(device), CaptureSettings::default());
        let (chunks, sink) = collecting_sink();

        let _handle = engine.start(sink).unwrap();
        for _ in 0..64 {
            assert!(feeder.deliver(&[0.0; 128]));
        }

        let chunks = chunks.lock().unwrap();
        assert_eq!(chunks.len(), 2);
        assert_eq!(chunks[1].sequence, 1);
    }

    #[test]
    fn start_fails_when_device_unavailable() {
        let device = MockInputDevice::new().with_open_failure();
        let mut engine = CaptureEngine::new(Box::new(device), CaptureSettings::default());
        let (_, sink) = collecting_sink();

        let result = engine.start(sink);
        assert!(matches!(result, Err(VoxlinkError::DeviceUnavailable { .. })));
        assert!(!engine.is_running());
        assert!(engine.analysis_tap().is_none());
    }

    #[test]
    fn second_start_is_rejected_while_running() {
        let device = MockInputDevice::new();
        let mut engine = CaptureEngine::new(Box::new(device), CaptureSettings::default());
        let (_, first) = collecting_sink();
        let (_, second) = collecting_sink();

        engine.start(first).unwrap();
        assert!(matches!(
            engine.start(second),
            Err(VoxlinkError::CaptureAlreadyActive)
        ));
    }

    #[test]
    fn no_sink_calls_after_stop() {
        let device = MockInputDevice::new().with_native_rate(16_000);
        let feeder = device.feeder();
        let settings = CaptureSettings {
            block_size: 4,
            ..CaptureSettings::default()
        };
        let mut engine = CaptureEngine::new(Box::new(device), settings);
        let (chunks, sink) = collecting_sink();

        let handle = engine.start(sink).unwrap();
        feeder.deliver(&[0.1; 4]);
        handle.stop();
        feeder.deliver(&[0.1; 4]);

        assert_eq!(chunks.lock().unwrap().len(), 1);
        assert!(!feeder.is_open());
        assert!(!engine.is_running());
    }

    #[test]
    fn stop_is_idempotent() {
        let device = MockInputDevice::new();
        let mut engine = CaptureEngine::new(Box::new(device), CaptureSettings::default());

        engine.stop();
        let (_, sink) = collecting_sink();
        let handle = engine.start(sink).unwrap();
        handle.stop();
        handle.stop();
        engine.stop();
        engine.stop();
        assert!(!handle.is_active());
    }

    #[test]
    fn restart_after_stop_opens_a_fresh_session() {
        let device = MockInputDevice::new().with_native_rate(16_000);
        let feeder = device.feeder();
        let settings = CaptureSettings {
            block_size: 2,
            ..CaptureSettings::default()
        };
        let mut engine = CaptureEngine::new(Box::new(device), settings);

        let (first, sink) = collecting_sink();
        engine.start(sink).unwrap();
        feeder.deliver(&[0.0; 3]);
        engine.stop();

        let (second, sink) = collecting_sink();
        engine.start(sink).unwrap();
        feeder.deliver(&[0.0; 2]);

        assert_eq!(first.lock().unwrap().len(), 1);
        let second = second.lock().unwrap();
        assert_eq!(second.len(), 1);
        // leftovers from the first session never leak into the second
        assert_eq!(second[0].sequence, 0);
        assert_eq!(feeder.open_count(), 2);
    }

    #[test]
    fn analysis_tap_tracks_session_lifetime() {
        let device = MockInputDevice::new();
        let feeder = device.feeder();
        let mut engine = CaptureEngine::new(Box::new(device), CaptureSettings::default());
        assert!(engine.analysis_tap().is_none());

        let (_, sink) = collecting_sink();
        engine.start(sink).unwrap();
        let tap = engine.analysis_tap().unwrap();
        feeder.deliver(&[0.5; 256]);
        assert_eq!(tap.snapshot().unwrap().len(), 256);

        engine.stop();
        assert!(engine.analysis_tap().is_none());
        assert!(tap.snapshot().is_none());
    }

    #[test]
    fn sink_can_stop_its_own_session() {
        let device = MockInputDevice::new().with_native_rate(16_000);
        let feeder = device.feeder();
        let settings = CaptureSettings {
            block_size: 2,
            ..CaptureSettings::default()
        };
        let mut engine = CaptureEngine::new(Box::new(device), settings);

        let slot: Arc<Mutex<Option<CaptureHandle>>> = Arc::new(Mutex::new(None));
        let sink_slot = Arc::clone(&slot);
        let (chunks, mut record) = collecting_sink();
        let handle = engine
            .start(move |chunk: EncodedChunk| {
                record.on_chunk(chunk);
                if let Some(handle) = sink_slot.lock().unwrap().as_ref() {
                    handle.stop();
                }
            })
            .unwrap();
        *slot.lock().unwrap() = Some(handle.clone());

        // Two blocks in one delivery: the first stops the session, the second is dropped.
        let (done_tx, done_rx) = crossbeam_channel::bounded(1);
        let delivering = feeder.clone();
        std::thread::spawn(move || {
            delivering.deliver(&[0.1; 4]);
            done_tx.send(()).unwrap();
        });
        done_rx
            .recv_timeout(std::time::Duration::from_secs(3))
            .expect("stop from inside the sink must not block");

        assert_eq!(chunks.lock().unwrap().len(), 1);
        assert!(!handle.is_active());
        assert!(!engine.is_running());
        assert!(feeder.deliver(&[0.1; 4]));
        assert_eq!(chunks.lock().unwrap().len(), 1);

        // The device is released once stop runs off the device thread.
        engine.stop();
        assert!(!feeder.is_open());
        slot.lock().unwrap().take();
    }

    #[test]
    fn start_after_self_stop_releases_previous_device() {
        let device = MockInputDevice::new().with_native_rate(16_000);
        let feeder = device.feeder();
        let settings = CaptureSettings {
            block_size: 2,
            ..CaptureSettings::default()
        };
        let mut engine = CaptureEngine::new(Box::new(device), settings);

        let slot: Arc<Mutex<Option<CaptureHandle>>> = Arc::new(Mutex::new(None));
        let sink_slot = Arc::clone(&slot);
        let handle = engine
            .start(move |_chunk: EncodedChunk| {
                if let Some(handle) = sink_slot.lock().unwrap().as_ref() {
                    handle.stop();
                }
            })
            .unwrap();
        *slot.lock().unwrap() = Some(handle);
        feeder.deliver(&[0.1; 2]);
        assert!(!engine.is_running());

        let (chunks, sink) = collecting_sink();
        engine.start(sink).unwrap();
        feeder.deliver(&[0.2; 2]);
        assert_eq!(chunks.lock().unwrap().len(), 1);
        assert_eq!(feeder.open_count(), 2);
        slot.lock().unwrap().take();
    }
}
