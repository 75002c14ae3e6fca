//! WAV file input device for offline capture.

use crate::audio::codec::pcm16_to_float;
use crate::audio::device::{BlockCallback, InputDevice, InputStream};
use crate::error::{Result, VoxlinkError};
use crossbeam_channel::{Receiver, Sender, bounded};
use std::io::Read;
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

/// Quantum size used when replaying, matching a typical audio render quantum.
const DEFAULT_QUANTUM: usize = 128;

/// Input device that replays WAV file data as if it came from a microphone.
/// Supports arbitrary sample rates and channels; channels are mixed to mono
/// and the file's own rate is reported as the native rate.
pub struct WavInputDevice {
    samples: Arc<Vec<f32>>,
    sample_rate: u32,
    quantum: usize,
    realtime: bool,
    done_tx: Sender<()>,
    done_rx: Receiver<()>,
}

impl WavInputDevice {
    /// Create from any reader (for testing/flexibility).
    pub fn from_reader(reader: Box<dyn Read + Send>) -> Result<Self> {
        let wav_reader = hound::WavReader::new(reader).map_err(|e| VoxlinkError::AudioCapture {
            message: format!("Failed to parse WAV file: {}", e),
        })?;

        let spec = wav_reader.spec();
        let channels = spec.channels.max(1) as usize;

        let interleaved: Vec<f32> = match (spec.sample_format, spec.bits_per_sample) {
            (hound::SampleFormat::Int, 16) => wav_reader
                .into_samples::<i16>()
                .map(|s| s.map(pcm16_to_float))
                .collect::<std::result::Result<Vec<_>, _>>(),
            (hound::SampleFormat::Float, 32) => wav_reader
                .into_samples::<f32>()
                .collect::<std::result::Result<Vec<_>, _>>(),
            (format, bits) => {
                return Err(VoxlinkError::AudioCapture {
                    message: format!("Unsupported WAV sample format: {:?} {}-bit", format, bits),
                });
            }
        }
        .map_err(|e| VoxlinkError::AudioCapture {
            message: format!("Failed to read WAV samples: {}", e),
        })?;

        let samples = if channels == 1 {
            interleaved
        } else {
            interleaved
                .chunks_exact(channels)
                .map(|frame| frame.iter().sum::<f32>() / channels as f32)
                .collect()
        };

        Ok(Self::from_samples(samples, spec.sample_rate))
    }

    /// Open a WAV file from disk.
    pub fn open_path(path: &Path) -> Result<Self> {
        let file = std::fs::File::open(path)?;
        Self::from_reader(Box::new(std::io::BufReader::new(file)))
    }

    /// Wrap already-decoded mono samples.
    pub fn from_samples(samples: Vec<f32>, sample_rate: u32) -> Self {
        let (done_tx, done_rx) = bounded(1);
        Self {
            samples: Arc::new(samples),
            sample_rate,
            quantum: DEFAULT_QUANTUM,
            realtime: false,
            done_tx,
            done_rx,
        }
    }

    /// Samples per delivered block.
    pub fn with_quantum(mut self, quantum: usize) -> Self {
        self.quantum = quantum.max(1);
        self
    }

    /// Pace delivery at the file's own sample rate instead of as fast as possible.
    pub fn with_realtime_pacing(mut self, realtime: bool) -> Self {
        self.realtime = realtime;
        self
    }

    /// Receives one message once every sample has been delivered.
    pub fn completion(&self) -> Receiver<()> {
        self.done_rx.clone()
    }

    pub fn duration(&self) -> Duration {
        if self.sample_rate == 0 {
            return Duration::ZERO;
        }
        Duration::from_secs_f64(self.samples.len() as f64 / self.sample_rate as f64)
    }
}

impl InputDevice for WavInputDevice {
    fn name(&self) -> String {
        "wav".to_string()
    }

    fn native_rate(&self) -> Result<u32> {
        if self.sample_rate == 0 {
            return Err(VoxlinkError::DeviceUnavailable {
                device: self.name(),
                message: "WAV file reports a 0Hz sample rate".to_string(),
            });
        }
        Ok(self.sample_rate)
    }

    fn open(&mut self, mut on_block: BlockCallback) -> Result<Box<dyn InputStream>> {
        let running = Arc::new(AtomicBool::new(true));
        let thread_running = Arc::clone(&running);
        let samples = Arc::clone(&self.samples);
        let quantum = self.quantum;
        let block_time = Duration::from_secs_f64(quantum as f64 / self.sample_rate.max(1) as f64);
        let realtime = self.realtime;
        let done_tx = self.done_tx.clone();

        let thread = thread::spawn(move || {
            let started = Instant::now();
            for (index, block) in samples.chunks(quantum).enumerate() {
                if !thread_running.load(Ordering::SeqCst) {
                    return;
                }
                if realtime {
                    let due = started + block_time * index as u32;
                    if let Some(wait) = due.checked_duration_since(Instant::now()) {
                        thread::sleep(wait);
                    }
                }
                on_block(block);
            }
            // Receiver may be gone; completion is best-effort.
            let _ = done_tx.try_send(());
        });

        Ok(Box::new(WavInputStream {
            running,
            thread: Some(thread),
        }))
    }
}

struct WavInputStream {
    running: Arc<AtomicBool>,
    thread: Option<JoinHandle<()>>,
}

impl InputStream for WavInputStream {
    fn close(mut self: Box<Self>) -> Result<()> {
        self.running.store(false, Ordering::SeqCst);
        if let Some(thread) = self.thread.take() {
            thread.join().map_err(|_| VoxlinkError::AudioCapture {
                message: "WAV replay thread panicked".to_string(),
            })?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;
    use std::sync::Mutex;

    fn make_wav_data(sample_rate: u32, channels: u16, samples: &[i16]) -> Vec<u8> {
        let mut cursor = Cursor::new(Vec::new());
        let spec = hound::WavSpec {
            channels,
            sample_rate,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };
        let mut writer = hound::WavWriter::new(&mut cursor, spec).unwrap();
        for &s in samples {
            writer.write_sample(s).unwrap();
        }
        writer.finalize().unwrap();
        cursor.into_inner()
    }

    fn replay(device: &mut WavInputDevice) -> Vec<Vec<f32>> {
        let blocks = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&blocks);
        let done = device.completion();
        let stream = device
            .open(Box::new(move |block: &[f32]| {
                sink.lock().unwrap().push(block.to_vec())
            }))
            .unwrap();
        done.recv_timeout(Duration::from_secs(5)).unwrap();
        stream.close().unwrap();
        Arc::try_unwrap(blocks).unwrap().into_inner().unwrap()
    }

    #[test]
    fn from_reader_reports_native_rate() {
        let wav_data = make_wav_data(44_100, 1, &[0; 441]);
        let device = WavInputDevice::from_reader(Box::new(Cursor::new(wav_data))).unwrap();
        assert_eq!(device.native_rate().unwrap(), 44_100);
        assert_eq!(device.duration(), Duration::from_millis(10));
    }

    #[test]
    fn stereo_is_downmixed_to_mono() {
        let wav_data = make_wav_data(16_000, 2, &[16384, 0, -32768, 0]);
        let mut device = WavInputDevice::from_reader(Box::new(Cursor::new(wav_data))).unwrap();

        let samples: Vec<f32> = replay(&mut device).concat();
        assert_eq!(samples.len(), 2);
        assert!((samples[0] - 0.25).abs() < 1e-4);
        assert!((samples[1] + 0.5).abs() < 1e-6);
    }

    #[test]
    fn replays_in_quanta() {
        let mut device = WavInputDevice::from_samples(vec![0.0; 300], 16_000).with_quantum(128);
        let sizes: Vec<usize> = replay(&mut device).iter().map(Vec::len).collect();
        assert_eq!(sizes, vec![128, 128, 44]);
    }

    #[test]
    fn invalid_wav_data_returns_error() {
        let result = WavInputDevice::from_reader(Box::new(Cursor::new(vec![0u8, 1, 2, 3])));
        match result {
            Err(VoxlinkError::AudioCapture { message }) => {
                assert!(message.contains("Failed to parse WAV file"));
            }
            _ => panic!("Expected AudioCapture error"),
        }
    }

    #[test]
    fn test_malformed_wav_random_garbage() {
        let garbage: Vec<u8> = (0..500).map(|i| ((i * 17 + 42) % 256) as u8).collect();
        let result = WavInputDevice::from_reader(Box::new(Cursor::new(garbage)));
        assert!(result.is_err(), "Should reject random garbage as WAV");
    }

    #[test]
    fn zero_rate_is_unavailable() {
        let device = WavInputDevice::from_samples(vec![0.0; 4], 0);
        assert!(matches!(
            device.native_rate(),
            Err(VoxlinkError::DeviceUnavailable { .. })
        ));
    }

    #[test]
    fn close_stops_replay_early() {
        let mut device = WavInputDevice::from_samples(vec![0.0; 16_000], 16_000)
            .with_quantum(160)
            .with_realtime_pacing(true);
        let stream = device.open(Box::new(|_: &[f32]| {})).unwrap();
        let started = Instant::now();
        stream.close().unwrap();
        assert!(started.elapsed() < Duration::from_millis(500));
    }
}
