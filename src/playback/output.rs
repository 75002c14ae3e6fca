//! Output lines: where scheduled chunks go.

use crate::playback::scheduler::ScheduledChunk;

/// Trait for anything that can play chunks at absolute times.
///
/// This trait allows swapping implementations (real speaker, recorder for tests).
/// Completion of each chunk is reported back out of band, by whoever drives
/// the scheduler, via `PlaybackScheduler::on_chunk_ended`.
pub trait OutputLine: Send {
    /// Queues a chunk to start at `chunk.start` on the line's clock.
    fn schedule(&mut self, chunk: ScheduledChunk);

    /// Silences everything scheduled so far. No completions follow.
    fn cancel_all(&mut self);

    /// Output gain in [0, 1].
    fn set_gain(&mut self, gain: f32);
}

/// Output line that only records what it was asked to do.
#[derive(Debug)]
pub struct RecordingOutput {
    scheduled: Vec<ScheduledChunk>,
    cancel_count: usize,
    gain: f32,
}

impl RecordingOutput {
    pub fn new() -> Self {
        Self {
            scheduled: Vec::new(),
            cancel_count: 0,
            gain: 1.0,
        }
    }

    /// Every chunk ever scheduled, in scheduling order.
    pub fn scheduled(&self) -> &[ScheduledChunk] {
        &self.scheduled
    }

    pub fn cancel_count(&self) -> usize {
        self.cancel_count
    }

    pub fn gain(&self) -> f32 {
        self.gain
    }
}

impl Default for RecordingOutput {
    fn default() -> Self {
        Self::new()
    }
}

impl OutputLine for RecordingOutput {
    fn schedule(&mut self, chunk: ScheduledChunk) {
        self.scheduled.push(chunk);
    }

    fn cancel_all(&mut self) {
        self.cancel_count += 1;
    }

    fn set_gain(&mut self, gain: f32) {
        self.gain = gain;
    }
}

#[cfg(feature = "cpal-audio")]
pub use cpal_line::CpalOutputLine;

#[cfg(feature = "cpal-audio")]
mod cpal_line {
    use super::OutputLine;
    use crate::audio::capture::{Direction, SendableStream, find_device};
    use crate::error::{Result, VoxlinkError};
    use crate::lock::lock_or_recover;
    use crate::playback::clock::FrameClock;
    use crate::playback::scheduler::{CompletionToken, ScheduledChunk};
    use crate::playback::timeline::OutputTimeline;
    use cpal::traits::{DeviceTrait, StreamTrait};
    use crossbeam_channel::{Receiver, Sender, unbounded};
    use std::sync::atomic::{AtomicU64, Ordering};
    use std::sync::{Arc, Mutex};

    /// Speaker output through CPAL.
    ///
    /// The device callback renders an [`OutputTimeline`], publishes how many
    /// frames it has consumed (the line's clock) and sends the tokens of
    /// chunks that finished during the callback.
    pub struct CpalOutputLine {
        timeline: Arc<Mutex<OutputTimeline>>,
        frames: Arc<AtomicU64>,
        device_rate: u32,
        name: String,
        _stream: SendableStream,
    }

    impl CpalOutputLine {
        /// Opens the named output device (or the preferred default) and starts
        /// rendering silence until chunks are scheduled.
        ///
        /// # Errors
        /// `VoxlinkError::DeviceUnavailable` when the device cannot be opened.
        pub fn open(device_name: Option<&str>) -> Result<(Self, Receiver<CompletionToken>)> {
            use cpal::SampleFormat;

            let device = find_device(device_name, Direction::Output)?;
            let name = device
                .name()
                .unwrap_or_else(|_| device_name.unwrap_or("default").to_string());
            let default_config =
                device
                    .default_output_config()
                    .map_err(|e| VoxlinkError::DeviceUnavailable {
                        device: name.clone(),
                        message: format!("Failed to query default output config: {}", e),
                    })?;

            let device_rate = default_config.sample_rate();
            let channels = default_config.channels() as usize;
            let stream_config: cpal::StreamConfig = default_config.clone().into();

            tracing::info!(
                device = %name,
                channels,
                rate = device_rate,
                format = ?default_config.sample_format(),
                "opening output stream"
            );

            let timeline = Arc::new(Mutex::new(OutputTimeline::new(device_rate)));
            let frames = Arc::new(AtomicU64::new(0));
            let (done_tx, done_rx) = unbounded();

            let err_callback = |err| {
                tracing::error!("Audio output stream error: {}", err);
            };
            let unavailable = |e: cpal::BuildStreamError| VoxlinkError::DeviceUnavailable {
                device: name.clone(),
                message: format!("Failed to build output stream: {}", e),
            };

            let stream = match default_config.sample_format() {
                SampleFormat::F32 => {
                    let renderer = Renderer::new(&timeline, &frames, done_tx, channels);
                    device
                        .build_output_stream(
                            &stream_config,
                            move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
                                renderer.render(data);
                            },
                            err_callback,
                            None,
                        )
                        .map_err(unavailable)?
                }
                SampleFormat::I16 => {
                    let renderer = Renderer::new(&timeline, &frames, done_tx, channels);
                    let mut scratch: Vec<f32> = Vec::new();
                    device
                        .build_output_stream(
                            &stream_config,
                            move |data: &mut [i16], _: &cpal::OutputCallbackInfo| {
                                scratch.resize(data.len(), 0.0);
                                renderer.render(&mut scratch);
                                for (out, &sample) in data.iter_mut().zip(scratch.iter()) {
                                    *out = crate::audio::codec::float_to_pcm16(sample);
                                }
                            },
                            err_callback,
                            None,
                        )
                        .map_err(unavailable)?
                }
                fmt => {
                    return Err(VoxlinkError::DeviceUnavailable {
                        device: name.clone(),
                        message: format!(
                            "Unsupported output sample format: {:?}. \
                             Try specifying a device with --output-device.",
                            fmt
                        ),
                    });
                }
            };

            stream.play().map_err(|e| VoxlinkError::AudioPlayback {
                message: format!("Failed to start output stream on {}: {}", name, e),
            })?;

            Ok((
                Self {
                    timeline,
                    frames,
                    device_rate,
                    name,
                    _stream: SendableStream(stream),
                },
                done_rx,
            ))
        }

        /// Clock following the frames the device has consumed.
        pub fn clock(&self) -> FrameClock {
            FrameClock::new(Arc::clone(&self.frames), self.device_rate)
        }

        pub fn device_rate(&self) -> u32 {
            self.device_rate
        }

        pub fn name(&self) -> &str {
            &self.name
        }
    }

    impl OutputLine for CpalOutputLine {
        fn schedule(&mut self, chunk: ScheduledChunk) {
            lock_or_recover(&self.timeline, "output schedule").insert(chunk);
        }

        fn cancel_all(&mut self) {
            lock_or_recover(&self.timeline, "output cancel").clear();
        }

        fn set_gain(&mut self, gain: f32) {
            lock_or_recover(&self.timeline, "output gain").set_gain(gain);
        }
    }

    /// State moved into the device callback.
    struct Renderer {
        timeline: Arc<Mutex<OutputTimeline>>,
        frames: Arc<AtomicU64>,
        done_tx: Sender<CompletionToken>,
        channels: usize,
    }

    impl Renderer {
        fn new(
            timeline: &Arc<Mutex<OutputTimeline>>,
            frames: &Arc<AtomicU64>,
            done_tx: Sender<CompletionToken>,
            channels: usize,
        ) -> Self {
            Self {
                timeline: Arc::clone(timeline),
                frames: Arc::clone(frames),
                done_tx,
                channels,
            }
        }

        fn render(&self, data: &mut [f32]) {
            let finished = {
                let mut timeline = lock_or_recover(&self.timeline, "output render");
                let finished = timeline.render(data, self.channels);
                self.frames.store(timeline.frame(), Ordering::Release);
                finished
            };
            for token in finished {
                // The driver may already be gone during shutdown.
                if self.done_tx.send(token).is_err() {
                    break;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::chunk::AudioChunk;
    use crate::playback::clock::ManualClock;
    use crate::playback::scheduler::{PlaybackScheduler, SchedulerConfig};

    #[test]
    fn recording_output_keeps_schedule_order() {
        let config = SchedulerConfig {
            sample_rate: 8,
            prebuffer_chunks: 2,
            rebuffer_threshold: 0,
            ..SchedulerConfig::default()
        };
        let mut scheduler =
            PlaybackScheduler::new(config, ManualClock::new(), RecordingOutput::new());
        scheduler.push(AudioChunk::new(vec![0.1; 8], 8)).unwrap();
        scheduler.push(AudioChunk::new(vec![0.2; 8], 8)).unwrap();

        let starts: Vec<f64> = scheduler
            .output()
            .scheduled()
            .iter()
            .map(|c| c.start)
            .collect();
        assert_eq!(starts, vec![0.0, 1.0]);
        assert_eq!(scheduler.output().cancel_count(), 0);
    }

    #[test]
    fn recording_output_is_object_safe() {
        let mut line: Box<dyn OutputLine> = Box::new(RecordingOutput::new());
        line.cancel_all();
        line.set_gain(0.5);
    }

    #[test]
    #[ignore] // Requires audio hardware
    #[cfg(feature = "cpal-audio")]
    fn test_open_default_output() {
        let (line, _done) = CpalOutputLine::open(None).expect("Failed to open output");
        assert!(line.device_rate() > 0);
    }
}
