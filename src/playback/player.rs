//! Thread-safe playback facade.
//!
//! [`AudioPlayer`] owns a scheduler behind a mutex plus a driver thread that
//! feeds chunk completions from the output line back into it. Transport code
//! only ever calls `push`, `finish_turn` and `stop`.

use crate::audio::chunk::AudioChunk;
use crate::error::Result;
use crate::lock::lock_or_recover;
use crate::playback::clock::PlaybackClock;
use crate::playback::output::OutputLine;
use crate::playback::scheduler::{
    BufferState, CompletionToken, PlaybackScheduler, PlaybackStats, SchedulerConfig,
};
use crossbeam_channel::{Receiver, Sender, bounded, select};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};

type SharedScheduler<C, O> = Arc<Mutex<PlaybackScheduler<C, O>>>;

pub struct AudioPlayer<C, O>
where
    C: PlaybackClock + 'static,
    O: OutputLine + 'static,
{
    scheduler: SharedScheduler<C, O>,
    stop_tx: Option<Sender<()>>,
    driver: Option<JoinHandle<()>>,
}

impl<C, O> AudioPlayer<C, O>
where
    C: PlaybackClock + 'static,
    O: OutputLine + 'static,
{
    /// Wires a scheduler to an output line whose completions arrive on `completions`.
    pub fn new(
        config: SchedulerConfig,
        clock: C,
        output: O,
        completions: Receiver<CompletionToken>,
    ) -> Self {
        let scheduler = Arc::new(Mutex::new(PlaybackScheduler::new(config, clock, output)));
        let (stop_tx, stop_rx) = bounded::<()>(1);
        let driven = Arc::clone(&scheduler);

        let driver = thread::spawn(move || {
            loop {
                select! {
                    recv(completions) -> token => match token {
                        Ok(token) => lock_or_recover(&driven, "playback driver").on_chunk_ended(token),
                        Err(_) => break,
                    },
                    recv(stop_rx) -> _ => break,
                }
            }
            tracing::debug!("playback driver exiting");
        });

        Self {
            scheduler,
            stop_tx: Some(stop_tx),
            driver: Some(driver),
        }
    }

    pub fn push(&self, chunk: AudioChunk) -> Result<BufferState> {
        self.lock().push(chunk)
    }

    /// Decodes and queues a wire payload; undecodable payloads are dropped.
    pub fn push_encoded(&self, data: &str) -> Result<BufferState> {
        self.lock().push_encoded(data)
    }

    pub fn finish_turn(&self) {
        self.lock().finish_turn();
    }

    /// Halts output and discards queued audio. The player stays usable.
    pub fn stop(&self) {
        self.lock().stop();
    }

    pub fn set_volume(&self, volume: f32) {
        self.lock().set_volume(volume);
    }

    pub fn volume(&self) -> f32 {
        self.lock().volume()
    }

    pub fn state(&self) -> BufferState {
        self.lock().state()
    }

    pub fn stats(&self) -> PlaybackStats {
        self.lock().stats()
    }

    pub fn is_idle(&self) -> bool {
        self.lock().is_idle()
    }

    /// Stops playback and joins the driver thread. Safe to call more than once.
    pub fn shutdown(&mut self) {
        self.lock().stop();
        self.stop_tx.take();
        if let Some(driver) = self.driver.take()
            && driver.join().is_err()
        {
            tracing::warn!("playback driver thread panicked");
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, PlaybackScheduler<C, O>> {
        lock_or_recover(&self.scheduler, "audio player")
    }
}

impl<C, O> Drop for AudioPlayer<C, O>
where
    C: PlaybackClock + 'static,
    O: OutputLine + 'static,
{
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(feature = "cpal-audio")]
mod cpal_player {
    use super::AudioPlayer;
    use crate::config::PlaybackConfig;
    use crate::error::Result;
    use crate::playback::clock::FrameClock;
    use crate::playback::output::CpalOutputLine;
    use crate::playback::scheduler::SchedulerConfig;

    impl AudioPlayer<FrameClock, CpalOutputLine> {
        /// Opens the configured output device and starts the driver.
        ///
        /// # Errors
        /// `VoxlinkError::DeviceUnavailable` when the speaker cannot be opened.
        pub fn open(config: &PlaybackConfig) -> Result<Self> {
            let (line, completions) = CpalOutputLine::open(config.device.as_deref())?;
            let clock = line.clock();
            let player = Self::new(SchedulerConfig::from(config), clock, line, completions);
            player.set_volume(config.volume);
            Ok(player)
        }
    }
}
