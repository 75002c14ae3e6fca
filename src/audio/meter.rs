//! Coarse loudness meter for UI feedback.
//!
//! Levels are 0..=100: the RMS of the current analysis window scaled by an
//! empirical factor and clamped. The meter only reads from an
//! [`AnalysisTap`]; it never touches the encode path.

use crate::audio::tap::AnalysisTap;
use crate::defaults;
use crossbeam_channel::{Sender, bounded, select, tick};
use std::sync::Arc;
use std::sync::atomic::{AtomicU8, Ordering};
use std::thread::{self, JoinHandle};
use std::time::Duration;

/// Level of float samples in [-1, 1] using the default scale.
pub fn level_from_samples(samples: &[f32]) -> u8 {
    level_with_scale(samples, defaults::LEVEL_SCALE)
}

/// Level of float samples with an explicit RMS scale factor.
pub fn level_with_scale(samples: &[f32], scale: f32) -> u8 {
    if samples.is_empty() {
        return 0;
    }
    let energy: f32 = samples
        .iter()
        .map(|&s| if s.is_finite() { s * s } else { 0.0 })
        .sum::<f32>()
        / samples.len() as f32;
    scale_rms(energy.sqrt(), scale)
}

/// Level of 8-bit unsigned time-domain bytes (128 = zero line).
pub fn level_from_unsigned_bytes(bytes: &[u8]) -> u8 {
    let normalized: Vec<f32> = bytes.iter().map(|&b| (b as f32 - 128.0) / 128.0).collect();
    level_from_samples(&normalized)
}

/// Level of whatever the tap currently holds; 0 once the tap is closed.
pub fn level_from_tap(tap: &AnalysisTap, scale: f32) -> u8 {
    tap.snapshot()
        .map(|window| level_with_scale(&window, scale))
        .unwrap_or(0)
}

fn scale_rms(rms: f32, scale: f32) -> u8 {
    let level = (rms * scale).round();
    if level.is_nan() || level <= 0.0 {
        0
    } else {
        level.min(100.0) as u8
    }
}

/// Shared, lock-free holder for the latest level.
#[derive(Clone, Debug, Default)]
pub struct LiveLevel {
    level: Arc<AtomicU8>,
}

impl LiveLevel {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self, level: u8) {
        self.level.store(level.min(100), Ordering::Relaxed);
    }

    pub fn get(&self) -> u8 {
        self.level.load(Ordering::Relaxed)
    }
}

/// Background poller that samples a tap at a fixed cadence.
///
/// Each tick recomputes the level from the tap window and publishes it to a
/// [`LiveLevel`]. The poller resets the level to 0 when stopped.
pub struct LevelPoller {
    stop_tx: Option<Sender<()>>,
    thread: Option<JoinHandle<()>>,
    level: LiveLevel,
}

impl LevelPoller {
    pub fn spawn(tap: AnalysisTap, interval: Duration, scale: f32) -> Self {
        let level = LiveLevel::new();
        let (stop_tx, stop_rx) = bounded::<()>(1);
        let ticker = tick(interval);
        let published = level.clone();

        let thread = thread::spawn(move || {
            loop {
                select! {
                    recv(ticker) -> _ => {
                        published.set(level_from_tap(&tap, scale));
                    }
                    recv(stop_rx) -> _ => break,
                }
            }
            published.set(0);
        });

        Self {
            stop_tx: Some(stop_tx),
            thread: Some(thread),
            level,
        }
    }

    /// Handle to read the latest level from any thread.
    pub fn level(&self) -> LiveLevel {
        self.level.clone()
    }

    /// Stops polling and waits for the thread. Safe to call more than once.
    pub fn stop(&mut self) {
        // Dropping the sender disconnects the channel and wakes the select.
        self.stop_tx.take();
        if let Some(thread) = self.thread.take()
            && thread.join().is_err()
        {
            tracing::warn!("level poller thread panicked");
        }
        self.level.set(0);
    }
}

impl Drop for LevelPoller {
    fn drop(&mut self) {
        self.stop();
    }
}
