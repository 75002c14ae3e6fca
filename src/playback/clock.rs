//! Timeline clocks for the playback scheduler.
//!
//! A playback clock reports the current position of the output line in
//! seconds. Start times handed to an [`OutputLine`](super::output::OutputLine)
//! are expressed on the same axis.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

/// Current position of an output timeline, in seconds.
pub trait PlaybackClock: Send {
    fn now(&self) -> f64;
}

/// Clock that only moves when told to. Cloning shares the same position.
#[derive(Debug, Clone, Default)]
pub struct ManualClock {
    bits: Arc<AtomicU64>,
}

impl ManualClock {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn starting_at(secs: f64) -> Self {
        let clock = Self::new();
        clock.set(secs);
        clock
    }

    pub fn set(&self, secs: f64) {
        self.bits.store(secs.to_bits(), Ordering::SeqCst);
    }

    pub fn advance(&self, secs: f64) {
        self.set(self.now() + secs);
    }
}

impl PlaybackClock for ManualClock {
    fn now(&self) -> f64 {
        f64::from_bits(self.bits.load(Ordering::SeqCst))
    }
}

/// Clock driven by the number of frames an output device has consumed.
///
/// The device callback is the only writer; this is the timeline the rendered
/// audio actually follows, so it never drifts from what is heard.
#[derive(Debug, Clone)]
pub struct FrameClock {
    frames: Arc<AtomicU64>,
    rate: u32,
}

impl FrameClock {
    pub fn new(frames: Arc<AtomicU64>, rate: u32) -> Self {
        Self {
            frames,
            rate: rate.max(1),
        }
    }
}

impl PlaybackClock for FrameClock {
    fn now(&self) -> f64 {
        self.frames.load(Ordering::Acquire) as f64 / self.rate as f64
    }
}
