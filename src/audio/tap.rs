//! Read-only view of the live capture signal for visualization.

use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};

/// Handle into the most recent native samples of a running capture.
///
/// Cloned handles share one window. Once the capture stops, the tap is
/// closed and every clone reports no data.
#[derive(Debug, Clone)]
pub struct AnalysisTap {
    inner: Arc<TapInner>,
}

#[derive(Debug)]
struct TapInner {
    window: Mutex<VecDeque<f32>>,
    capacity: usize,
    live: AtomicBool,
}

impl AnalysisTap {
    /// Creates a live tap holding at most `capacity` samples.
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: Arc::new(TapInner {
                window: Mutex::new(VecDeque::with_capacity(capacity)),
                capacity,
                live: AtomicBool::new(true),
            }),
        }
    }

    /// Appends samples, discarding the oldest beyond capacity.
    pub(crate) fn write(&self, samples: &[f32]) {
        if !self.is_live() || self.inner.capacity == 0 {
            return;
        }
        if let Ok(mut window) = self.inner.window.lock() {
            let keep = samples.len().min(self.inner.capacity);
            let overflow = (window.len() + keep).saturating_sub(self.inner.capacity);
            window.drain(..overflow);
            window.extend(&samples[samples.len() - keep..]);
        }
    }

    /// Copy of the current window, or `None` once the capture has stopped.
    pub fn snapshot(&self) -> Option<Vec<f32>> {
        if !self.is_live() {
            return None;
        }
        self.inner
            .window
            .lock()
            .ok()
            .map(|window| window.iter().copied().collect())
    }

    pub fn is_live(&self) -> bool {
        self.inner.live.load(Ordering::Acquire)
    }

    pub(crate) fn close(&self) {
        self.inner.live.store(false, Ordering::Release);
        if let Ok(mut window) = self.inner.window.lock() {
            window.clear();
        }
    }
}
