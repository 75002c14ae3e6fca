//! Wall-clock abstraction for anything that ages out over real time.

use std::time::Instant;

/// Abstraction over time for testability.
///
/// Production code uses `SystemClock`; tests substitute a hand-advanced clock
/// so eviction and timeout logic can be verified deterministically.
pub trait Clock: Send + Sync {
    /// Returns the current instant.
    fn now(&self) -> Instant;
}

/// Real system clock using `std::time::Instant::now()`.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }
}
