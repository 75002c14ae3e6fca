use std::sync::{Mutex, MutexGuard};

/// Locks `lock`, recovering the data if a previous holder panicked.
///
/// A poisoned capture or playback state is logged and reused rather than
/// propagated.
pub(crate) fn lock_or_recover<'a, T>(lock: &'a Mutex<T>, context: &str) -> MutexGuard<'a, T> {
    match lock.lock() {
        Ok(guard) => guard,
        Err(poisoned) => {
            tracing::warn!("mutex poisoned in {context}; recovering");
            poisoned.into_inner()
        }
    }
}
