use std::sync::atomic::{AtomicU64, Ordering};

/// Lock-free counter that hands out 1, 2, 3, ...
///
/// Never wraps: once `u64::MAX` has been handed out, `next` returns `None`
/// and the stored value stays put.
#[derive(Debug, Default)]
pub struct AtomicCounter {
    value: AtomicU64,
}

impl AtomicCounter {
    pub fn new() -> Self {
        Self::starting_from(0)
    }

    /// Creates a counter whose next value is `value + 1`.
    pub fn starting_from(value: u64) -> Self {
        Self {
            value: AtomicU64::new(value),
        }
    }

    pub fn next(&self) -> Option<u64> {
        // Relaxed is enough: callers only need each value handed out once
        self.value
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |v| v.checked_add(1))
            .ok()
            .map(|prev| prev + 1)
    }

    pub fn current(&self) -> u64 {
        self.value.load(Ordering::Relaxed)
    }
}
