//! Hybrid logical clock.
//!
//! Timestamps pack wall-clock milliseconds into the upper 48 bits and a
//! logical counter into the lower 16. `tick()` never returns the same value
//! twice and never goes backwards, even when the wall clock does.
//!
//! Remote timestamps more than [`MAX_DRIFT_MS`] ahead of the local wall clock
//! are not witnessed, so one peer with a bad clock (or a forged entry) cannot
//! drag every other writer into the far future.

use std::sync::atomic::{AtomicU64, Ordering};

const LOGICAL_BITS: u32 = 16;

/// How far ahead of the local wall clock a witnessed timestamp may be.
pub const MAX_DRIFT_MS: u64 = 5 * 60 * 1000;

/// Monotonic hybrid logical clock shared by one writer.
#[derive(Debug, Default)]
pub struct HybridClock {
    last: AtomicU64,
}

impl HybridClock {
    /// Create a clock starting at zero.
    pub fn new() -> Self {
        Self {
            last: AtomicU64::new(0),
        }
    }

    /// Create a clock that never issues a timestamp at or below `floor`.
    pub fn starting_after(floor: u64) -> Self {
        Self {
            last: AtomicU64::new(floor),
        }
    }

    /// Produce the next timestamp.
    ///
    /// Saturates at `u64::MAX` instead of wrapping.
    pub fn tick(&self) -> u64 {
        let physical = crate::now_millis() << LOGICAL_BITS;
        let mut current = self.last.load(Ordering::Acquire);
        loop {
            let next = physical.max(current.saturating_add(1));
            match self
                .last
                .compare_exchange_weak(current, next, Ordering::AcqRel, Ordering::Acquire)
            {
                Ok(_) => return next,
                Err(observed) => current = observed,
            }
        }
    }

    /// Advance past a timestamp observed on a remote entry.
    ///
    /// Returns `false`, leaving the clock untouched, when `remote` is more
    /// than [`MAX_DRIFT_MS`] ahead of the wall clock.
    pub fn witness(&self, remote: u64) -> bool {
        let limit = crate::now_millis().saturating_add(MAX_DRIFT_MS);
        if Self::physical_millis(remote) > limit {
            return false;
        }
        self.last.fetch_max(remote, Ordering::AcqRel);
        true
    }

    /// Last issued or witnessed timestamp.
    pub fn last(&self) -> u64 {
        self.last.load(Ordering::Acquire)
    }

    /// Wall-clock milliseconds encoded in a timestamp.
    pub fn physical_millis(hlc: u64) -> u64 {
        hlc >> LOGICAL_BITS
    }
}
