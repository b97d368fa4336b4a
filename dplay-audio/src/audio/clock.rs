//! Monotonic audio presentation clock
//!
//! Written only by the decode engine, read by anyone (video renderer, UI).
//! The f64 value is stored as raw bits in an `AtomicU64` so reads are never
//! torn.

use std::sync::atomic::{AtomicU64, Ordering};

/// Current audio presentation time in seconds.
///
/// Never decreases: candidates smaller than the current value are ignored.
#[derive(Debug)]
pub struct PlaybackClock {
    bits: AtomicU64,
}

impl PlaybackClock {
    pub fn new() -> Self {
        Self {
            bits: AtomicU64::new(0.0f64.to_bits()),
        }
    }

    /// Current presentation time in seconds
    pub fn current(&self) -> f64 {
        f64::from_bits(self.bits.load(Ordering::Acquire))
    }

    /// Advance to `candidate` if it is not behind the current value.
    ///
    /// Returns the clock value after the update. NaN candidates are ignored.
    pub fn advance_to(&self, candidate: f64) -> f64 {
        if candidate.is_nan() {
            return self.current();
        }
        let result = self
            .bits
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |bits| {
                (candidate > f64::from_bits(bits)).then(|| candidate.to_bits())
            });
        match result {
            Ok(_) => candidate,
            Err(bits) => f64::from_bits(bits),
        }
    }
}

impl Default for PlaybackClock {
    fn default() -> Self {
        Self::new()
    }
}
