//! `UClock`: an abstract monotonic clock, 27 MHz-scaled, plus wall-clock
//! correlation (spec.md §2 "UClock (1%)").
//!
//! The teacher crate represents musical/sample time with a fixed-point
//! scaled integer (`fixed_point::FixedPoint64`, `i64 * 2^31`) rather than
//! a raw float, to keep time arithmetic exact and `Hash`-able. `UClockTs`
//! borrows that shape but fixes the scale to 27,000,000 ticks/second —
//! the clock rate the original library standardizes on so that NTSC
//! (29.97), PAL (25) and common audio rates (44100, 48000) all divide it
//! either exactly or with bounded rounding error.

use derive_more::{Add, AddAssign, Sub, SubAssign};
use std::time::{Duration, Instant};

/// Ticks per second of every `UClockTs` value.
pub const UCLOCK_FREQ: u64 = 27_000_000;

/// Sentinel for "no timestamp set", matching the C library's
/// `UINT64_MAX` convention for `UCLOCK_INVALID`.
pub const UCLOCK_INVALID: UClockTs = UClockTs(u64::MAX);

/// A 27 MHz-scaled timestamp. Arithmetic is exact integer arithmetic;
/// there is no float in the hot path.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Add, Sub, AddAssign, SubAssign)]
pub struct UClockTs(u64);

impl UClockTs {
    pub fn from_ticks(ticks: u64) -> Self {
        Self(ticks)
    }

    pub fn from_duration(d: Duration) -> Self {
        Self((d.as_secs_f64() * UCLOCK_FREQ as f64).round() as u64)
    }

    pub fn as_ticks(self) -> u64 {
        self.0
    }

    pub fn as_duration(self) -> Duration {
        Duration::from_secs_f64(self.0 as f64 / UCLOCK_FREQ as f64)
    }

    pub fn is_valid(self) -> bool {
        self != UCLOCK_INVALID
    }

    pub fn checked_sub(self, rhs: Self) -> Option<Self> {
        self.0.checked_sub(rhs.0).map(Self)
    }
}

/// The abstract clock trait pipes query for "now" (spec.md: "abstract
/// monotonic clock"). A pipe manager stores an `Arc<dyn UClock>` supplied
/// by the application, rather than baking in `Instant::now()` directly,
/// so the whole graph can be driven by a synthetic clock in tests.
pub trait UClock: Send + Sync {
    /// Current time in 27 MHz ticks. Implementations must be monotonic:
    /// successive calls never decrease.
    fn now(&self) -> UClockTs;
}

/// The default, real-time backed clock: wraps `std::time::Instant`.
pub struct SystemClock {
    origin: Instant,
}

impl Default for SystemClock {
    fn default() -> Self {
        Self { origin: Instant::now() }
    }
}

impl UClock for SystemClock {
    fn now(&self) -> UClockTs {
        UClockTs::from_duration(self.origin.elapsed())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn invalid_sentinel_is_not_valid() {
        assert!(!UCLOCK_INVALID.is_valid());
        assert!(UClockTs::from_ticks(0).is_valid());
    }

    #[test]
    fn duration_round_trip_is_close() {
        let ts = UClockTs::from_duration(Duration::from_millis(1000));
        assert_eq!(ts.as_ticks(), UCLOCK_FREQ);
    }

    #[test]
    fn checked_sub_detects_underflow() {
        let a = UClockTs::from_ticks(10);
        let b = UClockTs::from_ticks(20);
        assert_eq!(a.checked_sub(b), None);
        assert_eq!(b.checked_sub(a), Some(UClockTs::from_ticks(10)));
    }

    #[test]
    fn system_clock_is_monotonic() {
        let clock = SystemClock::default();
        let a = clock.now();
        let b = clock.now();
        assert!(b >= a);
    }
}
