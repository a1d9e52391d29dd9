//! Monotonic-raw timestamp arithmetic and frame/duration conversion.
//!
//! The clock is injected through the [`Clock`] trait rather than read
//! directly, so the pacing state machine in `btpcm-core` can be driven by a
//! fake clock in tests.

use std::time::Duration;

/// A monotonic-raw timestamp. Has no meaningful epoch; only differences and
/// orderings between two `Timestamp`s are meaningful.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default)]
pub struct Timestamp(Duration);

impl Timestamp {
    pub const ZERO: Timestamp = Timestamp(Duration::ZERO);

    /// Build a timestamp from raw `clock_gettime`-style seconds/nanoseconds.
    pub fn from_raw(secs: i64, nanos: i64) -> Self {
        let secs = u64::try_from(secs).expect("monotonic-raw clock produced negative seconds");
        let nanos = u32::try_from(nanos).expect("monotonic-raw clock produced out-of-range nanos");
        Timestamp(Duration::new(secs, nanos))
    }

    pub fn is_zero(&self) -> bool {
        self.0.is_zero()
    }

    /// `self + duration`.
    pub fn add(self, duration: Duration) -> Timestamp {
        Timestamp(self.0 + duration)
    }

    /// Whether `self` is strictly later than `other`.
    pub fn after(&self, other: &Timestamp) -> bool {
        self.0 > other.0
    }

    /// `self - other`. Panics if `other` is later than `self`; callers
    /// should gate with [`Timestamp::after`] first, same as the original's
    /// `subtract_timespecs` following a `timespec_after` check.
    pub fn duration_since(&self, other: &Timestamp) -> Duration {
        self.0.checked_sub(other.0).expect("Timestamp::duration_since underflow")
    }

    pub fn saturating_duration_since(&self, other: &Timestamp) -> Duration {
        self.0.saturating_sub(other.0)
    }
}

/// Injectable source of monotonic-raw time.
pub trait Clock {
    fn now(&self) -> Timestamp;
}

/// Convert a frame count at `rate` Hz to a duration, rounding toward floor.
pub fn frames_to_duration(frames: u64, rate: u32) -> Duration {
    let nanos = u128::from(frames) * 1_000_000_000 / u128::from(rate);
    Duration::from_nanos(u64::try_from(nanos).expect("frames_to_duration overflow"))
}

/// Convert a duration to the frame count it represents at `rate` Hz,
/// rounding toward floor.
pub fn duration_to_frames(duration: Duration, rate: u32) -> u64 {
    let nanos = duration.as_nanos();
    let frames = nanos * u128::from(rate) / 1_000_000_000;
    u64::try_from(frames).expect("duration_to_frames overflow")
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn frame_duration_roundtrip_floor() {
        // 960 frames @ 48000Hz = 20ms exactly
        let d = frames_to_duration(960, 48_000);
        assert_eq!(d, Duration::from_millis(20));
        assert_eq!(duration_to_frames(d, 48_000), 960);
    }

    #[test]
    fn frames_to_duration_rounds_down() {
        // 1 frame @ 48000Hz = 20833.33ns, should floor to 20833ns
        let d = frames_to_duration(1, 48_000);
        assert_eq!(d.as_nanos(), 20_833);
    }

    #[test]
    fn duration_to_frames_rounds_down() {
        // 1 microsecond @ 48000Hz = 0.048 frames -> 0
        assert_eq!(duration_to_frames(Duration::from_micros(1), 48_000), 0);
    }

    #[test]
    fn after_and_duration_since() {
        let t0 = Timestamp::from_raw(10, 0);
        let t1 = Timestamp::from_raw(10, 5_000_000);
        assert!(t1.after(&t0));
        assert!(!t0.after(&t1));
        assert_eq!(t1.duration_since(&t0), Duration::from_millis(5));
    }
}
