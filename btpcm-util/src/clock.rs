use nix::time::{clock_gettime, ClockId};

use btpcm_protocol::{Clock, Timestamp};

/// Reads `CLOCK_MONOTONIC_RAW`, same clock the original CRAS iodev timed
/// its flush schedule against. Immune to NTP slew, so two readings taken
/// a known wall-clock interval apart never drift relative to each other.
pub struct MonotonicRawClock;

impl Clock for MonotonicRawClock {
    fn now(&self) -> Timestamp {
        let ts = clock_gettime(ClockId::CLOCK_MONOTONIC_RAW)
            .expect("clock_gettime(CLOCK_MONOTONIC_RAW) failed, are we on Linux?");

        Timestamp::from_raw(ts.tv_sec(), ts.tv_nsec())
    }
}
