//! Bluetooth stack delay estimation: remote reported delay, plus bytes
//! still in flight inside this engine's own ring, plus the skew between
//! when we last wrote and when the stack last reported a data position.

use std::time::Duration;

use btpcm_protocol::{consts, duration_to_frames, Timestamp};

/// Estimate the total output delay, in frames, contributed by the
/// Bluetooth stack: remote-reported transport delay plus bytes this
/// engine has written but the stack hasn't consumed yet. Never negative.
///
/// `data_position_ts` is the timestamp the stack last attached to a
/// reported read position; `Timestamp::ZERO` means the stack hasn't
/// reported one yet, and a fixed bootstrap delay is assumed instead.
pub fn estimate_bt_stack_delay_frames(
    rate: u32,
    frame_bytes: u32,
    remote_delay: Duration,
    total_written_bytes: u64,
    total_bytes_read_by_stack: u64,
    last_write_ts: Timestamp,
    data_position_ts: Timestamp,
) -> u64 {
    let mut delay = duration_to_frames(remote_delay, rate) as i64;

    if data_position_ts.is_zero() {
        delay += (f64::from(rate) * consts::DEFAULT_BT_STACK_DELAY_SECS) as i64;
    } else {
        let bytes_in_flight = total_written_bytes as i64 - total_bytes_read_by_stack as i64;
        let in_flight_frames = bytes_in_flight / i64::from(frame_bytes);

        if data_position_ts.after(&last_write_ts) {
            let skew = data_position_ts.duration_since(&last_write_ts);
            delay += in_flight_frames + duration_to_frames(skew, rate) as i64;
        } else {
            let skew = last_write_ts.duration_since(&data_position_ts);
            delay += in_flight_frames - duration_to_frames(skew, rate) as i64;
        }
    }

    delay.max(0) as u64
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn bootstrap_delay_before_first_data_position() {
        let frames = estimate_bt_stack_delay_frames(
            48_000,
            4,
            Duration::ZERO,
            0,
            0,
            Timestamp::ZERO,
            Timestamp::ZERO,
        );
        assert_eq!(frames, 9_600); // 0.2s @ 48kHz
    }

    #[test]
    fn in_flight_bytes_and_positive_skew_add_up() {
        let frames = estimate_bt_stack_delay_frames(
            48_000,
            2,
            Duration::ZERO,
            4800,
            3200,
            Timestamp::from_raw(10, 0),
            Timestamp::from_raw(10, 5_000_000),
        );
        // in_flight = (4800-3200)/2 = 800 frames; skew = 5ms @ 48kHz = 240 frames
        assert_eq!(frames, 1_040);
    }

    #[test]
    fn negative_skew_subtracts_but_never_goes_below_zero() {
        let frames = estimate_bt_stack_delay_frames(
            48_000,
            2,
            Duration::ZERO,
            100,
            100,
            Timestamp::from_raw(10, 5_000_000),
            Timestamp::from_raw(10, 0),
        );
        assert_eq!(frames, 0);
    }

    #[test]
    fn remote_delay_is_added_on_top() {
        let frames = estimate_bt_stack_delay_frames(
            48_000,
            2,
            Duration::from_millis(100),
            0,
            0,
            Timestamp::from_raw(10, 0),
            Timestamp::from_raw(10, 0),
        );
        assert_eq!(frames, 4_800); // 100ms @ 48kHz
    }
}
