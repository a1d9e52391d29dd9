//! Tuning constants, as given in the design. Kept as a single module so the
//! pacing/backpressure logic in `btpcm-core` can cite them by name instead of
//! sprinkling magic numbers through the state machine.

use std::time::Duration;

/// Largest ring capacity we'll ever size an A2DP device's buffer to, in frames.
pub const PCM_BUF_MAX_FRAMES: u64 = 16384;

/// A2DP write block duration: the preferred per-write unit.
pub const PCM_BLOCK_MS: u64 = 20;

/// Fixed sample width this engine negotiates and stores: signed 16-bit LE.
pub const PCM_SAMPLE_BITS: u32 = 16;

/// SCO output packet size when idling with no output stream: 10ms of 8kHz
/// narrowband mono S16LE.
pub const HFP_PACKET_SIZE: usize = 160;

/// Backing store size for an HFP device's ring, in bytes.
pub const HFP_RING_CAPACITY: usize = 28800;

/// Delay-sync schedule requested from the A2DP transport on start.
pub const INIT_DELAY_SYNC_MSEC: u64 = 500;
pub const DELAY_SYNC_PERIOD_MSEC: u64 = 10_000;

/// Bootstrap delay assumed before the BT stack has reported a real data
/// position, expressed as a fraction of the configured sample rate.
pub const DEFAULT_BT_STACK_DELAY_SECS: f64 = 0.2;

/// Added to "now" before comparing against `next_flush_time`, so a poller
/// that wakes slightly early still gets to flush on schedule.
pub const WAKE_FUZZ: Duration = Duration::from_millis(1);

/// A2DP schedule miss beyond this is logged as a throttle record.
pub const THROTTLE_LOG_THRESHOLD: Duration = Duration::from_millis(10);

/// A2DP schedule miss beyond this is logged as a severe throttle event.
pub const THROTTLE_EVENT_THRESHOLD: Duration = Duration::from_secs(2);

/// How long a would-block condition may persist before the A2DP connection
/// is suspended.
pub const EAGAIN_SUSPEND_GRACE: Duration = Duration::from_secs(5);
