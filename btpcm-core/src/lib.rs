//! Transport-agnostic core of the Bluetooth PCM I/O engine: the byte ring,
//! the A2DP pacing state machine, the HFP duplex exchange, and delay
//! estimation. Nothing in this crate touches a real socket or a real
//! clock — those are injected as traits so the logic here can be driven
//! deterministically in tests.

pub mod a2dp;
pub mod delay;
pub mod error;
pub mod hfp;
pub mod ring;

pub use a2dp::{A2dpSender, FlushReport, FlushTrigger, PcmWriter, SuspendScheduler};
pub use delay::estimate_bt_stack_delay_frames;
pub use error::CoreError;
pub use hfp::{hfp_callback, HfpEndpoint, PcmDuplex, PollEvents};
pub use ring::ByteRing;
