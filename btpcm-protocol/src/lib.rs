//! Shared types for the Bluetooth PCM I/O engine: timestamp/duration
//! arithmetic, fixed sample format, device/node identity types, and the
//! tuning constants from the design.

pub mod consts;
pub mod format;
pub mod time;
pub mod types;

pub use format::PcmFormat;
pub use time::{duration_to_frames, frames_to_duration, Clock, Timestamp};
pub use types::{BtNodeFlags, BtNodeType, Direction, StableId};
