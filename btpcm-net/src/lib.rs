//! Concrete, `nix`-backed implementations of the poll and socket contracts
//! `btpcm-device` only expresses as traits. Depended on by the harness
//! binary and by anything embedding these devices in a real process;
//! `btpcm-device` itself never depends the other way.

pub mod error;
pub mod poll;
pub mod socket;

pub use error::NetError;
pub use poll::{drive_once, NixPollFacility};
pub use socket::{local_pair, RawFdSocket};
