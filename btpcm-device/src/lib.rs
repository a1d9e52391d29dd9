//! `PcmDevice` and its supporting lifecycle: the glue between the
//! transport-agnostic pacing logic in `btpcm-core` and the poll/transport
//! traits a real Bluetooth stack implements.

pub mod device;
pub mod error;
pub mod factory;
pub mod node;
pub mod poll;
pub mod transport;

pub use device::{drive_hfp, DeviceKind, DeviceState, PcmArea, PcmDevice};
pub use error::DeviceError;
pub use node::ActiveNode;
pub use poll::{Interest, PollFacility, RevEvents, Trigger};
pub use transport::{A2dpTransport, FormatTable, HfpTransport};
