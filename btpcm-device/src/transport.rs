//! Transport contracts: the narrow surface a Bluetooth profile stack
//! exposes to a device, independent of any particular Bluetooth daemon.

use std::os::unix::io::RawFd;

use btpcm_protocol::{Direction, PcmFormat};

use crate::error::DeviceError;

/// Rate/format/channel-count combinations a transport can negotiate.
#[derive(Debug, Clone, Default)]
pub struct FormatTable {
    pub rates: Vec<u32>,
    pub formats: Vec<u32>,
    pub channel_counts: Vec<u16>,
}

pub trait A2dpTransport {
    fn get_fd(&self) -> RawFd;
    fn get_addr(&self) -> &str;
    fn get_display_name(&self) -> &str;
    fn fill_format(&self, rate: u32, bits: u32, channel_mode: u32) -> FormatTable;
    fn start(&self, format: &PcmFormat) -> Result<(), DeviceError>;
    fn stop(&self) -> Result<(), DeviceError>;
    fn set_volume(&self, volume: u8);
    fn delay_sync(&self, initial_ms: u64, period_ms: u64);
}

pub trait HfpTransport {
    fn get_fd(&self) -> RawFd;
    fn get_addr(&self) -> &str;
    fn get_display_name(&self) -> &str;
    fn fill_format(&self) -> FormatTable;
    fn start(&self, direction: Direction) -> Result<(), DeviceError>;
    fn stop(&self, direction: Direction);
}
