//! Construction and destruction: attaches a node, seeds the A2DP schedule,
//! and hands back a ready-to-use device. Mirrors the split between
//! `a2dp_create`/`hfp_create` and the device registry in the original.

use std::rc::Rc;

use btpcm_protocol::{consts, BtNodeFlags, BtNodeType, Direction, Timestamp};

use btpcm_core::PcmWriter;

use crate::device::PcmDevice;
use crate::error::DeviceError;
use crate::node::ActiveNode;
use crate::poll::{PollFacility, RevEvents};
use crate::transport::{A2dpTransport, HfpTransport};

pub fn a2dp_create(
    transport: Rc<dyn A2dpTransport>,
    rate: u32,
    channels: u16,
    socket: Box<dyn PcmWriter>,
    poll: &mut dyn PollFacility,
    now: Timestamp,
    retry_callback: Box<dyn FnMut(RevEvents)>,
) -> Result<PcmDevice, DeviceError> {
    let addr = transport.get_addr().to_string();
    let supported_formats = transport.fill_format(rate, consts::PCM_SAMPLE_BITS, u32::from(channels));
    let mut device = PcmDevice::new_a2dp(transport);
    device.configure_a2dp(rate, channels, socket, poll, retry_callback)?;
    device.start(now)?;

    let node = ActiveNode::new(
        BtNodeType::Bluetooth,
        BtNodeFlags::FLOSS | BtNodeFlags::A2DP,
        now,
        &addr,
        supported_formats,
    );
    device.attach_node(node);

    Ok(device)
}

pub fn hfp_create(
    transport: Rc<dyn HfpTransport>,
    direction: Direction,
    poll: &mut dyn PollFacility,
    now: Timestamp,
    retry_callback: Box<dyn FnMut(RevEvents)>,
) -> Result<PcmDevice, DeviceError> {
    let addr = transport.get_addr().to_string();
    let supported_formats = transport.fill_format();
    let mut device = PcmDevice::new_hfp(transport, direction);
    device.configure_hfp(poll, retry_callback)?;

    let node_type = if direction == Direction::Input {
        BtNodeType::BluetoothNbMic
    } else {
        BtNodeType::Bluetooth
    };
    let node = ActiveNode::new(
        node_type,
        BtNodeFlags::FLOSS | BtNodeFlags::HFP,
        now,
        &addr,
        supported_formats,
    );
    device.attach_node(node);

    Ok(device)
}

/// Removes the device from the registry by simply dropping it after
/// closing; the caller (registry) is responsible for forgetting its own
/// handle to `device`.
pub fn destroy(mut device: PcmDevice, poll: &mut dyn PollFacility) -> Result<(), DeviceError> {
    device.close(poll)
}
