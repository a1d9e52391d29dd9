//! The node descriptor a device attaches to when it joins the registry:
//! the bits the rest of the audio server actually cares about (volume,
//! type, plugged time, stable identity), as opposed to the PCM-pacing
//! internals in [`crate::device`].

use btpcm_protocol::{BtNodeFlags, BtNodeType, StableId, Timestamp};

use crate::transport::FormatTable;

#[derive(Debug, Clone)]
pub struct ActiveNode {
    pub volume: u8,
    pub node_type: BtNodeType,
    pub flags: BtNodeFlags,
    pub plugged_time: Timestamp,
    pub stable_id: StableId,
    pub supported_formats: FormatTable,
}

impl ActiveNode {
    pub fn new(
        node_type: BtNodeType,
        flags: BtNodeFlags,
        plugged_time: Timestamp,
        addr: &str,
        supported_formats: FormatTable,
    ) -> Self {
        ActiveNode {
            volume: 100,
            node_type,
            flags,
            plugged_time,
            stable_id: StableId::from_address(addr),
            supported_formats,
        }
    }
}
