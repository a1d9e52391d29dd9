//! Device identity and direction types shared between `btpcm-core` and
//! `btpcm-device`.

use std::fmt;

/// Which way audio flows through a device.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Output,
    Input,
}

/// The node type reported to the surrounding server, mirroring the original
/// `CRAS_NODE_TYPE_BLUETOOTH` / `CRAS_NODE_TYPE_BLUETOOTH_NB_MIC` split.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BtNodeType {
    Bluetooth,
    BluetoothNbMic,
}

bitflags::bitflags! {
    /// Flags attached to a device's active node.
    pub struct BtNodeFlags: u32 {
        const FLOSS = 0x01;
        const A2DP  = 0x02;
        const HFP   = 0x04;
    }
}

/// A 32-bit non-cryptographic hash of the peer's address string, stable
/// across reconnections. The original hashes with SuperFastHash; this uses
/// FNV-1a, which has the same properties the design actually needs (stable,
/// cheap, collision-resistant enough for a UI identity, not a security
/// boundary).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct StableId(pub u32);

impl StableId {
    pub fn from_address(addr: &str) -> Self {
        const FNV_OFFSET_BASIS: u32 = 0x811c_9dc5;
        const FNV_PRIME: u32 = 0x0100_0193;

        let mut hash = FNV_OFFSET_BASIS;
        for byte in addr.as_bytes() {
            hash ^= u32::from(*byte);
            hash = hash.wrapping_mul(FNV_PRIME);
        }

        StableId(hash)
    }
}

impl fmt::Display for StableId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:08x}", self.0)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn same_address_same_id() {
        let a = StableId::from_address("AA:BB:CC:DD:EE:FF");
        let b = StableId::from_address("AA:BB:CC:DD:EE:FF");
        assert_eq!(a, b);
    }

    #[test]
    fn different_address_different_id() {
        let a = StableId::from_address("AA:BB:CC:DD:EE:FF");
        let b = StableId::from_address("11:22:33:44:55:66");
        assert_ne!(a, b);
    }
}
