//! HFP duplex read/write: the SCO socket carries a fixed-size packet in
//! each direction on every wakeup, and the paired input/output devices
//! stay in lockstep via byte offset counters rather than a shared clock.

use std::io;

use btpcm_protocol::consts;

use crate::error::CoreError;
use crate::ring::ByteRing;

bitflags::bitflags! {
    /// Readiness flags for the HFP socket, translated from whatever the
    /// concrete poll facility reports.
    pub struct PollEvents: u32 {
        const READABLE = 0x1;
        const ERROR    = 0x2;
        const HANGUP   = 0x4;
    }
}

pub trait PcmDuplex {
    fn recv(&mut self, buf: &mut [u8]) -> io::Result<usize>;
    fn send(&mut self, buf: &[u8]) -> io::Result<usize>;
}

/// One side (input or output) of a paired HFP device, borrowed for the
/// duration of a single callback invocation.
pub struct HfpEndpoint<'a> {
    pub ring: &'a mut ByteRing,
    pub started: bool,
    pub rw_offset: &'a mut u64,
}

/// Run one duplex exchange. Reads all available input first (so a POLLHUP
/// that arrives alongside a final burst of data doesn't discard it), then
/// tops up and drains the output side, then re-synchronizes the two
/// offset counters if they've caught up with each other.
pub fn hfp_callback(
    input: &mut HfpEndpoint,
    output: &mut HfpEndpoint,
    revents: PollEvents,
    socket: &mut dyn PcmDuplex,
) -> Result<(), CoreError> {
    if revents.contains(PollEvents::READABLE) {
        hfp_read(input, socket)?;
    }

    if revents.intersects(PollEvents::ERROR | PollEvents::HANGUP) {
        return Err(CoreError::PollError);
    }

    let target_len = if *input.rw_offset > *output.rw_offset {
        (*input.rw_offset - *output.rw_offset) as usize
    } else {
        consts::HFP_PACKET_SIZE
    };

    let write_result = hfp_write(output, target_len, socket);

    if *input.rw_offset == *output.rw_offset {
        *input.rw_offset = 0;
        *output.rw_offset = 0;
    }

    write_result
}

fn hfp_read(input: &mut HfpEndpoint, socket: &mut dyn PcmDuplex) -> Result<(), CoreError> {
    loop {
        let slice = input.ring.writable_slice();
        if slice.is_empty() {
            return Ok(());
        }
        let requested = slice.len();

        match socket.recv(slice) {
            Ok(0) => return Ok(()),
            Ok(n) => {
                input.ring.commit_write(n);
                if !input.started {
                    // Nobody is consuming this device's ring; discard what
                    // we just buffered so it doesn't pile up as stale audio.
                    input.ring.commit_read(n);
                }
                *input.rw_offset += n as u64;
                if n < requested {
                    return Ok(());
                }
            }
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => return Ok(()),
            Err(e) => return Err(CoreError::Io(e)),
        }
    }
}

fn hfp_write(output: &mut HfpEndpoint, target_len: usize, socket: &mut dyn PcmDuplex) -> Result<(), CoreError> {
    if !output.started {
        output.ring.zero_fill(target_len);
    }

    let mut remaining = target_len.min(output.ring.queued());

    while remaining > 0 {
        let readable = output.ring.readable_slice();
        if readable.is_empty() {
            break;
        }
        let to_send = remaining.min(readable.len());

        match socket.send(&readable[..to_send]) {
            Ok(n) => {
                output.ring.commit_read(n);
                *output.rw_offset += n as u64;
                remaining -= n;
                if n < to_send {
                    break;
                }
            }
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => break,
            Err(e) => return Err(CoreError::Io(e)),
        }
    }

    Ok(())
}

#[cfg(test)]
mod test {
    use super::*;

    #[derive(Default)]
    struct FakeSocket {
        inbound: Vec<u8>,
        outbound: Vec<u8>,
    }

    impl PcmDuplex for FakeSocket {
        fn recv(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            let n = buf.len().min(self.inbound.len());
            buf[..n].copy_from_slice(&self.inbound[..n]);
            self.inbound.drain(..n);
            if n == 0 {
                Err(io::Error::from(io::ErrorKind::WouldBlock))
            } else {
                Ok(n)
            }
        }

        fn send(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.outbound.extend_from_slice(buf);
            Ok(buf.len())
        }
    }

    #[test]
    fn read_then_write_packet_size_when_offsets_equal() {
        let mut in_ring = ByteRing::new(4096);
        let mut out_ring = ByteRing::new(4096);
        out_ring.commit_write(consts::HFP_PACKET_SIZE);

        let mut in_offset = 0u64;
        let mut out_offset = 0u64;

        let mut input = HfpEndpoint { ring: &mut in_ring, started: true, rw_offset: &mut in_offset };
        let mut output = HfpEndpoint { ring: &mut out_ring, started: true, rw_offset: &mut out_offset };

        let mut socket = FakeSocket { inbound: vec![0u8; 160], outbound: Vec::new() };
        hfp_callback(&mut input, &mut output, PollEvents::READABLE, &mut socket).unwrap();

        assert_eq!(socket.outbound.len(), consts::HFP_PACKET_SIZE);
        // read and write advanced by the same amount, so offsets reset to 0
        assert_eq!(in_offset, 0);
        assert_eq!(out_offset, 0);
    }

    #[test]
    fn not_started_output_sends_silence() {
        let mut in_ring = ByteRing::new(4096);
        let mut out_ring = ByteRing::new(4096);
        let mut in_offset = 0u64;
        let mut out_offset = 0u64;

        let mut input = HfpEndpoint { ring: &mut in_ring, started: false, rw_offset: &mut in_offset };
        let mut output = HfpEndpoint { ring: &mut out_ring, started: false, rw_offset: &mut out_offset };

        let mut socket = FakeSocket::default();
        hfp_callback(&mut input, &mut output, PollEvents::empty(), &mut socket).unwrap();

        assert_eq!(socket.outbound.len(), consts::HFP_PACKET_SIZE);
        assert!(socket.outbound.iter().all(|&b| b == 0));
    }

    #[test]
    fn error_flag_after_read_propagates() {
        let mut in_ring = ByteRing::new(4096);
        let mut out_ring = ByteRing::new(4096);
        let mut in_offset = 0u64;
        let mut out_offset = 0u64;

        let mut input = HfpEndpoint { ring: &mut in_ring, started: true, rw_offset: &mut in_offset };
        let mut output = HfpEndpoint { ring: &mut out_ring, started: true, rw_offset: &mut out_offset };

        let mut socket = FakeSocket { inbound: vec![0u8; 32], outbound: Vec::new() };
        let result = hfp_callback(&mut input, &mut output, PollEvents::READABLE | PollEvents::HANGUP, &mut socket);

        assert!(result.is_err());
        // the read still happened before the hangup was handled
        assert_eq!(in_offset, 32);
        // but the write step never ran
        assert!(socket.outbound.is_empty());
    }
}
