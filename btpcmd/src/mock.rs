//! In-process stand-ins for the real Bluetooth daemon: transports that hand
//! out one end of a local socketpair, and a peer thread that plays the role
//! of the remote device on the other end. Grounded on the pattern of
//! `bark/src/socket.rs` providing a concrete transport the rest of the
//! binary treats as opaque.

use std::cell::Cell;
use std::os::unix::io::RawFd;
use std::thread;
use std::time::Duration;

use nix::unistd::close;

use btpcm_device::{DeviceError, FormatTable};
use btpcm_protocol::{Direction, PcmFormat};

use crate::config::PeerBehaviorOpt;

pub struct MockA2dpTransport {
    addr: String,
    fd: RawFd,
    started: Cell<bool>,
    volume: Cell<u8>,
}

impl MockA2dpTransport {
    pub fn new(addr: &str, fd: RawFd) -> Self {
        MockA2dpTransport { addr: addr.to_string(), fd, started: Cell::new(false), volume: Cell::new(100) }
    }
}

impl btpcm_device::A2dpTransport for MockA2dpTransport {
    fn get_fd(&self) -> RawFd {
        self.fd
    }

    fn get_addr(&self) -> &str {
        &self.addr
    }

    fn get_display_name(&self) -> &str {
        "mock-a2dp-peer"
    }

    fn fill_format(&self, rate: u32, bits: u32, channel_mode: u32) -> FormatTable {
        FormatTable { rates: vec![rate], formats: vec![bits], channel_counts: vec![channel_mode as u16] }
    }

    fn start(&self, format: &PcmFormat) -> Result<(), DeviceError> {
        self.started.set(true);
        log::info!("mock a2dp transport: start {}Hz x{}ch", format.rate, format.channels);
        Ok(())
    }

    fn stop(&self) -> Result<(), DeviceError> {
        self.started.set(false);
        log::info!("mock a2dp transport: stop");
        Ok(())
    }

    fn set_volume(&self, volume: u8) {
        self.volume.set(volume);
        log::debug!("mock a2dp transport: volume {volume}");
    }

    fn delay_sync(&self, initial_ms: u64, period_ms: u64) {
        log::debug!("mock a2dp transport: delay_sync(initial={initial_ms}ms, period={period_ms}ms)");
    }
}

pub struct MockHfpTransport {
    addr: String,
    fd: RawFd,
}

impl MockHfpTransport {
    pub fn new(addr: &str, fd: RawFd) -> Self {
        MockHfpTransport { addr: addr.to_string(), fd }
    }
}

impl btpcm_device::HfpTransport for MockHfpTransport {
    fn get_fd(&self) -> RawFd {
        self.fd
    }

    fn get_addr(&self) -> &str {
        &self.addr
    }

    fn get_display_name(&self) -> &str {
        "mock-hfp-peer"
    }

    fn fill_format(&self) -> FormatTable {
        FormatTable { rates: vec![8_000], formats: vec![16], channel_counts: vec![1] }
    }

    fn start(&self, direction: Direction) -> Result<(), DeviceError> {
        log::info!("mock hfp transport: start {direction:?}");
        Ok(())
    }

    fn stop(&self, direction: Direction) {
        log::info!("mock hfp transport: stop {direction:?}");
    }
}

/// Spawns a thread that plays the part of the remote device on `peer_fd`,
/// the other half of the socketpair handed to the mock transport. Runs
/// until the socket closes or `run_for` elapses.
pub fn spawn_mock_peer(peer_fd: RawFd, behavior: PeerBehaviorOpt, run_for: Duration) -> thread::JoinHandle<()> {
    thread::spawn(move || {
        let deadline = std::time::Instant::now() + run_for;
        let mut received: u32 = 0;
        let mut buf = [0u8; 4096];

        loop {
            if std::time::Instant::now() >= deadline {
                break;
            }

            if let PeerBehaviorOpt::DisconnectAfter(n) = behavior {
                if received >= n {
                    log::info!("mock peer: disconnecting after {received} packets");
                    break;
                }
            }

            if let PeerBehaviorOpt::StallEvery(every) = behavior {
                if every > 0 && received > 0 && received % every == 0 {
                    log::debug!("mock peer: stalling before packet #{}", received + 1);
                    thread::sleep(Duration::from_millis(50));
                }
            }

            match blocking_recv(peer_fd, &mut buf, Duration::from_millis(50)) {
                Some(0) => break,
                Some(n) => {
                    received += 1;
                    log::debug!("mock peer: drained {n} bytes (packet #{received})");
                }
                None => {} // timed out waiting for data; loop back and recheck the deadline
            }
        }

        let _ = close(peer_fd);
    })
}

/// Blocking `recv` bounded by a poll timeout, so the peer thread can still
/// notice the overall run deadline even while nothing is arriving.
fn blocking_recv(fd: RawFd, buf: &mut [u8], timeout: Duration) -> Option<usize> {
    use std::os::fd::BorrowedFd;

    let borrowed = unsafe { BorrowedFd::borrow_raw(fd) };
    let mut pollfd = [nix::poll::PollFd::new(borrowed, nix::poll::PollFlags::POLLIN)];
    let millis = u16::try_from(timeout.as_millis()).unwrap_or(u16::MAX);
    let ready = nix::poll::poll(&mut pollfd, nix::poll::PollTimeout::from(millis)).ok()?;
    if ready == 0 {
        return None;
    }

    let n = unsafe { libc::recv(fd, buf.as_mut_ptr().cast(), buf.len(), 0) };
    if n < 0 {
        None
    } else {
        Some(n as usize)
    }
}
