//! Non-blocking socket I/O over a raw descriptor, plus a local `socketpair`
//! helper the harness binary uses as a stand-in for a real Bluetooth L2CAP
//! or SCO socket. Mirrors the original's `send(fd, ..., MSG_DONTWAIT)` /
//! `recv(fd, ..., MSG_DONTWAIT)` pattern rather than setting `O_NONBLOCK` on
//! the descriptor, since the real Bluetooth daemon owns that fd and we only
//! ever touch it through these two calls.

use std::io;
use std::os::unix::io::RawFd;

use nix::sys::socket::{socketpair, AddressFamily, SockFlag, SockType};
use nix::unistd::close;

use btpcm_core::{PcmDuplex, PcmWriter};

use crate::error::NetError;

/// A connected, non-blocking byte-stream socket identified by its raw fd.
/// Closes the descriptor on drop.
pub struct RawFdSocket {
    fd: RawFd,
}

impl RawFdSocket {
    /// Takes ownership of an already-connected descriptor. Callers are
    /// responsible for ensuring nothing else closes it independently.
    pub fn from_raw_fd(fd: RawFd) -> Self {
        RawFdSocket { fd }
    }

    pub fn as_raw_fd(&self) -> RawFd {
        self.fd
    }
}

impl Drop for RawFdSocket {
    fn drop(&mut self) {
        let _ = close(self.fd);
    }
}

impl PcmWriter for RawFdSocket {
    fn send(&mut self, buf: &[u8]) -> io::Result<usize> {
        send_dontwait(self.fd, buf)
    }
}

impl PcmDuplex for RawFdSocket {
    fn recv(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        recv_dontwait(self.fd, buf)
    }

    fn send(&mut self, buf: &[u8]) -> io::Result<usize> {
        send_dontwait(self.fd, buf)
    }
}

fn send_dontwait(fd: RawFd, buf: &[u8]) -> io::Result<usize> {
    let n = unsafe {
        libc::send(fd, buf.as_ptr().cast(), buf.len(), libc::MSG_DONTWAIT)
    };
    if n < 0 {
        Err(io::Error::last_os_error())
    } else {
        Ok(n as usize)
    }
}

fn recv_dontwait(fd: RawFd, buf: &mut [u8]) -> io::Result<usize> {
    let n = unsafe {
        libc::recv(fd, buf.as_mut_ptr().cast(), buf.len(), libc::MSG_DONTWAIT)
    };
    if n < 0 {
        Err(io::Error::last_os_error())
    } else {
        Ok(n as usize)
    }
}

/// A local `AF_UNIX` `SOCK_SEQPACKET` pair, used by the harness in place of
/// an actual Bluetooth socket: one end plays the role of the BT stack's fd
/// handed to the device, the other is driven by the harness's mock peer.
pub fn local_pair() -> Result<(RawFdSocket, RawFdSocket), NetError> {
    let (a, b) = socketpair(
        AddressFamily::Unix,
        SockType::SeqPacket,
        None,
        SockFlag::empty(),
    )
    .map_err(|_| NetError::SocketPair(io::Error::last_os_error()))?;

    Ok((RawFdSocket::from_raw_fd(a), RawFdSocket::from_raw_fd(b)))
}
