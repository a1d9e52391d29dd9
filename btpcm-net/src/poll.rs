//! A concrete [`PollFacility`] backed by `nix::poll`, grounded on
//! `bark/src/socket.rs`'s `nix::poll::poll` usage. Unlike that single-shot
//! blocking-receive helper, this one holds a registry of descriptors so a
//! harness can drive an arbitrary number of devices from one event loop.

use std::cell::RefCell;
use std::os::fd::BorrowedFd;
use std::os::unix::io::RawFd;
use std::rc::Rc;

use nix::poll::{PollFd, PollFlags, PollTimeout};

use btpcm_device::{Interest, PollFacility, RevEvents, Trigger};

use crate::error::NetError;

struct Entry {
    fd: RawFd,
    interest: Interest,
    trigger: Trigger,
    callback: Option<Box<dyn FnMut(RevEvents)>>,
}

/// Single-threaded registry of poll callbacks.
///
/// A registered callback commonly needs to call back into `config_callback`
/// on this very facility (to arm or disarm its own wakeup) — see
/// `PcmDevice::retry_flush`. Dispatching through a plain `&mut self` method
/// would hold that borrow for the whole dispatch and panic the moment a
/// callback reborrows a shared `Rc<RefCell<NixPollFacility>>`. [`drive_once`]
/// sidesteps this by lending each callback out of the registry before
/// calling it, so the registry is unborrowed for the callback's duration.
#[derive(Default)]
pub struct NixPollFacility {
    entries: Vec<Entry>,
}

impl NixPollFacility {
    pub fn new() -> Self {
        NixPollFacility { entries: Vec::new() }
    }

    fn poll_flags(&self) -> Vec<(RawFd, PollFlags, Trigger)> {
        self.entries.iter().map(|e| (e.fd, requested_flags(e), e.trigger)).collect()
    }

    fn take_callback(&mut self, fd: RawFd) -> Option<Box<dyn FnMut(RevEvents)>> {
        self.entries.iter_mut().find(|e| e.fd == fd).and_then(|e| e.callback.take())
    }

    fn restore_callback(&mut self, fd: RawFd, callback: Box<dyn FnMut(RevEvents)>) {
        if let Some(entry) = self.entries.iter_mut().find(|e| e.fd == fd) {
            entry.callback = Some(callback);
        }
    }
}

/// Run one pass of the poll loop: block up to `timeout` for readiness, then
/// dispatch to each ready descriptor's callback. Takes shared ownership so a
/// callback invoked here can itself call back into `poll.config_callback`.
pub fn drive_once(poll: &Rc<RefCell<NixPollFacility>>, timeout: PollTimeout) -> Result<(), NetError> {
    let snapshot = {
        let this = poll.borrow();
        if this.entries.is_empty() {
            return Ok(());
        }
        this.poll_flags()
    };

    let borrowed: Vec<BorrowedFd> = snapshot.iter().map(|&(fd, _, _)| unsafe { BorrowedFd::borrow_raw(fd) }).collect();
    let mut pollfds: Vec<PollFd> =
        borrowed.iter().zip(&snapshot).map(|(fd, (_, flags, _))| PollFd::new(*fd, *flags)).collect();

    nix::poll::poll(&mut pollfds, timeout)?;

    for ((fd, _, trigger), pollfd) in snapshot.iter().zip(pollfds.iter()) {
        let revents = pollfd.revents().unwrap_or_else(PollFlags::empty);

        // Trigger::Wakeup must fire every pass regardless of what poll(2)
        // reported: it exists for exactly the case where the fd is not
        // ready (still write-blocked) but the caller still needs a chance
        // to re-check its own state, e.g. a suspend deadline that elapsed
        // while the socket stayed backed up.
        let forced = *trigger == Trigger::Wakeup;
        if revents.is_empty() && !forced {
            continue;
        }

        let callback = poll.borrow_mut().take_callback(*fd);
        if let Some(mut callback) = callback {
            callback(to_rev_events(revents));
            poll.borrow_mut().restore_callback(*fd, callback);
        }
    }

    Ok(())
}

fn requested_flags(entry: &Entry) -> PollFlags {
    let mut flags = PollFlags::empty();
    if entry.interest.contains(Interest::READABLE) {
        flags |= PollFlags::POLLIN;
    }
    // TRIGGER_WAKEUP forces us to wake on writability even if the caller's
    // steady-state interest doesn't include it, mirroring
    // audio_thread_config_events_callback(fd, TRIGGER_WAKEUP) in the original.
    if entry.interest.contains(Interest::WRITABLE) || entry.trigger == Trigger::Wakeup {
        flags |= PollFlags::POLLOUT;
    }
    flags
}

fn to_rev_events(revents: PollFlags) -> RevEvents {
    let mut out = RevEvents::empty();
    if revents.contains(PollFlags::POLLIN) {
        out |= RevEvents::READABLE;
    }
    if revents.contains(PollFlags::POLLOUT) {
        out |= RevEvents::WRITABLE;
    }
    if revents.contains(PollFlags::POLLERR) {
        out |= RevEvents::ERROR;
    }
    if revents.contains(PollFlags::POLLHUP) {
        out |= RevEvents::HANGUP;
    }
    out
}

impl PollFacility for NixPollFacility {
    fn add_callback(&mut self, fd: RawFd, interest: Interest, callback: Box<dyn FnMut(RevEvents)>) {
        self.entries.retain(|e| e.fd != fd);
        self.entries.push(Entry { fd, interest, trigger: Trigger::None, callback: Some(callback) });
    }

    fn config_callback(&mut self, fd: RawFd, trigger: Trigger) {
        if let Some(entry) = self.entries.iter_mut().find(|e| e.fd == fd) {
            entry.trigger = trigger;
        }
    }

    fn rm_callback(&mut self, fd: RawFd) {
        self.entries.retain(|e| e.fd != fd);
    }
}
