//! The poll facility contract: readiness registration for a device's
//! socket descriptor, expressed without the opaque `void *` context the
//! original passed callbacks — a callback here is a plain closure that
//! captures whatever state it needs to touch directly.

use std::os::unix::io::RawFd;

bitflags::bitflags! {
    /// Which readiness conditions a registered callback wants to hear about.
    pub struct Interest: u32 {
        const READABLE = 0x1;
        const WRITABLE = 0x2;
    }
}

bitflags::bitflags! {
    /// The readiness conditions a poll wakeup actually reported.
    pub struct RevEvents: u32 {
        const READABLE = 0x1;
        const WRITABLE = 0x2;
        const ERROR    = 0x4;
        const HANGUP   = 0x8;
    }
}

/// Whether a callback should fire only when its `Interest` is satisfied, or
/// unconditionally on the poll loop's next wake.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Trigger {
    None,
    Wakeup,
}

pub trait PollFacility {
    fn add_callback(&mut self, fd: RawFd, interest: Interest, callback: Box<dyn FnMut(RevEvents)>);
    fn config_callback(&mut self, fd: RawFd, trigger: Trigger);
    fn rm_callback(&mut self, fd: RawFd);
}
