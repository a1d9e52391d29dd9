//! `PcmDevice`: the device object the rest of the audio server talks to.
//! Wires the transport-agnostic pacing logic in `btpcm-core` to a concrete
//! transport handle and poll facility.

use std::os::unix::io::RawFd;
use std::time::Duration;

use btpcm_core::{
    hfp_callback, A2dpSender, ByteRing, FlushTrigger, HfpEndpoint, PcmDuplex,
    PcmWriter, PollEvents as CorePollEvents, SuspendScheduler,
};
use btpcm_core::estimate_bt_stack_delay_frames;
use btpcm_protocol::{consts, duration_to_frames, Clock, Direction, PcmFormat, Timestamp};

use crate::error::DeviceError;
use crate::node::ActiveNode;
use crate::poll::{Interest, PollFacility, RevEvents, Trigger};
use crate::transport::{A2dpTransport, HfpTransport};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceState {
    Unconfigured,
    NormalRun,
    NoStreamRun,
    Closed,
}

/// A slice into a device's ring, capped by the caller's requested frame
/// count and by how much is contiguously available.
pub enum PcmArea<'a> {
    Writable(&'a mut [u8]),
    Readable(&'a [u8]),
}

impl<'a> PcmArea<'a> {
    pub fn len(&self) -> usize {
        match self {
            PcmArea::Writable(s) => s.len(),
            PcmArea::Readable(s) => s.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

pub struct A2dpState {
    pub transport: std::rc::Rc<dyn A2dpTransport>,
    sender: Option<A2dpSender>,
    socket: Option<Box<dyn PcmWriter>>,
    fd: Option<RawFd>,
    suspend_deadline: Option<Timestamp>,
}

pub struct HfpState {
    pub transport: std::rc::Rc<dyn HfpTransport>,
    started: bool,
    rw_offset: u64,
}

pub enum DeviceKind {
    A2dp(A2dpState),
    HfpOutput(HfpState),
    HfpInput(HfpState),
}

pub struct PcmDevice {
    direction: Direction,
    format: Option<PcmFormat>,
    ring: Option<ByteRing>,
    buffer_size_frames: u64,
    write_block_frames: u64,
    state: DeviceState,
    bt_stack_delay_frames: u64,
    active_node: Option<ActiveNode>,
    kind: DeviceKind,
}

struct PollTrigger<'a> {
    poll: &'a mut dyn PollFacility,
    fd: RawFd,
}

impl<'a> FlushTrigger for PollTrigger<'a> {
    fn arm_wakeup(&mut self) {
        self.poll.config_callback(self.fd, Trigger::Wakeup);
    }

    fn disarm(&mut self) {
        self.poll.config_callback(self.fd, Trigger::None);
    }
}

struct DeadlineSuspend<'a> {
    deadline: &'a mut Option<Timestamp>,
    now: Timestamp,
}

impl<'a> SuspendScheduler for DeadlineSuspend<'a> {
    fn schedule(&mut self, after: Duration) {
        *self.deadline = Some(self.now.add(after));
    }

    fn cancel(&mut self) {
        *self.deadline = None;
    }
}

fn unconfigured() -> DeviceError {
    DeviceError::InvalidArgument("device is not configured".to_string())
}

impl PcmDevice {
    pub fn new_a2dp(transport: std::rc::Rc<dyn A2dpTransport>) -> Self {
        PcmDevice {
            direction: Direction::Output,
            format: None,
            ring: None,
            buffer_size_frames: 0,
            write_block_frames: 0,
            state: DeviceState::Unconfigured,
            bt_stack_delay_frames: 0,
            active_node: None,
            kind: DeviceKind::A2dp(A2dpState {
                transport,
                sender: None,
                socket: None,
                fd: None,
                suspend_deadline: None,
            }),
        }
    }

    pub fn new_hfp(transport: std::rc::Rc<dyn HfpTransport>, direction: Direction) -> Self {
        let state = HfpState { transport, started: false, rw_offset: 0 };
        let kind = match direction {
            Direction::Output => DeviceKind::HfpOutput(state),
            Direction::Input => DeviceKind::HfpInput(state),
        };

        PcmDevice {
            direction,
            format: None,
            ring: None,
            buffer_size_frames: 0,
            write_block_frames: 0,
            state: DeviceState::Unconfigured,
            bt_stack_delay_frames: 0,
            active_node: None,
            kind,
        }
    }

    pub fn direction(&self) -> Direction {
        self.direction
    }

    pub fn state(&self) -> DeviceState {
        self.state
    }

    pub fn format(&self) -> Option<PcmFormat> {
        self.format
    }

    pub fn active_node(&self) -> Option<&ActiveNode> {
        self.active_node.as_ref()
    }

    pub fn attach_node(&mut self, node: ActiveNode) {
        self.active_node = Some(node);
    }

    pub fn buffer_size_frames(&self) -> u64 {
        self.buffer_size_frames
    }

    pub fn write_block_frames(&self) -> u64 {
        self.write_block_frames
    }

    /// `configure` for an A2DP device: derives `write_block_frames`/
    /// `buffer_size_frames` from the rate, allocates the ring, and starts
    /// the transport. `retry_callback` is what the poll facility invokes
    /// when the writability callback fires (normally a closure that calls
    /// back into [`PcmDevice::retry_flush`] through whatever shared handle
    /// the caller holds this device by).
    pub fn configure_a2dp(
        &mut self,
        rate: u32,
        channels: u16,
        socket: Box<dyn PcmWriter>,
        poll: &mut dyn PollFacility,
        retry_callback: Box<dyn FnMut(RevEvents)>,
    ) -> Result<(), DeviceError> {
        let format = PcmFormat::new(rate, channels);
        let write_block_frames = u64::from(rate) * consts::PCM_BLOCK_MS / 1000;
        if write_block_frames == 0 {
            return Err(DeviceError::InvalidArgument("sample rate too low to derive a write block".to_string()));
        }
        let buffer_size_frames = (consts::PCM_BUF_MAX_FRAMES / write_block_frames) * write_block_frames;
        let capacity_bytes = (buffer_size_frames * u64::from(format.frame_bytes())) as usize;

        let state = match &mut self.kind {
            DeviceKind::A2dp(s) => s,
            _ => return Err(DeviceError::InvalidArgument("configure_a2dp called on a non-A2DP device".to_string())),
        };

        state.transport.start(&format)?;
        let fd = state.transport.get_fd();

        state.fd = Some(fd);
        state.socket = Some(socket);
        state.sender = Some(A2dpSender::new(format, write_block_frames));
        state.suspend_deadline = None;

        poll.add_callback(fd, Interest::WRITABLE, retry_callback);
        poll.config_callback(fd, Trigger::None);

        let ring = ByteRing::try_new(capacity_bytes).map_err(|_| DeviceError::OutOfMemory)?;

        self.format = Some(format);
        self.write_block_frames = write_block_frames;
        self.buffer_size_frames = buffer_size_frames;
        self.ring = Some(ring);
        self.state = DeviceState::NormalRun;

        Ok(())
    }

    /// `configure` for one side of an HFP pair. Format is fixed at 8kHz
    /// mono s16le narrowband; ring capacity is [`consts::HFP_RING_CAPACITY`].
    pub fn configure_hfp(
        &mut self,
        poll: &mut dyn PollFacility,
        retry_callback: Box<dyn FnMut(RevEvents)>,
    ) -> Result<(), DeviceError> {
        let direction = self.direction;
        let state = match &mut self.kind {
            DeviceKind::HfpOutput(s) | DeviceKind::HfpInput(s) => s,
            DeviceKind::A2dp(_) => return Err(DeviceError::InvalidArgument("configure_hfp called on an A2DP device".to_string())),
        };

        state.transport.start(direction)?;
        let fd = state.transport.get_fd();
        poll.add_callback(fd, Interest::READABLE | Interest::WRITABLE, retry_callback);

        let ring = ByteRing::try_new(consts::HFP_RING_CAPACITY).map_err(|_| DeviceError::OutOfMemory)?;

        let format = PcmFormat::new(8_000, 1);
        self.format = Some(format);
        self.ring = Some(ring);
        self.buffer_size_frames = consts::HFP_RING_CAPACITY as u64 / u64::from(format.frame_bytes());
        self.write_block_frames = 0;
        self.state = DeviceState::NormalRun;

        Ok(())
    }

    /// A2DP only: seed the flush schedule and request the transport's
    /// periodic remote-delay sync.
    pub fn start(&mut self, now: Timestamp) -> Result<(), DeviceError> {
        match &mut self.kind {
            DeviceKind::A2dp(state) => {
                let sender = state.sender.as_mut().ok_or_else(unconfigured)?;
                sender.start(now);
                state.transport.delay_sync(consts::INIT_DELAY_SYNC_MSEC, consts::DELAY_SYNC_PERIOD_MSEC);
                Ok(())
            }
            DeviceKind::HfpOutput(_) | DeviceKind::HfpInput(_) => Ok(()),
        }
    }

    pub fn close(&mut self, poll: &mut dyn PollFacility) -> Result<(), DeviceError> {
        match &mut self.kind {
            DeviceKind::A2dp(state) => {
                if let Some(fd) = state.fd.take() {
                    poll.rm_callback(fd);
                }
                state.suspend_deadline = None;
                state.socket = None;
                state.sender = None;
                state.transport.stop()?;
            }
            DeviceKind::HfpOutput(state) | DeviceKind::HfpInput(state) => {
                let fd = state.transport.get_fd();
                poll.rm_callback(fd);
                state.started = false;
                state.transport.stop(self.direction);
            }
        }

        self.ring = None;
        self.state = DeviceState::Closed;
        Ok(())
    }

    pub fn get_buffer(&mut self, frames_requested: u64) -> Result<PcmArea<'_>, DeviceError> {
        let format = self.format.ok_or_else(unconfigured)?;
        let requested_bytes = (frames_requested as usize).saturating_mul(format.frame_bytes() as usize);
        let direction = self.direction;
        let ring = self.ring.as_mut().ok_or_else(unconfigured)?;

        Ok(match direction {
            Direction::Output => {
                let slice = ring.writable_slice();
                let len = slice.len().min(requested_bytes);
                PcmArea::Writable(&mut slice[..len])
            }
            Direction::Input => {
                let slice = ring.readable_slice();
                let len = slice.len().min(requested_bytes);
                PcmArea::Readable(&slice[..len])
            }
        })
    }

    pub fn put_buffer(&mut self, frames: u64, now: Timestamp, poll: &mut dyn PollFacility) -> Result<(), DeviceError> {
        let format = self.format.ok_or_else(unconfigured)?;
        let byte_len = (frames * u64::from(format.frame_bytes())) as usize;
        let direction = self.direction;

        {
            let ring = self.ring.as_mut().ok_or_else(unconfigured)?;
            match direction {
                Direction::Output => {
                    if byte_len > ring.writable() {
                        return Err(DeviceError::InvalidArgument("put_buffer exceeds writable slice".to_string()));
                    }
                    ring.commit_write(byte_len);
                }
                Direction::Input => {
                    if byte_len > ring.queued() {
                        return Err(DeviceError::InvalidArgument("put_buffer exceeds queued slice".to_string()));
                    }
                    ring.commit_read(byte_len);
                    return Ok(());
                }
            }
        }

        self.retry_flush(now, poll)
    }

    /// Attempt an A2DP flush without committing new frames first. Called
    /// both from `put_buffer` and from the poll facility's writability
    /// retry callback.
    pub fn retry_flush(&mut self, now: Timestamp, poll: &mut dyn PollFacility) -> Result<(), DeviceError> {
        let running = matches!(self.state, DeviceState::NormalRun | DeviceState::NoStreamRun);

        let ring = match self.ring.as_mut() {
            Some(r) => r,
            None => return Ok(()),
        };

        match &mut self.kind {
            DeviceKind::A2dp(state) => {
                let fd = state.fd.ok_or_else(unconfigured)?;
                let sender = state.sender.as_mut().ok_or_else(unconfigured)?;
                let writer = state.socket.as_mut().ok_or_else(unconfigured)?.as_mut();

                let mut trigger = PollTrigger { poll, fd };
                let mut suspend = DeadlineSuspend { deadline: &mut state.suspend_deadline, now };

                sender
                    .flush(ring, running, now, writer, &mut trigger, &mut suspend)
                    .map(|_report| ())
                    .map_err(DeviceError::from)
            }
            DeviceKind::HfpOutput(_) | DeviceKind::HfpInput(_) => Ok(()),
        }
    }

    /// Check whether a scheduled A2DP suspend has come due; the harness
    /// loop calls this once per tick. There's no general timer facility in
    /// the external interface (§6), so the deadline is polled rather than
    /// fired by an independent clock source.
    pub fn poll_suspend_deadline(&mut self, now: Timestamp) -> Result<(), DeviceError> {
        if let DeviceKind::A2dp(state) = &mut self.kind {
            if let Some(deadline) = state.suspend_deadline {
                if now.after(&deadline) || now == deadline {
                    state.suspend_deadline = None;
                    state.transport.stop()?;
                }
            }
        }
        Ok(())
    }

    pub fn flush_buffer(&mut self) -> Result<(), DeviceError> {
        if let (Direction::Input, DeviceKind::HfpInput(_)) = (self.direction, &self.kind) {
            if let Some(ring) = self.ring.as_mut() {
                ring.reset();
            }
        }
        Ok(())
    }

    pub fn frames_queued(&self, clock: &dyn Clock) -> Result<(u64, Timestamp), DeviceError> {
        let format = self.format.ok_or_else(unconfigured)?;
        let ring = self.ring.as_ref().ok_or_else(unconfigured)?;
        let frames = ring.queued() as u64 / u64::from(format.frame_bytes());
        Ok((frames, clock.now()))
    }

    pub fn delay_frames(&self, clock: &dyn Clock) -> Result<u64, DeviceError> {
        let (frames, _) = self.frames_queued(clock)?;
        Ok(frames + self.bt_stack_delay_frames)
    }

    pub fn output_underrun(&self) {
        // No local underrun is reported: the socket peer owns the
        // canonical buffer, not this ring.
    }

    pub fn no_stream(&mut self, enable: bool, now: Timestamp, poll: &mut dyn PollFacility) -> Result<(), DeviceError> {
        let frame_bytes = self.format.map(|f| u64::from(f.frame_bytes())).unwrap_or(0);
        let write_block_frames = self.write_block_frames;

        let is_a2dp = matches!(self.kind, DeviceKind::A2dp(_));
        let is_hfp_output = matches!(self.kind, DeviceKind::HfpOutput(_));

        if is_a2dp {
            let ring = self.ring.as_mut().ok_or_else(unconfigured)?;
            if enable {
                let target = (2 * write_block_frames * frame_bytes) as usize;
                let top_up = target.saturating_sub(ring.queued());
                ring.zero_fill(top_up);
                self.state = DeviceState::NoStreamRun;
                self.retry_flush(now, poll)?;
            } else {
                let target = (write_block_frames * frame_bytes) as usize;
                let top_up = target.saturating_sub(ring.queued());
                ring.zero_fill(top_up);
                self.state = DeviceState::NormalRun;
            }
            return Ok(());
        }

        if is_hfp_output {
            if let DeviceKind::HfpOutput(state) = &mut self.kind {
                state.started = !enable;
            }
            if enable {
                if let Some(ring) = self.ring.as_mut() {
                    ring.zero_fill_all();
                }
            }
        }

        // HFP input: no-op, matching the original's output-only gate.
        Ok(())
    }

    /// HFP output only: true once the device has stopped being driven by
    /// the server, meaning packets keep flowing without its scheduling.
    pub fn is_free_running(&self) -> bool {
        match (&self.direction, &self.kind) {
            (Direction::Output, DeviceKind::HfpOutput(state)) => !state.started,
            _ => false,
        }
    }

    pub fn frames_to_play_in_sleep(&self, now: Timestamp) -> Result<(u64, u64, Timestamp), DeviceError> {
        let format = self.format.ok_or_else(unconfigured)?;
        match &self.kind {
            DeviceKind::A2dp(state) => {
                let sender = state.sender.as_ref().ok_or_else(unconfigured)?;
                let next = sender.next_flush_time();
                let sleep_frames = if next.after(&now) {
                    duration_to_frames(next.duration_since(&now), format.rate)
                } else {
                    self.write_block_frames
                };
                let ring = self.ring.as_ref().ok_or_else(unconfigured)?;
                let hw_level = ring.queued() as u64 / u64::from(format.frame_bytes());
                Ok((sleep_frames, hw_level, now))
            }
            _ => Err(DeviceError::InvalidArgument("frames_to_play_in_sleep is A2DP only".to_string())),
        }
    }

    pub fn set_volume(&mut self, volume: u8) {
        if let DeviceKind::A2dp(state) = &self.kind {
            state.transport.set_volume(volume);
        }
        if let Some(node) = self.active_node.as_mut() {
            node.volume = volume;
        }
    }

    /// A2DP only: react to a fresh remote-delay report from the transport.
    pub fn update_bt_stack_delay(
        &mut self,
        remote_delay: Duration,
        total_bytes_read_by_stack: u64,
        data_position_ts: Timestamp,
    ) -> Result<(), DeviceError> {
        let format = self.format.ok_or_else(unconfigured)?;
        match &self.kind {
            DeviceKind::A2dp(state) => {
                let sender = state.sender.as_ref().ok_or_else(unconfigured)?;
                self.bt_stack_delay_frames = estimate_bt_stack_delay_frames(
                    format.rate,
                    format.frame_bytes(),
                    remote_delay,
                    sender.total_written_bytes(),
                    total_bytes_read_by_stack,
                    sender.last_write_ts(),
                    data_position_ts,
                );
                Ok(())
            }
            _ => Err(DeviceError::InvalidArgument("update_bt_stack_delay is A2DP only".to_string())),
        }
    }

    fn hfp_endpoint(&mut self) -> Option<HfpEndpoint<'_>> {
        match &mut self.kind {
            DeviceKind::HfpOutput(state) | DeviceKind::HfpInput(state) => Some(HfpEndpoint {
                ring: self.ring.as_mut()?,
                started: state.started,
                rw_offset: &mut state.rw_offset,
            }),
            DeviceKind::A2dp(_) => None,
        }
    }
}

/// Drive one HFP duplex exchange across a paired input/output device. The
/// pairing itself (which two devices share a socket) is the caller's
/// concern, per the design note that the callback context is the
/// transport handle the devices are obtained through.
pub fn drive_hfp(
    input: &mut PcmDevice,
    output: &mut PcmDevice,
    revents: RevEvents,
    socket: &mut dyn PcmDuplex,
) -> Result<(), DeviceError> {
    let mut core_events = CorePollEvents::empty();
    if revents.contains(RevEvents::READABLE) {
        core_events |= CorePollEvents::READABLE;
    }
    if revents.contains(RevEvents::ERROR) {
        core_events |= CorePollEvents::ERROR;
    }
    if revents.contains(RevEvents::HANGUP) {
        core_events |= CorePollEvents::HANGUP;
    }

    let mut input_ep = input
        .hfp_endpoint()
        .ok_or_else(|| DeviceError::InvalidArgument("input device is not a configured HFP device".to_string()))?;
    let mut output_ep = output
        .hfp_endpoint()
        .ok_or_else(|| DeviceError::InvalidArgument("output device is not a configured HFP device".to_string()))?;

    hfp_callback(&mut input_ep, &mut output_ep, core_events, socket).map_err(DeviceError::from)
}

#[cfg(test)]
mod test {
    use super::*;
    use std::cell::RefCell;
    use std::io;
    use std::rc::Rc;

    use crate::transport::FormatTable;

    #[derive(Default)]
    struct FakeA2dpTransport {
        started: RefCell<bool>,
        stopped: RefCell<bool>,
    }

    impl A2dpTransport for FakeA2dpTransport {
        fn get_fd(&self) -> RawFd {
            3
        }
        fn get_addr(&self) -> &str {
            "AA:BB:CC:DD:EE:FF"
        }
        fn get_display_name(&self) -> &str {
            "fake headset"
        }
        fn fill_format(&self, _rate: u32, _bits: u32, _channel_mode: u32) -> FormatTable {
            FormatTable::default()
        }
        fn start(&self, _format: &PcmFormat) -> Result<(), DeviceError> {
            *self.started.borrow_mut() = true;
            Ok(())
        }
        fn stop(&self) -> Result<(), DeviceError> {
            *self.stopped.borrow_mut() = true;
            Ok(())
        }
        fn set_volume(&self, _volume: u8) {}
        fn delay_sync(&self, _initial_ms: u64, _period_ms: u64) {}
    }

    struct FakeNonBlockingWriter {
        writes: Vec<usize>,
    }

    impl PcmWriter for FakeNonBlockingWriter {
        fn send(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.writes.push(buf.len());
            Ok(buf.len())
        }
    }

    #[derive(Default)]
    struct FakePoll {
        triggers: Vec<(RawFd, Trigger)>,
    }

    impl PollFacility for FakePoll {
        fn add_callback(&mut self, _fd: RawFd, _interest: Interest, _callback: Box<dyn FnMut(RevEvents)>) {}
        fn config_callback(&mut self, fd: RawFd, trigger: Trigger) {
            self.triggers.push((fd, trigger));
        }
        fn rm_callback(&mut self, _fd: RawFd) {}
    }

    fn configure_test_device(poll: &mut FakePoll) -> PcmDevice {
        let transport = Rc::new(FakeA2dpTransport::default());
        let mut device = PcmDevice::new_a2dp(transport);
        let writer: Box<dyn PcmWriter> = Box::new(FakeNonBlockingWriter { writes: Vec::new() });
        device
            .configure_a2dp(48_000, 2, writer, poll, Box::new(|_| {}))
            .unwrap();
        device
    }

    #[test]
    fn configure_derives_write_block_and_buffer_size() {
        let mut poll = FakePoll::default();
        let device = configure_test_device(&mut poll);
        assert_eq!(device.write_block_frames(), 960);
        assert_eq!(device.buffer_size_frames(), 16_320); // 17*960=16320 <= 16384, 18*960 would exceed
    }

    #[test]
    fn feeding_two_write_blocks_at_due_time_drains_to_empty() {
        let mut poll = FakePoll::default();
        let mut device = configure_test_device(&mut poll);
        device.start(Timestamp::from_raw(0, 0)).unwrap();

        let frames = 1920u64; // two write blocks of stereo s16le
        device.put_buffer(frames, Timestamp::from_raw(0, 0), &mut poll).unwrap();

        let (queued, _) = device.frames_queued(&FixedClock(Timestamp::from_raw(0, 0))).unwrap();
        assert_eq!(queued, 0);
    }

    #[test]
    fn feeding_before_due_time_leaves_ring_full() {
        let mut poll = FakePoll::default();
        let mut device = configure_test_device(&mut poll);
        device.start(Timestamp::from_raw(0, 2_000_000)).unwrap(); // next_flush_time = 2ms

        let frames = 1920u64;
        // now is 2ms before next_flush_time
        device.put_buffer(frames, Timestamp::from_raw(0, 0), &mut poll).unwrap();

        let (queued, _) = device.frames_queued(&FixedClock(Timestamp::from_raw(0, 0))).unwrap();
        assert_eq!(queued, frames);
    }

    #[test]
    fn no_stream_enter_then_leave_tops_up_without_final_flush() {
        let mut poll = FakePoll::default();
        let mut device = configure_test_device(&mut poll);
        device.start(Timestamp::from_raw(100, 0)).unwrap();

        device.no_stream(true, Timestamp::from_raw(100, 0), &mut poll).unwrap();
        let (queued_after_enter, _) = device.frames_queued(&FixedClock(Timestamp::from_raw(100, 0))).unwrap();
        // enter flushes immediately since now == next_flush_time, so the
        // 2x top-up gets drained straight back down.
        assert!(queued_after_enter <= 2 * 960);

        device.no_stream(false, Timestamp::from_raw(100, 0), &mut poll).unwrap();
        let (queued_after_leave, _) = device.frames_queued(&FixedClock(Timestamp::from_raw(100, 0))).unwrap();
        assert_eq!(queued_after_leave, 960);
    }

    struct FixedClock(Timestamp);
    impl Clock for FixedClock {
        fn now(&self) -> Timestamp {
            self.0
        }
    }
}
