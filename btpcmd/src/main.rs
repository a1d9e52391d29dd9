//! Development smoke-test harness: exercises an A2DP device or an HFP pair
//! against an in-process mock peer over a local socketpair. Grounded on
//! `bark/src/main.rs` (subcommand dispatch) and `bark/src/stream.rs` (a
//! runnable entry point wired up to the library's actual state machine).
//! Not a production component: the surrounding Bluetooth daemon and audio
//! server are both out of scope for this crate.

mod config;
mod mock;

use std::cell::RefCell;
use std::process::ExitCode;
use std::rc::Rc;
use std::time::{Duration, Instant};

use structopt::StructOpt;

use btpcm_device::{factory, DeviceError, PcmArea, PcmDevice, RevEvents};
use btpcm_net::{drive_once, local_pair, NixPollFacility, RawFdSocket};
use btpcm_protocol::{Clock, Direction, PcmFormat};
use btpcm_util::MonotonicRawClock;

use config::{A2dpOpt, HfpOpt, Opt};
use mock::{spawn_mock_peer, MockA2dpTransport, MockHfpTransport};

const MOCK_ADDR: &str = "AA:BB:CC:DD:EE:FF";

fn main() -> ExitCode {
    env_logger::init();

    let opt = Opt::from_args();
    let run_for = config::run_duration(&opt);

    // Runs the whole device loop on its own OS thread, named and requesting
    // realtime priority up front, mirroring how the teacher never drives its
    // audio state machine on the thread that parsed argv.
    let handle = btpcm_util::thread::start("btpcmd/device", move || match &opt {
        Opt::A2dp(a2dp_opt) => run_a2dp(a2dp_opt, run_for),
        Opt::Hfp(hfp_opt) => run_hfp(hfp_opt, run_for),
    });

    match handle.join() {
        Ok(Ok(())) => ExitCode::SUCCESS,
        Ok(Err(e)) => {
            eprintln!("error: {e}");
            ExitCode::FAILURE
        }
        Err(_) => {
            eprintln!("error: device thread panicked");
            ExitCode::FAILURE
        }
    }
}

fn run_a2dp(opt: &A2dpOpt, run_for: Duration) -> Result<(), DeviceError> {
    let clock = MonotonicRawClock;
    let (device_socket, peer_socket) = local_pair().map_err(|e| DeviceError::TransportError(e.to_string()))?;
    let device_fd = device_socket.as_raw_fd();
    let peer_fd = peer_socket.as_raw_fd();
    std::mem::forget(peer_socket); // mock peer thread owns and closes peer_fd itself

    let transport = Rc::new(MockA2dpTransport::new(MOCK_ADDR, device_fd));
    let poll = Rc::new(RefCell::new(NixPollFacility::new()));

    // `factory::a2dp_create` wants the retry callback before it can hand
    // back a device, but the callback wants to reach the device once it
    // exists. Route through a slot populated right after construction
    // instead of capturing the not-yet-existing device directly.
    let device_slot: Rc<RefCell<Option<Rc<RefCell<PcmDevice>>>>> = Rc::new(RefCell::new(None));
    let retry_slot = Rc::clone(&device_slot);
    let retry_poll = Rc::clone(&poll);
    let retry_callback: Box<dyn FnMut(RevEvents)> = Box::new(move |_revents: RevEvents| {
        let device = retry_slot.borrow().clone();
        if let Some(device) = device {
            let now = MonotonicRawClock.now();
            let mut dev = device.borrow_mut();
            let mut poll_ref = retry_poll.borrow_mut();
            if let Err(e) = dev.retry_flush(now, &mut *poll_ref) {
                log::warn!("a2dp retry flush failed: {e}");
            }
        }
    });

    let now = clock.now();
    let device = {
        let mut poll_ref = poll.borrow_mut();
        factory::a2dp_create(transport, opt.rate, opt.channels, Box::new(device_socket), &mut *poll_ref, now, retry_callback)?
    };
    let device = Rc::new(RefCell::new(device));
    *device_slot.borrow_mut() = Some(Rc::clone(&device));

    log::info!("a2dp harness: {}Hz x{}ch, peer={:?}, running for {:?}", opt.rate, opt.channels, opt.peer, run_for);
    let _peer_thread = spawn_mock_peer(peer_fd, opt.peer, run_for);

    let write_block_frames = device.borrow().write_block_frames();

    let deadline = Instant::now() + run_for;
    let mut fed = 0u64;
    while Instant::now() < deadline {
        {
            let mut dev = device.borrow_mut();
            let mut committed = 0u64;
            if let PcmArea::Writable(slice) = dev.get_buffer(write_block_frames)? {
                slice.fill(0); // silence: the harness has no real audio source
                committed = slice.len() as u64 / u64::from(PcmFormat::new(opt.rate, opt.channels).frame_bytes());
            }
            if committed > 0 {
                let mut poll_ref = poll.borrow_mut();
                dev.put_buffer(committed, clock.now(), &mut *poll_ref)?;
                fed += committed;
            }
        }
        drive_once(&poll, nix::poll::PollTimeout::from(20u16))
            .map_err(|e| DeviceError::TransportError(e.to_string()))?;
        device.borrow_mut().poll_suspend_deadline(clock.now())?;
    }

    log::info!("a2dp harness: fed {fed} frames total, closing");
    *device_slot.borrow_mut() = None;
    let device = Rc::try_unwrap(device)
        .map_err(|_| DeviceError::TransportError("device still referenced at shutdown".to_string()))?
        .into_inner();
    {
        let mut poll_ref = poll.borrow_mut();
        factory::destroy(device, &mut *poll_ref)?;
    }
    Ok(())
}

/// The paired input/output devices and shared socket an HFP retry callback
/// needs once they all exist. See the slot comment in [`run_hfp`].
type HfpPair = (Rc<RefCell<PcmDevice>>, Rc<RefCell<PcmDevice>>, Rc<RefCell<RawFdSocket>>);

fn make_hfp_callback(slot: Rc<RefCell<Option<HfpPair>>>) -> Box<dyn FnMut(RevEvents)> {
    Box::new(move |revents: RevEvents| {
        let pair = slot.borrow().clone();
        if let Some((input, output, socket)) = pair {
            let mut input_dev = input.borrow_mut();
            let mut output_dev = output.borrow_mut();
            let mut sock = socket.borrow_mut();
            if let Err(e) = btpcm_device::drive_hfp(&mut input_dev, &mut output_dev, revents, &mut *sock) {
                log::warn!("hfp callback failed: {e}");
            }
        }
    })
}

fn run_hfp(opt: &HfpOpt, run_for: Duration) -> Result<(), DeviceError> {
    let clock = MonotonicRawClock;
    let (device_socket, peer_socket) = local_pair().map_err(|e| DeviceError::TransportError(e.to_string()))?;
    let device_fd = device_socket.as_raw_fd();
    let peer_fd = peer_socket.as_raw_fd();
    std::mem::forget(peer_socket);

    let transport = Rc::new(MockHfpTransport::new(MOCK_ADDR, device_fd));
    let poll = Rc::new(RefCell::new(NixPollFacility::new()));
    let socket = Rc::new(RefCell::new(device_socket));

    // Both `hfp_create` calls need a retry callback before either device
    // exists; each callback closes over this slot rather than the devices
    // themselves, and the slot is populated once both are built. Nothing in
    // the poll loop can fire before this function's own first `drive_once`.
    let pair_slot: Rc<RefCell<Option<HfpPair>>> = Rc::new(RefCell::new(None));

    let now = clock.now();
    let (input, output) = {
        let mut poll_ref = poll.borrow_mut();
        let input = factory::hfp_create(
            Rc::clone(&transport),
            Direction::Input,
            &mut *poll_ref,
            now,
            make_hfp_callback(Rc::clone(&pair_slot)),
        )?;
        let output = factory::hfp_create(transport, Direction::Output, &mut *poll_ref, now, make_hfp_callback(Rc::clone(&pair_slot)))?;
        (input, output)
    };

    let input = Rc::new(RefCell::new(input));
    let output = Rc::new(RefCell::new(output));
    *pair_slot.borrow_mut() = Some((Rc::clone(&input), Rc::clone(&output), Rc::clone(&socket)));

    log::info!("hfp harness: peer={:?}, running for {:?}", opt.peer, run_for);
    let _peer_thread = spawn_mock_peer(peer_fd, opt.peer, run_for);

    let deadline = Instant::now() + run_for;
    while Instant::now() < deadline {
        drive_once(&poll, nix::poll::PollTimeout::from(20u16))
            .map_err(|e| DeviceError::TransportError(e.to_string()))?;
    }

    log::info!("hfp harness: closing");
    *pair_slot.borrow_mut() = None;
    let input = Rc::try_unwrap(input)
        .map_err(|_| DeviceError::TransportError("input device still referenced at shutdown".to_string()))?
        .into_inner();
    let output = Rc::try_unwrap(output)
        .map_err(|_| DeviceError::TransportError("output device still referenced at shutdown".to_string()))?
        .into_inner();
    {
        let mut poll_ref = poll.borrow_mut();
        factory::destroy(input, &mut *poll_ref)?;
        factory::destroy(output, &mut *poll_ref)?;
    }
    Ok(())
}
