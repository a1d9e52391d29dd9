//! CLI surface for the smoke-test harness. Grounded on `bark/src/main.rs`'s
//! `StructOpt` subcommand enum and `bark/src/stream.rs`'s per-mode option
//! struct, scaled down to what a development harness needs: which profile
//! to exercise, how the mock peer on the other end of the socket behaves,
//! and how long to run before exiting.

use std::str::FromStr;
use std::time::Duration;

use structopt::StructOpt;

#[derive(StructOpt, Debug)]
#[structopt(name = "btpcmd", about = "Development smoke-test harness for the Bluetooth PCM I/O engine")]
pub enum Opt {
    /// Drive a single A2DP output device against a mock peer.
    A2dp(A2dpOpt),
    /// Drive a paired HFP input+output device against a mock peer.
    Hfp(HfpOpt),
}

#[derive(StructOpt, Debug)]
pub struct A2dpOpt {
    #[structopt(long, default_value = "48000")]
    pub rate: u32,

    #[structopt(long, default_value = "2")]
    pub channels: u16,

    #[structopt(long, default_value = "accept")]
    pub peer: PeerBehaviorOpt,

    #[structopt(long, default_value = "5")]
    pub seconds: u64,
}

#[derive(StructOpt, Debug)]
pub struct HfpOpt {
    #[structopt(long, default_value = "accept")]
    pub peer: PeerBehaviorOpt,

    #[structopt(long, default_value = "5")]
    pub seconds: u64,
}

/// How the harness's mock peer thread treats the other end of the
/// socketpair: drain every message immediately, stall every Nth message to
/// provoke an `EAGAIN`/`WouldBlock` on our send, or close its end after N
/// messages to provoke a hangup.
#[derive(Debug, Clone, Copy)]
pub enum PeerBehaviorOpt {
    Accept,
    StallEvery(u32),
    DisconnectAfter(u32),
}

impl FromStr for PeerBehaviorOpt {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s == "accept" {
            return Ok(PeerBehaviorOpt::Accept);
        }
        if let Some(n) = s.strip_prefix("stall-every-") {
            let n: u32 = n.parse().map_err(|_| format!("bad stall-every count: {n}"))?;
            return Ok(PeerBehaviorOpt::StallEvery(n));
        }
        if let Some(n) = s.strip_prefix("disconnect-after-") {
            let n: u32 = n.parse().map_err(|_| format!("bad disconnect-after count: {n}"))?;
            return Ok(PeerBehaviorOpt::DisconnectAfter(n));
        }
        Err(format!("unknown peer behavior: {s} (expected accept, stall-every-N, or disconnect-after-N)"))
    }
}

pub fn run_duration(opt: &Opt) -> Duration {
    let seconds = match opt {
        Opt::A2dp(o) => o.seconds,
        Opt::Hfp(o) => o.seconds,
    };
    Duration::from_secs(seconds)
}
