use std::io;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum NetError {
    #[error("creating socketpair: {0}")]
    SocketPair(io::Error),
    #[error("poll(2) failed: {0}")]
    Poll(#[from] nix::Error),
}
