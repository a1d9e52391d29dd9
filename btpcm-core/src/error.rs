use thiserror::Error;

/// Errors the pacing/duplex state machines can raise. These always
/// correspond to a non-retriable transport condition; `WouldBlock` is
/// handled internally and never surfaces here.
#[derive(Debug, Error)]
pub enum CoreError {
    #[error("transport I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("poll reported an error or hangup condition")]
    PollError,
}
