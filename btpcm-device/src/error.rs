use thiserror::Error;

#[derive(Debug, Error)]
pub enum DeviceError {
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("ring allocation failed")]
    OutOfMemory,

    #[error("transport error: {0}")]
    TransportError(String),

    #[error(transparent)]
    Core(#[from] btpcm_core::CoreError),
}
