use thiserror::Error;

/// Transport failures. None of these are fatal to the process.
#[derive(Debug, Error)]
pub enum LinkError {
    #[error("not connected")]
    NotConnected,
    #[error("connect {address} failed: {reason}")]
    Connect { address: String, reason: String },
    #[error("write failed: {0}")]
    Write(String),
    #[error("link already open or opening, disconnect first")]
    AlreadyOpen,
    #[error("another write is in flight")]
    Busy,
    #[error("timed out")]
    Timeout,
    #[error(transparent)]
    Io(#[from] std::io::Error),
}
