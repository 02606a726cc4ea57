//! Crate-wide error taxonomy.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    #[error("protocol error: {0}")]
    Protocol(String),

    #[error("operation timed out")]
    Timeout,

    #[error("connection refused")]
    Refused,

    #[error("host unknown: {0}")]
    HostUnknown(String),

    #[error("connection reset")]
    Reset,

    #[error("channel name already in use: {0}")]
    NameTaken(String),

    #[error("channel name not found: {0}")]
    NameMissing(String),

    #[error("channel has {0} live client(s)")]
    BusyChannel(i32),

    #[error("remote peer is gone")]
    RemotePeerGone,

    #[error("resource exhausted: {0}")]
    ResourceExhaustion(String),

    #[error("reply slot {0} is not outstanding")]
    InvalidReplySlot(usize),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}
