//! Error taxonomy for the core. Every variant carries enough structured
//! context to let a caller annotate it with the operation that produced it.

use thiserror::Error;

use crate::path::IoPath;

/// Errors returned while resolving a [`crate::path::DisplayIdentifier`] or
/// opening/operating on a display.
#[derive(Debug, Error)]
pub enum CoreError {
    #[error("invalid argument: {0}")]
    ArgumentError(String),

    #[error("no display matches {0}")]
    NotFound(String),

    #[error("display {0} is disconnected")]
    Disconnected(IoPath),

    #[error("display {0} is asleep (DPMS off)")]
    DpmsAsleep(IoPath),

    #[error("bus for {0} is busy: {1}")]
    Busy(IoPath, String),

    #[error("display {0} is locked by thread {1:?}")]
    Locked(IoPath, std::thread::ThreadId),

    #[error("current thread already holds the lock for {0}")]
    AlreadyOpen(IoPath),

    #[error("display {0} reported feature as unsupported")]
    ReportedUnsupported(IoPath),

    #[error("display {0} heuristically determined to not support this feature")]
    DeterminedUnsupported(IoPath),

    #[error("received a null response from {0}")]
    NullResponse(IoPath),

    #[error("every retry against {0} produced a null response")]
    AllResponsesNull(IoPath),

    #[error("exhausted retries against {0}")]
    Retries(IoPath),

    #[error("i/o error on {0}: {1}")]
    IoError(IoPath, #[source] std::io::Error),

    #[error("malformed data from {0}: {1}")]
    BadData(IoPath, String),

    #[error("protocol violation on {0}: {1}")]
    InvalidProtocol(IoPath, String),

    #[error("internal inconsistency: {0}")]
    Internal(String),
}

/// Errors from [`crate::lock::LockTable`].
#[derive(Debug, Error)]
pub enum LockError {
    #[error("current thread already holds the lock for {0}")]
    AlreadyOpen(IoPath),

    #[error("{0} is locked by thread {1:?}")]
    Locked(IoPath, std::thread::ThreadId),
}

/// Errors from [`crate::handle::open`].
#[derive(Debug, Error)]
pub enum OpenError {
    #[error(transparent)]
    Lock(#[from] LockError),

    #[error("device for {0} is busy")]
    Busy(IoPath),

    #[error("failed to open transport for {0}: {1}")]
    Io(IoPath, #[source] std::io::Error),
}
