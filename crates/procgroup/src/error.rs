//! Library error type.

use thiserror::Error;

use crate::protocol::messages::{DaemonStatus, InvalidGroupName, MAX_MESSAGE_SIZE};
use crate::protocol::ProtocolError;

/// Errors surfaced to library callers.
#[derive(Debug, Error)]
pub enum Error {
    /// The handle does not name a live session.
    ///
    /// Raised for handles that were never issued, have already been
    /// finalized, or belong to a reused slot from an earlier session.
    #[error("bad handle")]
    BadHandle,

    /// The daemon is not reachable right now; the caller may retry.
    #[error("daemon unavailable, try again")]
    TryAgain,

    /// A multicast payload exceeds the per-message limit.
    #[error("message too big: {size} bytes exceeds maximum {MAX_MESSAGE_SIZE}")]
    TooBig {
        /// Total payload size across all buffers.
        size: usize,
    },

    /// A group name failed validation.
    #[error(transparent)]
    InvalidName(#[from] InvalidGroupName),

    /// The daemon answered the request with a failure status.
    #[error("daemon refused request: {0}")]
    Daemon(DaemonStatus),

    /// The daemon closed the connection.
    #[error("connection closed by daemon")]
    ConnectionClosed,

    /// The byte stream violated the wire protocol.
    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    /// Transport-level failure.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Maps a connect-time I/O failure to the caller-facing error.
    ///
    /// A missing socket or a refused connection means the daemon is not
    /// running (or not yet accepting); both are reported as [`Error::TryAgain`]
    /// so callers can poll for daemon startup. Everything else is a real
    /// I/O error.
    pub(crate) fn from_connect_io(err: std::io::Error) -> Self {
        use std::io::ErrorKind;
        match err.kind() {
            ErrorKind::NotFound | ErrorKind::ConnectionRefused => Self::TryAgain,
            _ => Self::Io(err),
        }
    }
}

/// Result alias used throughout the crate.
pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Converts a reply status into a library result.
pub(crate) fn check_status(status: DaemonStatus) -> Result<()> {
    match status {
        DaemonStatus::Ok => Ok(()),
        other => Err(Error::Daemon(other)),
    }
}
