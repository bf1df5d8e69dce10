//! Protocol error types for the daemon IPC layer.
//!
//! Protocol errors are fatal to the operation (or dispatch loop) that hit
//! them. They are distinct from remote status codes, which the daemon embeds
//! in replies and which the library hands back to the caller untouched.

use std::io;

use thiserror::Error;

/// Maximum frame size in bytes (1 MiB), header included.
///
/// The frame length field is validated against this bound BEFORE any payload
/// allocation, so a corrupt or hostile length prefix cannot exhaust memory.
pub const MAX_FRAME_SIZE: usize = 1024 * 1024;

/// Protocol version carried in the connect exchange.
///
/// The daemon rejects clients whose version it cannot serve; the rejection
/// arrives as a `TryAgain` or `Library` status in the connect reply.
pub const PROTOCOL_VERSION: u32 = 1;

/// Errors raised by the framing and message codecs.
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// Frame length field exceeds [`MAX_FRAME_SIZE`].
    #[error("frame too large: {size} bytes exceeds maximum {max} bytes")]
    FrameTooLarge {
        /// Size declared by the frame header.
        size: usize,
        /// Maximum allowed frame size.
        max: usize,
    },

    /// Frame or payload structure does not match the declared schema.
    #[error("invalid frame: {reason}")]
    InvalidFrame {
        /// Description of the mismatch.
        reason: String,
    },

    /// Message id is not part of the protocol.
    #[error("unknown message id {id}")]
    UnknownMessage {
        /// The id read from the frame header.
        id: u32,
    },

    /// A reply arrived with a different id than the request it answers.
    #[error("unexpected reply: expected message id {expected}, got {got}")]
    UnexpectedReply {
        /// Message id of the outstanding request.
        expected: u32,
        /// Message id carried by the reply frame.
        got: u32,
    },

    /// A membership list declares more entries than the protocol capacity.
    #[error("too many members: {count} exceeds maximum {max}")]
    TooManyMembers {
        /// Declared entry count.
        count: usize,
        /// Protocol-level member capacity.
        max: usize,
    },

    /// Underlying transport failure.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

impl ProtocolError {
    /// Shorthand for [`ProtocolError::InvalidFrame`].
    pub(crate) fn invalid(reason: impl Into<String>) -> Self {
        Self::InvalidFrame {
            reason: reason.into(),
        }
    }
}

/// Result alias for protocol operations.
pub type ProtocolResult<T> = Result<T, ProtocolError>;
