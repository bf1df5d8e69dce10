//! Length-delimited frame codec for the daemon sockets.
//!
//! Every message in either direction, on either connection, is one frame:
//!
//! ```text
//! +---------------+-----------------+------------------------+
//! | id (4 bytes)  | size (4 bytes)  | payload (size - 8)     |
//! +---------------+-----------------+------------------------+
//! ```
//!
//! `size` counts the whole frame including the header. Both fields are
//! host-native byte order: the transport is a local Unix socket, so no endian
//! conversion is involved.
//!
//! The codec is the single read-exactly-N primitive of the library; partial
//! reads and interrupted reads are absorbed by the `Framed` transport driving
//! it, and cancellation is handled by the reader task that owns the stream.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

use super::error::{MAX_FRAME_SIZE, ProtocolError};

/// Size of the frame header in bytes.
pub const FRAME_HEADER_SIZE: usize = 8;

/// A decoded frame: message id plus raw payload.
///
/// The payload is everything after the header; interpreting it is the job of
/// [`super::messages`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    /// Message id selecting the payload schema.
    pub id: u32,
    /// Payload bytes (may be empty).
    pub payload: Bytes,
}

impl Frame {
    /// Builds a frame from an id and payload.
    #[must_use]
    pub fn new(id: u32, payload: Bytes) -> Self {
        Self { id, payload }
    }
}

/// Codec turning a byte stream into [`Frame`]s and back.
#[derive(Debug, Default)]
pub struct FrameCodec;

impl FrameCodec {
    /// Creates a new codec.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }
}

impl Decoder for FrameCodec {
    type Item = Frame;
    type Error = ProtocolError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Frame>, ProtocolError> {
        if src.len() < FRAME_HEADER_SIZE {
            src.reserve(FRAME_HEADER_SIZE - src.len());
            return Ok(None);
        }

        let id = u32::from_ne_bytes([src[0], src[1], src[2], src[3]]);
        let size = u32::from_ne_bytes([src[4], src[5], src[6], src[7]]) as usize;

        // Validate the declared size before reserving anything.
        if size > MAX_FRAME_SIZE {
            return Err(ProtocolError::FrameTooLarge {
                size,
                max: MAX_FRAME_SIZE,
            });
        }
        if size < FRAME_HEADER_SIZE {
            return Err(ProtocolError::invalid(format!(
                "frame size {size} smaller than header"
            )));
        }

        if src.len() < size {
            src.reserve(size - src.len());
            return Ok(None);
        }

        src.advance(FRAME_HEADER_SIZE);
        let payload = src.split_to(size - FRAME_HEADER_SIZE).freeze();
        Ok(Some(Frame { id, payload }))
    }
}

impl Encoder<Frame> for FrameCodec {
    type Error = ProtocolError;

    fn encode(&mut self, item: Frame, dst: &mut BytesMut) -> Result<(), ProtocolError> {
        let size = FRAME_HEADER_SIZE + item.payload.len();
        if size > MAX_FRAME_SIZE {
            return Err(ProtocolError::FrameTooLarge {
                size,
                max: MAX_FRAME_SIZE,
            });
        }

        dst.reserve(size);
        dst.put_u32_ne(item.id);
        dst.put_u32_ne(size as u32);
        dst.extend_from_slice(&item.payload);
        Ok(())
    }
}
