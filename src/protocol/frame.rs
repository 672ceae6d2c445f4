//! Length-Prefixed Frame Codec
//!
//! Every message on the wire, request or response, is a frame:
//!
//! ```text
//! ┌───────────────────────┬──────────────────────────────┐
//! │ len: u32 little-endian│ payload: exactly `len` bytes │
//! └───────────────────────┴──────────────────────────────┘
//! ```
//!
//! The codec is a pure function of buffer contents. `decode` returns either:
//! - `Ok(Some(payload))` - one frame was removed from the head of the buffer
//! - `Ok(None)` - not enough bytes yet; the buffer is left untouched
//! - `Err(FrameError)` - the peer declared a length above the limit
//!
//! Because an incomplete frame never mutates the buffer, decoding can be
//! retried on any chunk boundary once more bytes arrive.

use crate::protocol::buffer::ByteBuffer;
use bytes::{BufMut, Bytes, BytesMut};
use thiserror::Error;

/// Size of the length prefix in bytes.
pub const HEADER_LEN: usize = 4;

/// Largest payload accepted by default (32 MiB).
pub const DEFAULT_MAX_FRAME_LEN: usize = 32 << 20;

/// Longest payload a four-byte prefix can describe.
const MAX_ENCODABLE_LEN: usize = u32::MAX as usize;

/// Errors produced by the frame codec.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum FrameError {
    /// The declared (or supplied) payload length exceeds the configured maximum
    #[error("frame too large: {len} bytes (max: {max})")]
    TooLarge { len: usize, max: usize },
}

/// Result type for codec operations.
pub type FrameResult<T> = Result<T, FrameError>;

/// Encoder/decoder for length-prefixed frames with a size limit.
///
/// # Example
///
/// ```
/// use pollkv::protocol::{ByteBuffer, FrameCodec};
///
/// let codec = FrameCodec::default();
/// let mut buf = ByteBuffer::new();
/// codec.encode(b"hello", &mut buf).unwrap();
/// codec.encode(b"world", &mut buf).unwrap();
///
/// assert_eq!(&codec.decode(&mut buf).unwrap().unwrap()[..], b"hello");
/// assert_eq!(&codec.decode(&mut buf).unwrap().unwrap()[..], b"world");
/// assert!(codec.decode(&mut buf).unwrap().is_none());
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameCodec {
    max_frame_len: usize,
}

impl Default for FrameCodec {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_FRAME_LEN)
    }
}

impl FrameCodec {
    /// Creates a codec that rejects payloads longer than `max_frame_len`.
    ///
    /// The limit is capped at `u32::MAX`, the longest length the prefix
    /// can carry.
    pub fn new(max_frame_len: usize) -> Self {
        Self {
            max_frame_len: max_frame_len.min(MAX_ENCODABLE_LEN),
        }
    }

    pub fn max_frame_len(&self) -> usize {
        self.max_frame_len
    }

    /// Attempts to remove one complete frame from the head of `buf`.
    ///
    /// The size check runs as soon as the prefix is available, before the
    /// payload has arrived, so a hostile length is rejected without ever
    /// buffering the body.
    pub fn decode(&self, buf: &mut ByteBuffer) -> FrameResult<Option<Bytes>> {
        let len = match peek_len(buf) {
            Some(len) => len as usize,
            None => return Ok(None),
        };

        if len > self.max_frame_len {
            return Err(FrameError::TooLarge {
                len,
                max: self.max_frame_len,
            });
        }

        if buf.len() < HEADER_LEN + len {
            return Ok(None);
        }

        buf.consume(HEADER_LEN);
        Ok(Some(buf.split_to(len)))
    }

    /// Appends `payload` as one frame to the tail of `out`.
    pub fn encode(&self, payload: &[u8], out: &mut ByteBuffer) -> FrameResult<()> {
        if payload.len() > self.max_frame_len {
            return Err(FrameError::TooLarge {
                len: payload.len(),
                max: self.max_frame_len,
            });
        }

        let len = u32::try_from(payload.len()).map_err(|_| FrameError::TooLarge {
            len: payload.len(),
            max: self.max_frame_len,
        })?;
        out.append(&len.to_le_bytes());
        out.append(payload);
        Ok(())
    }
}

/// Reads the length prefix at the head of `buf` without consuming it.
///
/// Returns `None` when fewer than four bytes are available.
#[inline]
pub fn peek_len(buf: &[u8]) -> Option<u32> {
    let header: [u8; HEADER_LEN] = buf.get(..HEADER_LEN)?.try_into().ok()?;
    Some(u32::from_le_bytes(header))
}

/// Encodes a single frame into a standalone buffer.
///
/// Used by clients, which are not bound by a server's size limit. Payloads
/// longer than `u32::MAX` cannot be represented and panic.
pub fn encode_frame(payload: &[u8]) -> Bytes {
    let len = u32::try_from(payload.len()).expect("payload length exceeds u32::MAX");
    let mut out = BytesMut::with_capacity(HEADER_LEN + payload.len());
    out.put_u32_le(len);
    out.extend_from_slice(payload);
    out.freeze()
}
