//! Wire Protocol
//!
//! This module provides the byte-level building blocks of the server:
//! the growable buffers each connection reads into and writes from, and the
//! codec that cuts those bytes into length-prefixed frames.
//!
//! ## Modules
//!
//! - `buffer`: `ByteBuffer`, append at the tail / consume from the head
//! - `frame`: `FrameCodec`, restartable decoding of `u32` length-prefixed frames
//!
//! ## Example
//!
//! ```
//! use pollkv::protocol::{encode_frame, ByteBuffer, FrameCodec};
//!
//! // Bytes arrive from the socket in arbitrary chunks
//! let wire = encode_frame(b"PING");
//! let mut incoming = ByteBuffer::new();
//! incoming.append(&wire[..3]);
//!
//! let codec = FrameCodec::default();
//! assert!(codec.decode(&mut incoming).unwrap().is_none());
//!
//! incoming.append(&wire[3..]);
//! let payload = codec.decode(&mut incoming).unwrap().unwrap();
//! assert_eq!(&payload[..], b"PING");
//! ```

pub mod buffer;
pub mod frame;

// Re-export commonly used types for convenience
pub use buffer::ByteBuffer;
pub use frame::{
    encode_frame, peek_len, FrameCodec, FrameError, FrameResult, DEFAULT_MAX_FRAME_LEN,
    HEADER_LEN,
};
