//! Growable Byte Buffer
//!
//! Every connection owns two of these: one for bytes received but not yet
//! framed, one for encoded responses not yet written to the socket.
//!
//! ## Operations
//!
//! ```text
//!   consume(n)                              append(data)
//!      │                                        │
//!      ▼                                        ▼
//!   ┌──────┬──────────────────────────────┐ ┌───────┐
//!   │ head │        buffered bytes        │◄│ data  │
//!   └──────┴──────────────────────────────┘ └───────┘
//! ```
//!
//! Appending is amortized O(1) per byte. Consuming from the head does not
//! shift memory: `BytesMut` just advances its start pointer, and the freed
//! space is reclaimed the next time the buffer has to grow.

use bytes::{Buf, Bytes, BytesMut};
use std::fmt;
use std::ops::Deref;

/// An ordered, growable sequence of bytes with tail-append and head-consume.
#[derive(Default, Clone, PartialEq, Eq)]
pub struct ByteBuffer {
    inner: BytesMut,
}

impl ByteBuffer {
    /// Creates an empty buffer.
    pub fn new() -> Self {
        Self {
            inner: BytesMut::new(),
        }
    }

    /// Creates an empty buffer that can hold `capacity` bytes before reallocating.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            inner: BytesMut::with_capacity(capacity),
        }
    }

    /// Appends `data` at the tail.
    #[inline]
    pub fn append(&mut self, data: &[u8]) {
        self.inner.extend_from_slice(data);
    }

    /// Removes the first `n` bytes.
    ///
    /// # Panics
    ///
    /// Panics if `n` is larger than the number of buffered bytes. Callers
    /// only ever consume what they have already inspected, so an overrun is
    /// a bug in the caller.
    #[inline]
    pub fn consume(&mut self, n: usize) {
        assert!(
            n <= self.inner.len(),
            "consume({}) beyond buffered length {}",
            n,
            self.inner.len()
        );
        self.inner.advance(n);
    }

    /// Removes the first `n` bytes and returns them as an owned, cheaply
    /// cloneable `Bytes`.
    ///
    /// # Panics
    ///
    /// Same precondition as [`consume`](Self::consume).
    pub fn split_to(&mut self, n: usize) -> Bytes {
        assert!(
            n <= self.inner.len(),
            "split_to({}) beyond buffered length {}",
            n,
            self.inner.len()
        );
        self.inner.split_to(n).freeze()
    }

    /// Number of buffered bytes.
    #[inline]
    pub fn len(&self) -> usize {
        self.inner.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }

    /// Bytes that can be appended before the next reallocation.
    pub fn capacity(&self) -> usize {
        self.inner.capacity()
    }

    /// The buffered bytes, head first.
    #[inline]
    pub fn as_slice(&self) -> &[u8] {
        &self.inner
    }

    /// Drops every buffered byte, keeping the allocation.
    pub fn clear(&mut self) {
        self.inner.clear();
    }
}

impl Deref for ByteBuffer {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        &self.inner
    }
}

impl From<&[u8]> for ByteBuffer {
    fn from(data: &[u8]) -> Self {
        Self {
            inner: BytesMut::from(data),
        }
    }
}

impl fmt::Debug for ByteBuffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ByteBuffer")
            .field("len", &self.inner.len())
            .field("capacity", &self.inner.capacity())
            .finish()
    }
}
