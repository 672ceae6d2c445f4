//! Per-Connection State Machine
//!
//! A connection is always in exactly one of three states:
//!
//! ```text
//!              ┌───────────── response queued ─────────────┐
//!              │                                           ▼
//!   accept ─> READING                                   WRITING
//!              ▲                                           │
//!              └────────── outgoing fully drained ─────────┘
//!
//!   READING / WRITING ── EOF, I/O error, bad frame, hangup ──> CLOSING ──> gone
//! ```
//!
//! The three `want_*` flags are what the reactor looks at: `want_read`
//! and `want_write` pick the readiness to wait for, `want_close` asks for
//! the socket to be released once the current dispatch is over.
//!
//! ## Partial I/O
//!
//! `handle_read` and `handle_write` each perform exactly one non-blocking
//! system call and report what happened as an [`IoStatus`]. The reactor
//! keeps calling them until one reports `WouldBlock` or `Closed`.
//!
//! - A read appends whatever arrived to `incoming` and then drains every
//!   complete frame, so a burst of pipelined requests is answered in one go.
//! - A write removes exactly the bytes the kernel accepted from the head of
//!   `outgoing`; anything left keeps the connection in WRITING.
//!
//! ## Backpressure
//!
//! While WRITING the connection does not read, so a peer that stops
//! reading its responses eventually stops being read from. Decoding also
//! pauses once `outgoing` holds `max_outgoing` bytes; the frames left in
//! `incoming` are picked up again as soon as the backlog has been written.

use crate::connection::stats::ConnectionStats;
use crate::handler::RequestHandler;
use crate::protocol::{ByteBuffer, FrameCodec, FrameError};
use crate::reactor::ReactorConfig;
use std::fmt;
use std::io::{ErrorKind, Read, Write};
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::{debug, trace, warn};

/// Which readiness the connection is waiting for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnState {
    /// Waiting for request bytes
    Reading,
    /// Waiting for the socket to accept queued response bytes
    Writing,
    /// Will be torn down at the end of the current dispatch
    Closing,
}

/// Outcome of one `handle_read` / `handle_write` step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IoStatus {
    /// The call did something; calling again may do more
    Progress,
    /// The socket has nothing more to give or take right now
    WouldBlock,
    /// The connection is marked for close
    Closed,
}

/// Why a connection was marked for close.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CloseReason {
    /// The peer closed cleanly between frames
    PeerClosed,
    /// The peer closed with a partial frame still buffered
    UnexpectedEof { buffered: usize },
    /// The peer violated the framing protocol
    Protocol(FrameError),
    /// A read or write failed
    Io(ErrorKind),
    /// The poller reported an error or hangup on the socket
    Hangup,
    /// The server is shutting down
    Shutdown,
}

impl CloseReason {
    /// `true` for the quiet endings of a connection.
    pub fn is_graceful(&self) -> bool {
        matches!(self, CloseReason::PeerClosed | CloseReason::Shutdown)
    }
}

impl fmt::Display for CloseReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CloseReason::PeerClosed => write!(f, "peer closed"),
            CloseReason::UnexpectedEof { buffered } => {
                write!(f, "unexpected EOF with {} bytes buffered", buffered)
            }
            CloseReason::Protocol(e) => write!(f, "protocol error: {}", e),
            CloseReason::Io(kind) => write!(f, "I/O error: {}", kind),
            CloseReason::Hangup => write!(f, "socket error or hangup"),
            CloseReason::Shutdown => write!(f, "server shutdown"),
        }
    }
}

/// One accepted client socket and its buffers.
///
/// Generic over the transport so the state machine can be driven by an
/// in-memory stream in tests; the reactor uses `mio::net::TcpStream`.
pub struct Connection<S> {
    /// The non-blocking socket
    stream: S,

    /// Client's address (for logging)
    peer: SocketAddr,

    want_read: bool,
    want_write: bool,
    want_close: bool,

    /// Bytes received but not yet framed
    incoming: ByteBuffer,

    /// Encoded responses not yet written
    outgoing: ByteBuffer,

    codec: FrameCodec,

    /// Outgoing high-water mark; `None` disables it
    max_outgoing: Option<usize>,

    close_reason: Option<CloseReason>,

    /// Connection statistics (shared)
    stats: Arc<ConnectionStats>,
}

impl<S: Read + Write> Connection<S> {
    /// Wraps a freshly accepted socket. The connection starts out READING.
    pub fn new(
        stream: S,
        peer: SocketAddr,
        config: &ReactorConfig,
        stats: Arc<ConnectionStats>,
    ) -> Self {
        stats.connection_opened();

        Self {
            stream,
            peer,
            want_read: true,
            want_write: false,
            want_close: false,
            incoming: ByteBuffer::with_capacity(config.initial_buffer),
            outgoing: ByteBuffer::with_capacity(config.initial_buffer),
            codec: FrameCodec::new(config.max_frame_len),
            max_outgoing: config.max_outgoing,
            close_reason: None,
            stats,
        }
    }

    /// Performs one read into `scratch` and answers every complete frame.
    ///
    /// When responses were produced the connection switches to WRITING and
    /// immediately tries to write them, saving a poll round-trip.
    pub fn handle_read<H>(&mut self, scratch: &mut [u8], handler: &mut H) -> IoStatus
    where
        H: RequestHandler + ?Sized,
    {
        if self.want_close {
            return IoStatus::Closed;
        }
        debug_assert!(self.want_read, "read dispatched while not reading");

        let n = match self.stream.read(scratch) {
            Ok(0) => {
                if self.incoming.is_empty() {
                    self.mark_close(CloseReason::PeerClosed);
                } else {
                    let buffered = self.incoming.len();
                    self.mark_close(CloseReason::UnexpectedEof { buffered });
                }
                return IoStatus::Closed;
            }
            Ok(n) => n,
            Err(e) if e.kind() == ErrorKind::WouldBlock => return IoStatus::WouldBlock,
            Err(e) if e.kind() == ErrorKind::Interrupted => return IoStatus::Progress,
            Err(e) => {
                self.mark_close(CloseReason::Io(e.kind()));
                return IoStatus::Closed;
            }
        };

        self.stats.bytes_read(n);
        trace!(client = %self.peer, bytes = n, "Read data");
        self.incoming.append(&scratch[..n]);

        self.process_incoming(handler);

        if self.want_close {
            // Responses to the frames before the bad one still get one shot
            self.flush_before_close();
            return IoStatus::Closed;
        }

        if self.outgoing.is_empty() {
            return IoStatus::Progress;
        }

        self.want_read = false;
        self.want_write = true;
        self.handle_write(handler)
    }

    /// Performs one write of as much of `outgoing` as the socket accepts.
    ///
    /// Once everything has been written the connection returns to READING
    /// and resumes decoding any requests that were held back by the
    /// outgoing high-water mark.
    pub fn handle_write<H>(&mut self, handler: &mut H) -> IoStatus
    where
        H: RequestHandler + ?Sized,
    {
        if self.want_close {
            return IoStatus::Closed;
        }
        debug_assert!(self.want_write, "write dispatched while not writing");

        if !self.outgoing.is_empty() {
            let n = match self.stream.write(&self.outgoing) {
                Ok(0) => {
                    self.mark_close(CloseReason::Io(ErrorKind::WriteZero));
                    return IoStatus::Closed;
                }
                Ok(n) => n,
                Err(e) if e.kind() == ErrorKind::WouldBlock => return IoStatus::WouldBlock,
                Err(e) if e.kind() == ErrorKind::Interrupted => return IoStatus::Progress,
                Err(e) => {
                    self.mark_close(CloseReason::Io(e.kind()));
                    return IoStatus::Closed;
                }
            };

            self.outgoing.consume(n);
            self.stats.bytes_written(n);
            trace!(
                client = %self.peer,
                bytes = n,
                remaining = self.outgoing.len(),
                "Wrote data"
            );

            if !self.outgoing.is_empty() {
                return IoStatus::Progress;
            }
        }

        self.want_write = false;
        self.want_read = true;

        // Requests held back by the high-water mark
        self.process_incoming(handler);
        if self.want_close {
            self.flush_before_close();
            return IoStatus::Closed;
        }
        if !self.outgoing.is_empty() {
            self.want_read = false;
            self.want_write = true;
        }

        IoStatus::Progress
    }

    /// Decodes and answers frames until the buffer runs dry, the outgoing
    /// backlog reaches the high-water mark, or a frame is rejected.
    ///
    /// Returns the number of frames answered.
    pub fn process_incoming<H>(&mut self, handler: &mut H) -> usize
    where
        H: RequestHandler + ?Sized,
    {
        let mut answered = 0;

        while !self.outgoing_full() {
            let request = match self.codec.decode(&mut self.incoming) {
                Ok(Some(request)) => request,
                Ok(None) => break,
                Err(e) => {
                    warn!(client = %self.peer, error = %e, "Rejecting frame");
                    self.stats.protocol_error();
                    self.mark_close(CloseReason::Protocol(e));
                    break;
                }
            };

            trace!(
                client = %self.peer,
                len = request.len(),
                remaining = self.incoming.len(),
                "Decoded frame"
            );

            let response = handler.handle(request);
            if let Err(e) = self.codec.encode(&response, &mut self.outgoing) {
                warn!(client = %self.peer, error = %e, "Handler produced an oversized response");
                self.mark_close(CloseReason::Protocol(e));
                break;
            }

            self.stats.frame_processed();
            answered += 1;
        }

        answered
    }

    /// Marks the connection for close. The first reason recorded wins.
    pub fn mark_close(&mut self, reason: CloseReason) {
        if self.close_reason.is_none() {
            if reason.is_graceful() {
                debug!(client = %self.peer, reason = %reason, "Closing connection");
            } else {
                warn!(client = %self.peer, reason = %reason, "Closing connection");
            }
            self.close_reason = Some(reason);
        }
        self.want_close = true;
        self.want_read = false;
        self.want_write = false;
    }

    /// One best-effort write of whatever is already queued.
    fn flush_before_close(&mut self) {
        if self.outgoing.is_empty() {
            return;
        }
        match self.stream.write(&self.outgoing) {
            Ok(n) => {
                self.outgoing.consume(n);
                self.stats.bytes_written(n);
            }
            Err(e) => {
                trace!(client = %self.peer, error = %e, "Dropping unflushed responses");
            }
        }
    }

    #[inline]
    fn outgoing_full(&self) -> bool {
        self.max_outgoing
            .is_some_and(|max| self.outgoing.len() >= max)
    }
}

impl<S> Connection<S> {
    pub fn state(&self) -> ConnState {
        if self.want_close {
            ConnState::Closing
        } else if self.want_write {
            ConnState::Writing
        } else {
            ConnState::Reading
        }
    }

    #[inline]
    pub fn want_read(&self) -> bool {
        self.want_read
    }

    #[inline]
    pub fn want_write(&self) -> bool {
        self.want_write
    }

    #[inline]
    pub fn want_close(&self) -> bool {
        self.want_close
    }

    pub fn peer(&self) -> SocketAddr {
        self.peer
    }

    pub fn incoming(&self) -> &ByteBuffer {
        &self.incoming
    }

    pub fn outgoing(&self) -> &ByteBuffer {
        &self.outgoing
    }

    pub fn close_reason(&self) -> Option<&CloseReason> {
        self.close_reason.as_ref()
    }

    pub fn stream(&self) -> &S {
        &self.stream
    }

    pub fn stream_mut(&mut self) -> &mut S {
        &mut self.stream
    }
}

impl<S> Drop for Connection<S> {
    fn drop(&mut self) {
        self.stats.connection_closed();
    }
}

impl<S> fmt::Debug for Connection<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("peer", &self.peer)
            .field("state", &self.state())
            .field("incoming", &self.incoming.len())
            .field("outgoing", &self.outgoing.len())
            .field("close_reason", &self.close_reason)
            .finish()
    }
}
