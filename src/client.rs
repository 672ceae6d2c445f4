//! Pipelining Client
//!
//! A blocking client for the framed protocol. Requests can be queued and
//! sent in a single write, then their responses read back in order:
//!
//! ```text
//! client ── [req1][req2][req3] ──────────────────> server
//! client <───────────────── [resp1][resp2][resp3] ── server
//! ```
//!
//! ## Example
//!
//! ```no_run
//! use pollkv::client::Client;
//!
//! let mut client = Client::connect("127.0.0.1:1234")?;
//! let responses = client.pipeline(&["hello", "hello2", "hello3"])?;
//! assert_eq!(responses.len(), 3);
//! # Ok::<(), pollkv::client::ClientError>(())
//! ```

use crate::protocol::{encode_frame, FrameError, HEADER_LEN};
use bytes::{Bytes, BytesMut};
use std::io::{self, Read, Write};
use std::net::{SocketAddr, TcpStream, ToSocketAddrs};
use std::time::Duration;
use thiserror::Error;
use tracing::trace;

/// Errors that can occur while talking to a server.
#[derive(Debug, Error)]
pub enum ClientError {
    /// I/O error (network issue)
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// The server announced a frame larger than this client accepts
    #[error("frame error: {0}")]
    Frame(#[from] FrameError),

    /// The server closed the connection before a full response arrived
    #[error("connection closed by server")]
    Closed,
}

/// Result type for client operations.
pub type ClientResult<T> = Result<T, ClientError>;

/// A blocking connection to a framed-protocol server.
#[derive(Debug)]
pub struct Client {
    stream: TcpStream,
    /// Encoded requests waiting for `flush`
    pending: BytesMut,
    /// Largest response payload accepted
    max_frame_len: usize,
}

impl Client {
    /// Connects to `addr`.
    pub fn connect<A: ToSocketAddrs>(addr: A) -> ClientResult<Self> {
        let stream = TcpStream::connect(addr)?;
        stream.set_nodelay(true)?;
        Ok(Self::from_stream(stream))
    }

    /// Wraps an already connected stream.
    pub fn from_stream(stream: TcpStream) -> Self {
        Self {
            stream,
            pending: BytesMut::new(),
            max_frame_len: crate::protocol::DEFAULT_MAX_FRAME_LEN,
        }
    }

    /// Rejects responses whose declared length exceeds `max_frame_len`.
    pub fn with_max_frame_len(mut self, max_frame_len: usize) -> Self {
        self.max_frame_len = max_frame_len;
        self
    }

    /// Bounds how long `read_frame` may block.
    pub fn set_read_timeout(&self, timeout: Option<Duration>) -> ClientResult<()> {
        self.stream.set_read_timeout(timeout)?;
        Ok(())
    }

    pub fn peer_addr(&self) -> ClientResult<SocketAddr> {
        Ok(self.stream.peer_addr()?)
    }

    /// Queues one request; nothing is sent until [`flush`](Self::flush).
    pub fn send(&mut self, payload: &[u8]) {
        self.pending.extend_from_slice(&encode_frame(payload));
    }

    /// Queues raw bytes as-is. Useful for exercising a server with
    /// malformed input.
    pub fn send_raw(&mut self, bytes: &[u8]) {
        self.pending.extend_from_slice(bytes);
    }

    /// Writes every queued request in one go.
    pub fn flush(&mut self) -> ClientResult<()> {
        if self.pending.is_empty() {
            return Ok(());
        }
        trace!(bytes = self.pending.len(), "Flushing requests");
        self.stream.write_all(&self.pending)?;
        self.pending.clear();
        Ok(())
    }

    /// Blocks until one complete response frame has been read.
    pub fn read_frame(&mut self) -> ClientResult<Bytes> {
        let mut header = [0u8; HEADER_LEN];
        self.read_full(&mut header)?;

        let len = u32::from_le_bytes(header) as usize;
        if len > self.max_frame_len {
            return Err(FrameError::TooLarge {
                len,
                max: self.max_frame_len,
            }
            .into());
        }

        let mut payload = vec![0u8; len];
        self.read_full(&mut payload)?;
        Ok(Bytes::from(payload))
    }

    /// Sends one request and waits for its response.
    pub fn request(&mut self, payload: &[u8]) -> ClientResult<Bytes> {
        self.send(payload);
        self.flush()?;
        self.read_frame()
    }

    /// Sends every request in a single write, then reads the responses in
    /// request order.
    pub fn pipeline<P: AsRef<[u8]>>(&mut self, requests: &[P]) -> ClientResult<Vec<Bytes>> {
        for request in requests {
            self.send(request.as_ref());
        }
        self.flush()?;

        requests.iter().map(|_| self.read_frame()).collect()
    }

    /// `read_exact`, but EOF is reported as [`ClientError::Closed`].
    fn read_full(&mut self, buf: &mut [u8]) -> ClientResult<()> {
        match self.stream.read_exact(buf) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => Err(ClientError::Closed),
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handler::Echo;
    use crate::reactor::{Reactor, ReactorConfig};
    use std::thread;

    fn spawn_server(config: ReactorConfig) -> (SocketAddr, crate::reactor::ShutdownHandle, thread::JoinHandle<()>) {
        let mut reactor = Reactor::bind("127.0.0.1:0", Echo, config).unwrap();
        let addr = reactor.local_addr();
        let shutdown = reactor.shutdown_handle();
        let handle = thread::spawn(move || reactor.run().unwrap());
        (addr, shutdown, handle)
    }

    #[test]
    fn test_request_response() {
        let (addr, shutdown, handle) = spawn_server(ReactorConfig::default());

        let mut client = Client::connect(addr).unwrap();
        assert_eq!(client.request(b"hello").unwrap(), Bytes::from("hello"));
        assert_eq!(client.request(b"").unwrap(), Bytes::new());

        shutdown.shutdown();
        handle.join().unwrap();
    }

    #[test]
    fn test_pipeline_preserves_order() {
        let (addr, shutdown, handle) = spawn_server(ReactorConfig::default());

        let mut client = Client::connect(addr).unwrap();
        let requests: Vec<String> = (0..100).map(|i| format!("req-{}", i)).collect();
        let responses = client.pipeline(&requests).unwrap();

        assert_eq!(responses.len(), 100);
        for (request, response) in requests.iter().zip(&responses) {
            assert_eq!(request.as_bytes(), &response[..]);
        }

        shutdown.shutdown();
        handle.join().unwrap();
    }

    #[test]
    fn test_oversized_request_ends_pipeline() {
        let (addr, shutdown, handle) =
            spawn_server(ReactorConfig::default().with_max_frame_len(32));

        let mut client = Client::connect(addr).unwrap();
        client
            .set_read_timeout(Some(Duration::from_secs(5)))
            .unwrap();
        client.send(b"hello");
        client.send(b"hello2");
        client.send(b"hello3");
        client.send_raw(&33u32.to_le_bytes());
        client.flush().unwrap();

        assert_eq!(client.read_frame().unwrap(), Bytes::from("hello"));
        assert_eq!(client.read_frame().unwrap(), Bytes::from("hello2"));
        assert_eq!(client.read_frame().unwrap(), Bytes::from("hello3"));
        assert!(matches!(
            client.read_frame(),
            Err(ClientError::Closed) | Err(ClientError::Io(_))
        ));

        shutdown.shutdown();
        handle.join().unwrap();
    }

    #[test]
    fn test_client_rejects_oversized_response() {
        let (addr, shutdown, handle) = spawn_server(ReactorConfig::default());

        let mut client = Client::connect(addr).unwrap().with_max_frame_len(4);
        let err = client.request(b"too long for the client").unwrap_err();
        assert!(matches!(err, ClientError::Frame(FrameError::TooLarge { len: 23, max: 4 })));

        shutdown.shutdown();
        handle.join().unwrap();
    }
}
