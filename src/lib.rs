//! # PollKV - A Single-Threaded Event-Loop Server Core
//!
//! PollKV is the networking and indexing core of a small key/value server.
//! One thread owns every socket, drives them from a readiness poll, and
//! speaks a length-prefixed request/response protocol that allows clients
//! to pipeline requests.
//!
//! ## Features
//!
//! - **Non-Blocking I/O**: a single `mio` poll multiplexes the listener and every client
//! - **Pipelining**: any number of requests may arrive in one read; responses keep request order
//! - **Backpressure**: decoding pauses while a client is not draining its responses
//! - **Incremental Rehash**: the index never pays for a full resize in one operation
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                              PollKV                                     │
//! │                                                                         │
//! │  ┌─────────────┐    ┌─────────────┐    ┌─────────────┐                  │
//! │  │  Reactor    │───>│ Connection  │───>│  Request    │                  │
//! │  │ (mio Poll)  │    │ State Mach. │    │  Handler    │                  │
//! │  └──────┬──────┘    └──────┬──────┘    └─────────────┘                  │
//! │         │                  │                                            │
//! │         ▼                  ▼                                            │
//! │  ┌─────────────┐    ┌─────────────┐    ┌──────────────────────────────┐ │
//! │  │  Listener   │    │ FrameCodec  │    │           HMap<T>            │ │
//! │  │  + Waker    │    │ ByteBuffer  │    │  newer table <── older table │ │
//! │  └─────────────┘    └─────────────┘    └──────────────────────────────┘ │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```no_run
//! use pollkv::handler::Echo;
//! use pollkv::reactor::{Reactor, ReactorConfig};
//!
//! fn main() -> anyhow::Result<()> {
//!     let mut reactor = Reactor::bind("127.0.0.1:1234", Echo, ReactorConfig::default())?;
//!     let shutdown = reactor.shutdown_handle();
//!
//!     // Any thread may stop the loop
//!     std::thread::spawn(move || {
//!         std::thread::sleep(std::time::Duration::from_secs(60));
//!         shutdown.shutdown();
//!     });
//!
//!     reactor.run()?;
//!     Ok(())
//! }
//! ```
//!
//! ## Wire Format
//!
//! Every message in both directions is a frame:
//!
//! ```text
//! ┌──────────────────┬──────────────────────────┐
//! │ len: u32 (LE)    │ payload: len bytes       │
//! └──────────────────┴──────────────────────────┘
//! ```
//!
//! A frame whose declared length exceeds the configured maximum closes the
//! connection.
//!
//! ## Module Overview
//!
//! - [`protocol`]: byte buffer and frame codec
//! - [`handler`]: the request handler seam
//! - [`connection`]: per-client state machine and statistics
//! - [`reactor`]: the event loop and its configuration
//! - [`storage`]: the incrementally resized hash index
//! - [`client`]: a blocking, pipelining client

pub mod client;
pub mod connection;
pub mod handler;
pub mod protocol;
pub mod reactor;
pub mod storage;

// Re-export commonly used types for convenience
pub use client::{Client, ClientError};
pub use connection::{CloseReason, ConnectionStats};
pub use handler::{Echo, RequestHandler};
pub use protocol::{ByteBuffer, FrameCodec, FrameError};
pub use reactor::{Reactor, ReactorConfig, ReactorError, ShutdownHandle};
pub use storage::{hash_bytes, HMap};

/// The default port PollKV listens on
pub const DEFAULT_PORT: u16 = 1234;

/// The default host PollKV binds to
pub const DEFAULT_HOST: &str = "127.0.0.1";

/// Version of PollKV
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
