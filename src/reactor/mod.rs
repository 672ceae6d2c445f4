//! Reactor Module
//!
//! The event loop at the heart of the server: a single thread, a single
//! readiness poll, and every connection multiplexed over it.
//!
//! ## Modules
//!
//! - `config`: `ReactorConfig`, the tunables shared by the loop and its connections
//! - `event_loop`: `Reactor`, accept/dispatch/close, and `ShutdownHandle`
//!
//! ## Example
//!
//! ```no_run
//! use pollkv::handler::Echo;
//! use pollkv::reactor::{Reactor, ReactorConfig};
//!
//! let listener = std::net::TcpListener::bind("127.0.0.1:1234")?;
//! let mut reactor = Reactor::new(listener, Echo, ReactorConfig::default())?;
//! reactor.run()?;
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

pub mod config;
pub mod event_loop;

// Re-export commonly used types
pub use config::ReactorConfig;
pub use event_loop::{Reactor, ReactorError, ShutdownHandle};
