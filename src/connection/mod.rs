//! Connection Module
//!
//! This module manages individual client connections. There are no tasks
//! or threads per client: each connection is a small state machine that
//! the reactor advances whenever its socket becomes ready.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                     Reactor (mio::Poll)                     │
//! └──────────────────────┬──────────────────────────────────────┘
//!                        │
//!                        │ readable / writable
//!                        ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │                     Connection                              │
//! │                                                             │
//! │  ┌─────────────┐    ┌─────────────┐    ┌─────────────┐      │
//! │  │ Read bytes  │───>│ Decode      │───>│ Handle      │      │
//! │  │ (incoming)  │    │ frames      │    │ request     │      │
//! │  └─────────────┘    └─────────────┘    └──────┬──────┘      │
//! │                                               │             │
//! │                                               ▼             │
//! │                                      ┌─────────────┐        │
//! │                                      │ Write resp  │        │
//! │                                      │ (outgoing)  │        │
//! │                                      └─────────────┘        │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Features
//!
//! - **Non-blocking I/O**: one read or write per step, never waits
//! - **Pipelining**: every complete frame in a read is answered in order
//! - **Backpressure**: no reads while responses are still queued
//! - **Statistics**: Tracks connection and frame metrics

pub mod state;
pub mod stats;

// Re-export commonly used types
pub use state::{CloseReason, ConnState, Connection, IoStatus};
pub use stats::{ConnectionStats, StatsSnapshot};
