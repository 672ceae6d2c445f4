//! Reactor Configuration

use crate::protocol::DEFAULT_MAX_FRAME_LEN;

/// Bytes requested from the socket per read (64 KiB).
pub const DEFAULT_READ_CHUNK: usize = 64 * 1024;

/// Outgoing high-water mark (4 MiB).
pub const DEFAULT_MAX_OUTGOING: usize = 4 * 1024 * 1024;

/// Readiness events collected per poll.
pub const DEFAULT_EVENTS_CAPACITY: usize = 1024;

/// Initial capacity of each connection buffer.
pub const DEFAULT_INITIAL_BUFFER: usize = 4096;

/// Tunables shared by the reactor and every connection it accepts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReactorConfig {
    /// Largest frame payload a peer may declare
    pub max_frame_len: usize,

    /// Size of the scratch area each read fills
    pub read_chunk: usize,

    /// Stop decoding requests while this many response bytes are queued.
    /// `None` lets the outgoing buffer grow without bound.
    pub max_outgoing: Option<usize>,

    /// Capacity of the `mio::Events` batch
    pub events_capacity: usize,

    /// Initial capacity of the incoming and outgoing buffers
    pub initial_buffer: usize,
}

impl Default for ReactorConfig {
    fn default() -> Self {
        Self {
            max_frame_len: DEFAULT_MAX_FRAME_LEN,
            read_chunk: DEFAULT_READ_CHUNK,
            max_outgoing: Some(DEFAULT_MAX_OUTGOING),
            events_capacity: DEFAULT_EVENTS_CAPACITY,
            initial_buffer: DEFAULT_INITIAL_BUFFER,
        }
    }
}

impl ReactorConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_max_frame_len(mut self, max_frame_len: usize) -> Self {
        self.max_frame_len = max_frame_len;
        self
    }

    /// Sets the read scratch size. Zero is bumped to one byte so a read can
    /// still make progress.
    pub fn with_read_chunk(mut self, read_chunk: usize) -> Self {
        self.read_chunk = read_chunk.max(1);
        self
    }

    pub fn with_max_outgoing(mut self, max_outgoing: Option<usize>) -> Self {
        self.max_outgoing = max_outgoing;
        self
    }

    pub fn with_events_capacity(mut self, events_capacity: usize) -> Self {
        self.events_capacity = events_capacity.max(1);
        self
    }

    pub fn with_initial_buffer(mut self, initial_buffer: usize) -> Self {
        self.initial_buffer = initial_buffer;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = ReactorConfig::default();
        assert_eq!(config.max_frame_len, 32 << 20);
        assert_eq!(config.read_chunk, 64 * 1024);
        assert_eq!(config.max_outgoing, Some(4 * 1024 * 1024));
    }

    #[test]
    fn test_builder_clamps_zero_sizes() {
        let config = ReactorConfig::new()
            .with_read_chunk(0)
            .with_events_capacity(0)
            .with_max_outgoing(None);
        assert_eq!(config.read_chunk, 1);
        assert_eq!(config.events_capacity, 1);
        assert_eq!(config.max_outgoing, None);
    }
}
