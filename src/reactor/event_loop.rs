//! Single-Threaded Event Loop
//!
//! One `mio::Poll` call blocks the whole process; everything else runs to
//! completion between two polls, so neither the connection registry nor
//! anything a handler touches needs a lock.
//!
//! ## One Iteration
//!
//! ```text
//!  poll() ──> listener ready? ──> accept until WouldBlock, register READABLE
//!     │
//!     └─────> connection ready? ──> drive the state machine until it blocks
//!                                   error / hangup ──> mark for close
//!                                   want flags changed ──> reregister
//!
//!  after the batch ──> deregister and drop every connection marked for close
//! ```
//!
//! ## Edge-Triggered Readiness
//!
//! mio reports readiness once per transition, so a connection is driven
//! until a read or write reports `WouldBlock` (or it closes). A connection
//! that is still making progress after `DISPATCH_BUDGET` steps is parked
//! and resumed on the next iteration, so one busy peer cannot starve the
//! others.

use crate::connection::{CloseReason, ConnectionStats, Connection, IoStatus};
use crate::handler::RequestHandler;
use crate::reactor::ReactorConfig;
use mio::event::Event;
use mio::net::{TcpListener, TcpStream};
use mio::{Events, Interest, Poll, Token, Waker};
use std::collections::HashMap;
use std::io::{self, ErrorKind};
use std::net::{SocketAddr, ToSocketAddrs};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, error, info, trace, warn};

const LISTENER: Token = Token(0);
const WAKER: Token = Token(1);
const FIRST_CONNECTION_ID: usize = 2;

/// Read/write steps one connection may take per iteration.
const DISPATCH_BUDGET: usize = 64;

/// Back-off before retrying a listener that failed with a hard error
/// (typically out of file descriptors).
const ACCEPT_RETRY_DELAY: Duration = Duration::from_millis(10);

/// Errors that stop the event loop.
#[derive(Debug, Error)]
pub enum ReactorError {
    /// The poller or the listener failed
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

/// Stops a running [`Reactor`] from any thread.
#[derive(Debug, Clone)]
pub struct ShutdownHandle {
    flag: Arc<AtomicBool>,
    waker: Arc<Waker>,
}

impl ShutdownHandle {
    /// Asks the reactor to stop; `run` returns after the current iteration.
    pub fn shutdown(&self) {
        self.flag.store(true, Ordering::Release);
        if let Err(e) = self.waker.wake() {
            error!(error = %e, "Failed to wake reactor for shutdown");
        }
    }

    pub fn is_shutdown(&self) -> bool {
        self.flag.load(Ordering::Acquire)
    }
}

/// A registered connection and the interest it is currently polled for.
struct Registered {
    conn: Connection<TcpStream>,
    interest: Interest,
}

/// The event loop: owns the listener, the poller, every live connection,
/// and the request handler they all share.
///
/// # Example
///
/// ```no_run
/// use pollkv::handler::Echo;
/// use pollkv::reactor::{Reactor, ReactorConfig};
///
/// let mut reactor = Reactor::bind("127.0.0.1:1234", Echo, ReactorConfig::default())?;
/// let shutdown = reactor.shutdown_handle();
///
/// // From another thread: shutdown.shutdown();
/// reactor.run()?;
/// # Ok::<(), pollkv::reactor::ReactorError>(())
/// ```
pub struct Reactor<H> {
    poll: Poll,
    events: Events,
    listener: TcpListener,
    local_addr: SocketAddr,

    /// Live connections keyed by their poll token
    connections: HashMap<Token, Registered>,
    next_id: usize,

    handler: H,
    config: ReactorConfig,

    /// Shared read area, `config.read_chunk` bytes
    scratch: Vec<u8>,

    /// Connections that ran out of dispatch budget last iteration
    parked: Vec<Token>,
    /// Connections to release once the current batch is dispatched
    closing: Vec<Token>,
    /// The last accept burst ended on a hard error
    accept_retry: bool,

    stats: Arc<ConnectionStats>,
    shutdown: Arc<AtomicBool>,
    waker: Arc<Waker>,
}

impl<H: RequestHandler> Reactor<H> {
    /// Takes over an already bound listener and switches it to non-blocking.
    pub fn new(
        listener: std::net::TcpListener,
        handler: H,
        config: ReactorConfig,
    ) -> Result<Self, ReactorError> {
        listener.set_nonblocking(true)?;
        let mut listener = TcpListener::from_std(listener);
        let local_addr = listener.local_addr()?;

        let poll = Poll::new()?;
        poll.registry()
            .register(&mut listener, LISTENER, Interest::READABLE)?;
        let waker = Arc::new(Waker::new(poll.registry(), WAKER)?);

        Ok(Self {
            poll,
            events: Events::with_capacity(config.events_capacity),
            listener,
            local_addr,
            connections: HashMap::new(),
            next_id: FIRST_CONNECTION_ID,
            handler,
            scratch: vec![0u8; config.read_chunk],
            config,
            parked: Vec::new(),
            closing: Vec::new(),
            accept_retry: false,
            stats: Arc::new(ConnectionStats::new()),
            shutdown: Arc::new(AtomicBool::new(false)),
            waker,
        })
    }

    /// Binds a listener on `addr` and wraps it.
    pub fn bind<A: ToSocketAddrs>(
        addr: A,
        handler: H,
        config: ReactorConfig,
    ) -> Result<Self, ReactorError> {
        let listener = std::net::TcpListener::bind(addr)?;
        Self::new(listener, handler, config)
    }

    /// Reports into `stats` instead of a private counter set.
    pub fn with_stats(mut self, stats: Arc<ConnectionStats>) -> Self {
        self.stats = stats;
        self
    }

    /// Runs until a [`ShutdownHandle`] fires or the poller fails.
    pub fn run(&mut self) -> Result<(), ReactorError> {
        info!(addr = %self.local_addr, "Reactor running");

        while !self.shutdown.load(Ordering::Acquire) {
            self.poll_once(None)?;
        }

        self.close_all();
        info!("Reactor stopped");
        Ok(())
    }

    /// Performs one poll and dispatches everything it reported.
    ///
    /// `timeout` of `None` blocks until something is ready. Returns the
    /// number of readiness events handled.
    pub fn poll_once(&mut self, timeout: Option<Duration>) -> Result<usize, ReactorError> {
        let timeout = if !self.parked.is_empty() {
            Some(Duration::ZERO)
        } else if self.accept_retry {
            Some(timeout.map_or(ACCEPT_RETRY_DELAY, |t| t.min(ACCEPT_RETRY_DELAY)))
        } else {
            timeout
        };

        // Swapped out so the loop below can borrow the rest of `self`
        let mut events = std::mem::replace(&mut self.events, Events::with_capacity(0));
        let polled = match self.poll.poll(&mut events, timeout) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::Interrupted => {
                trace!("Poll interrupted, retrying");
                events.clear();
                Ok(())
            }
            Err(e) => {
                error!(error = %e, "Poll failed");
                Err(e)
            }
        };
        if let Err(e) = polled {
            self.events = events;
            return Err(e.into());
        }

        if self.accept_retry {
            self.accept_retry = false;
            self.accept_connections();
        }

        for token in std::mem::take(&mut self.parked) {
            self.dispatch(token);
            self.sync_interest(token);
        }

        let mut handled = 0;
        for event in events.iter() {
            handled += 1;
            match event.token() {
                WAKER => trace!("Reactor woken"),
                LISTENER => self.accept_connections(),
                token => self.handle_event(token, event),
            }
        }
        self.events = events;

        self.release_closed();
        Ok(handled)
    }

    /// Accepts until the listener would block.
    fn accept_connections(&mut self) {
        loop {
            match self.listener.accept() {
                Ok((mut stream, peer)) => {
                    if let Err(e) = stream.set_nodelay(true) {
                        warn!(client = %peer, error = %e, "Failed to set TCP_NODELAY");
                    }

                    let token = Token(self.next_id);
                    self.next_id += 1;

                    if let Err(e) =
                        self.poll
                            .registry()
                            .register(&mut stream, token, Interest::READABLE)
                    {
                        error!(client = %peer, error = %e, "Failed to register connection");
                        continue;
                    }

                    let conn = Connection::new(stream, peer, &self.config, Arc::clone(&self.stats));
                    debug!(conn = token.0, client = %peer, "Client connected");
                    self.connections.insert(
                        token,
                        Registered {
                            conn,
                            interest: Interest::READABLE,
                        },
                    );
                }
                Err(e) => match e.kind() {
                    ErrorKind::WouldBlock => break,
                    ErrorKind::Interrupted => continue,
                    ErrorKind::ConnectionAborted | ErrorKind::ConnectionReset => {
                        warn!(error = %e, "Transient accept error");
                        continue;
                    }
                    _ => {
                        error!(error = %e, "Error accepting connection");
                        self.accept_retry = true;
                        break;
                    }
                },
            }
        }
    }

    fn handle_event(&mut self, token: Token, event: &Event) {
        if !self.connections.contains_key(&token) {
            // Already released, or never ours
            return;
        }

        if event.is_readable() || event.is_writable() {
            self.dispatch(token);
        }

        // Error and hangup override whatever the state machine wants
        if readiness_forces_close(event.is_error(), event.is_read_closed(), event.is_write_closed()) {
            if let Some(entry) = self.connections.get_mut(&token) {
                if !entry.conn.want_close() {
                    entry.conn.mark_close(CloseReason::Hangup);
                }
            }
        }

        self.sync_interest(token);
    }

    /// Drives one connection until it blocks, closes, or uses up its budget.
    fn dispatch(&mut self, token: Token) {
        let Some(entry) = self.connections.get_mut(&token) else {
            return;
        };
        let conn = &mut entry.conn;

        for _ in 0..DISPATCH_BUDGET {
            let status = if conn.want_close() {
                IoStatus::Closed
            } else if conn.want_read() {
                conn.handle_read(&mut self.scratch, &mut self.handler)
            } else {
                conn.handle_write(&mut self.handler)
            };

            match status {
                IoStatus::Progress => {}
                IoStatus::WouldBlock | IoStatus::Closed => return,
            }
        }

        trace!(conn = token.0, "Dispatch budget exhausted, parking");
        self.parked.push(token);
    }

    /// Queues a closing connection for release, or points the poller at the
    /// readiness the connection now waits for.
    fn sync_interest(&mut self, token: Token) {
        let Some(entry) = self.connections.get_mut(&token) else {
            return;
        };

        if entry.conn.want_close() {
            if !self.closing.contains(&token) {
                self.closing.push(token);
            }
            return;
        }

        let wanted = if entry.conn.want_read() {
            Interest::READABLE
        } else {
            Interest::WRITABLE
        };
        if wanted == entry.interest {
            return;
        }

        match self
            .poll
            .registry()
            .reregister(entry.conn.stream_mut(), token, wanted)
        {
            Ok(()) => {
                trace!(conn = token.0, interest = ?wanted, "Interest changed");
                entry.interest = wanted;
            }
            Err(e) => {
                warn!(conn = token.0, error = %e, "Failed to reregister connection");
                entry.conn.mark_close(CloseReason::Io(e.kind()));
                self.closing.push(token);
            }
        }
    }

    /// Deregisters and drops every connection marked for close.
    fn release_closed(&mut self) {
        for token in std::mem::take(&mut self.closing) {
            if let Some(mut entry) = self.connections.remove(&token) {
                if let Err(e) = self.poll.registry().deregister(entry.conn.stream_mut()) {
                    trace!(conn = token.0, error = %e, "Deregister failed");
                }
                match entry.conn.close_reason() {
                    Some(reason) if !reason.is_graceful() => {
                        debug!(conn = token.0, client = %entry.conn.peer(), reason = %reason, "Connection released")
                    }
                    _ => debug!(conn = token.0, client = %entry.conn.peer(), "Client disconnected"),
                }
                // Dropping the stream closes the socket
            }
        }
        self.parked.retain(|token| self.connections.contains_key(token));
    }

    /// Closes every connection; used on shutdown.
    fn close_all(&mut self) {
        for (token, mut entry) in self.connections.drain() {
            entry.conn.mark_close(CloseReason::Shutdown);
            if let Err(e) = self.poll.registry().deregister(entry.conn.stream_mut()) {
                trace!(conn = token.0, error = %e, "Deregister failed");
            }
        }
        self.parked.clear();
        self.closing.clear();
    }
}

impl<H> Reactor<H> {
    /// A handle that stops `run` from another thread.
    pub fn shutdown_handle(&self) -> ShutdownHandle {
        ShutdownHandle {
            flag: Arc::clone(&self.shutdown),
            waker: Arc::clone(&self.waker),
        }
    }

    /// Address the listener is bound to.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Number of live connections.
    pub fn connection_count(&self) -> usize {
        self.connections.len()
    }

    /// Shared statistics for every connection this reactor accepted.
    pub fn stats(&self) -> Arc<ConnectionStats> {
        Arc::clone(&self.stats)
    }

    pub fn config(&self) -> &ReactorConfig {
        &self.config
    }

    pub fn handler(&self) -> &H {
        &self.handler
    }

    pub fn handler_mut(&mut self) -> &mut H {
        &mut self.handler
    }
}

/// A socket error, or both halves shut, ends the connection. A peer that
/// only stopped sending still gets its pending responses.
fn readiness_forces_close(is_error: bool, read_closed: bool, write_closed: bool) -> bool {
    is_error || (read_closed && write_closed)
}
