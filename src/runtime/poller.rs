//! Readiness multiplexer wrapping the OS event-notification facility.
//!
//! mio gives us epoll on Linux and kqueue on macOS: `wait` cost scales with
//! the number of ready sockets, not the number of tracked sockets. This is
//! what lets one thread sit on a very large set of mostly-idle connections
//! without rescanning them per call.

use mio::net::{TcpListener, TcpStream};
use mio::{Events, Interest, Poll, Token};
use std::io;
use std::time::Duration;

/// Token reserved for the listening socket. Connection handles are slab
/// indices and never reach this value.
pub const LISTENER_TOKEN: Token = Token(usize::MAX);

/// Errors from registering a connection with the multiplexer.
#[derive(Debug)]
pub enum RegistrationError {
    /// The tracked set is at its configured capacity.
    AtCapacity(usize),
    /// The OS rejected the socket.
    Io(io::Error),
}

impl std::fmt::Display for RegistrationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RegistrationError::AtCapacity(cap) => {
                write!(f, "multiplexer at capacity ({cap} sockets)")
            }
            RegistrationError::Io(e) => write!(f, "failed to register socket: {e}"),
        }
    }
}

impl std::error::Error for RegistrationError {}

/// Readiness multiplexer for the event loop.
///
/// Tracks connection sockets for readability. The listener is registered
/// separately under [`LISTENER_TOKEN`] and does not count against capacity.
pub struct Poller {
    poll: Poll,
    events: Events,
    capacity: usize,
    tracked: usize,
}

impl Poller {
    /// Create a poller tracking at most `capacity` connection sockets,
    /// returning at most `batch_size` ready sockets per `wait` call.
    pub fn new(capacity: usize, batch_size: usize) -> io::Result<Self> {
        Ok(Self {
            poll: Poll::new()?,
            events: Events::with_capacity(batch_size),
            capacity,
            tracked: 0,
        })
    }

    /// Register the listening socket for readability.
    pub fn register_listener(&mut self, listener: &mut TcpListener) -> io::Result<()> {
        self.poll
            .registry()
            .register(listener, LISTENER_TOKEN, Interest::READABLE)
    }

    /// Register a connection socket for readability under `token`.
    ///
    /// On failure the connection must be closed without entering the
    /// registry; it will never appear in a readiness batch.
    pub fn register(
        &mut self,
        stream: &mut TcpStream,
        token: Token,
    ) -> Result<(), RegistrationError> {
        if self.tracked >= self.capacity {
            return Err(RegistrationError::AtCapacity(self.capacity));
        }
        self.poll
            .registry()
            .register(stream, token, Interest::READABLE)
            .map_err(RegistrationError::Io)?;
        self.tracked += 1;
        Ok(())
    }

    /// Remove a connection socket from the tracked set.
    ///
    /// Idempotent: deregistering a socket that is not tracked is a no-op.
    pub fn deregister(&mut self, stream: &mut TcpStream) {
        if self.poll.registry().deregister(stream).is_ok() {
            self.tracked = self.tracked.saturating_sub(1);
        }
    }

    /// Block until at least one tracked socket is ready or `timeout`
    /// elapses, returning the ready tokens.
    ///
    /// An empty result is a spurious wakeup (or timeout), not an error;
    /// interrupted waits are reported the same way.
    pub fn wait(&mut self, timeout: Option<Duration>) -> io::Result<Vec<Token>> {
        match self.poll.poll(&mut self.events, timeout) {
            Ok(()) => {}
            Err(ref e) if e.kind() == io::ErrorKind::Interrupted => return Ok(Vec::new()),
            Err(e) => return Err(e),
        }
        Ok(self.events.iter().map(|event| event.token()).collect())
    }

    /// Number of connection sockets currently tracked.
    pub fn tracked(&self) -> usize {
        self.tracked
    }
}
