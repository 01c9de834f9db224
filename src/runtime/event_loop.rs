//! Single-threaded readiness event loop.
//!
//! One thread owns the poller, the registry, and all dispatch; `wait` is
//! the only blocking point. Ready sockets are drained with non-blocking
//! reads, decoded, and fanned out before the next `wait` call, so the
//! registry needs no synchronization by construction.

use crate::config::Config;
use crate::debug::ServerStats;
use crate::protocols::http::AssetStore;
use crate::runtime::broadcast;
use crate::runtime::connection::{Connection, ConnectionRegistry, ProtocolMode};
use crate::runtime::decoder::{decode, DecodeResult, Frame};
use crate::runtime::poller::{Poller, LISTENER_TOKEN};
use mio::net::TcpListener;
use mio::Token;
use std::io::{self, Read};
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// The readiness loop and everything it owns.
pub struct EventLoop {
    listener: TcpListener,
    poller: Poller,
    registry: ConnectionRegistry,
    buffer_size: usize,
    assets: Arc<AssetStore>,
    stats: Arc<ServerStats>,
    log_only: bool,
}

impl EventLoop {
    /// Bind the listening socket and set up the loop's resources.
    pub fn bind(
        config: &Config,
        assets: Arc<AssetStore>,
        stats: Arc<ServerStats>,
    ) -> io::Result<Self> {
        let addr: SocketAddr = format!("{}:{}", config.host, config.port)
            .parse()
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, e))?;

        let mut listener = TcpListener::from_std(create_listener(addr, config.backlog)?);

        let mut poller = Poller::new(config.max_connections, config.batch_size)?;
        poller.register_listener(&mut listener)?;

        Ok(Self {
            listener,
            poller,
            registry: ConnectionRegistry::new(config.max_connections),
            buffer_size: config.buffer_size,
            assets,
            stats,
            log_only: config.log_only,
        })
    }

    /// Address the listener actually bound to.
    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Run the loop. Only returns on a poller failure.
    pub fn run(mut self) -> io::Result<()> {
        info!(
            addr = %self.local_addr()?,
            max_connections = self.registry.capacity(),
            log_only = self.log_only,
            "Readiness loop started"
        );

        loop {
            let ready = self.poller.wait(None)?;

            for token in ready {
                match token {
                    LISTENER_TOKEN => self.accept_ready(),
                    Token(conn_id) => {
                        if let Err(e) = self.handle_readable(conn_id) {
                            debug!(conn_id, error = %e, "Connection error");
                            self.teardown(conn_id);
                        }
                    }
                }
            }
        }
    }

    /// Accept until the listener would block.
    ///
    /// A connection that cannot be registered is closed immediately and
    /// never enters the registry.
    fn accept_ready(&mut self) {
        loop {
            match self.listener.accept() {
                Ok((stream, peer_addr)) => {
                    let conn = Connection::new(stream, peer_addr, self.buffer_size);
                    let Some(conn_id) = self.registry.insert(conn) else {
                        warn!(peer = %peer_addr, "Connection limit reached, rejecting connection");
                        continue;
                    };

                    // Re-borrow after insert
                    let Some(conn) = self.registry.get_mut(conn_id) else {
                        continue;
                    };
                    if let Err(e) = self.poller.register(&mut conn.stream, Token(conn_id)) {
                        warn!(peer = %peer_addr, error = %e, "Failed to register connection");
                        self.registry.remove(&mut self.poller, conn_id);
                        continue;
                    }

                    self.stats.connection_opened();
                    debug!(
                        conn_id,
                        peer = %peer_addr,
                        active = self.registry.len(),
                        "Accepted connection"
                    );
                }
                Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => break,
                Err(e) => {
                    error!(error = %e, "Accept error");
                    break;
                }
            }
        }
    }

    /// Drain a readable connection and dispatch every complete frame.
    ///
    /// Returns `Err` when the connection must be torn down: end of stream,
    /// read failure, malformed frame, or a finished HTTP exchange.
    fn handle_readable(&mut self, conn_id: usize) -> io::Result<()> {
        // May already be gone if it died earlier in this batch.
        if !self.registry.contains(conn_id) {
            return Ok(());
        }

        // Readiness is edge-style: the kernel will not report this socket
        // again until new data arrives, so keep reading and decoding until
        // the socket is drained, not just until the buffer fills.
        loop {
            let mut eof = false;
            let mut drained = false;

            loop {
                let Some(conn) = self.registry.get_mut(conn_id) else {
                    return Ok(());
                };
                if conn.filled == conn.read_buf.len() {
                    break;
                }
                let filled = conn.filled;
                match conn.stream.read(&mut conn.read_buf[filled..]) {
                    Ok(0) => {
                        eof = true;
                        break;
                    }
                    Ok(n) => conn.filled += n,
                    Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => {
                        drained = true;
                        break;
                    }
                    Err(ref e) if e.kind() == io::ErrorKind::Interrupted => continue,
                    Err(e) => return Err(e),
                }
            }

            // Dispatch buffered frames before acting on the EOF so a message
            // that arrived together with the close is still delivered.
            loop {
                let Some(conn) = self.registry.get_mut(conn_id) else {
                    return Ok(());
                };
                if conn.filled == 0 {
                    break;
                }
                let filled = conn.filled;

                match decode(&conn.read_buf[..filled]) {
                    DecodeResult::Complete(frame, consumed) => {
                        if consumed < filled {
                            conn.read_buf.copy_within(consumed..filled, 0);
                        }
                        conn.filled = filled - consumed;

                        match frame {
                            Frame::Line(payload) => {
                                conn.classify(ProtocolMode::RawText);
                                self.dispatch_payload(conn_id, &payload);
                            }
                            Frame::WsText(payload) => {
                                conn.classify(ProtocolMode::WebSocket);
                                self.dispatch_payload(conn_id, &payload);
                            }
                            Frame::HttpRequest(request_line) => {
                                return self.respond_http(conn_id, &request_line);
                            }
                        }
                    }
                    DecodeResult::Incomplete => {
                        if filled == conn.read_buf.len() {
                            return Err(io::Error::new(
                                io::ErrorKind::InvalidData,
                                "frame exceeds read buffer",
                            ));
                        }
                        break;
                    }
                    DecodeResult::ProtocolError => {
                        return Err(io::Error::new(io::ErrorKind::InvalidData, "malformed frame"));
                    }
                }
            }

            if eof {
                return Err(io::Error::new(
                    io::ErrorKind::UnexpectedEof,
                    "peer closed connection",
                ));
            }
            if drained {
                return Ok(());
            }
            // The read stopped on a full buffer; decoding freed space above
            // (a full buffer with no complete frame already errored out).
        }
    }

    /// Broadcast a payload, tearing down any peer whose write failed.
    fn dispatch_payload(&mut self, origin: usize, payload: &[u8]) {
        if self.log_only {
            debug!(
                conn_id = origin,
                msg = %String::from_utf8_lossy(payload).trim_end(),
                "Inbound message (log-only mode)"
            );
            return;
        }

        let dead = broadcast::route(&mut self.registry, origin, payload);
        self.stats.message_routed();

        for id in dead {
            debug!(conn_id = id, "Peer write failed during fan-out");
            self.teardown(id);
        }
    }

    /// Serve the HTTP fallback response and end the connection.
    ///
    /// The returned error is the caller's teardown signal; an HTTP-handled
    /// connection never re-enters broadcast mode.
    fn respond_http(&mut self, conn_id: usize, request_line: &str) -> io::Result<()> {
        self.stats.http_request();
        let response = self.assets.respond(request_line);

        if let Some(conn) = self.registry.get_mut(conn_id) {
            if let Err(e) = broadcast::write_best_effort(&mut conn.stream, &response) {
                debug!(conn_id, error = %e, "HTTP response write failed");
            }
        }

        Err(io::Error::new(
            io::ErrorKind::ConnectionAborted,
            "http exchange complete",
        ))
    }

    fn teardown(&mut self, conn_id: usize) {
        if let Some(conn) = self.registry.get(conn_id) {
            debug!(conn_id, peer = %conn.peer_addr, mode = ?conn.mode, "Closing connection");
        }
        if self.registry.remove(&mut self.poller, conn_id) {
            self.stats.connection_closed();
        }
    }
}

/// Run the readiness-loop server until failure.
pub fn run(config: &Config, assets: Arc<AssetStore>, stats: Arc<ServerStats>) -> io::Result<()> {
    EventLoop::bind(config, assets, stats)?.run()
}

/// Create a TCP listener with the configured backlog.
fn create_listener(addr: SocketAddr, backlog: u32) -> io::Result<std::net::TcpListener> {
    let socket = socket2::Socket::new(
        match addr {
            SocketAddr::V4(_) => socket2::Domain::IPV4,
            SocketAddr::V6(_) => socket2::Domain::IPV6,
        },
        socket2::Type::STREAM,
        Some(socket2::Protocol::TCP),
    )?;

    socket.set_reuse_address(true)?;
    socket.set_nonblocking(true)?;
    socket.bind(&addr.into())?;
    socket.listen(backlog as i32)?;

    Ok(socket.into())
}
