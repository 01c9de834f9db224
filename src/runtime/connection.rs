//! Connection state and the registry of currently open connections.
//!
//! The registry is the authoritative set: a connection is tracked by the
//! poller if and only if it is `Active` here, and removal sequences poller
//! deregistration before the socket drops so the two structures can never
//! disagree.

use crate::runtime::poller::Poller;
use mio::net::TcpStream;
use slab::Slab;
use std::net::SocketAddr;

/// Wire protocol observed on a connection.
///
/// Set on the first decoded frame; `Unclassified` until then.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProtocolMode {
    Unclassified,
    RawText,
    WebSocket,
}

/// Lifecycle state of a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnState {
    /// Registered with the poller, eligible for dispatch.
    Active,
    /// Teardown in progress; no longer eligible for dispatch.
    Closing,
    /// Removed from registry and poller; the socket drops next.
    Closed,
}

/// A single accepted client connection.
#[derive(Debug)]
pub struct Connection {
    pub stream: TcpStream,
    pub peer_addr: SocketAddr,
    pub mode: ProtocolMode,
    pub state: ConnState,
    /// Read-accumulation buffer; a frame must fit in it whole.
    pub read_buf: Vec<u8>,
    /// Bytes currently accumulated in `read_buf`.
    pub filled: usize,
}

impl Connection {
    /// Create a new connection in `Active` state with a fixed-size read
    /// buffer it owns for its whole lifetime.
    pub fn new(stream: TcpStream, peer_addr: SocketAddr, buffer_size: usize) -> Self {
        Self {
            stream,
            peer_addr,
            mode: ProtocolMode::Unclassified,
            state: ConnState::Active,
            read_buf: vec![0u8; buffer_size],
            filled: 0,
        }
    }

    /// Record the protocol observed on the first decoded frame.
    pub fn classify(&mut self, mode: ProtocolMode) {
        if self.mode == ProtocolMode::Unclassified {
            self.mode = mode;
        }
    }

    pub fn is_active(&self) -> bool {
        self.state == ConnState::Active
    }
}

/// Registry of active connections using slab allocation.
///
/// Provides O(1) insert, lookup, and remove; handles are slab indices and
/// double as poller tokens.
pub struct ConnectionRegistry {
    connections: Slab<Connection>,
    max_connections: usize,
}

impl ConnectionRegistry {
    /// Create a new registry with specified maximum capacity.
    pub fn new(max_connections: usize) -> Self {
        Self {
            connections: Slab::with_capacity(max_connections),
            max_connections,
        }
    }

    /// Insert a new connection into the registry.
    ///
    /// Returns `None` if the registry is at capacity.
    pub fn insert(&mut self, conn: Connection) -> Option<usize> {
        if self.connections.len() >= self.max_connections {
            return None;
        }
        Some(self.connections.insert(conn))
    }

    /// Get an immutable reference to a connection.
    pub fn get(&self, id: usize) -> Option<&Connection> {
        self.connections.get(id)
    }

    /// Get a mutable reference to a connection.
    pub fn get_mut(&mut self, id: usize) -> Option<&mut Connection> {
        self.connections.get_mut(id)
    }

    /// Check if a connection exists.
    pub fn contains(&self, id: usize) -> bool {
        self.connections.contains(id)
    }

    /// Number of active connections.
    pub fn len(&self) -> usize {
        self.connections.len()
    }

    /// Check if there are no connections.
    pub fn is_empty(&self) -> bool {
        self.connections.is_empty()
    }

    /// Maximum number of connections allowed.
    pub fn capacity(&self) -> usize {
        self.max_connections
    }

    /// Tear down a connection: remove it from the registry and deregister
    /// it from the poller, in that order, before the socket (and the read
    /// buffer it owns) are released on drop.
    ///
    /// Idempotent: removing an absent handle returns `false` and touches
    /// nothing else.
    pub fn remove(&mut self, poller: &mut Poller, id: usize) -> bool {
        if !self.connections.contains(id) {
            return false;
        }
        let mut conn = self.connections.remove(id);
        conn.state = ConnState::Closing;
        poller.deregister(&mut conn.stream);
        conn.state = ConnState::Closed;
        // conn drops here, releasing the socket after deregistration.
        true
    }

    /// Handles of all `Active` connections other than `exclude`.
    ///
    /// Returns an owned snapshot so fan-out iteration stays stable while
    /// peers are torn down mid-broadcast.
    pub fn snapshot_peers_excluding(&self, exclude: usize) -> Vec<usize> {
        self.connections
            .iter()
            .filter(|(id, conn)| *id != exclude && conn.is_active())
            .map(|(id, _)| id)
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mio::net::TcpStream;

    fn pair() -> (TcpStream, std::net::TcpStream, SocketAddr) {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let client = std::net::TcpStream::connect(addr).unwrap();
        let (accepted, peer) = listener.accept().unwrap();
        accepted.set_nonblocking(true).unwrap();
        (TcpStream::from_std(accepted), client, peer)
    }

    fn test_conn() -> (Connection, std::net::TcpStream) {
        let (stream, client, peer) = pair();
        (Connection::new(stream, peer, 64), client)
    }

    #[test]
    fn test_classify_sticks() {
        let (mut conn, _client) = test_conn();
        assert_eq!(conn.mode, ProtocolMode::Unclassified);

        conn.classify(ProtocolMode::WebSocket);
        assert_eq!(conn.mode, ProtocolMode::WebSocket);

        // First classification wins.
        conn.classify(ProtocolMode::RawText);
        assert_eq!(conn.mode, ProtocolMode::WebSocket);
    }

    #[test]
    fn test_registry_capacity() {
        let mut registry = ConnectionRegistry::new(2);
        let (c1, _k1) = test_conn();
        let (c2, _k2) = test_conn();
        let (c3, _k3) = test_conn();

        let id1 = registry.insert(c1).unwrap();
        registry.insert(c2).unwrap();
        assert!(registry.insert(c3).is_none());

        assert_eq!(registry.len(), 2);
        assert!(registry.get(id1).unwrap().is_active());
    }

    #[test]
    fn test_remove_is_idempotent() {
        let mut poller = Poller::new(8, 16).unwrap();
        let mut registry = ConnectionRegistry::new(4);

        let (conn, _client) = test_conn();
        let id = registry.insert(conn).unwrap();

        assert!(registry.remove(&mut poller, id));
        assert!(!registry.contains(id));

        // Removing an already-removed handle is a no-op.
        assert!(!registry.remove(&mut poller, id));
        assert!(registry.is_empty());
    }

    #[test]
    fn test_snapshot_excludes_origin_and_inactive() {
        let mut registry = ConnectionRegistry::new(4);
        let (a, _ka) = test_conn();
        let (b, _kb) = test_conn();
        let (c, _kc) = test_conn();

        let id_a = registry.insert(a).unwrap();
        let id_b = registry.insert(b).unwrap();
        let id_c = registry.insert(c).unwrap();

        let mut peers = registry.snapshot_peers_excluding(id_a);
        peers.sort_unstable();
        assert_eq!(peers, vec![id_b, id_c]);

        registry.get_mut(id_c).unwrap().state = ConnState::Closing;
        assert_eq!(registry.snapshot_peers_excluding(id_a), vec![id_b]);
    }
}
