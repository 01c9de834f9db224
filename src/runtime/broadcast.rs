//! Broadcast router: fans a decoded payload out to every peer.
//!
//! Writes are non-blocking and best-effort. A peer whose socket errors is
//! reported back as dead for the loop to tear down; it never aborts
//! delivery to the remaining peers and never surfaces to the origin.

use crate::runtime::connection::ConnectionRegistry;
use mio::net::TcpStream;
use std::io::{self, Write};

/// Prefix of the acknowledgment echoed to the sender.
pub const ACK_PREFIX: &[u8] = b"Received: ";

/// Relay `payload` to every active connection except `origin`, then write
/// the `Received: ` acknowledgment back to `origin`.
///
/// Returns the handles whose writes failed hard (including `origin` if the
/// ack failed); the caller tears those down. Fan-out order between peers is
/// unspecified.
pub fn route(registry: &mut ConnectionRegistry, origin: usize, payload: &[u8]) -> Vec<usize> {
    let mut dead = Vec::new();

    for id in registry.snapshot_peers_excluding(origin) {
        let Some(conn) = registry.get_mut(id) else {
            continue;
        };
        if write_best_effort(&mut conn.stream, payload).is_err() {
            dead.push(id);
        }
    }

    let mut ack = Vec::with_capacity(ACK_PREFIX.len() + payload.len());
    ack.extend_from_slice(ACK_PREFIX);
    ack.extend_from_slice(payload);

    if let Some(conn) = registry.get_mut(origin) {
        if write_best_effort(&mut conn.stream, &ack).is_err() {
            dead.push(origin);
        }
    }

    dead
}

/// Write as much of `buf` as the socket accepts without blocking.
///
/// `WouldBlock` drops the remainder (best-effort delivery keeps the loop
/// live); a zero-length write or any other error marks the peer dead.
pub fn write_best_effort(stream: &mut TcpStream, buf: &[u8]) -> io::Result<()> {
    let mut written = 0;
    while written < buf.len() {
        match stream.write(&buf[written..]) {
            Ok(0) => return Err(io::Error::new(io::ErrorKind::WriteZero, "write returned 0")),
            Ok(n) => written += n,
            Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => return Ok(()),
            Err(ref e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::connection::Connection;
    use mio::net::TcpStream;
    use std::io::Read;
    use std::time::Duration;

    fn pair() -> (TcpStream, std::net::TcpStream) {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let client = std::net::TcpStream::connect(addr).unwrap();
        let (accepted, _) = listener.accept().unwrap();
        accepted.set_nonblocking(true).unwrap();
        client
            .set_read_timeout(Some(Duration::from_secs(2)))
            .unwrap();
        (TcpStream::from_std(accepted), client)
    }

    fn insert_conn(registry: &mut ConnectionRegistry) -> (usize, std::net::TcpStream) {
        let (stream, client) = pair();
        let peer = client.local_addr().unwrap();
        let id = registry
            .insert(Connection::new(stream, peer, 4096))
            .unwrap();
        (id, client)
    }

    fn read_exact_bytes(client: &mut std::net::TcpStream, n: usize) -> Vec<u8> {
        let mut buf = vec![0u8; n];
        client.read_exact(&mut buf).unwrap();
        buf
    }

    #[test]
    fn test_fanout_and_ack() {
        let mut registry = ConnectionRegistry::new(8);
        let (a, mut client_a) = insert_conn(&mut registry);
        let (_b, mut client_b) = insert_conn(&mut registry);
        let (_c, mut client_c) = insert_conn(&mut registry);

        let dead = route(&mut registry, a, b"hi\n");
        assert!(dead.is_empty());

        assert_eq!(read_exact_bytes(&mut client_b, 3), b"hi\n");
        assert_eq!(read_exact_bytes(&mut client_c, 3), b"hi\n");
        // The sender gets the acknowledgment, never a copy of the payload.
        assert_eq!(read_exact_bytes(&mut client_a, 13), b"Received: hi\n");
    }

    #[test]
    fn test_dead_peer_does_not_abort_delivery() {
        let mut registry = ConnectionRegistry::new(8);
        let (a, mut client_a) = insert_conn(&mut registry);
        let (b, client_b) = insert_conn(&mut registry);
        let (_c, mut client_c) = insert_conn(&mut registry);

        // Kill B's socket so writes toward it fail.
        drop(client_b);
        let big = vec![b'x'; 1 << 20];
        // Drain B's error state: the first write after the peer closes can
        // still be accepted by the kernel, so push until it fails.
        let mut b_died = false;
        for _ in 0..64 {
            let conn = registry.get_mut(b).unwrap();
            if write_best_effort(&mut conn.stream, &big).is_err() {
                b_died = true;
                break;
            }
            std::thread::sleep(Duration::from_millis(10));
        }
        assert!(b_died);

        let dead = route(&mut registry, a, b"yo\n");
        assert_eq!(dead, vec![b]);

        // C and the origin are unaffected by B's failure.
        assert_eq!(read_exact_bytes(&mut client_c, 3), b"yo\n");
        assert_eq!(read_exact_bytes(&mut client_a, 13), b"Received: yo\n");
    }
}
