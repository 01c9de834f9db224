//! Task-per-connection server variant.
//!
//! Every connection gets its own tokio reader task; the connection set is
//! owned exclusively by a coordinator task and reached only through a
//! message channel, so no map is ever mutated concurrently. Same decoder,
//! responder, and fan-out semantics as the readiness loop in
//! `crate::runtime`.

use crate::config::Config;
use crate::debug::ServerStats;
use crate::protocols::http::AssetStore;
use crate::runtime::broadcast::ACK_PREFIX;
use crate::runtime::decoder::{decode, DecodeResult, Frame};
use bytes::{Buf, BytesMut};
use std::collections::HashMap;
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tracing::{debug, error, info};

/// Registry traffic: every add, remove, and broadcast goes through the
/// coordinator's single event channel.
enum Event {
    Join {
        id: u64,
        peer: SocketAddr,
        outbound: mpsc::UnboundedSender<Vec<u8>>,
    },
    Leave {
        id: u64,
    },
    Inbound {
        id: u64,
        payload: Vec<u8>,
    },
}

/// Server instance for the tokio scheduling model.
pub struct Server {
    listener: TcpListener,
    assets: Arc<AssetStore>,
    stats: Arc<ServerStats>,
    log_only: bool,
    buffer_size: usize,
}

impl Server {
    /// Bind the listening socket.
    pub async fn bind(
        config: &Config,
        assets: Arc<AssetStore>,
        stats: Arc<ServerStats>,
    ) -> io::Result<Self> {
        let listener = TcpListener::bind((config.host.as_str(), config.port)).await?;
        Ok(Self {
            listener,
            assets,
            stats,
            log_only: config.log_only,
            buffer_size: config.buffer_size,
        })
    }

    /// Address the listener actually bound to.
    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Accept connections forever.
    pub async fn run(self) -> io::Result<()> {
        info!(
            addr = %self.local_addr()?,
            log_only = self.log_only,
            "Task-per-connection server listening"
        );

        let (events_tx, events_rx) = mpsc::unbounded_channel();
        tokio::spawn(coordinator(
            events_rx,
            Arc::clone(&self.stats),
            self.log_only,
        ));

        let mut next_id: u64 = 0;
        loop {
            match self.listener.accept().await {
                Ok((stream, peer_addr)) => {
                    let id = next_id;
                    next_id += 1;

                    debug!(conn_id = id, peer = %peer_addr, "Accepted connection");
                    self.stats.connection_opened();

                    let events = events_tx.clone();
                    let assets = Arc::clone(&self.assets);
                    let stats = Arc::clone(&self.stats);
                    let buffer_size = self.buffer_size;
                    tokio::spawn(async move {
                        handle_connection(id, stream, peer_addr, events, assets, stats, buffer_size)
                            .await;
                    });
                }
                Err(e) => {
                    error!(error = %e, "Failed to accept connection");
                }
            }
        }
    }
}

/// Exclusive owner of the connection map.
///
/// Processes joins, leaves, and inbound payloads in arrival order; a
/// connection's `Leave` always follows its own frames, so nothing is ever
/// routed to a removed peer.
async fn coordinator(
    mut events: mpsc::UnboundedReceiver<Event>,
    stats: Arc<ServerStats>,
    log_only: bool,
) {
    let mut peers: HashMap<u64, mpsc::UnboundedSender<Vec<u8>>> = HashMap::new();

    while let Some(event) = events.recv().await {
        match event {
            Event::Join { id, peer, outbound } => {
                debug!(conn_id = id, peer = %peer, "Peer joined");
                peers.insert(id, outbound);
            }
            Event::Leave { id } => {
                // Idempotent: a duplicate leave finds nothing to remove.
                if peers.remove(&id).is_some() {
                    debug!(conn_id = id, "Peer left");
                }
            }
            Event::Inbound { id, payload } => {
                if log_only {
                    debug!(
                        conn_id = id,
                        msg = %String::from_utf8_lossy(&payload).trim_end(),
                        "Inbound message (log-only mode)"
                    );
                    continue;
                }

                let mut ack = Vec::with_capacity(ACK_PREFIX.len() + payload.len());
                ack.extend_from_slice(ACK_PREFIX);
                ack.extend_from_slice(&payload);

                for (peer_id, outbound) in &peers {
                    let msg = if *peer_id == id {
                        ack.clone()
                    } else {
                        payload.clone()
                    };
                    // A failed send means the peer's writer is gone; its
                    // own Leave event performs the removal.
                    let _ = outbound.send(msg);
                }
                stats.message_routed();
            }
        }
    }
}

/// Read loop for one connection.
///
/// Decoded text frames go to the coordinator; an HTTP request line gets
/// the fallback response and ends the connection. Teardown is driven by
/// EOF, read failure, or a malformed frame.
async fn handle_connection(
    id: u64,
    stream: TcpStream,
    peer_addr: SocketAddr,
    events: mpsc::UnboundedSender<Event>,
    assets: Arc<AssetStore>,
    stats: Arc<ServerStats>,
    buffer_size: usize,
) {
    let (mut reader, mut writer) = stream.into_split();
    let (outbound_tx, mut outbound_rx) = mpsc::unbounded_channel::<Vec<u8>>();

    if events
        .send(Event::Join {
            id,
            peer: peer_addr,
            outbound: outbound_tx.clone(),
        })
        .is_err()
    {
        stats.connection_closed();
        return;
    }

    // Writer task: drains outbound messages so a slow peer never blocks
    // the coordinator.
    let writer_task = tokio::spawn(async move {
        while let Some(msg) = outbound_rx.recv().await {
            if writer.write_all(&msg).await.is_err() {
                break;
            }
        }
    });

    let mut buffer = BytesMut::with_capacity(buffer_size);

    'conn: loop {
        match reader.read_buf(&mut buffer).await {
            Ok(0) => break,
            Ok(_) => {}
            Err(e) => {
                debug!(conn_id = id, error = %e, "Read failed");
                break;
            }
        }

        loop {
            match decode(&buffer) {
                DecodeResult::Complete(frame, consumed) => {
                    buffer.advance(consumed);
                    match frame {
                        Frame::Line(payload) | Frame::WsText(payload) => {
                            if events.send(Event::Inbound { id, payload }).is_err() {
                                break 'conn;
                            }
                        }
                        Frame::HttpRequest(request_line) => {
                            stats.http_request();
                            let _ = outbound_tx.send(assets.respond(&request_line));
                            break 'conn;
                        }
                    }
                }
                DecodeResult::Incomplete => {
                    // Same bound the readiness loop enforces: a frame must
                    // fit within one read buffer, or the connection goes.
                    if buffer.len() >= buffer_size {
                        debug!(conn_id = id, "Frame exceeds read buffer");
                        break 'conn;
                    }
                    break;
                }
                DecodeResult::ProtocolError => {
                    debug!(conn_id = id, "Malformed frame");
                    break 'conn;
                }
            }
        }
    }

    let _ = events.send(Event::Leave { id });
    stats.connection_closed();
    debug!(conn_id = id, "Connection closed");

    // Dropping our sender lets the writer finish once the coordinator has
    // processed the leave and dropped its clone.
    drop(outbound_tx);
    let _ = writer_task.await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::AsyncReadExt;
    use tokio::time::{sleep, timeout, Duration};

    async fn start_server(log_only: bool) -> SocketAddr {
        let mut config = Config::for_tests();
        config.log_only = log_only;
        let server = Server::bind(&config, Arc::new(AssetStore::empty()), ServerStats::new())
            .await
            .unwrap();
        let addr = server.local_addr().unwrap();
        tokio::spawn(async move {
            let _ = server.run().await;
        });
        addr
    }

    async fn read_exact_bytes(stream: &mut TcpStream, n: usize) -> Vec<u8> {
        let mut buf = vec![0u8; n];
        timeout(Duration::from_secs(5), stream.read_exact(&mut buf))
            .await
            .expect("read timed out")
            .unwrap();
        buf
    }

    #[tokio::test]
    async fn test_broadcast_scenario() {
        let addr = start_server(false).await;

        let mut a = TcpStream::connect(addr).await.unwrap();
        let mut b = TcpStream::connect(addr).await.unwrap();
        let mut c = TcpStream::connect(addr).await.unwrap();
        sleep(Duration::from_millis(200)).await;

        a.write_all(b"hi\n").await.unwrap();
        assert_eq!(read_exact_bytes(&mut b, 3).await, b"hi\n");
        assert_eq!(read_exact_bytes(&mut c, 3).await, b"hi\n");
        assert_eq!(read_exact_bytes(&mut a, 13).await, b"Received: hi\n");

        // B leaves; the coordinator must process the leave before C's
        // next send.
        drop(b);
        sleep(Duration::from_millis(200)).await;

        c.write_all(b"yo\n").await.unwrap();
        assert_eq!(read_exact_bytes(&mut a, 3).await, b"yo\n");
        assert_eq!(read_exact_bytes(&mut c, 13).await, b"Received: yo\n");
    }

    #[tokio::test]
    async fn test_http_fallback() {
        let addr = start_server(false).await;

        let mut client = TcpStream::connect(addr).await.unwrap();
        client.write_all(b"GET / HTTP/1.1\r\n").await.unwrap();

        let mut response = Vec::new();
        timeout(Duration::from_secs(5), client.read_to_end(&mut response))
            .await
            .expect("read timed out")
            .unwrap();

        let response = String::from_utf8(response).unwrap();
        // Empty asset store degrades the index route to a 500.
        assert!(response.starts_with("HTTP/1.1 500 OK\n"));
    }

    #[tokio::test]
    async fn test_oversized_line_closes_connection() {
        let addr = start_server(false).await;

        let mut client = TcpStream::connect(addr).await.unwrap();
        let long = vec![b'x'; 8192];
        client.write_all(&long).await.unwrap();

        let mut buf = [0u8; 16];
        match timeout(Duration::from_secs(5), client.read(&mut buf))
            .await
            .expect("read timed out")
        {
            Ok(n) => assert_eq!(n, 0),
            Err(e) => assert!(matches!(
                e.kind(),
                io::ErrorKind::ConnectionReset | io::ErrorKind::ConnectionAborted
            )),
        }
    }

    #[tokio::test]
    async fn test_unmasked_frame_closes_connection() {
        let addr = start_server(false).await;

        let mut client = TcpStream::connect(addr).await.unwrap();
        client
            .write_all(&[0x81, 0x05, b'h', b'e', b'l', b'l', b'o'])
            .await
            .unwrap();

        let mut buf = [0u8; 16];
        let n = timeout(Duration::from_secs(5), client.read(&mut buf))
            .await
            .expect("read timed out")
            .unwrap();
        assert_eq!(n, 0);
    }
}
