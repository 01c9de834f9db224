//! Runtime stats and the debug HTTP endpoint.
//!
//! A plain-thread listener on a separate port renders process counters as
//! `text/plain`, the profiling-endpoint counterpart of the chat port. It
//! shares the fallback path's response builder and never affects chat
//! service availability: a bind failure is logged and ignored.

use crate::protocols::http::build_response;
use std::io::{Read, Write};
use std::net::TcpListener;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// Counters shared between the runtime and the debug endpoint.
pub struct ServerStats {
    connections: AtomicUsize,
    messages_routed: AtomicU64,
    http_requests: AtomicU64,
    started: Instant,
}

impl ServerStats {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            connections: AtomicUsize::new(0),
            messages_routed: AtomicU64::new(0),
            http_requests: AtomicU64::new(0),
            started: Instant::now(),
        })
    }

    pub fn connection_opened(&self) {
        self.connections.fetch_add(1, Ordering::Relaxed);
    }

    pub fn connection_closed(&self) {
        self.connections.fetch_sub(1, Ordering::Relaxed);
    }

    pub fn message_routed(&self) {
        self.messages_routed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn http_request(&self) {
        self.http_requests.fetch_add(1, Ordering::Relaxed);
    }

    pub fn connections(&self) -> usize {
        self.connections.load(Ordering::Relaxed)
    }

    /// Render the counters as the stats page body.
    pub fn render(&self) -> String {
        format!(
            "connections: {}\nmessages_routed: {}\nhttp_requests: {}\nuptime_seconds: {}\n",
            self.connections.load(Ordering::Relaxed),
            self.messages_routed.load(Ordering::Relaxed),
            self.http_requests.load(Ordering::Relaxed),
            self.started.elapsed().as_secs(),
        )
    }
}

/// Start the debug endpoint on `127.0.0.1:<port>` in a background thread.
///
/// Any request gets the stats page; clients are served one at a time and
/// closed after the response.
pub fn spawn(port: u16, stats: Arc<ServerStats>) {
    let listener = match TcpListener::bind(("127.0.0.1", port)) {
        Ok(listener) => listener,
        Err(e) => {
            warn!(port, error = %e, "Debug endpoint unavailable");
            return;
        }
    };

    debug!(port, "Debug endpoint listening");

    thread::spawn(move || {
        for stream in listener.incoming() {
            let Ok(mut stream) = stream else { continue };
            let _ = stream.set_read_timeout(Some(Duration::from_secs(2)));

            // Consume the request line; the content is irrelevant.
            let mut scratch = [0u8; 512];
            let _ = stream.read(&mut scratch);

            let response = build_response(200, "text/plain", stats.render().as_bytes());
            let _ = stream.write_all(&response);
        }
    });
}
