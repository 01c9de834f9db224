//! Load-generation client for the chat server.
//!
//! Opens N TCP connections and writes a fixed greeting per connection at a
//! fixed rate, as either raw text lines or masked WebSocket text frames.
//! Black-box only: it shares no code with the server and never reads what
//! comes back.

use clap::Parser;
use std::io::Write;
use std::net::TcpStream;
use std::thread;
use std::time::Duration;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

/// Command-line arguments for the load generator
#[derive(Parser, Debug)]
#[command(name = "loadgen")]
#[command(about = "TCP chat server load test client", long_about = None)]
struct CliArgs {
    /// Server IP
    #[arg(long, default_value = "127.0.0.1")]
    ip: String,

    /// Server port
    #[arg(short, long, default_value_t = 8000)]
    port: u16,

    /// Number of TCP connections
    #[arg(short, long, default_value_t = 1)]
    conn: usize,

    /// Send masked WebSocket text frames instead of raw lines
    #[arg(long)]
    websocket: bool,
}

fn main() {
    let args = CliArgs::parse();

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();

    let addr = format!("{}:{}", args.ip, args.port);
    info!(addr = %addr, conn = args.conn, websocket = args.websocket, "Connecting");

    let mut conns = Vec::with_capacity(args.conn);
    for i in 0..args.conn {
        match TcpStream::connect(&addr) {
            Ok(stream) => conns.push(stream),
            Err(e) => {
                error!(conn = i, error = %e, "Failed to connect");
                break;
            }
        }
    }

    info!(count = conns.len(), "Finished initializing connections");

    // One message per second per connection, tightened under large counts.
    let tts = if args.conn > 100 {
        Duration::from_millis(5)
    } else {
        Duration::from_secs(1)
    };

    loop {
        for (i, conn) in conns.iter_mut().enumerate() {
            thread::sleep(tts);

            info!(conn = i, "Sending message");

            let greeting = format!("Hello from conn {i}\n");
            let message = if args.websocket {
                // Rotate the mask key so frames are not all identical.
                let mask = (i as u32).wrapping_mul(2654435761).to_be_bytes();
                mask_frame(greeting.as_bytes(), mask)
            } else {
                greeting.into_bytes()
            };

            if let Err(e) = conn.write_all(&message) {
                error!(conn = i, error = %e, "Write failed");
            }
        }
    }
}

/// Encode a masked single-frame WebSocket text message (RFC 6455 subset,
/// payloads under 126 bytes).
fn mask_frame(payload: &[u8], mask: [u8; 4]) -> Vec<u8> {
    let mut frame = Vec::with_capacity(payload.len() + 6);
    frame.push(0x81);
    frame.push(0x80 | payload.len() as u8);
    frame.extend_from_slice(&mask);
    frame.extend(payload.iter().enumerate().map(|(i, b)| b ^ mask[i % 4]));
    frame
}
