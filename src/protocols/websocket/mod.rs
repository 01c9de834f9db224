//! Minimal WebSocket framing (RFC 6455 subset).
//!
//! Only the client-to-server path the chat service needs: single-frame
//! text messages with the mandatory client mask. No handshake, no
//! fragmentation, no control frames — anything outside the subset is a
//! protocol error and the connection is torn down.

pub mod parser;
