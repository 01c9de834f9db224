//! Protocol implementations.
//!
//! Each wire format accepted on the chat port has a parser module used by
//! the runtime event loops:
//! - `text`: newline-terminated UTF-8 lines
//! - `websocket`: minimal RFC 6455 client-frame subset
//! - `http`: request-line detection and the static fallback responder

pub mod http;
pub mod text;
pub mod websocket;
