//! HTTP fallback path.
//!
//! Plain `GET` requests arriving on the chat port are answered with a
//! small fixed set of static assets and the connection is closed; it never
//! re-enters broadcast mode. The same minimal response builder backs the
//! debug stats endpoint.

pub mod responder;

pub use responder::{build_response, is_request_line, AssetStore};
