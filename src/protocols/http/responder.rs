//! Static asset responder for the HTTP fallback path.
//!
//! Maps `GET / HTTP*` and `GET /favicon.ico HTTP*` to content loaded from
//! the wwwroot directory at startup, everything else to the 404 page. A
//! missing asset file degrades that route to a built-in body instead of
//! failing the process; the server keeps serving chat traffic either way.

use std::path::Path;
use tracing::warn;

const MIME_HTML: &str = "text/html";
const MIME_ICON: &str = "image/vnd.microsoft.icon";

const FALLBACK_404: &[u8] = b"<html><body><h1>404 Not Found</h1></body></html>\n";
const FALLBACK_500: &[u8] = b"<html><body><h1>500 Internal Server Error</h1></body></html>\n";

/// True if a decoded line is an HTTP request line for the fallback path.
pub fn is_request_line(line: &[u8]) -> bool {
    line.starts_with(b"GET")
}

/// Build a complete HTTP response: fixed header block plus body.
///
/// The header shape (status text always `OK`, bare `\n` line endings)
/// matches what clients of this service already parse. `Content-Length`
/// is always the exact body byte length.
pub fn build_response(status: u16, content_type: &str, body: &[u8]) -> Vec<u8> {
    let header = format!(
        "HTTP/1.1 {status} OK\nCache-Control: no-cache, private\nContent-Type: {content_type}\nContent-Length: {}\n\n",
        body.len()
    );

    let mut response = Vec::with_capacity(header.len() + body.len());
    response.extend_from_slice(header.as_bytes());
    response.extend_from_slice(body);
    response
}

/// Static content served on the fallback path.
///
/// Assets are read once at startup; each one is independently optional.
pub struct AssetStore {
    index: Option<Vec<u8>>,
    favicon: Option<Vec<u8>>,
    not_found: Option<Vec<u8>>,
}

impl AssetStore {
    /// Load assets from the wwwroot directory.
    ///
    /// Missing files are logged and degrade the affected route to a
    /// built-in body.
    pub fn load(root: &Path) -> Self {
        Self {
            index: read_asset(root, "index.html"),
            favicon: read_asset(root, "favicon.ico"),
            not_found: read_asset(root, "404.html"),
        }
    }

    /// An empty store; every route serves its built-in degraded body.
    pub fn empty() -> Self {
        Self {
            index: None,
            favicon: None,
            not_found: None,
        }
    }

    /// Map a request line to a full response.
    pub fn respond(&self, request_line: &str) -> Vec<u8> {
        if request_line.starts_with("GET / HTTP") {
            match &self.index {
                Some(body) => build_response(200, MIME_HTML, body),
                None => build_response(500, MIME_HTML, FALLBACK_500),
            }
        } else if request_line.starts_with("GET /favicon.ico HTTP") {
            match &self.favicon {
                Some(body) => build_response(200, MIME_ICON, body),
                None => build_response(500, MIME_HTML, FALLBACK_500),
            }
        } else {
            match &self.not_found {
                Some(body) => build_response(404, MIME_HTML, body),
                None => build_response(404, MIME_HTML, FALLBACK_404),
            }
        }
    }
}

fn read_asset(root: &Path, name: &str) -> Option<Vec<u8>> {
    let path = root.join(name);
    match std::fs::read(&path) {
        Ok(bytes) => Some(bytes),
        Err(e) => {
            warn!(path = %path.display(), error = %e, "Static asset unavailable, route degraded");
            None
        }
    }
}
