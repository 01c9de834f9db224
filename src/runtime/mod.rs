//! Custom runtime for the readiness-based chat server.
//!
//! One thread, one poller, one registry: mio (epoll on Linux, kqueue on
//! macOS) reports ready sockets in O(1) of the ready count, and all
//! decode/broadcast work for a batch runs before the next wait.
//!
//! Shared abstractions:
//! - `ConnectionRegistry`: the authoritative connection set; each
//!   connection owns its fixed read buffer
//! - `Poller`: register/deregister/wait over the OS readiness facility
//! - `decoder`/`broadcast`: frame decoding and fan-out, shared with the
//!   task-per-connection variant in `crate::server`

pub mod broadcast;
pub mod connection;
pub mod decoder;
mod event_loop;
pub mod poller;

use crate::config::Config;
use crate::debug::ServerStats;
use crate::protocols::http::AssetStore;
use std::sync::Arc;

/// Run the readiness-loop server.
pub fn run(
    config: &Config,
    assets: Arc<AssetStore>,
    stats: Arc<ServerStats>,
) -> std::io::Result<()> {
    event_loop::run(config, assets, stats)
}
