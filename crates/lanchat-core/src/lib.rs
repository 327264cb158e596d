//! # lanchat Core Library
//!
//! A small real-time chat service that also relays user-uploaded files
//! to every connected participant. The hard part lives here: the
//! per-connection handshake (nickname exchange, optional shared-password
//! authentication), the framed wire protocol that interleaves plain chat
//! broadcast with length-prefixed JSON envelopes and length-prefixed
//! binary file payloads, and the server-side file metadata store that is
//! kept consistent with a shared upload directory under concurrent access.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────┐
//! │            server (accept loop)         │
//! ├─────────────────────────────────────────┤
//! │   session    │     hub     │   store    │
//! ├─────────────────────────────────────────┤
//! │        transfer (gzip pipeline)         │
//! ├─────────────────────────────────────────┤
//! │          protocol (wire framing)        │
//! └─────────────────────────────────────────┘
//! ```
//!
//! One tokio task runs per accepted connection; the hub's session
//! registry and the store's index are the only process-wide mutable
//! state, each behind its own mutex.

#![forbid(unsafe_code)]
#![warn(missing_docs, rust_2018_idioms, clippy::all)]
#![deny(clippy::unwrap_used, clippy::expect_used)]

pub mod config;
pub mod error;
pub mod hub;
pub mod logging;
pub mod protocol;
pub mod server;
pub mod session;
pub mod store;
pub mod transfer;

pub use config::ServerConfig;
pub use error::{Error, Result};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Chunk size for file payload reads and writes (64 KiB).
pub const DEFAULT_BUFFER_SIZE: usize = 65536;

/// Upper bound on a single line-frame read.
///
/// The wire protocol is not delimiter-based: one read returns up to this
/// many bytes and readers re-synchronize on command prefixes and embedded
/// length fields.
pub const MAX_LINE_READ: usize = 65536;
