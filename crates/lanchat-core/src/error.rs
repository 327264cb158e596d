//! Error types for the lanchat core.
//!
//! Every failure is local to one operation or one session; nothing in
//! this taxonomy ever terminates the server process.

use thiserror::Error;

/// Core error type for lanchat operations.
#[derive(Error, Debug)]
pub enum Error {
    /// Malformed nickname/password exchange. Terminates the connection
    /// before it is registered with the hub.
    #[error("handshake error: {0}")]
    Handshake(String),

    /// Password mismatch. The peer is told via `AUTH_FAILED` and the
    /// connection is closed.
    #[error("authentication failed")]
    Auth,

    /// Short read, decompression failure or disk write failure during a
    /// file transfer. Answered on the wire with `UPLOAD_ERROR`,
    /// `DOWNLOAD_ERROR` or `FILE_NOT_FOUND`; the session stays alive.
    #[error("transfer error: {0}")]
    Transfer(String),

    /// Unrecognized or truncated frame.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// Peer reset/abort/closure. The session is deregistered and a
    /// leave notification is broadcast; nothing propagates further.
    #[error("connection error: {0}")]
    Connection(String),

    /// Upload directory or index I/O failed.
    #[error("storage error: {0}")]
    Storage(String),
}

/// Result type alias using lanchat's Error.
pub type Result<T> = std::result::Result<T, Error>;

impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        Error::Connection(e.to_string())
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Storage(e.to_string())
    }
}
