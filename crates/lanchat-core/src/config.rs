//! Server configuration.

use crate::DEFAULT_BUFFER_SIZE;
use std::path::PathBuf;
use std::time::Duration;

/// Configuration consumed by the core. Loading it (CLI flags, config
/// files, prompts) is the binary's business.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Shared password. Empty means no authentication: any supplied
    /// password is accepted.
    pub password: String,
    /// Directory holding uploaded files. Created if missing.
    pub upload_dir: PathBuf,
    /// Chunk size for length-prefixed payload reads and writes.
    pub buffer_size: usize,
    /// How long to wait for the password length prefix before treating
    /// the password as empty. A leniency for old clients, not a
    /// security boundary.
    pub password_timeout: Duration,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            password: String::new(),
            upload_dir: PathBuf::from("server_files"),
            buffer_size: DEFAULT_BUFFER_SIZE,
            password_timeout: Duration::from_secs(3),
        }
    }
}
