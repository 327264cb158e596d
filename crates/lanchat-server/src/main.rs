//! lanchat server
//!
//! Chat relay with a shared upload directory. Every connected client
//! sees every chat line and can list, upload and download files.

use anyhow::Result;
use clap::Parser;
use lanchat_core::server::{serve, ServerState};
use lanchat_core::{ServerConfig, DEFAULT_BUFFER_SIZE};
use std::path::PathBuf;
use std::time::Duration;
use tokio::net::TcpListener;
use tracing_subscriber::EnvFilter;

/// lanchat - chat server with shared file uploads
#[derive(Parser)]
#[command(name = "lanchat-server")]
#[command(author, version, about)]
struct Args {
    /// Listen address
    #[arg(short, long, default_value = "0.0.0.0:55555")]
    listen: String,

    /// Shared password; omit to accept everyone
    #[arg(short, long, default_value = "")]
    password: String,

    /// Directory for uploaded files
    #[arg(short, long, default_value = "server_files")]
    upload_dir: PathBuf,

    /// Chunk size in bytes for file payload I/O
    #[arg(long, default_value_t = DEFAULT_BUFFER_SIZE)]
    buffer_size: usize,

    /// Seconds to wait for a client's password before treating it as empty
    #[arg(long, default_value = "3")]
    password_timeout: u64,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let filter = if args.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::new("info")
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();

    let config = ServerConfig {
        password: args.password,
        upload_dir: args.upload_dir,
        buffer_size: args.buffer_size,
        password_timeout: Duration::from_secs(args.password_timeout),
    };

    let state = ServerState::new(config).await?;
    let listener = TcpListener::bind(&args.listen).await?;
    serve(listener, state).await?;
    Ok(())
}
