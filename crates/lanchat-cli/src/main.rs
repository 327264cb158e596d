//! lanchat terminal client
//!
//! Connects to a lanchat server, relays chat, and uploads/downloads
//! shared files with `/` commands.

use anyhow::Result;
use clap::Parser;
use tracing_subscriber::EnvFilter;

mod client;

/// lanchat - chat client with shared file transfer
#[derive(Parser)]
#[command(name = "lanchat")]
#[command(author, version, about)]
pub struct Args {
    /// Server address
    #[arg(short, long, default_value = "127.0.0.1:55555")]
    server: String,

    /// Nickname shown to other users
    #[arg(short, long)]
    nickname: String,

    /// Server password, if the server requires one
    #[arg(short, long, default_value = "")]
    password: String,

    /// Directory downloads are saved into
    #[arg(short, long, default_value = ".")]
    download_dir: std::path::PathBuf,

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
        EnvFilter::new("warn")
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();

    client::run(args).await
}
