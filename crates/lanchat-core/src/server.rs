//! Accept loop: one spawned task per connection.

use crate::config::ServerConfig;
use crate::error::Result;
use crate::hub::Hub;
use crate::session::Session;
use crate::store::FileStore;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::{info, warn};

/// Process-wide shared state: the configuration, the session registry
/// and the file store.
pub struct ServerState {
    /// Server configuration.
    pub config: ServerConfig,
    /// Live-session registry and fan-out.
    pub hub: Hub,
    /// Upload directory and metadata index.
    pub store: FileStore,
}

impl ServerState {
    /// Open the file store (reconciling it against the upload
    /// directory) and assemble the shared state.
    pub async fn new(config: ServerConfig) -> Result<Arc<Self>> {
        let store = FileStore::open(config.upload_dir.clone()).await?;
        Ok(Arc::new(Self {
            config,
            hub: Hub::new(),
            store,
        }))
    }
}

/// Run the accept loop forever. A single session's failure never
/// terminates the server; accept errors are logged and retried.
pub async fn serve(listener: TcpListener, state: Arc<ServerState>) -> Result<()> {
    info!(
        address = %listener.local_addr()?,
        upload_dir = ?state.config.upload_dir,
        auth = !state.config.password.is_empty(),
        "Server listening"
    );

    loop {
        let (socket, addr) = match listener.accept().await {
            Ok(conn) => conn,
            Err(e) => {
                warn!(error = %e, "Accept failed");
                continue;
            }
        };
        let state = Arc::clone(&state);
        tokio::spawn(async move {
            Session::run(socket, addr.to_string(), state).await;
        });
    }
}
