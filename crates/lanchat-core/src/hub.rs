//! Broadcast hub: the registry of live authenticated sessions and the
//! fan-out primitive that delivers chat lines and system notifications.
//!
//! Fan-out is best-effort: a write failure on one session never aborts
//! delivery to the others. The failing session discovers its fate
//! through its own read loop.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::Mutex;
use tracing::debug;

/// Write half of a session's stream, shared between the hub's fan-out
/// and the session's own direct replies so that each stream preserves
/// write order.
pub type SharedWriter = Arc<Mutex<Box<dyn AsyncWrite + Send + Unpin>>>;

/// Wrap a write half for registration.
pub fn shared_writer(writer: impl AsyncWrite + Send + Unpin + 'static) -> SharedWriter {
    Arc::new(Mutex::new(Box::new(writer)))
}

/// Identifies one registered session.
pub type SessionId = u64;

struct Member {
    nickname: String,
    writer: SharedWriter,
}

/// The live-session registry.
#[derive(Default)]
pub struct Hub {
    sessions: Mutex<HashMap<SessionId, Member>>,
    next_id: AtomicU64,
}

impl Hub {
    /// Create an empty hub.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an authenticated session and return its id.
    pub async fn register(&self, nickname: &str, writer: SharedWriter) -> SessionId {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.sessions.lock().await.insert(
            id,
            Member {
                nickname: nickname.to_string(),
                writer,
            },
        );
        id
    }

    /// Remove a session, returning its nickname if it was registered.
    pub async fn deregister(&self, id: SessionId) -> Option<String> {
        self.sessions
            .lock()
            .await
            .remove(&id)
            .map(|m| m.nickname)
    }

    /// Number of registered sessions.
    pub async fn len(&self) -> usize {
        self.sessions.lock().await.len()
    }

    /// Whether no sessions are registered.
    pub async fn is_empty(&self) -> bool {
        self.sessions.lock().await.is_empty()
    }

    /// Write the same bytes to every registered session.
    ///
    /// The registry lock is released before any socket write so a slow
    /// peer cannot block registration; writers are snapshotted first.
    pub async fn broadcast(&self, bytes: &[u8]) {
        let targets: Vec<(SessionId, String, SharedWriter)> = {
            let sessions = self.sessions.lock().await;
            sessions
                .iter()
                .map(|(id, m)| (*id, m.nickname.clone(), m.writer.clone()))
                .collect()
        };

        for (id, nickname, writer) in targets {
            let mut writer = writer.lock().await;
            if let Err(e) = writer.write_all(bytes).await {
                debug!(session = id, nickname = %nickname, error = %e, "Broadcast write failed");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::AsyncReadExt;

    #[tokio::test]
    async fn test_broadcast_reaches_all_sessions() {
        let hub = Hub::new();
        let (a_read, a_write) = tokio::io::duplex(64);
        let (b_read, b_write) = tokio::io::duplex(64);
        hub.register("alice", shared_writer(a_write)).await;
        hub.register("bob", shared_writer(b_write)).await;
        assert_eq!(hub.len().await, 2);

        hub.broadcast(b"hello room").await;

        for mut reader in [a_read, b_read] {
            let mut buf = [0u8; 10];
            reader.read_exact(&mut buf).await.expect("read broadcast");
            assert_eq!(&buf, b"hello room");
        }
    }

    #[tokio::test]
    async fn test_failed_write_does_not_abort_fanout() {
        let hub = Hub::new();
        let (dead_read, dead_write) = tokio::io::duplex(64);
        let (mut live_read, live_write) = tokio::io::duplex(64);
        hub.register("dead", shared_writer(dead_write)).await;
        hub.register("live", shared_writer(live_write)).await;
        drop(dead_read);

        hub.broadcast(b"still here").await;

        let mut buf = [0u8; 10];
        live_read.read_exact(&mut buf).await.expect("live delivery");
        assert_eq!(&buf, b"still here");
    }

    #[tokio::test]
    async fn test_deregister_returns_nickname() {
        let hub = Hub::new();
        let (_read, write) = tokio::io::duplex(64);
        let id = hub.register("carol", shared_writer(write)).await;
        assert_eq!(hub.deregister(id).await.as_deref(), Some("carol"));
        assert!(hub.is_empty().await);
        assert!(hub.deregister(id).await.is_none());
    }
}
