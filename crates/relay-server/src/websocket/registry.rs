//! Presence: the user → live-connection registry.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use tokio::sync::RwLock;
use tracing::debug;

use relay_core::ids::UserId;

use crate::websocket::connection::ClientConnection;

/// Maps each online user to their single live connection handle.
///
/// All three operations are atomic with respect to each other; the map is
/// the only shared state and nothing does I/O while holding its lock.
/// A fresh `register` for an already-online user supersedes the old handle
/// (last writer wins); `unregister` with a superseded handle is a no-op, so
/// a slow disconnect can never evict a newer connection.
pub struct ConnectionRegistry {
    connections: RwLock<HashMap<UserId, Arc<ClientConnection>>>,
    /// Tracked separately so presence counts never read-lock the map.
    online_count: AtomicUsize,
}

impl ConnectionRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self {
            connections: RwLock::new(HashMap::new()),
            online_count: AtomicUsize::new(0),
        }
    }

    /// Install (or overwrite) the mapping for a user.
    pub async fn register(&self, user: UserId, handle: Arc<ClientConnection>) {
        let mut conns = self.connections.write().await;
        if conns.insert(user.clone(), handle).is_none() {
            let _ = self.online_count.fetch_add(1, Ordering::Relaxed);
        }
        debug!(user = %user, "connection registered");
    }

    /// Remove the mapping still pointing at this handle.
    ///
    /// Reverse lookup goes through the handle's bound user; the entry is
    /// removed only if its current value **is** this handle. Returns whether
    /// an entry was removed.
    pub async fn unregister(&self, handle: &ClientConnection) -> bool {
        let Some(user) = handle.user_id() else {
            return false;
        };
        let mut conns = self.connections.write().await;
        let current = conns.get(&user).map(|c| c.id.clone());
        if current.as_ref() == Some(&handle.id) {
            let _ = conns.remove(&user);
            let _ = self.online_count.fetch_sub(1, Ordering::Relaxed);
            debug!(user = %user, "connection unregistered");
            true
        } else {
            // Superseded by a reconnect; the newer handle stays.
            false
        }
    }

    /// The user's live connection, if they are online.
    pub async fn lookup(&self, user: &UserId) -> Option<Arc<ClientConnection>> {
        self.connections.read().await.get(user).cloned()
    }

    /// Number of users currently online.
    pub fn online_count(&self) -> usize {
        self.online_count.load(Ordering::Relaxed)
    }
}

impl Default for ConnectionRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use relay_core::ids::ConnectionId;
    use tokio::sync::mpsc;

    fn make_connection(id: &str, user: &str) -> Arc<ClientConnection> {
        let (tx, _rx) = mpsc::channel(8);
        let conn = ClientConnection::new(ConnectionId::new(id), tx);
        conn.bind_user(UserId::new(user));
        Arc::new(conn)
    }

    #[tokio::test]
    async fn register_and_lookup() {
        let registry = ConnectionRegistry::new();
        let conn = make_connection("c1", "u1");
        registry.register(UserId::new("u1"), conn).await;

        let found = registry.lookup(&UserId::new("u1")).await.unwrap();
        assert_eq!(found.id, ConnectionId::new("c1"));
        assert_eq!(registry.online_count(), 1);
    }

    #[tokio::test]
    async fn lookup_offline_user_is_none() {
        let registry = ConnectionRegistry::new();
        assert!(registry.lookup(&UserId::new("nobody")).await.is_none());
    }

    #[tokio::test]
    async fn reconnect_supersedes_and_stale_unregister_is_noop() {
        let registry = ConnectionRegistry::new();
        let old = make_connection("c1", "u1");
        let new = make_connection("c2", "u1");

        registry.register(UserId::new("u1"), old.clone()).await;
        registry.register(UserId::new("u1"), new).await;
        assert_eq!(registry.online_count(), 1);

        // The old handle disconnects late; it must not evict the new one.
        assert!(!registry.unregister(&old).await);
        let current = registry.lookup(&UserId::new("u1")).await.unwrap();
        assert_eq!(current.id, ConnectionId::new("c2"));
        assert_eq!(registry.online_count(), 1);
    }

    #[tokio::test]
    async fn unregister_current_handle_removes_entry() {
        let registry = ConnectionRegistry::new();
        let conn = make_connection("c1", "u1");
        registry.register(UserId::new("u1"), conn.clone()).await;

        assert!(registry.unregister(&conn).await);
        assert!(registry.lookup(&UserId::new("u1")).await.is_none());
        assert_eq!(registry.online_count(), 0);
    }

    #[tokio::test]
    async fn unregister_unbound_connection_is_noop() {
        let registry = ConnectionRegistry::new();
        let (tx, _rx) = mpsc::channel(1);
        let unbound = ClientConnection::new(ConnectionId::new("c0"), tx);
        assert!(!registry.unregister(&unbound).await);
    }

    #[tokio::test]
    async fn online_count_consistent_across_overwrite() {
        let registry = ConnectionRegistry::new();
        registry
            .register(UserId::new("u1"), make_connection("c1", "u1"))
            .await;
        registry
            .register(UserId::new("u2"), make_connection("c2", "u2"))
            .await;
        // Overwrite u1 — count stays 2.
        let replacement = make_connection("c3", "u1");
        registry.register(UserId::new("u1"), replacement.clone()).await;
        assert_eq!(registry.online_count(), 2);

        assert!(registry.unregister(&replacement).await);
        assert_eq!(registry.online_count(), 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_churn_keeps_registry_consistent() {
        let registry = Arc::new(ConnectionRegistry::new());

        let mut tasks = Vec::new();
        for worker in 0..16 {
            let registry = Arc::clone(&registry);
            tasks.push(tokio::spawn(async move {
                let user = UserId::new(format!("u{worker}"));
                for round in 0..50 {
                    let conn = make_connection(&format!("c{worker}-{round}"), user.as_str());
                    registry.register(user.clone(), conn.clone()).await;
                    let _ = registry.lookup(&user).await;
                    assert!(registry.unregister(&conn).await);
                }
            }));
        }
        for task in tasks {
            task.await.unwrap();
        }

        assert_eq!(registry.online_count(), 0);
        for worker in 0..16 {
            assert!(
                registry
                    .lookup(&UserId::new(format!("u{worker}")))
                    .await
                    .is_none()
            );
        }
    }
}
