//! Per-connection state and the WebSocket read/write task pair.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use axum::extract::ws::{Message, WebSocket};
use futures::{SinkExt, StreamExt};
use metrics::{counter, gauge};
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use relay_core::ids::{ConnectionId, UserId};

use crate::context::ServerContext;
use crate::metrics::{WS_CONNECTIONS_ACTIVE, WS_CONNECTIONS_TOTAL, WS_DISCONNECTIONS_TOTAL};
use crate::websocket::handler;

/// A live client connection handle.
///
/// Owned by the registry and by the connection's read task. Pushing a frame
/// is `try_send` on a bounded queue — it never blocks and never awaits, so a
/// slow client cannot stall a fanout pass. Frames that don't fit are dropped
/// and counted.
pub struct ClientConnection {
    /// Unique id of this socket (not of the user).
    pub id: ConnectionId,
    /// User bound via `add-user`. Empty until the client identifies itself.
    user: Mutex<Option<UserId>>,
    outbound: mpsc::Sender<Arc<String>>,
    dropped: AtomicU64,
}

impl ClientConnection {
    /// Create a connection handle around an outbound frame queue.
    pub fn new(id: ConnectionId, outbound: mpsc::Sender<Arc<String>>) -> Self {
        Self {
            id,
            user: Mutex::new(None),
            outbound,
            dropped: AtomicU64::new(0),
        }
    }

    /// Bind (or rebind) this connection to a user identity.
    pub fn bind_user(&self, user: UserId) {
        *self.user.lock() = Some(user);
    }

    /// The currently bound user, if the client has identified itself.
    pub fn user_id(&self) -> Option<UserId> {
        self.user.lock().clone()
    }

    /// Queue a frame for delivery. Returns `false` if the queue was full or
    /// the socket already went away; the frame is dropped either way.
    pub fn send(&self, frame: Arc<String>) -> bool {
        match self.outbound.try_send(frame) {
            Ok(()) => true,
            Err(_) => {
                let _ = self.dropped.fetch_add(1, Ordering::Relaxed);
                false
            }
        }
    }

    /// Lifetime count of frames dropped on this connection.
    pub fn drop_count(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

/// Drive one accepted WebSocket until it closes.
///
/// Spawns a writer task draining the outbound queue, then runs the read loop
/// on the current task. On exit the connection is removed from the registry
/// (only if it is still the user's current handle) and the user's typing
/// timers are cancelled.
pub async fn serve_socket(socket: WebSocket, ctx: ServerContext) {
    let (queue_tx, mut queue_rx) = mpsc::channel::<Arc<String>>(ctx.settings.chat.outbound_queue);
    let conn = Arc::new(ClientConnection::new(ConnectionId::generate(), queue_tx));

    counter!(WS_CONNECTIONS_TOTAL).increment(1);
    gauge!(WS_CONNECTIONS_ACTIVE).increment(1.0);
    debug!(conn_id = %conn.id, "websocket connected");

    let (mut ws_tx, mut ws_rx) = socket.split();

    let writer = tokio::spawn(async move {
        while let Some(frame) = queue_rx.recv().await {
            if ws_tx.send(Message::Text(frame.as_str().into())).await.is_err() {
                break;
            }
        }
    });

    while let Some(incoming) = ws_rx.next().await {
        match incoming {
            Ok(Message::Text(text)) => handler::dispatch(&ctx, &conn, text.as_str()).await,
            Ok(Message::Close(_)) => break,
            // Pings are answered by the protocol layer; binary frames carry
            // no events.
            Ok(Message::Ping(_) | Message::Pong(_)) => {}
            Ok(Message::Binary(_)) => {
                warn!(conn_id = %conn.id, "dropping binary frame");
            }
            Err(e) => {
                debug!(conn_id = %conn.id, error = %e, "websocket read error");
                break;
            }
        }
    }

    teardown(&ctx, &conn).await;
    writer.abort();

    counter!(WS_DISCONNECTIONS_TOTAL).increment(1);
    gauge!(WS_CONNECTIONS_ACTIVE).decrement(1.0);
    debug!(conn_id = %conn.id, drops = conn.drop_count(), "websocket disconnected");
}

/// Deterministic disconnect cleanup: exactly one registry entry (the one
/// still pointing at this handle) and this user's typing timers. A reconnect
/// racing this teardown keeps its fresh handle.
async fn teardown(ctx: &ServerContext, conn: &Arc<ClientConnection>) {
    let removed = ctx.registry.unregister(conn).await;
    if let Some(user) = conn.user_id() {
        if removed {
            ctx.typing.clear_user(&user);
        }
        debug!(conn_id = %conn.id, user = %user, removed, "presence teardown");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn connection_with_capacity(capacity: usize) -> (ClientConnection, mpsc::Receiver<Arc<String>>) {
        let (tx, rx) = mpsc::channel(capacity);
        (ClientConnection::new(ConnectionId::new("c1"), tx), rx)
    }

    #[tokio::test]
    async fn send_queues_frame() {
        let (conn, mut rx) = connection_with_capacity(4);
        assert!(conn.send(Arc::new("hello".to_owned())));
        assert_eq!(&*rx.recv().await.unwrap(), "hello");
        assert_eq!(conn.drop_count(), 0);
    }

    #[tokio::test]
    async fn full_queue_drops_and_counts() {
        let (conn, _rx) = connection_with_capacity(1);
        assert!(conn.send(Arc::new("a".to_owned())));
        assert!(!conn.send(Arc::new("b".to_owned())));
        assert!(!conn.send(Arc::new("c".to_owned())));
        assert_eq!(conn.drop_count(), 2);
    }

    #[tokio::test]
    async fn send_after_receiver_dropped_counts_as_drop() {
        let (conn, rx) = connection_with_capacity(4);
        drop(rx);
        assert!(!conn.send(Arc::new("a".to_owned())));
        assert_eq!(conn.drop_count(), 1);
    }

    #[test]
    fn user_binding_is_latest_wins() {
        let (conn, _rx) = connection_with_capacity(1);
        assert_eq!(conn.user_id(), None);
        conn.bind_user(UserId::new("u1"));
        conn.bind_user(UserId::new("u2"));
        assert_eq!(conn.user_id(), Some(UserId::new("u2")));
    }
}
