//! The per-connection event dispatch table.
//!
//! One receive loop per connection decodes frames at the boundary and
//! dispatches on the event kind through the single `match` below. Transport
//! framing never leaks past this module, and a malformed frame is rejected
//! here — it cannot crash the dispatch loop or reach the fanout core.

use std::sync::Arc;

use chrono::Utc;
use metrics::counter;
use tracing::warn;

use relay_core::ids::{ChatId, MessageId, UserId};
use relay_core::protocol::{ClientEvent, ServerEvent};
use relay_core::status::MessageStatus;

use crate::chat::fanout::FanoutEvent;
use crate::context::ServerContext;
use crate::metrics::{MESSAGES_PERSISTED_TOTAL, PERSIST_FAILURES_TOTAL, PROTOCOL_ERRORS_TOTAL};
use crate::store::StoredMessage;
use crate::websocket::connection::ClientConnection;

/// Decode one frame and route it to the owning component.
pub async fn dispatch(ctx: &ServerContext, conn: &Arc<ClientConnection>, frame: &str) {
    let event = match ClientEvent::decode(frame) {
        Ok(event) => event,
        Err(e) => {
            counter!(PROTOCOL_ERRORS_TOTAL).increment(1);
            warn!(conn_id = %conn.id, error = %e, "rejected malformed frame");
            return;
        }
    };

    match event {
        ClientEvent::AddUser { user_id } => handle_add_user(ctx, conn, user_id).await,
        ClientEvent::SendMsg { to, from, msg, message_id, reply_to } => {
            handle_send_msg(ctx, to, from, msg, message_id, reply_to).await;
        }
        ClientEvent::Typing { to, from, is_typing } => {
            if is_typing {
                ctx.typing.on_typing(&to, &from);
            } else {
                ctx.typing.on_stop_typing(&to, &from);
            }
            let _ = ctx
                .fanout
                .dispatch(&from, &to, FanoutEvent::Typing { is_typing })
                .await;
        }
        ClientEvent::StopTyping { to, from } => {
            ctx.typing.on_stop_typing(&to, &from);
            let _ = ctx.fanout.dispatch(&from, &to, FanoutEvent::StopTyping).await;
        }
        ClientEvent::MessageDelivered { to, from, message_id } => {
            ctx.status.on_delivered(&message_id, &from, &to).await;
        }
        ClientEvent::MessageSeen { to, from, message_id } => {
            ctx.status.on_seen(&message_id, &from, &to).await;
        }
    }
}

/// Bind the connection to a user and install it as their live handle.
/// Re-identifying on the same socket first releases the old binding, so a
/// connection never holds two registry entries.
async fn handle_add_user(ctx: &ServerContext, conn: &Arc<ClientConnection>, user: UserId) {
    if let Some(previous) = conn.user_id() {
        if previous != user {
            let _ = ctx.registry.unregister(conn).await;
        }
    }
    conn.bind_user(user.clone());
    ctx.registry.register(user, Arc::clone(conn)).await;
}

/// Route a message to live recipients, then persist it.
///
/// The two halves are independent: fanout is not gated on the store and the
/// store is not gated on anyone being online. Only persistence moves the
/// sender-visible status from `sending` to `sent`; a store failure reports
/// `msg-failed` back to the sender and leaves the status where it was.
async fn handle_send_msg(
    ctx: &ServerContext,
    to: ChatId,
    from: UserId,
    msg: String,
    message_id: MessageId,
    reply_to: Option<MessageId>,
) {
    ctx.status.begin(&message_id);

    let _ = ctx
        .fanout
        .dispatch(
            &from,
            &to,
            FanoutEvent::Message {
                body: &msg,
                message_id: &message_id,
                reply_to: reply_to.as_ref(),
            },
        )
        .await;

    let message = StoredMessage {
        id: message_id.clone(),
        sender: from.clone(),
        chat: to,
        body: msg,
        reply_to,
        status: MessageStatus::Sending,
        created_at: Utc::now(),
    };
    match ctx.store.persist(&message).await {
        Ok(()) => {
            counter!(MESSAGES_PERSISTED_TOTAL).increment(1);
            ctx.status.mark_sent(&message_id);
        }
        Err(e) => {
            counter!(PERSIST_FAILURES_TOTAL).increment(1);
            warn!(message_id = %message_id, error = %e, "persistence failed");
            report_failure(ctx, &from, &message_id, &e.to_string()).await;
        }
    }
}

async fn report_failure(ctx: &ServerContext, sender: &UserId, message_id: &MessageId, error: &str) {
    let event = ServerEvent::MsgFailed {
        message_id: message_id.clone(),
        error: error.to_owned(),
    };
    let Ok(frame) = event.encode() else { return };
    if let Some(conn) = ctx.registry.lookup(sender).await {
        let _ = conn.send(frame);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chat::fanout::FanoutDispatcher;
    use crate::chat::resolver::{
        ChatTargetResolver, DirectoryError, GroupDirectory, GroupRecord,
    };
    use crate::chat::status::MessageStatusTracker;
    use crate::chat::typing::TypingCoordinator;
    use crate::settings::RelaySettings;
    use crate::store::tests::RecordingStore;
    use crate::store::MessageStore;
    use crate::websocket::registry::ConnectionRegistry;
    use async_trait::async_trait;
    use relay_core::ids::{ConnectionId, GroupId};
    use std::collections::HashMap;
    use std::time::Duration;
    use tokio::sync::mpsc;

    struct StaticDirectory {
        groups: HashMap<GroupId, GroupRecord>,
    }

    #[async_trait]
    impl GroupDirectory for StaticDirectory {
        async fn get_group(&self, id: &GroupId) -> Result<Option<GroupRecord>, DirectoryError> {
            Ok(self.groups.get(id).cloned())
        }
    }

    fn test_context(group_members: &[&str]) -> (ServerContext, Arc<RecordingStore>) {
        let mut groups = HashMap::new();
        let _ = groups.insert(
            GroupId::new("g1"),
            GroupRecord {
                name: "ops".into(),
                members: group_members.iter().map(|m| UserId::new(*m)).collect(),
            },
        );

        let registry = Arc::new(ConnectionRegistry::new());
        let resolver = ChatTargetResolver::new(Arc::new(StaticDirectory { groups }));
        let fanout = Arc::new(FanoutDispatcher::new(Arc::clone(&registry), resolver));
        let typing = Arc::new(TypingCoordinator::new(
            Arc::clone(&fanout),
            Duration::from_secs(2),
        ));
        let store = Arc::new(RecordingStore::default());
        let status = Arc::new(MessageStatusTracker::new(
            Arc::clone(&registry),
            Arc::clone(&store) as Arc<dyn MessageStore>,
        ));

        let ctx = ServerContext {
            registry,
            fanout,
            typing,
            status,
            store: Arc::clone(&store) as Arc<dyn MessageStore>,
            settings: Arc::new(RelaySettings::default()),
        };
        (ctx, store)
    }

    fn make_conn() -> (Arc<ClientConnection>, mpsc::Receiver<Arc<String>>) {
        let (tx, rx) = mpsc::channel(8);
        (
            Arc::new(ClientConnection::new(ConnectionId::generate(), tx)),
            rx,
        )
    }

    async fn add_user(ctx: &ServerContext, conn: &Arc<ClientConnection>, user: &str) {
        dispatch(
            ctx,
            conn,
            &format!(r#"{{"event":"add-user","userId":"{user}"}}"#),
        )
        .await;
    }

    #[tokio::test]
    async fn add_user_registers_the_connection() {
        let (ctx, _store) = test_context(&[]);
        let (conn, _rx) = make_conn();
        add_user(&ctx, &conn, "u1").await;

        assert_eq!(conn.user_id(), Some(UserId::new("u1")));
        assert!(ctx.registry.lookup(&UserId::new("u1")).await.is_some());
    }

    #[tokio::test]
    async fn rebinding_releases_the_previous_identity() {
        let (ctx, _store) = test_context(&[]);
        let (conn, _rx) = make_conn();
        add_user(&ctx, &conn, "u1").await;
        add_user(&ctx, &conn, "u2").await;

        assert!(ctx.registry.lookup(&UserId::new("u1")).await.is_none());
        assert!(ctx.registry.lookup(&UserId::new("u2")).await.is_some());
    }

    #[tokio::test]
    async fn send_msg_fans_out_persists_and_marks_sent() {
        let (ctx, store) = test_context(&[]);
        let (sender, _sender_rx) = make_conn();
        let (peer, mut peer_rx) = make_conn();
        add_user(&ctx, &sender, "a").await;
        add_user(&ctx, &peer, "b").await;

        dispatch(
            &ctx,
            &sender,
            r#"{"event":"send-msg","to":"b","from":"a","msg":"hi","messageId":"m1"}"#,
        )
        .await;

        let frame: serde_json::Value =
            serde_json::from_str(&peer_rx.try_recv().unwrap()).unwrap();
        assert_eq!(frame["event"], "msg-recieve");
        assert_eq!(frame["msg"], "hi");

        assert_eq!(store.persisted().len(), 1);
        assert_eq!(store.persisted()[0].chat, ChatId::new("b"));
        assert_eq!(
            ctx.status.status_of(&MessageId::new("m1")),
            Some(MessageStatus::Sent)
        );
    }

    #[tokio::test]
    async fn send_msg_to_offline_peer_still_persists() {
        let (ctx, store) = test_context(&[]);
        let (sender, _sender_rx) = make_conn();
        add_user(&ctx, &sender, "a").await;

        dispatch(
            &ctx,
            &sender,
            r#"{"event":"send-msg","to":"b","from":"a","msg":"hi","messageId":"m1"}"#,
        )
        .await;

        assert_eq!(store.persisted().len(), 1);
        assert_eq!(
            ctx.status.status_of(&MessageId::new("m1")),
            Some(MessageStatus::Sent)
        );
    }

    #[tokio::test]
    async fn persist_failure_reports_to_sender_and_stays_sending() {
        let (ctx, store) = test_context(&[]);
        let (sender, mut sender_rx) = make_conn();
        let (peer, mut peer_rx) = make_conn();
        add_user(&ctx, &sender, "a").await;
        add_user(&ctx, &peer, "b").await;
        store.fail_persists();

        dispatch(
            &ctx,
            &sender,
            r#"{"event":"send-msg","to":"b","from":"a","msg":"hi","messageId":"m1"}"#,
        )
        .await;

        // Routing already happened; persistence failed afterwards.
        let routed: serde_json::Value =
            serde_json::from_str(&peer_rx.try_recv().unwrap()).unwrap();
        assert_eq!(routed["event"], "msg-recieve");

        let failure: serde_json::Value =
            serde_json::from_str(&sender_rx.try_recv().unwrap()).unwrap();
        assert_eq!(failure["event"], "msg-failed");
        assert_eq!(failure["messageId"], "m1");

        assert_eq!(
            ctx.status.status_of(&MessageId::new("m1")),
            Some(MessageStatus::Sending)
        );
        // No status fanout to anyone.
        assert!(sender_rx.try_recv().is_err());
        assert!(peer_rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn group_send_reaches_members_except_sender() {
        let (ctx, _store) = test_context(&["a", "b", "c"]);
        let (a, mut rx_a) = make_conn();
        let (b, mut rx_b) = make_conn();
        let (c, mut rx_c) = make_conn();
        add_user(&ctx, &a, "a").await;
        add_user(&ctx, &b, "b").await;
        add_user(&ctx, &c, "c").await;

        dispatch(
            &ctx,
            &a,
            r#"{"event":"send-msg","to":"g1","from":"a","msg":"hi","messageId":"m1"}"#,
        )
        .await;

        for rx in [&mut rx_b, &mut rx_c] {
            let frame: serde_json::Value =
                serde_json::from_str(&rx.try_recv().unwrap()).unwrap();
            assert_eq!(frame["event"], "msg-recieve");
            assert_eq!(frame["isGroup"], true);
            assert_eq!(frame["groupName"], "ops");
        }
        assert!(rx_a.try_recv().is_err());
    }

    #[tokio::test]
    async fn delivery_acks_flow_back_to_the_sender() {
        let (ctx, _store) = test_context(&[]);
        let (a, mut rx_a) = make_conn();
        let (b, _rx_b) = make_conn();
        add_user(&ctx, &a, "a").await;
        add_user(&ctx, &b, "b").await;

        dispatch(
            &ctx,
            &a,
            r#"{"event":"send-msg","to":"b","from":"a","msg":"hi","messageId":"m1"}"#,
        )
        .await;

        dispatch(
            &ctx,
            &b,
            r#"{"event":"message-delivered","to":"b","from":"a","messageId":"m1"}"#,
        )
        .await;
        let delivered: serde_json::Value =
            serde_json::from_str(&rx_a.try_recv().unwrap()).unwrap();
        assert_eq!(delivered["event"], "msg-delivered");

        dispatch(
            &ctx,
            &b,
            r#"{"event":"message-seen","to":"b","from":"a","messageId":"m1"}"#,
        )
        .await;
        let seen: serde_json::Value =
            serde_json::from_str(&rx_a.try_recv().unwrap()).unwrap();
        assert_eq!(seen["event"], "msg-seen");
    }

    #[tokio::test]
    async fn malformed_frames_are_rejected_without_side_effects() {
        let (ctx, store) = test_context(&[]);
        let (conn, _rx) = make_conn();

        dispatch(&ctx, &conn, "not json at all").await;
        dispatch(&ctx, &conn, r#"{"event":"no-such-event"}"#).await;
        dispatch(&ctx, &conn, r#"{"event":"send-msg","to":"b"}"#).await;

        assert_eq!(ctx.registry.online_count(), 0);
        assert!(store.persisted().is_empty());
    }

    #[tokio::test]
    async fn typing_events_fan_out_and_track_state() {
        let (ctx, _store) = test_context(&[]);
        let (a, _rx_a) = make_conn();
        let (b, mut rx_b) = make_conn();
        add_user(&ctx, &a, "a").await;
        add_user(&ctx, &b, "b").await;

        dispatch(
            &ctx,
            &a,
            r#"{"event":"typing","to":"b","from":"a","isTyping":true}"#,
        )
        .await;
        assert!(ctx.typing.is_typing(&ChatId::new("b"), &UserId::new("a")));
        let typing: serde_json::Value =
            serde_json::from_str(&rx_b.try_recv().unwrap()).unwrap();
        assert_eq!(typing["event"], "user-typing");

        dispatch(&ctx, &a, r#"{"event":"stop-typing","to":"b","from":"a"}"#).await;
        assert!(!ctx.typing.is_typing(&ChatId::new("b"), &UserId::new("a")));
        let stopped: serde_json::Value =
            serde_json::from_str(&rx_b.try_recv().unwrap()).unwrap();
        assert_eq!(stopped["event"], "user-stopped-typing");
    }
}
