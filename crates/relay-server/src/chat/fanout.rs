//! Event fanout to live recipient connections.

use std::sync::Arc;

use metrics::counter;
use tracing::{debug, warn};

use relay_core::ids::{ChatId, MessageId, UserId};
use relay_core::protocol::ServerEvent;
use relay_core::status::MessageStatus;

use crate::chat::resolver::{ChatTarget, ChatTargetResolver};
use crate::metrics::{FANOUT_DELIVERED_TOTAL, FANOUT_DROPS_TOTAL, FANOUT_OFFLINE_SKIPS_TOTAL};
use crate::websocket::registry::ConnectionRegistry;

/// An outbound chat event, before it is shaped for recipients.
#[derive(Clone, Copy, Debug)]
pub enum FanoutEvent<'a> {
    /// A chat message.
    Message {
        /// Message body.
        body: &'a str,
        /// Client-generated message id.
        message_id: &'a MessageId,
        /// Message being replied to, if any.
        reply_to: Option<&'a MessageId>,
    },
    /// Composing notification, forwarding the client's flag verbatim.
    Typing {
        /// The client-reported composing flag.
        is_typing: bool,
    },
    /// End-of-typing, explicit or synthesized on expiry.
    StopTyping,
}

/// What a dispatch pass did, for logging and tests.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FanoutOutcome {
    /// Whether the destination resolved to a group.
    pub is_group: bool,
    /// Recipients in the computed set (online or not).
    pub recipients: usize,
    /// Frames actually queued on live connections.
    pub delivered: usize,
}

/// Routes one outbound event to every live connection in its recipient set.
///
/// The recipient set is `{peer}` for individual chats and `members − sender`
/// for groups, resolved fresh per dispatch. Delivery attempts are
/// independent: an offline recipient is skipped silently, a full outbound
/// queue drops that copy only, and nothing here ever blocks or awaits a
/// slow socket. Missed messages are recovered from the durable store, not
/// retried here.
pub struct FanoutDispatcher {
    registry: Arc<ConnectionRegistry>,
    resolver: ChatTargetResolver,
}

impl FanoutDispatcher {
    /// Build a dispatcher over a registry and target resolver.
    pub fn new(registry: Arc<ConnectionRegistry>, resolver: ChatTargetResolver) -> Self {
        Self { registry, resolver }
    }

    /// Resolve the destination and push a recipient-shaped copy of the event
    /// to every live recipient.
    pub async fn dispatch(
        &self,
        from: &UserId,
        to: &ChatId,
        event: FanoutEvent<'_>,
    ) -> FanoutOutcome {
        let target = self.resolver.resolve(to).await;

        let (recipients, shaped) = match &target {
            ChatTarget::Individual { peer } => (vec![peer.clone()], shape(from, None, event)),
            ChatTarget::Group { group, name, members } => {
                let recipients: Vec<UserId> =
                    members.iter().filter(|m| *m != from).cloned().collect();
                let group_meta = Some((ChatId::new(group.as_str()), name.clone()));
                (recipients, shape(from, group_meta, event))
            }
        };

        let frame = match shaped.encode() {
            Ok(frame) => frame,
            Err(e) => {
                warn!(from = %from, to = %to, error = %e, "failed to encode fanout event");
                return FanoutOutcome {
                    is_group: matches!(target, ChatTarget::Group { .. }),
                    recipients: recipients.len(),
                    delivered: 0,
                };
            }
        };

        let mut delivered = 0usize;
        for recipient in &recipients {
            // Each recipient gets its own independent delivery attempt.
            match self.registry.lookup(recipient).await {
                Some(conn) => {
                    if conn.send(Arc::clone(&frame)) {
                        delivered += 1;
                        counter!(FANOUT_DELIVERED_TOTAL).increment(1);
                    } else {
                        counter!(FANOUT_DROPS_TOTAL).increment(1);
                        warn!(
                            recipient = %recipient,
                            conn_id = %conn.id,
                            total_drops = conn.drop_count(),
                            "recipient queue full, copy dropped"
                        );
                    }
                }
                None => {
                    // Offline is a steady state, not an error.
                    counter!(FANOUT_OFFLINE_SKIPS_TOTAL).increment(1);
                }
            }
        }

        let outcome = FanoutOutcome {
            is_group: matches!(target, ChatTarget::Group { .. }),
            recipients: recipients.len(),
            delivered,
        };
        debug!(
            from = %from,
            to = %to,
            is_group = outcome.is_group,
            recipients = outcome.recipients,
            delivered = outcome.delivered,
            "fanout dispatched"
        );
        outcome
    }
}

/// Build the recipient-shaped event. Group copies carry the destination and
/// group metadata so recipient UIs can tell group traffic apart; individual
/// copies omit those fields from the wire.
fn shape(
    from: &UserId,
    group: Option<(ChatId, String)>,
    event: FanoutEvent<'_>,
) -> ServerEvent {
    let is_group = group.is_some().then_some(true);
    let (to, group_name) = match group {
        Some((chat, name)) => (Some(chat), Some(name)),
        None => (None, None),
    };

    match event {
        FanoutEvent::Message { body, message_id, reply_to } => ServerEvent::MsgRecieve {
            msg: body.to_owned(),
            from: from.clone(),
            to,
            status: MessageStatus::Sent,
            is_group,
            group_name,
            message_id: message_id.clone(),
            reply_to: reply_to.cloned(),
        },
        FanoutEvent::Typing { is_typing } => ServerEvent::UserTyping {
            from: from.clone(),
            to,
            is_typing,
            is_group,
        },
        FanoutEvent::StopTyping => ServerEvent::UserStoppedTyping {
            from: from.clone(),
            to,
            is_group,
        },
    }
}
