//! The per-message delivery-status state machine.

use std::collections::HashMap;
use std::sync::Arc;

use metrics::counter;
use parking_lot::Mutex;
use tracing::{debug, warn};

use relay_core::ids::{MessageId, UserId};
use relay_core::protocol::ServerEvent;
use relay_core::status::MessageStatus;

use crate::metrics::STATUS_TRANSITIONS_TOTAL;
use crate::store::MessageStore;
use crate::websocket::registry::ConnectionRegistry;

/// Advances each in-flight message through `sending → sent → delivered →
/// seen` and fans status changes back to the original sender.
///
/// Transitions are strictly forward. Re-acking a status a message already
/// has (or has passed) is an idempotent no-op — no duplicate fanout, no
/// error. An ack for a message still `sending`, or for an id this process
/// has never seen, is a warn-logged no-op: acks can only build on a
/// persisted message.
///
/// `seen` is accepted from either `sent` or `delivered` — the delivery ack
/// and the read ack race when a recipient opens the chat immediately, and
/// rejecting the faster one would drop legitimate reads.
///
/// The in-memory map holds in-flight lifecycles only; a message reaching
/// `seen` is pruned and survives in the durable store.
pub struct MessageStatusTracker {
    registry: Arc<ConnectionRegistry>,
    store: Arc<dyn MessageStore>,
    states: Mutex<HashMap<MessageId, MessageStatus>>,
}

impl MessageStatusTracker {
    /// Build a tracker over the registry (for reverse fanout) and the
    /// durable store (for recording transitions).
    pub fn new(registry: Arc<ConnectionRegistry>, store: Arc<dyn MessageStore>) -> Self {
        Self {
            registry,
            store,
            states: Mutex::new(HashMap::new()),
        }
    }

    /// Seed a fresh message at `sending`. Idempotent: re-sending an id the
    /// tracker already knows does not reset its progress.
    pub fn begin(&self, id: &MessageId) {
        let mut states = self.states.lock();
        let _ = states.entry(id.clone()).or_insert(MessageStatus::Sending);
    }

    /// Persistence succeeded: `sending → sent`.
    pub fn mark_sent(&self, id: &MessageId) {
        if self.advance(id, MessageStatus::Sent, MessageStatus::Sending) {
            counter!(STATUS_TRANSITIONS_TOTAL, "status" => "sent").increment(1);
        }
    }

    /// Current in-flight status, if the message is still tracked.
    pub fn status_of(&self, id: &MessageId) -> Option<MessageStatus> {
        self.states.lock().get(id).copied()
    }

    /// Recipient delivery ack: `sent → delivered`, fanned back to the sender.
    pub async fn on_delivered(&self, id: &MessageId, sender: &UserId, acker: &UserId) {
        if !self.advance(id, MessageStatus::Delivered, MessageStatus::Sent) {
            return;
        }
        counter!(STATUS_TRANSITIONS_TOTAL, "status" => "delivered").increment(1);
        self.record(id, MessageStatus::Delivered).await;
        self.notify_sender(
            sender,
            ServerEvent::MsgDelivered {
                to: acker.clone(),
                message_id: id.clone(),
            },
        )
        .await;
    }

    /// Recipient read ack: `{sent, delivered} → seen`, fanned back to the
    /// sender. Terminal — the lifecycle is pruned afterwards.
    pub async fn on_seen(&self, id: &MessageId, sender: &UserId, acker: &UserId) {
        let advanced = {
            let mut states = self.states.lock();
            match states.get(id).copied() {
                None => {
                    warn!(message_id = %id, "status ack for unknown message, dropped");
                    false
                }
                Some(MessageStatus::Sending) => {
                    warn!(message_id = %id, "seen ack for unpersisted message, dropped");
                    false
                }
                Some(current) if current.advances_to(MessageStatus::Seen) => {
                    let _ = states.remove(id);
                    true
                }
                // Already seen (or duplicate ack): idempotent no-op.
                Some(_) => false,
            }
        };
        if !advanced {
            return;
        }
        counter!(STATUS_TRANSITIONS_TOTAL, "status" => "seen").increment(1);
        self.record(id, MessageStatus::Seen).await;
        self.notify_sender(
            sender,
            ServerEvent::MsgSeen {
                to: acker.clone(),
                message_id: id.clone(),
            },
        )
        .await;
    }

    /// Try the forward step to `next`. Returns `false` (and logs where
    /// appropriate) for unknown ids, not-yet-eligible states, and
    /// duplicates. Never moves backwards.
    fn advance(&self, id: &MessageId, next: MessageStatus, floor: MessageStatus) -> bool {
        let mut states = self.states.lock();
        match states.get(id).copied() {
            None => {
                warn!(message_id = %id, status = %next, "status ack for unknown message, dropped");
                false
            }
            Some(current) if current < floor => {
                warn!(
                    message_id = %id,
                    current = %current,
                    requested = %next,
                    "out-of-order status ack, dropped"
                );
                false
            }
            Some(current) if current.advances_to(next) => {
                let _ = states.insert(id.clone(), next);
                debug!(message_id = %id, from = %current, to = %next, "status advanced");
                true
            }
            // At or past the requested status already.
            Some(_) => false,
        }
    }

    /// Best-effort durable record of a transition. The in-memory state is
    /// authoritative for fanout; a store hiccup here is logged, not raised.
    async fn record(&self, id: &MessageId, status: MessageStatus) {
        if let Err(e) = self.store.update_status(id, status).await {
            warn!(message_id = %id, status = %status, error = %e, "failed to record status");
        }
    }

    async fn notify_sender(&self, sender: &UserId, event: ServerEvent) {
        let Ok(frame) = event.encode() else {
            warn!(sender = %sender, "failed to encode status event");
            return;
        };
        match self.registry.lookup(sender).await {
            Some(conn) => {
                let _ = conn.send(frame);
            }
            // Sender offline: they re-sync status from the store on return.
            None => debug!(sender = %sender, "status fanout skipped, sender offline"),
        }
    }
}
