//! Wire protocol events.
//!
//! Two event families, both externally tagged by an `event` field:
//!
//! - **[`ClientEvent`]**: events a client sends over its WebSocket
//!   (identity binding, outgoing messages, typing, delivery acks).
//! - **[`ServerEvent`]**: events the server pushes to recipient connections.
//!
//! Event names and field spellings are frozen: deployed clients match on
//! them literally, including the historical `msg-recieve` misspelling.
//! Optional fields (`to`, `isGroup`, `groupName`, `replyTo`) are omitted
//! from the wire entirely when absent.

use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::errors::ProtocolError;
use crate::ids::{ChatId, MessageId, UserId};
use crate::status::MessageStatus;

// ─────────────────────────────────────────────────────────────────────────────
// ClientEvent — client → server
// ─────────────────────────────────────────────────────────────────────────────

/// Events received from a client connection.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event")]
pub enum ClientEvent {
    /// Bind this connection to a user identity.
    #[serde(rename = "add-user", rename_all = "camelCase")]
    AddUser {
        /// The user this connection now belongs to.
        user_id: UserId,
    },

    /// Send a chat message to a peer or group.
    #[serde(rename = "send-msg", rename_all = "camelCase")]
    SendMsg {
        /// Destination: a peer's user id or a group id.
        to: ChatId,
        /// Sending user.
        from: UserId,
        /// Message body.
        msg: String,
        /// Client-generated message id (optimistic local echo).
        message_id: MessageId,
        /// Message being replied to, if any.
        #[serde(skip_serializing_if = "Option::is_none")]
        reply_to: Option<MessageId>,
    },

    /// The sender is (or stopped) composing in a chat.
    #[serde(rename = "typing", rename_all = "camelCase")]
    Typing {
        /// Chat the typing happens in.
        to: ChatId,
        /// Typing user.
        from: UserId,
        /// `true` while composing, `false` when the client clears the flag.
        is_typing: bool,
    },

    /// Explicit end-of-typing, short-circuiting the server-side expiry.
    #[serde(rename = "stop-typing", rename_all = "camelCase")]
    StopTyping {
        /// Chat the typing happened in.
        to: ChatId,
        /// User who stopped typing.
        from: UserId,
    },

    /// Recipient acknowledges a message reached its device.
    #[serde(rename = "message-delivered", rename_all = "camelCase")]
    MessageDelivered {
        /// Acknowledging party (the recipient).
        to: UserId,
        /// Original sender, who gets the status fanout.
        from: UserId,
        /// The acknowledged message.
        message_id: MessageId,
    },

    /// Recipient acknowledges a message was read.
    #[serde(rename = "message-seen", rename_all = "camelCase")]
    MessageSeen {
        /// Acknowledging party (the recipient).
        to: UserId,
        /// Original sender, who gets the status fanout.
        from: UserId,
        /// The acknowledged message.
        message_id: MessageId,
    },
}

impl ClientEvent {
    /// Decode a text frame into an event.
    pub fn decode(frame: &str) -> Result<Self, ProtocolError> {
        Ok(serde_json::from_str(frame)?)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// ServerEvent — server → client
// ─────────────────────────────────────────────────────────────────────────────

/// Events pushed to recipient connections.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event")]
pub enum ServerEvent {
    /// An incoming chat message.
    ///
    /// `to`, `is_group`, and `group_name` are present only for group
    /// traffic, so recipient UIs can tell group messages apart.
    #[serde(rename = "msg-recieve", rename_all = "camelCase")]
    MsgRecieve {
        /// Message body.
        msg: String,
        /// Sending user.
        from: UserId,
        /// Group destination (group traffic only).
        #[serde(skip_serializing_if = "Option::is_none")]
        to: Option<ChatId>,
        /// Delivery status as seen by the recipient.
        status: MessageStatus,
        /// `true` for group traffic.
        #[serde(skip_serializing_if = "Option::is_none")]
        is_group: Option<bool>,
        /// Display name of the group (group traffic only).
        #[serde(skip_serializing_if = "Option::is_none")]
        group_name: Option<String>,
        /// Client-generated message id.
        message_id: MessageId,
        /// Message being replied to, if any.
        #[serde(skip_serializing_if = "Option::is_none")]
        reply_to: Option<MessageId>,
    },

    /// A peer started (or updated) composing.
    #[serde(rename = "user-typing", rename_all = "camelCase")]
    UserTyping {
        /// Typing user.
        from: UserId,
        /// Group destination (group traffic only).
        #[serde(skip_serializing_if = "Option::is_none")]
        to: Option<ChatId>,
        /// Composing flag as reported by the typing client.
        is_typing: bool,
        /// `true` for group traffic.
        #[serde(skip_serializing_if = "Option::is_none")]
        is_group: Option<bool>,
    },

    /// A peer stopped composing (explicit or synthesized on expiry).
    #[serde(rename = "user-stopped-typing", rename_all = "camelCase")]
    UserStoppedTyping {
        /// User who stopped typing.
        from: UserId,
        /// Group destination (group traffic only).
        #[serde(skip_serializing_if = "Option::is_none")]
        to: Option<ChatId>,
        /// `true` for group traffic.
        #[serde(skip_serializing_if = "Option::is_none")]
        is_group: Option<bool>,
    },

    /// A message the receiving user sent was delivered.
    #[serde(rename = "msg-delivered", rename_all = "camelCase")]
    MsgDelivered {
        /// Acknowledging party.
        to: UserId,
        /// The delivered message.
        message_id: MessageId,
    },

    /// A message the receiving user sent was read.
    #[serde(rename = "msg-seen", rename_all = "camelCase")]
    MsgSeen {
        /// Acknowledging party.
        to: UserId,
        /// The read message.
        message_id: MessageId,
    },

    /// Persistence failed for a message the receiving user sent.
    ///
    /// The message stays `sending` on the sender's side; routing to live
    /// recipients may still have happened, but nothing was stored.
    #[serde(rename = "msg-failed", rename_all = "camelCase")]
    MsgFailed {
        /// The message that failed to persist.
        message_id: MessageId,
        /// Human-readable failure description.
        error: String,
    },
}

impl ServerEvent {
    /// Serialize into a shared frame, ready to push to many connections.
    ///
    /// Fanout serializes once per dispatch and clones the `Arc`, never the
    /// string.
    pub fn encode(&self) -> Result<Arc<String>, ProtocolError> {
        Ok(Arc::new(serde_json::to_string(self)?))
    }
}
