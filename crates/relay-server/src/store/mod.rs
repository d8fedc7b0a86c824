//! Durable persistence boundary.
//!
//! The fanout core treats the message store as an external collaborator:
//! it persists outgoing messages, records status transitions, and serves
//! history for recipients that were offline during fanout. Everything else
//! about storage lives behind [`MessageStore`].

pub mod sqlite;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;

use relay_core::ids::{ChatId, GroupId, MessageId, UserId};
use relay_core::status::MessageStatus;

/// A message as persisted.
#[derive(Clone, Debug, PartialEq)]
pub struct StoredMessage {
    /// Client-generated message id.
    pub id: MessageId,
    /// Sending user.
    pub sender: UserId,
    /// Destination chat (peer or group id).
    pub chat: ChatId,
    /// Message body.
    pub body: String,
    /// Message being replied to, if any.
    pub reply_to: Option<MessageId>,
    /// Delivery status at write time.
    pub status: MessageStatus,
    /// Server-side receive time.
    pub created_at: DateTime<Utc>,
}

/// Store failure. Reported to the sender as `msg-failed`; never retried
/// automatically.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The database rejected the operation.
    #[error("database error: {0}")]
    Database(String),
    /// No pooled connection was available.
    #[error("connection pool exhausted: {0}")]
    Pool(String),
}

impl From<rusqlite::Error> for StoreError {
    fn from(e: rusqlite::Error) -> Self {
        StoreError::Database(e.to_string())
    }
}

impl From<r2d2::Error> for StoreError {
    fn from(e: r2d2::Error) -> Self {
        StoreError::Pool(e.to_string())
    }
}

/// Durable message persistence, consumed by the fanout core.
///
/// Persistence is independent of fanout: a message is routed to live
/// recipients whether or not `persist` succeeds, and `persist` succeeding
/// is what moves the sender-visible status from `sending` to `sent`.
#[async_trait]
pub trait MessageStore: Send + Sync {
    /// Write a message. Failure leaves the message `sending` on the
    /// sender's side.
    async fn persist(&self, message: &StoredMessage) -> Result<(), StoreError>;

    /// Record a status transition for an already-persisted message.
    /// Backward transitions are ignored at the storage layer too.
    async fn update_status(&self, id: &MessageId, status: MessageStatus)
    -> Result<(), StoreError>;

    /// Two-party conversation history, oldest first. This is the recovery
    /// path for recipients that were offline during fanout.
    async fn conversation(
        &self,
        user: &UserId,
        peer: &ChatId,
        limit: u32,
        offset: u32,
    ) -> Result<Vec<StoredMessage>, StoreError>;

    /// Group chat history, oldest first.
    async fn group_history(
        &self,
        group: &GroupId,
        limit: u32,
        offset: u32,
    ) -> Result<Vec<StoredMessage>, StoreError>;
}
