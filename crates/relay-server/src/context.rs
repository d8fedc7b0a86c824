//! Shared server state handed to every connection task.

use std::sync::Arc;

use crate::chat::fanout::FanoutDispatcher;
use crate::chat::status::MessageStatusTracker;
use crate::chat::typing::TypingCoordinator;
use crate::settings::RelaySettings;
use crate::store::MessageStore;
use crate::websocket::registry::ConnectionRegistry;

/// Everything a connection task needs, explicitly constructed and injected.
///
/// There are no ambient singletons anywhere in the core: tests build a
/// context around in-memory collaborators and tear it down by dropping it.
#[derive(Clone)]
pub struct ServerContext {
    /// Presence: user → live connection.
    pub registry: Arc<ConnectionRegistry>,
    /// Event fanout over resolved chat targets.
    pub fanout: Arc<FanoutDispatcher>,
    /// Typing flags with automatic expiry.
    pub typing: Arc<TypingCoordinator>,
    /// Per-message delivery-status tracking.
    pub status: Arc<MessageStatusTracker>,
    /// Durable message persistence.
    pub store: Arc<dyn MessageStore>,
    /// Effective settings.
    pub settings: Arc<RelaySettings>,
}
