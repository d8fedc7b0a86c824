//! Server-side typing state with automatic expiry.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use metrics::counter;
use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tracing::debug;

use relay_core::ids::{ChatId, UserId};

use crate::chat::fanout::{FanoutDispatcher, FanoutEvent};
use crate::metrics::TYPING_EXPIRATIONS_TOTAL;

type Key = (ChatId, UserId);

struct Entry {
    generation: u64,
    timer: JoinHandle<()>,
}

/// Tracks who is composing in which chat and synthesizes `stop-typing`
/// when a client goes quiet without saying so.
///
/// Each `(chat, user)` key owns at most one live timer. A fresh typing
/// event cancels and replaces the old timer in a single locked step, so a
/// timer firing concurrently with its own reset observes a newer generation
/// and does nothing. On expiry the synthetic stop-typing is routed through
/// the dispatcher exactly as an explicit one would be.
pub struct TypingCoordinator {
    entries: Arc<Mutex<HashMap<Key, Entry>>>,
    fanout: Arc<FanoutDispatcher>,
    expiry: Duration,
    generations: AtomicU64,
}

impl TypingCoordinator {
    /// Build a coordinator routing synthetic stops through `fanout`.
    pub fn new(fanout: Arc<FanoutDispatcher>, expiry: Duration) -> Self {
        Self {
            entries: Arc::new(Mutex::new(HashMap::new())),
            fanout,
            expiry,
            generations: AtomicU64::new(0),
        }
    }

    /// Set or refresh the typing flag for `(chat, user)`.
    ///
    /// Cancels any prior timer for the key and installs a fresh one; the
    /// flag expires after the configured interval unless refreshed or
    /// explicitly stopped first.
    pub fn on_typing(&self, chat: &ChatId, user: &UserId) {
        let generation = self.generations.fetch_add(1, Ordering::Relaxed) + 1;
        let key = (chat.clone(), user.clone());

        let timer = tokio::spawn({
            let entries = Arc::clone(&self.entries);
            let fanout = Arc::clone(&self.fanout);
            let expiry = self.expiry;
            let key = key.clone();
            async move {
                tokio::time::sleep(expiry).await;
                {
                    let mut entries = entries.lock();
                    match entries.get(&key) {
                        // Still the live timer for this key: claim the expiry.
                        Some(entry) if entry.generation == generation => {
                            let _ = entries.remove(&key);
                        }
                        // Superseded or cleared while sleeping.
                        _ => return,
                    }
                }
                let (chat, user) = key;
                counter!(TYPING_EXPIRATIONS_TOTAL).increment(1);
                debug!(chat = %chat, user = %user, "typing expired, synthesizing stop");
                let _ = fanout.dispatch(&user, &chat, FanoutEvent::StopTyping).await;
            }
        });

        let mut entries = self.entries.lock();
        if let Some(previous) = entries.insert(key, Entry { generation, timer }) {
            previous.timer.abort();
        }
    }

    /// Explicit stop: cancel the timer and clear the flag immediately.
    pub fn on_stop_typing(&self, chat: &ChatId, user: &UserId) {
        let key = (chat.clone(), user.clone());
        if let Some(entry) = self.entries.lock().remove(&key) {
            entry.timer.abort();
        }
    }

    /// Drop every typing flag a disconnecting user holds, across all chats.
    /// Cancelled timers never fire their synthetic stop.
    pub fn clear_user(&self, user: &UserId) {
        let mut entries = self.entries.lock();
        entries.retain(|(_, owner), entry| {
            if owner == user {
                entry.timer.abort();
                false
            } else {
                true
            }
        });
    }

    /// Whether `(chat, user)` currently has a live typing flag.
    pub fn is_typing(&self, chat: &ChatId, user: &UserId) -> bool {
        self.entries
            .lock()
            .contains_key(&(chat.clone(), user.clone()))
    }
}
