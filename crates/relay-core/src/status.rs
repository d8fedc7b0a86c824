//! The message delivery status lifecycle.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Delivery status of a message, as observed by its sender.
///
/// The lifecycle is strictly monotonic:
///
/// ```text
/// sending → sent → delivered → seen
/// ```
///
/// `sending` means the server has accepted the event but the message is not
/// yet durably persisted. `sent` is reached when persistence succeeds.
/// `delivered` and `seen` are driven by recipient acknowledgements. A status
/// never moves backwards; the tracker in `relay-server` enforces the allowed
/// forward transitions.
///
/// The derived `Ord` follows lifecycle order, so `a < b` means `a` is an
/// earlier stage than `b`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageStatus {
    /// Accepted by the server, not yet durably persisted.
    Sending,
    /// Durably persisted.
    Sent,
    /// Acknowledged as received by the recipient's client.
    Delivered,
    /// Acknowledged as read by the recipient.
    Seen,
}

impl MessageStatus {
    /// Whether moving from `self` to `next` is a forward step.
    ///
    /// `false` for same-or-earlier targets; the caller treats those as
    /// idempotent no-ops rather than errors.
    pub fn advances_to(self, next: MessageStatus) -> bool {
        next > self
    }

    /// Whether this is the final lifecycle stage.
    pub fn is_terminal(self) -> bool {
        self == MessageStatus::Seen
    }

    /// The wire spelling of this status (`"sending"`, `"sent"`, ...).
    pub fn as_str(self) -> &'static str {
        match self {
            MessageStatus::Sending => "sending",
            MessageStatus::Sent => "sent",
            MessageStatus::Delivered => "delivered",
            MessageStatus::Seen => "seen",
        }
    }
}

impl fmt::Display for MessageStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
