//! Chat target classification.
//!
//! Every dispatch asks the group directory whether the destination is a
//! group, so membership changes take effect on the very next send. Nothing
//! here is cached.

use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;
use tracing::warn;

use relay_core::ids::{ChatId, GroupId, UserId};

/// A group as the directory knows it.
#[derive(Clone, Debug, PartialEq)]
pub struct GroupRecord {
    /// Display name, attached to group fanout copies.
    pub name: String,
    /// Current member set, sender included.
    pub members: Vec<UserId>,
}

/// Directory lookup failure. The resolver treats this as "not a group".
#[derive(Debug, Error)]
pub enum DirectoryError {
    /// The backing store could not answer the lookup.
    #[error("group lookup failed: {0}")]
    Lookup(String),
}

/// Resolves group ids to their member lists.
///
/// Boundary interface: group membership is maintained elsewhere; the fanout
/// core only ever reads it.
#[async_trait]
pub trait GroupDirectory: Send + Sync {
    /// Fetch a group by id, or `None` if no such group exists.
    async fn get_group(&self, id: &GroupId) -> Result<Option<GroupRecord>, DirectoryError>;
}

/// A classified chat destination, valid for a single dispatch.
#[derive(Clone, Debug, PartialEq)]
pub enum ChatTarget {
    /// Direct chat with one peer.
    Individual {
        /// The receiving peer.
        peer: UserId,
    },
    /// Group chat; fanout goes to `members` minus the sender.
    Group {
        /// The group id (the original destination).
        group: GroupId,
        /// Display name for recipient UIs.
        name: String,
        /// Membership at resolution time.
        members: Vec<UserId>,
    },
}

/// Classifies a destination id as an individual peer or a group.
pub struct ChatTargetResolver {
    directory: Arc<dyn GroupDirectory>,
}

impl ChatTargetResolver {
    /// Build a resolver over a group directory.
    pub fn new(directory: Arc<dyn GroupDirectory>) -> Self {
        Self { directory }
    }

    /// Classify a destination.
    ///
    /// A directory hit yields [`ChatTarget::Group`]; a miss yields
    /// [`ChatTarget::Individual`]. A directory *error* also falls open to
    /// individual semantics so messaging stays best-effort — user and group
    /// ids live in disjoint namespaces, so the fallback can only ever reach
    /// a real peer or nobody.
    pub async fn resolve(&self, destination: &ChatId) -> ChatTarget {
        let group_id = GroupId::new(destination.as_str());
        match self.directory.get_group(&group_id).await {
            Ok(Some(record)) => ChatTarget::Group {
                group: group_id,
                name: record.name,
                members: record.members,
            },
            Ok(None) => ChatTarget::Individual {
                peer: UserId::new(destination.as_str()),
            },
            Err(e) => {
                warn!(destination = %destination, error = %e, "group lookup failed, treating as individual");
                ChatTarget::Individual {
                    peer: UserId::new(destination.as_str()),
                }
            }
        }
    }
}
