//! Branded identifier newtypes.
//!
//! Every identifier that crosses a component boundary is a distinct newtype
//! over `String`, so a group id can never be passed where a user id is
//! expected. All ids serialize transparently as plain strings.
//!
//! User and group ids are UUIDs drawn from disjoint generators, so the two
//! namespaces never collide. [`ChatId`] is the one deliberately untyped
//! destination: the wire protocol addresses both peers and groups through a
//! single `to` field, and the target resolver is the only place allowed to
//! decide which one it is.

use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

macro_rules! branded_id {
    ($(#[$doc:meta])* $name:ident) => {
        $(#[$doc])*
        #[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            /// Wrap an existing identifier string.
            pub fn new(id: impl Into<String>) -> Self {
                Self(id.into())
            }

            /// Generate a fresh identifier (UUID v7, time-ordered).
            pub fn generate() -> Self {
                Self(Uuid::now_v7().to_string())
            }

            /// The identifier as a string slice.
            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<&str> for $name {
            fn from(id: &str) -> Self {
                Self(id.to_owned())
            }
        }

        impl From<String> for $name {
            fn from(id: String) -> Self {
                Self(id)
            }
        }
    };
}

branded_id!(
    /// A user account identifier.
    UserId
);

branded_id!(
    /// A group chat identifier.
    GroupId
);

branded_id!(
    /// A client-generated message identifier.
    ///
    /// Assigned by the sender before the server acknowledges, so the client
    /// can echo the message locally while it is still `sending`.
    MessageId
);

branded_id!(
    /// A live WebSocket connection identifier. Unique per socket, not per user.
    ConnectionId
);

branded_id!(
    /// A chat destination: either a peer's [`UserId`] or a [`GroupId`].
    ///
    /// Classified fresh on every dispatch by the target resolver; never
    /// assume which namespace it belongs to anywhere else.
    ChatId
);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_matches_inner() {
        let id = UserId::new("u-42");
        assert_eq!(id.to_string(), "u-42");
        assert_eq!(id.as_str(), "u-42");
    }

    #[test]
    fn serializes_as_plain_string() {
        let id = MessageId::new("m1");
        let json = serde_json::to_string(&id).unwrap();
        assert_eq!(json, "\"m1\"");

        let back: MessageId = serde_json::from_str(&json).unwrap();
        assert_eq!(back, id);
    }

    #[test]
    fn generated_ids_are_unique() {
        let a = ConnectionId::generate();
        let b = ConnectionId::generate();
        assert_ne!(a, b);
    }

    #[test]
    fn ids_usable_as_map_keys() {
        let mut map = std::collections::HashMap::new();
        let _ = map.insert(UserId::new("a"), 1);
        let _ = map.insert(UserId::new("b"), 2);
        assert_eq!(map.get(&UserId::new("a")), Some(&1));
    }
}
