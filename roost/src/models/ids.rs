//! Type-safe ID wrappers.

use serde::{Deserialize, Serialize};
use std::fmt;

macro_rules! define_id {
    ($name:ident, $doc:expr) => {
        #[doc = $doc]
        #[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        pub struct $name(pub String);

        impl $name {
            /// Create a new ID from a string.
            pub fn new(id: impl Into<String>) -> Self {
                $name(id.into())
            }

            /// Check if this ID is empty or "0".
            pub fn is_empty(&self) -> bool {
                self.0.is_empty() || self.0 == "0"
            }

            /// Get the inner string.
            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl From<String> for $name {
            fn from(s: String) -> Self {
                $name(s)
            }
        }

        impl From<&str> for $name {
            fn from(s: &str) -> Self {
                $name(s.to_owned())
            }
        }

        impl From<&String> for $name {
            fn from(s: &String) -> Self {
                $name(s.clone())
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl Default for $name {
            fn default() -> Self {
                $name("0".to_owned())
            }
        }

        impl AsRef<str> for $name {
            fn as_ref(&self) -> &str {
                &self.0
            }
        }
    };
}

define_id!(EntityId, "A post or message identifier.");
define_id!(UserId, "A user identifier.");
define_id!(SessionId, "A conversation session identifier.");

/// Prefix for client-generated temporary entity IDs.
const LOCAL_ID_PREFIX: &str = "local-";

impl EntityId {
    /// Create a client-local temporary ID for an entity that has not been
    /// acknowledged by the server yet.
    pub fn local(seq: u64) -> Self {
        EntityId(format!("{}{}", LOCAL_ID_PREFIX, seq))
    }

    /// Check if this is a client-local temporary ID.
    pub fn is_local(&self) -> bool {
        self.0.starts_with(LOCAL_ID_PREFIX)
    }
}

impl SessionId {
    /// Compose the canonical session ID for an (owner, counterpart) pair.
    pub fn compose(owner: &UserId, counterpart: &UserId) -> Self {
        SessionId(format!("{}:{}", owner, counterpart))
    }
}
