//! Conversation session models.

use serde::{Deserialize, Serialize};

use super::{EntityId, SessionId, UserId};

/// Aggregate per-conversation state derived from the message stream.
///
/// At most one session exists per (owner, counterpart) pair.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Session {
    /// Session ID, composed from owner and counterpart.
    pub id: SessionId,
    /// The user whose device owns this cache.
    pub owner: UserId,
    /// The other participant.
    pub counterpart: UserId,
    /// ID of the latest message in the conversation.
    pub latest_entity: EntityId,
    /// Time of the latest message, milliseconds since the epoch.
    pub last_active: i64,
    /// Whether the latest message is incoming and not yet read.
    pub unread: bool,
}

impl Session {
    /// Create a session for an (owner, counterpart) pair.
    pub fn new(owner: UserId, counterpart: UserId) -> Self {
        Session {
            id: SessionId::compose(&owner, &counterpart),
            owner,
            counterpart,
            ..Default::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_session_new() {
        let s = Session::new("me".into(), "you".into());
        assert_eq!(s.id.as_str(), "me:you");
        assert!(!s.unread);
        assert!(s.latest_entity.is_empty());
    }
}
