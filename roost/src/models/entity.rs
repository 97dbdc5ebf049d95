//! Post and message models.

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;

use super::{EntityId, UserId};

/// A cached post or direct message.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Entity {
    /// Stable identifier, immutable once assigned by the server.
    pub id: EntityId,
    /// Temporary client-generated ID this entity carried before the server
    /// acknowledged it, if it originated from a local submission.
    pub local_id: Option<EntityId>,
    /// Post or message.
    pub kind: EntityKind,
    /// Author of the entity.
    pub author: UserId,
    /// Recipient, for direct messages.
    pub recipient: Option<UserId>,
    /// Creation time in milliseconds since the epoch.
    pub created_at: i64,
    /// Server revision, bumped on every server-side change.
    pub revision: u64,
    /// Textual content.
    pub content: Option<String>,
    /// Attachments.
    pub attachments: Vec<Attachment>,
    /// Mutable counters.
    pub counts: EntityCounts,
    /// Mutable flags.
    pub flags: EntityFlags,
}

/// Kind of a cached entity.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum EntityKind {
    /// A feed post, comment, or retweet.
    #[default]
    Post,
    /// A direct message.
    Message,
}

/// Mutable counters on an entity.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntityCounts {
    /// Favorite count.
    pub favorites: i64,
    /// Bookmark count.
    pub bookmarks: i64,
    /// Repost/retweet count.
    pub reposts: i64,
    /// Comment count.
    pub comments: i64,
}

/// Mutable boolean flags on an entity.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntityFlags {
    /// Favorited by the owning user.
    pub favorited: bool,
    /// Bookmarked by the owning user.
    pub bookmarked: bool,
    /// Pinned.
    pub pinned: bool,
    /// Private/protected.
    pub private: bool,
}

impl Entity {
    /// Check whether this entity is a fresher copy of `other`.
    ///
    /// Revision is compared first, then creation time. Ties favor the
    /// existing entry, so equal copies never churn the store.
    pub fn is_fresher_than(&self, other: &Entity) -> bool {
        match self.revision.cmp(&other.revision) {
            Ordering::Greater => true,
            Ordering::Less => false,
            Ordering::Equal => self.created_at > other.created_at,
        }
    }

    /// Display ordering: newest first, ties broken by ID for determinism.
    pub fn display_cmp(&self, other: &Entity) -> Ordering {
        other
            .created_at
            .cmp(&self.created_at)
            .then_with(|| other.id.cmp(&self.id))
    }

    /// Check whether this entity is newer than `other` by application-level
    /// ordering: creation time first, then ID. Wall-clock alone is never
    /// trusted across devices.
    pub fn is_newer_than(&self, other: &Entity) -> bool {
        self.created_at
            .cmp(&other.created_at)
            .then_with(|| self.id.cmp(&other.id))
            == Ordering::Greater
    }

    /// The counterpart of a direct message from `owner`'s point of view,
    /// or `None` if `owner` is on neither side.
    pub fn counterpart_for(&self, owner: &UserId) -> Option<&UserId> {
        if self.kind != EntityKind::Message {
            return None;
        }
        if &self.author == owner {
            self.recipient.as_ref()
        } else if self.recipient.as_ref() == Some(owner) {
            Some(&self.author)
        } else {
            None
        }
    }

    /// Whether this message was sent to `owner` rather than by them.
    pub fn is_incoming_for(&self, owner: &UserId) -> bool {
        &self.author != owner
    }
}

/// Attachment on an entity.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Attachment {
    /// Attachment URL.
    pub url: String,
    /// Original filename.
    pub name: String,
    /// Attachment type.
    pub kind: AttachmentKind,
    /// Thumbnail URL for images.
    pub thumb_url: Option<String>,
    /// Image dimensions if applicable.
    pub dimensions: Option<(u32, u32)>,
}

/// Attachment type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AttachmentKind {
    /// Image attachment.
    Image,
    /// Video attachment.
    Video,
    /// Audio attachment.
    Audio,
    /// Other file type.
    File,
}

impl AttachmentKind {
    /// Determine attachment kind from a file extension.
    pub fn from_ext(ext: &str) -> Self {
        let ext = ext.to_lowercase();
        match ext.as_str() {
            "jpg" | "jpeg" | "png" | "gif" | "webp" | "bmp" => AttachmentKind::Image,
            "mp4" | "webm" | "mov" | "avi" | "mkv" => AttachmentKind::Video,
            "mp3" | "wav" | "ogg" | "m4a" | "flac" => AttachmentKind::Audio,
            _ => AttachmentKind::File,
        }
    }
}

impl Default for AttachmentKind {
    fn default() -> Self {
        AttachmentKind::File
    }
}

/// Current time in milliseconds since the epoch.
pub fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entity(id: &str, created_at: i64, revision: u64) -> Entity {
        Entity {
            id: id.into(),
            created_at,
            revision,
            ..Default::default()
        }
    }

    #[test]
    fn test_freshness() {
        let old = entity("a", 100, 1);
        let new = entity("a", 100, 2);
        assert!(new.is_fresher_than(&old));
        assert!(!old.is_fresher_than(&new));

        // Equal revision and time: tie favors the existing entry.
        let twin = entity("a", 100, 1);
        assert!(!twin.is_fresher_than(&old));
    }

    #[test]
    fn test_display_ordering() {
        let a = entity("a", 1, 0);
        let b = entity("b", 2, 0);
        assert_eq!(b.display_cmp(&a), Ordering::Less);

        // Same timestamp: higher ID sorts first, deterministically.
        let c = entity("c", 2, 0);
        assert_eq!(c.display_cmp(&b), Ordering::Less);
    }

    #[test]
    fn test_counterpart() {
        let me = UserId::new("me");
        let them = UserId::new("them");

        let incoming = Entity {
            id: "m1".into(),
            kind: EntityKind::Message,
            author: them.clone(),
            recipient: Some(me.clone()),
            ..Default::default()
        };
        assert_eq!(incoming.counterpart_for(&me), Some(&them));
        assert!(incoming.is_incoming_for(&me));

        let outgoing = Entity {
            id: "m2".into(),
            kind: EntityKind::Message,
            author: me.clone(),
            recipient: Some(them.clone()),
            ..Default::default()
        };
        assert_eq!(outgoing.counterpart_for(&me), Some(&them));
        assert!(!outgoing.is_incoming_for(&me));

        let post = Entity {
            id: "p1".into(),
            author: them.clone(),
            ..Default::default()
        };
        assert_eq!(post.counterpart_for(&me), None);
    }

    #[test]
    fn test_attachment_kind() {
        assert_eq!(AttachmentKind::from_ext("jpg"), AttachmentKind::Image);
        assert_eq!(AttachmentKind::from_ext("MP4"), AttachmentKind::Video);
        assert_eq!(AttachmentKind::from_ext("mp3"), AttachmentKind::Audio);
        assert_eq!(AttachmentKind::from_ext("zip"), AttachmentKind::File);
    }
}
