//! Field-level entity patches and mutation records.

use serde::{Deserialize, Serialize};

use super::{Entity, EntityId};

/// A sparse change set over an entity's mutable counters and flags.
///
/// `None` fields are untouched. The same type describes a speculative local
/// write, its captured pre-image, and the fields a server response echoed
/// back — the server is never assumed to return the full record.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntityPatch {
    pub favorited: Option<bool>,
    pub bookmarked: Option<bool>,
    pub pinned: Option<bool>,
    pub private: Option<bool>,
    pub favorites: Option<i64>,
    pub bookmarks: Option<i64>,
    pub reposts: Option<i64>,
    pub comments: Option<i64>,
    /// Entity revision. Always present in pre-images (the optimistic write
    /// bumps it, so rollback must restore it); present in server results
    /// when the server issued a new revision.
    pub revision: Option<u64>,
}

impl EntityPatch {
    /// Check whether the patch touches no fields.
    pub fn is_empty(&self) -> bool {
        self.favorited.is_none()
            && self.bookmarked.is_none()
            && self.pinned.is_none()
            && self.private.is_none()
            && self.favorites.is_none()
            && self.bookmarks.is_none()
            && self.reposts.is_none()
            && self.comments.is_none()
    }

    /// Classify the patch for debounce keying.
    pub fn kind(&self) -> MutationKind {
        let mut kind = None;
        let mut mark = |k: MutationKind| {
            kind = match kind {
                None => Some(k),
                Some(existing) if existing == k => Some(k),
                Some(_) => Some(MutationKind::Mixed),
            };
        };
        if self.favorited.is_some() || self.favorites.is_some() {
            mark(MutationKind::Favorite);
        }
        if self.bookmarked.is_some() || self.bookmarks.is_some() {
            mark(MutationKind::Bookmark);
        }
        if self.reposts.is_some() {
            mark(MutationKind::Repost);
        }
        if self.pinned.is_some() {
            mark(MutationKind::Pin);
        }
        if self.private.is_some() || self.comments.is_some() {
            mark(MutationKind::Mixed);
        }
        kind.unwrap_or(MutationKind::Mixed)
    }

    /// Toggle the favorite flag on `entity`, adjusting the counter with it.
    pub fn toggle_favorite(entity: &Entity) -> Self {
        let on = !entity.flags.favorited;
        EntityPatch {
            favorited: Some(on),
            favorites: Some(entity.counts.favorites + if on { 1 } else { -1 }),
            ..Default::default()
        }
    }

    /// Toggle the bookmark flag on `entity`, adjusting the counter with it.
    pub fn toggle_bookmark(entity: &Entity) -> Self {
        let on = !entity.flags.bookmarked;
        EntityPatch {
            bookmarked: Some(on),
            bookmarks: Some(entity.counts.bookmarks + if on { 1 } else { -1 }),
            ..Default::default()
        }
    }

    /// Build a repost patch for `entity`.
    pub fn repost(entity: &Entity) -> Self {
        EntityPatch {
            reposts: Some(entity.counts.reposts + 1),
            ..Default::default()
        }
    }

    /// Capture the pre-mutation values of exactly the fields this patch
    /// touches, plus the current revision.
    pub fn capture(&self, entity: &Entity) -> EntityPatch {
        EntityPatch {
            favorited: self.favorited.map(|_| entity.flags.favorited),
            bookmarked: self.bookmarked.map(|_| entity.flags.bookmarked),
            pinned: self.pinned.map(|_| entity.flags.pinned),
            private: self.private.map(|_| entity.flags.private),
            favorites: self.favorites.map(|_| entity.counts.favorites),
            bookmarks: self.bookmarks.map(|_| entity.counts.bookmarks),
            reposts: self.reposts.map(|_| entity.counts.reposts),
            comments: self.comments.map(|_| entity.counts.comments),
            revision: Some(entity.revision),
        }
    }

    /// Write the patched fields into `entity`. Untouched fields keep their
    /// current values.
    pub fn apply_to(&self, entity: &mut Entity) {
        if let Some(v) = self.favorited {
            entity.flags.favorited = v;
        }
        if let Some(v) = self.bookmarked {
            entity.flags.bookmarked = v;
        }
        if let Some(v) = self.pinned {
            entity.flags.pinned = v;
        }
        if let Some(v) = self.private {
            entity.flags.private = v;
        }
        if let Some(v) = self.favorites {
            entity.counts.favorites = v;
        }
        if let Some(v) = self.bookmarks {
            entity.counts.bookmarks = v;
        }
        if let Some(v) = self.reposts {
            entity.counts.reposts = v;
        }
        if let Some(v) = self.comments {
            entity.counts.comments = v;
        }
        if let Some(v) = self.revision {
            entity.revision = v;
        }
    }
}

/// Mutation category used as half of the debounce key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MutationKind {
    Favorite,
    Bookmark,
    Repost,
    Pin,
    Delete,
    Create,
    /// A patch spanning several categories.
    Mixed,
}

/// A mutation sent to the remote service.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum MutationOp {
    /// Change counters/flags on an existing entity.
    Update {
        entity_id: EntityId,
        patch: EntityPatch,
    },
    /// Create a new entity (post or message) submitted under a local ID.
    Create { entity: Entity },
    /// Delete an entity.
    Delete { entity_id: EntityId },
}

/// What the server sent back for a settled mutation.
///
/// Only the fields the server actually recomputed are present; everything
/// else keeps its optimistic local value.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MutationResult {
    /// Canonical ID assigned by the server, for creates.
    pub entity_id: Option<EntityId>,
    /// Fields the server recomputed.
    pub patch: EntityPatch,
}

/// Lifecycle state of an optimistic mutation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MutationState {
    Pending,
    Confirmed,
    RolledBack,
}

/// Transient record of one in-flight optimistic mutation.
#[derive(Debug, Clone)]
pub struct MutationRecord {
    /// Target entity.
    pub entity_id: EntityId,
    /// Debounce category.
    pub kind: MutationKind,
    /// The speculative change.
    pub patch: EntityPatch,
    /// Pre-mutation values of exactly the touched fields.
    pub pre_image: EntityPatch,
    /// Current lifecycle state.
    pub state: MutationState,
}
