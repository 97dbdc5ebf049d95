//! Data models.

mod entity;
mod ids;
mod patch;
mod session;

pub use entity::{
    now_millis, Attachment, AttachmentKind, Entity, EntityCounts, EntityFlags, EntityKind,
};
pub use ids::{EntityId, SessionId, UserId};
pub use patch::{
    EntityPatch, MutationKind, MutationOp, MutationRecord, MutationResult, MutationState,
};
pub use session::Session;
