//! Client-side synchronization and caching engine for feeds and
//! conversations.
//!
//! The engine keeps one canonical in-memory copy of every entity, loads
//! cache-first with a remote phase behind it, applies mutations
//! optimistically with exact rollback, and aggregates direct messages
//! into per-counterpart sessions. Transport and durable storage are
//! supplied by the caller through the [`backend`] traits.

pub mod backend;
pub mod bus;
pub mod engine;
pub mod error;
pub mod models;
pub mod mutate;
pub mod poll;
pub mod session;
pub mod store;
pub mod sync;

// Re-export main types
pub use engine::{SyncEngine, SyncEngineBuilder};
pub use error::{Error, Result};

// Re-export commonly used models
pub use models::{
    Attachment, AttachmentKind, Entity, EntityCounts, EntityFlags, EntityId, EntityKind,
    EntityPatch, MutationKind, MutationOp, MutationRecord, MutationResult, MutationState, Session,
    SessionId, UserId,
};

// Re-export component types
pub use backend::{MemoryPersistence, MemoryRemote, Persistence, RemoteFeed};
pub use bus::{EventKind, NotificationBus, StoreEvent, SubscriptionHandle};
pub use mutate::{Draft, OptimisticMutationManager};
pub use poll::PollScheduler;
pub use session::SessionRegistry;
pub use store::{EntityStore, MergeReport};
pub use sync::{PageResult, SyncConfig, SyncCoordinator, SyncStatus};

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn test_engine_builder() {
        let engine = SyncEngine::builder()
            .owner("me")
            .remote(Arc::new(MemoryRemote::new()))
            .build();
        assert!(engine.is_ok());

        let engine = engine.unwrap();
        assert_eq!(engine.owner().as_str(), "me");
    }

    #[test]
    fn test_engine_builder_without_remote() {
        let engine = SyncEngine::builder().owner("me").build();
        assert!(engine.is_err());
    }
}
