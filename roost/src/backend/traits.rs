//! Trait definitions for the remote service and the persistence engine.
//!
//! The engine never owns a transport or a database; it consumes these
//! abstract operations from excluded collaborators.

use async_trait::async_trait;

use crate::error::Result;
use crate::models::{Entity, MutationOp, MutationResult, Session, UserId};

/// Paginated remote feed and mutation endpoint.
#[async_trait]
pub trait RemoteFeed: Send + Sync + std::fmt::Debug {
    /// Fetch one page of entities.
    ///
    /// `None` entries denote IDs the service returned but could not
    /// materialize. `prefer_cache` asks the transport for its own cached
    /// copy of the page when it has one.
    async fn fetch_page(
        &self,
        cursor: u64,
        page_size: usize,
        prefer_cache: bool,
    ) -> Result<Vec<Option<Entity>>>;

    /// Send a mutation. The result carries whichever fields the server
    /// recomputed, nothing more.
    async fn send_mutation(&self, op: MutationOp) -> Result<MutationResult>;

    /// Cheap connectivity probe, checked before each remote phase.
    fn is_online(&self) -> bool {
        true
    }
}

/// On-device persistence for entities and sessions.
#[async_trait]
pub trait Persistence: Send + Sync + std::fmt::Debug {
    /// Load every cached entity for an owner.
    async fn load_all(&self, owner: &UserId) -> Result<Vec<Entity>>;

    /// Persist a batch of entities, replacing by ID.
    async fn save_batch(&self, batch: &[Entity]) -> Result<()>;

    /// Load every session for an owner.
    async fn load_sessions(&self, owner: &UserId) -> Result<Vec<Session>>;

    /// Persist one session.
    async fn save_session(&self, session: &Session) -> Result<()>;

    /// Delete a session and cascade deletion of its conversation's entities.
    async fn delete_session(&self, owner: &UserId, counterpart: &UserId) -> Result<()>;
}
