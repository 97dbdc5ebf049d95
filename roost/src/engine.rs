//! Engine facade and builder.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::backend::{MemoryPersistence, Persistence, RemoteFeed};
use crate::bus::NotificationBus;
use crate::error::{Error, Result};
use crate::models::UserId;
use crate::mutate::{OptimisticMutationManager, DEFAULT_MUTATION_COOLDOWN};
use crate::poll::PollScheduler;
use crate::session::SessionRegistry;
use crate::store::EntityStore;
use crate::sync::{PageResult, SyncConfig, SyncCoordinator};

/// Scheduler key under which the background feed refresh runs.
const FEED_POLL_KEY: &str = "feed.refresh";

/// Builder for creating a [`SyncEngine`].
pub struct SyncEngineBuilder {
    owner: Option<UserId>,
    remote: Option<Arc<dyn RemoteFeed>>,
    persistence: Option<Arc<dyn Persistence>>,
    sync_config: SyncConfig,
    cooldown: Duration,
}

impl std::fmt::Debug for SyncEngineBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SyncEngineBuilder")
            .field("owner", &self.owner)
            .field("sync_config", &self.sync_config)
            .field("cooldown", &self.cooldown)
            .finish()
    }
}

impl Default for SyncEngineBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl SyncEngineBuilder {
    /// Create a new builder.
    pub fn new() -> Self {
        Self {
            owner: None,
            remote: None,
            persistence: None,
            sync_config: SyncConfig::default(),
            cooldown: DEFAULT_MUTATION_COOLDOWN,
        }
    }

    /// Set the local user the engine belongs to. Required.
    pub fn owner(mut self, owner: impl Into<UserId>) -> Self {
        self.owner = Some(owner.into());
        self
    }

    /// Set the remote feed backend. Required.
    pub fn remote(mut self, remote: Arc<dyn RemoteFeed>) -> Self {
        self.remote = Some(remote);
        self
    }

    /// Set the persistence backend. Defaults to in-memory.
    pub fn persistence(mut self, persistence: Arc<dyn Persistence>) -> Self {
        self.persistence = Some(persistence);
        self
    }

    /// Set the page size for paginated loads.
    pub fn page_size(mut self, page_size: usize) -> Self {
        self.sync_config.page_size = page_size;
        self
    }

    /// Set the repeated-mutation cooldown window.
    pub fn mutation_cooldown(mut self, cooldown: Duration) -> Self {
        self.cooldown = cooldown;
        self
    }

    /// Build the engine.
    pub fn build(self) -> Result<SyncEngine> {
        let owner = self
            .owner
            .ok_or_else(|| Error::InvalidArgument("owner is required".into()))?;
        let remote = self
            .remote
            .ok_or_else(|| Error::InvalidArgument("remote backend is required".into()))?;
        let persistence = self
            .persistence
            .unwrap_or_else(|| Arc::new(MemoryPersistence::new()));

        let store = Arc::new(Mutex::new(EntityStore::new()));
        let bus = Arc::new(NotificationBus::new());

        let feed = SyncCoordinator::new(
            owner.clone(),
            store.clone(),
            bus.clone(),
            remote.clone(),
            persistence.clone(),
            self.sync_config,
        );
        let mutations = OptimisticMutationManager::new(
            owner.clone(),
            store.clone(),
            bus.clone(),
            remote.clone(),
            persistence.clone(),
            self.cooldown,
        );
        let sessions = SessionRegistry::new(
            owner.clone(),
            store.clone(),
            bus.clone(),
            persistence.clone(),
        );

        Ok(SyncEngine {
            inner: Arc::new(EngineInner {
                owner,
                store,
                bus,
                feed,
                mutations,
                sessions,
                scheduler: PollScheduler::new(),
            }),
        })
    }
}

struct EngineInner {
    owner: UserId,
    store: Arc<Mutex<EntityStore>>,
    bus: Arc<NotificationBus>,
    feed: SyncCoordinator,
    mutations: OptimisticMutationManager,
    sessions: SessionRegistry,
    scheduler: PollScheduler,
}

/// The client-side synchronization and caching engine.
///
/// Owns the shared entity store, the notification bus, and the feature
/// components, all wired over the same backends. Cheap to clone.
#[derive(Clone)]
pub struct SyncEngine {
    inner: Arc<EngineInner>,
}

impl std::fmt::Debug for SyncEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SyncEngine")
            .field("owner", &self.inner.owner)
            .finish()
    }
}

impl SyncEngine {
    /// Create a builder.
    pub fn builder() -> SyncEngineBuilder {
        SyncEngineBuilder::new()
    }

    /// The local user this engine belongs to.
    pub fn owner(&self) -> &UserId {
        &self.inner.owner
    }

    /// The shared entity store.
    pub fn store(&self) -> &Arc<Mutex<EntityStore>> {
        &self.inner.store
    }

    /// The notification bus.
    pub fn bus(&self) -> &Arc<NotificationBus> {
        &self.inner.bus
    }

    /// Paginated feed loading.
    pub fn feed(&self) -> &SyncCoordinator {
        &self.inner.feed
    }

    /// Optimistic mutations.
    pub fn mutations(&self) -> &OptimisticMutationManager {
        &self.inner.mutations
    }

    /// Conversation sessions.
    pub fn sessions(&self) -> &SessionRegistry {
        &self.inner.sessions
    }

    /// Background timers.
    pub fn scheduler(&self) -> &PollScheduler {
        &self.inner.scheduler
    }

    /// Hydrate sessions from persistence, load the first feed page, and
    /// fold any loaded messages into sessions.
    pub async fn bootstrap(&self) -> Result<PageResult> {
        self.inner.sessions.load().await?;
        let page = self.inner.feed.load_initial().await?;
        self.inner.sessions.ingest(&page.entities).await?;
        Ok(page)
    }

    /// Refresh the feed periodically in the background until
    /// [`stop_feed_poll`](Self::stop_feed_poll) is called.
    pub fn start_feed_poll(&self, every: Duration) {
        let feed = self.inner.feed.clone();
        let sessions = self.inner.sessions.clone();
        self.inner.scheduler.start(FEED_POLL_KEY, every, move || {
            let feed = feed.clone();
            let sessions = sessions.clone();
            async move {
                let page = feed.refresh().await?;
                sessions.ingest(&page.entities).await?;
                Ok(())
            }
        });
    }

    /// Stop the background feed refresh. Returns false if none was running.
    pub fn stop_feed_poll(&self) -> bool {
        self.inner.scheduler.cancel(FEED_POLL_KEY)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::MemoryRemote;
    use crate::models::{Entity, EntityPatch, MutationResult};
    use crate::sync::SyncStatus;
    use pretty_assertions::assert_eq;

    fn post(id: &str, created_at: i64) -> Entity {
        Entity {
            id: id.into(),
            author: "someone".into(),
            created_at,
            ..Default::default()
        }
    }

    fn engine_with(remote: Arc<MemoryRemote>) -> SyncEngine {
        SyncEngine::builder()
            .owner("me")
            .remote(remote)
            .mutation_cooldown(Duration::from_millis(0))
            .build()
            .unwrap()
    }

    #[test]
    fn test_builder_requires_owner_and_remote() {
        assert!(SyncEngine::builder().build().is_err());
        assert!(SyncEngine::builder().owner("me").build().is_err());

        let engine = engine_with(Arc::new(MemoryRemote::new()));
        assert_eq!(engine.owner().as_str(), "me");
    }

    #[tokio::test]
    async fn test_load_mutate_fail_rollback_stale_echo() {
        let remote = Arc::new(MemoryRemote::new());
        remote.push_page(vec![Some(post("a", 100)), Some(post("b", 200))]);
        let engine = engine_with(remote.clone());

        // Initial load: newest first.
        let page = engine.bootstrap().await.unwrap();
        assert_eq!(page.status, SyncStatus::Fresh);
        let ids: Vec<&str> = page.entities.iter().map(|e| e.id.as_str()).collect();
        assert_eq!(ids, ["b", "a"]);

        // Optimistic favorite that the server rejects.
        remote.set_fail_mutations(true);
        let patch = {
            let store = engine.store().lock().unwrap();
            EntityPatch::toggle_favorite(store.get(&"a".into()).unwrap())
        };
        let err = engine
            .mutations()
            .apply("a".into(), patch)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Remote { .. }));

        // Rolled back exactly.
        {
            let store = engine.store().lock().unwrap();
            let entity = store.get(&"a".into()).unwrap();
            assert!(!entity.flags.favorited);
            assert_eq!(entity.counts.favorites, 0);
        }

        // A stale remote echo of the speculative state must not resurrect it.
        let mut echo = post("a", 100);
        echo.flags.favorited = true;
        echo.counts.favorites = 1;
        remote.set_pages(vec![vec![Some(echo)]]);
        engine.feed().refresh().await.unwrap();

        let store = engine.store().lock().unwrap();
        let entity = store.get(&"a".into()).unwrap();
        assert!(!entity.flags.favorited);
    }

    #[tokio::test]
    async fn test_successful_mutation_reaches_server() {
        let remote = Arc::new(MemoryRemote::new());
        remote.push_page(vec![Some(post("a", 100))]);
        remote.push_result(MutationResult {
            entity_id: None,
            patch: EntityPatch {
                favorites: Some(42),
                ..Default::default()
            },
        });
        let engine = engine_with(remote.clone());
        engine.bootstrap().await.unwrap();

        let patch = {
            let store = engine.store().lock().unwrap();
            EntityPatch::toggle_favorite(store.get(&"a".into()).unwrap())
        };
        let settled = engine.mutations().apply("a".into(), patch).await.unwrap();

        assert!(settled.flags.favorited);
        // The server's recomputed count wins over the optimistic one.
        assert_eq!(settled.counts.favorites, 42);
        assert_eq!(remote.sent_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_feed_poll_lifecycle() {
        let remote = Arc::new(MemoryRemote::new());
        remote.push_page(vec![Some(post("a", 100))]);
        let engine = engine_with(remote.clone());
        engine.bootstrap().await.unwrap();

        assert!(!engine.stop_feed_poll());
        engine.start_feed_poll(Duration::from_secs(30));
        assert!(engine.scheduler().is_active("feed.refresh"));

        tokio::time::sleep(Duration::from_secs(65)).await;
        assert!(engine.stop_feed_poll());
    }
}
