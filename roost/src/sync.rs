//! Paginated loading orchestration.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use log::{debug, warn};

use crate::backend::{Persistence, RemoteFeed};
use crate::bus::{NotificationBus, StoreEvent};
use crate::error::{Error, Result};
use crate::models::{Entity, UserId};
use crate::store::{EntityStore, MergeReport};

/// Maximum consecutive pages of only-unresolved entries scanned before
/// pagination gives up. Keeps a feed of dangling IDs from looping forever.
pub const MAX_CONSECUTIVE_EMPTY_PAGES: u32 = 3;

/// Tuning for a coordinator.
#[derive(Debug, Clone)]
pub struct SyncConfig {
    /// Entities requested per page.
    pub page_size: usize,
    /// Bound on the consecutive empty-page scan.
    pub max_empty_pages: u32,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            page_size: 20,
            max_empty_pages: MAX_CONSECUTIVE_EMPTY_PAGES,
        }
    }
}

/// How fresh the data in a [`PageResult`] is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncStatus {
    /// The remote phase completed; the page reflects the server.
    Fresh,
    /// Only the cache phase has run so far.
    CachedOnly,
    /// The remote phase failed; previously cached data is shown.
    CachedFallback,
    /// No connectivity; the remote phase was skipped.
    Offline,
}

/// A page of entities plus pagination state.
#[derive(Debug, Clone)]
pub struct PageResult {
    /// Entities in display order.
    pub entities: Vec<Entity>,
    /// Whether another page may exist.
    pub has_more: bool,
    /// Freshness of this result.
    pub status: SyncStatus,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Idle,
    LoadingCache,
    LoadingRemote,
}

#[derive(Debug)]
struct ListState {
    phase: Phase,
    /// Next page to fetch. Monotonic within one load generation.
    cursor: u64,
    has_more: bool,
    initial_done: bool,
}

impl Default for ListState {
    fn default() -> Self {
        Self {
            phase: Phase::Idle,
            cursor: 0,
            has_more: true,
            initial_done: false,
        }
    }
}

/// One resolved remote fetch, possibly after skipping unresolved pages.
struct RemoteWindow {
    entities: Vec<Entity>,
    /// The page that actually produced entities.
    served_cursor: u64,
    /// True when the feed is known to end here.
    exhausted: bool,
}

/// Orchestrates cache-first paginated loading for one list.
#[derive(Debug, Clone)]
pub struct SyncCoordinator {
    inner: Arc<SyncInner>,
}

struct SyncInner {
    owner: UserId,
    store: Arc<Mutex<EntityStore>>,
    bus: Arc<NotificationBus>,
    remote: Arc<dyn RemoteFeed>,
    persistence: Arc<dyn Persistence>,
    config: SyncConfig,
    state: Mutex<ListState>,
    /// Cancellation epoch. Bumping it orphans every in-flight load, which
    /// must not apply its eventual result.
    epoch: AtomicU64,
}

impl std::fmt::Debug for SyncInner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SyncInner")
            .field("owner", &self.owner)
            .field("state", &self.state.lock().unwrap())
            .finish()
    }
}

impl SyncCoordinator {
    pub(crate) fn new(
        owner: UserId,
        store: Arc<Mutex<EntityStore>>,
        bus: Arc<NotificationBus>,
        remote: Arc<dyn RemoteFeed>,
        persistence: Arc<dyn Persistence>,
        config: SyncConfig,
    ) -> Self {
        Self {
            inner: Arc::new(SyncInner {
                owner,
                store,
                bus,
                remote,
                persistence,
                config,
                state: Mutex::new(ListState::default()),
                epoch: AtomicU64::new(0),
            }),
        }
    }

    /// Whether another page may exist.
    pub fn has_more(&self) -> bool {
        self.inner.state.lock().unwrap().has_more
    }

    /// Whether a load is currently in flight.
    pub fn is_loading(&self) -> bool {
        self.inner.state.lock().unwrap().phase != Phase::Idle
    }

    /// Cancel any in-flight load; its result will be discarded.
    pub fn cancel(&self) {
        self.inner.epoch.fetch_add(1, Ordering::SeqCst);
        self.inner.state.lock().unwrap().phase = Phase::Idle;
    }

    /// Load the first page: cache first for instant display, then the
    /// remote copy of the same page.
    ///
    /// The cached merge is published on the bus before the remote fetch is
    /// awaited, so subscribers render previously seen data immediately.
    pub async fn load_initial(&self) -> Result<PageResult> {
        let inner = &self.inner;
        let epoch = inner.epoch.fetch_add(1, Ordering::SeqCst) + 1;

        {
            let mut state = inner.state.lock().unwrap();
            *state = ListState::default();
            state.phase = Phase::LoadingCache;
        }

        // Cache phase.
        let cached = inner.persistence.load_all(&inner.owner).await;
        self.check_epoch(epoch)?;
        match cached {
            Ok(batch) => {
                self.merge_and_publish(batch);
            }
            Err(e) => warn!("cache read failed, continuing to remote: {}", e),
        }

        if !inner.remote.is_online() {
            // Offline skips the remote phase and leaves has_more alone; the
            // next refresh or poll settles it.
            let mut state = inner.state.lock().unwrap();
            state.phase = Phase::Idle;
            state.initial_done = true;
            return Ok(PageResult {
                entities: self.first_page(),
                has_more: state.has_more,
                status: SyncStatus::Offline,
            });
        }

        // Remote phase for the same (first) page.
        {
            inner.state.lock().unwrap().phase = Phase::LoadingRemote;
        }
        match self.fetch_window(0, epoch, false).await {
            Ok(window) => {
                self.merge_and_publish(window.entities.clone());
                self.save_batch(&window.entities).await;
                let mut state = inner.state.lock().unwrap();
                state.phase = Phase::Idle;
                state.initial_done = true;
                state.cursor = window.served_cursor + 1;
                state.has_more = !window.exhausted;
                Ok(PageResult {
                    entities: self.first_page(),
                    has_more: state.has_more,
                    status: SyncStatus::Fresh,
                })
            }
            Err(Error::Cancelled) => Err(Error::Cancelled),
            Err(e) => {
                debug!("remote phase of initial load failed: {}", e);
                let mut state = inner.state.lock().unwrap();
                state.phase = Phase::Idle;
                state.initial_done = true;
                let status = if e.is_offline() {
                    SyncStatus::Offline
                } else {
                    SyncStatus::CachedFallback
                };
                Ok(PageResult {
                    entities: self.first_page(),
                    has_more: state.has_more,
                    status,
                })
            }
        }
    }

    /// Load the next page.
    ///
    /// Guarded: returns `Ok(None)` when a load is already in flight, no
    /// more pages exist, or the initial load has not completed. On success
    /// the returned entities are the freshly fetched ones, for appending.
    pub async fn load_more(&self) -> Result<Option<PageResult>> {
        let inner = &self.inner;
        let epoch = inner.epoch.load(Ordering::SeqCst);

        let cursor = {
            let mut state = inner.state.lock().unwrap();
            if state.phase != Phase::Idle || !state.has_more || !state.initial_done {
                return Ok(None);
            }
            state.phase = Phase::LoadingRemote;
            state.cursor
        };

        if !inner.remote.is_online() {
            let mut state = inner.state.lock().unwrap();
            state.phase = Phase::Idle;
            return Ok(Some(PageResult {
                entities: Vec::new(),
                has_more: state.has_more,
                status: SyncStatus::Offline,
            }));
        }

        match self.fetch_window(cursor, epoch, true).await {
            Ok(window) => {
                self.merge_and_publish(window.entities.clone());
                self.save_batch(&window.entities).await;
                let mut state = inner.state.lock().unwrap();
                state.phase = Phase::Idle;
                state.cursor = window.served_cursor + 1;
                state.has_more = !window.exhausted;
                Ok(Some(PageResult {
                    entities: window.entities,
                    has_more: state.has_more,
                    status: SyncStatus::Fresh,
                }))
            }
            Err(Error::Cancelled) => Err(Error::Cancelled),
            Err(e) => {
                debug!("load_more failed, cursor not advanced: {}", e);
                let mut state = inner.state.lock().unwrap();
                state.phase = Phase::Idle;
                let status = if e.is_offline() {
                    SyncStatus::Offline
                } else {
                    SyncStatus::CachedFallback
                };
                Ok(Some(PageResult {
                    entities: Vec::new(),
                    has_more: state.has_more,
                    status,
                }))
            }
        }
    }

    /// Refresh the first page from the remote, regardless of cache state.
    ///
    /// Success replaces the first page and recomputes `has_more`; failure
    /// leaves the cache untouched and reports the cached data instead of an
    /// error.
    pub async fn refresh(&self) -> Result<PageResult> {
        let inner = &self.inner;
        let epoch = inner.epoch.fetch_add(1, Ordering::SeqCst) + 1;

        {
            let mut state = inner.state.lock().unwrap();
            state.phase = Phase::LoadingRemote;
        }

        if !inner.remote.is_online() {
            let mut state = inner.state.lock().unwrap();
            state.phase = Phase::Idle;
            return Ok(PageResult {
                entities: self.first_page(),
                has_more: state.has_more,
                status: SyncStatus::Offline,
            });
        }

        match self.fetch_window(0, epoch, false).await {
            Ok(window) => {
                self.merge_and_publish(window.entities.clone());
                self.save_batch(&window.entities).await;
                let mut state = inner.state.lock().unwrap();
                state.phase = Phase::Idle;
                state.initial_done = true;
                state.cursor = window.served_cursor + 1;
                state.has_more = !window.exhausted;
                Ok(PageResult {
                    entities: self.first_page(),
                    has_more: state.has_more,
                    status: SyncStatus::Fresh,
                })
            }
            Err(Error::Cancelled) => Err(Error::Cancelled),
            Err(e) => {
                debug!("refresh failed, keeping cached data: {}", e);
                let mut state = inner.state.lock().unwrap();
                state.phase = Phase::Idle;
                let status = if e.is_offline() {
                    SyncStatus::Offline
                } else {
                    SyncStatus::CachedFallback
                };
                Ok(PageResult {
                    entities: self.first_page(),
                    has_more: state.has_more,
                    status,
                })
            }
        }
    }

    /// Fetch one page, auto-advancing past pages made only of unresolved
    /// entries, bounded by the configured maximum.
    async fn fetch_window(
        &self,
        start_cursor: u64,
        epoch: u64,
        prefer_cache: bool,
    ) -> Result<RemoteWindow> {
        let inner = &self.inner;
        let mut cursor = start_cursor;
        let mut empty_streak = 0u32;

        loop {
            let raw = inner
                .remote
                .fetch_page(cursor, inner.config.page_size, prefer_cache)
                .await?;
            self.check_epoch(epoch)?;

            let returned = raw.len();
            let entities: Vec<Entity> = raw.into_iter().flatten().collect();

            if entities.is_empty() && returned > 0 {
                // The server returned IDs the client could not materialize.
                empty_streak += 1;
                if empty_streak >= inner.config.max_empty_pages {
                    warn!(
                        "gave up after {} consecutive unresolved pages at cursor {}",
                        empty_streak, cursor
                    );
                    return Ok(RemoteWindow {
                        entities: Vec::new(),
                        served_cursor: cursor,
                        exhausted: true,
                    });
                }
                cursor += 1;
                continue;
            }

            let exhausted = returned < inner.config.page_size;
            return Ok(RemoteWindow {
                entities,
                served_cursor: cursor,
                exhausted,
            });
        }
    }

    fn check_epoch(&self, epoch: u64) -> Result<()> {
        if self.inner.epoch.load(Ordering::SeqCst) != epoch {
            return Err(Error::Cancelled);
        }
        Ok(())
    }

    fn first_page(&self) -> Vec<Entity> {
        self.inner
            .store
            .lock()
            .unwrap()
            .page(0, self.inner.config.page_size)
    }

    fn merge_and_publish(&self, batch: Vec<Entity>) -> MergeReport {
        let inner = &self.inner;
        let (report, created, updated) = {
            let mut store = inner.store.lock().unwrap();
            let report = store.merge(batch);
            let created: Vec<Entity> = report
                .created
                .iter()
                .filter_map(|id| store.get(id).cloned())
                .collect();
            let updated: Vec<Entity> = report
                .updated
                .iter()
                .filter_map(|id| store.get(id).cloned())
                .collect();
            (report, created, updated)
        };

        if report.skipped_malformed > 0 {
            warn!(
                "skipped {} malformed entries during merge",
                report.skipped_malformed
            );
        }

        // Events are published outside the store lock.
        for entity in created {
            inner.bus.publish(&StoreEvent::EntityCreated(entity));
        }
        for entity in updated {
            inner.bus.publish(&StoreEvent::EntityUpdated(entity));
        }

        report
    }

    async fn save_batch(&self, batch: &[Entity]) {
        if batch.is_empty() {
            return;
        }
        if let Err(e) = self.inner.persistence.save_batch(batch).await {
            warn!("persisting fetched batch failed: {}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{MemoryPersistence, MemoryRemote};
    use crate::bus::EventKind;
    use pretty_assertions::assert_eq;
    use std::sync::atomic::AtomicUsize;

    fn entity(id: &str, created_at: i64) -> Entity {
        Entity {
            id: id.into(),
            created_at,
            revision: 1,
            ..Default::default()
        }
    }

    fn page_of(ids: &[(&str, i64)]) -> Vec<Option<Entity>> {
        ids.iter().map(|(id, ts)| Some(entity(id, *ts))).collect()
    }

    struct Fixture {
        coordinator: SyncCoordinator,
        remote: Arc<MemoryRemote>,
        persistence: Arc<MemoryPersistence>,
        bus: Arc<NotificationBus>,
        store: Arc<Mutex<EntityStore>>,
    }

    fn fixture(page_size: usize) -> Fixture {
        let remote = Arc::new(MemoryRemote::new());
        let persistence = Arc::new(MemoryPersistence::new());
        let bus = Arc::new(NotificationBus::new());
        let store = Arc::new(Mutex::new(EntityStore::new()));
        let coordinator = SyncCoordinator::new(
            "me".into(),
            store.clone(),
            bus.clone(),
            remote.clone(),
            persistence.clone(),
            SyncConfig {
                page_size,
                ..Default::default()
            },
        );
        Fixture {
            coordinator,
            remote,
            persistence,
            bus,
            store,
        }
    }

    #[tokio::test]
    async fn test_load_initial_cache_then_remote() {
        let f = fixture(2);
        f.persistence
            .save_batch(&[entity("old", 1)])
            .await
            .unwrap();
        f.remote
            .set_pages(vec![page_of(&[("b", 20), ("a", 10)])]);

        let result = f.coordinator.load_initial().await.unwrap();
        assert_eq!(result.status, SyncStatus::Fresh);
        // Cached entity retained alongside the fresh page (union merge).
        assert_eq!(f.store.lock().unwrap().len(), 3);
        assert_eq!(result.entities[0].id.as_str(), "b");
        assert!(result.has_more);
    }

    #[tokio::test]
    async fn test_load_initial_remote_failure_keeps_cache() {
        let f = fixture(2);
        f.persistence
            .save_batch(&[entity("cached", 5)])
            .await
            .unwrap();
        f.remote.fail_next_fetch();

        let result = f.coordinator.load_initial().await.unwrap();
        assert_eq!(result.status, SyncStatus::CachedFallback);
        assert_eq!(result.entities.len(), 1);
        assert_eq!(result.entities[0].id.as_str(), "cached");
    }

    #[tokio::test]
    async fn test_load_initial_offline() {
        let f = fixture(2);
        f.remote.set_online(false);

        let result = f.coordinator.load_initial().await.unwrap();
        assert_eq!(result.status, SyncStatus::Offline);
        assert!(result.entities.is_empty());
    }

    #[tokio::test]
    async fn test_load_initial_offline_leaves_has_more() {
        let f = fixture(2);
        f.persistence.save_batch(&[entity("cached", 5)]).await.unwrap();
        f.remote.set_online(false);

        let result = f.coordinator.load_initial().await.unwrap();

        // The remote phase never ran, so the short cached page says nothing
        // about the end of the feed.
        assert_eq!(result.status, SyncStatus::Offline);
        assert_eq!(result.entities.len(), 1);
        assert!(result.has_more);
        assert!(f.coordinator.has_more());
    }

    #[tokio::test]
    async fn test_load_more_guarded_before_initial() {
        let f = fixture(2);
        assert!(f.coordinator.load_more().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_load_more_advances_cursor() {
        let f = fixture(2);
        f.remote.set_pages(vec![
            page_of(&[("d", 40), ("c", 30)]),
            page_of(&[("b", 20), ("a", 10)]),
            page_of(&[("z", 5)]),
        ]);

        f.coordinator.load_initial().await.unwrap();

        let more = f.coordinator.load_more().await.unwrap().unwrap();
        assert_eq!(more.entities.len(), 2);
        assert!(more.has_more);

        let last = f.coordinator.load_more().await.unwrap().unwrap();
        assert_eq!(last.entities.len(), 1);
        // Short page ends the feed.
        assert!(!last.has_more);
        assert!(f.coordinator.load_more().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_bounded_empty_page_scan() {
        let f = fixture(2);
        // Every page holds only unresolved entries; the scan must terminate.
        let unresolved: Vec<Option<Entity>> = vec![None, None];
        f.remote.set_pages(vec![
            page_of(&[("a", 10), ("b", 20)]),
            unresolved.clone(),
            unresolved.clone(),
            unresolved.clone(),
            unresolved.clone(),
            unresolved,
        ]);

        f.coordinator.load_initial().await.unwrap();
        let more = f.coordinator.load_more().await.unwrap().unwrap();

        assert!(more.entities.is_empty());
        assert!(!more.has_more);
        assert!(f.coordinator.load_more().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_empty_page_scan_recovers_when_bounded() {
        let f = fixture(2);
        f.remote.set_pages(vec![
            page_of(&[("a", 10), ("b", 20)]),
            vec![None, None],
            page_of(&[("c", 5), ("d", 4)]),
        ]);

        f.coordinator.load_initial().await.unwrap();
        let more = f.coordinator.load_more().await.unwrap().unwrap();

        // The unresolved page was skipped and the next real page served.
        assert_eq!(more.entities.len(), 2);
        assert!(more.has_more);
    }

    #[tokio::test]
    async fn test_refresh_failure_reports_cached() {
        let f = fixture(2);
        f.remote
            .set_pages(vec![page_of(&[("a", 10), ("b", 20)])]);
        f.coordinator.load_initial().await.unwrap();

        f.remote.fail_next_fetch();
        let result = f.coordinator.refresh().await.unwrap();

        assert_eq!(result.status, SyncStatus::CachedFallback);
        assert_eq!(result.entities.len(), 2);
    }

    #[tokio::test]
    async fn test_refresh_offline_leaves_state() {
        let f = fixture(2);
        f.remote
            .set_pages(vec![page_of(&[("a", 10), ("b", 20)])]);
        f.coordinator.load_initial().await.unwrap();
        let had_more = f.coordinator.has_more();

        f.remote.set_online(false);
        let result = f.coordinator.refresh().await.unwrap();

        assert_eq!(result.status, SyncStatus::Offline);
        assert_eq!(result.has_more, had_more);
        assert_eq!(result.entities.len(), 2);
    }

    #[tokio::test]
    async fn test_merge_publishes_events() {
        let f = fixture(2);
        let created = Arc::new(AtomicUsize::new(0));
        let counter = created.clone();
        f.bus.subscribe_all(EventKind::EntityCreated, move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        f.remote
            .set_pages(vec![page_of(&[("a", 10), ("b", 20)])]);
        f.coordinator.load_initial().await.unwrap();

        assert_eq!(created.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_fetched_pages_are_persisted() {
        let f = fixture(2);
        f.remote
            .set_pages(vec![page_of(&[("a", 10), ("b", 20)])]);
        f.coordinator.load_initial().await.unwrap();

        assert_eq!(f.persistence.entity_count(), 2);
    }

    /// Remote that cancels the coordinator while a fetch is in flight.
    #[derive(Debug)]
    struct CancellingRemote {
        pages: MemoryRemote,
        target: Mutex<Option<SyncCoordinator>>,
    }

    #[async_trait::async_trait]
    impl RemoteFeed for CancellingRemote {
        async fn fetch_page(
            &self,
            cursor: u64,
            page_size: usize,
            prefer_cache: bool,
        ) -> Result<Vec<Option<Entity>>> {
            let raw = self.pages.fetch_page(cursor, page_size, prefer_cache).await;
            if let Some(coordinator) = self.target.lock().unwrap().take() {
                coordinator.cancel();
            }
            raw
        }

        async fn send_mutation(
            &self,
            op: crate::models::MutationOp,
        ) -> Result<crate::models::MutationResult> {
            self.pages.send_mutation(op).await
        }
    }

    #[tokio::test]
    async fn test_cancel_discards_inflight_result() {
        let remote = Arc::new(CancellingRemote {
            pages: MemoryRemote::new(),
            target: Mutex::new(None),
        });
        remote.pages.set_pages(vec![page_of(&[("a", 10), ("b", 20)])]);

        let store = Arc::new(Mutex::new(EntityStore::new()));
        let coordinator = SyncCoordinator::new(
            "me".into(),
            store.clone(),
            Arc::new(NotificationBus::new()),
            remote.clone(),
            Arc::new(MemoryPersistence::new()),
            SyncConfig::default(),
        );
        *remote.target.lock().unwrap() = Some(coordinator.clone());

        match coordinator.load_initial().await {
            Err(Error::Cancelled) => {}
            other => panic!("expected Cancelled, got {:?}", other.map(|r| r.status)),
        }
        // The fetched page was never applied.
        assert!(store.lock().unwrap().is_empty());
    }
}
