//! Optimistic mutation application and reconciliation.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use log::{debug, warn};

use crate::backend::{Persistence, RemoteFeed};
use crate::bus::{NotificationBus, StoreEvent};
use crate::error::{Error, Result};
use crate::models::{
    now_millis, Entity, EntityId, EntityKind, EntityPatch, MutationKind, MutationOp,
    MutationRecord, MutationState, UserId,
};
use crate::store::EntityStore;

/// Cooldown inside which a repeated (entity, kind) mutation is ignored
/// rather than re-sent.
pub const DEFAULT_MUTATION_COOLDOWN: Duration = Duration::from_millis(500);

/// A new post or message to submit optimistically.
#[derive(Debug, Clone, Default)]
pub struct Draft {
    /// Post or message.
    pub kind: EntityKind,
    /// Recipient, for messages.
    pub recipient: Option<UserId>,
    /// Textual content.
    pub content: String,
}

type DebounceKey = (EntityId, MutationKind);

/// Applies speculative local changes and commits or rolls them back once
/// the remote call settles.
#[derive(Debug, Clone)]
pub struct OptimisticMutationManager {
    inner: Arc<MutateInner>,
}

struct MutateInner {
    owner: UserId,
    store: Arc<Mutex<EntityStore>>,
    bus: Arc<NotificationBus>,
    remote: Arc<dyn RemoteFeed>,
    persistence: Arc<dyn Persistence>,
    cooldown: Duration,
    /// Last submission instant per (entity, kind).
    recent: Mutex<HashMap<DebounceKey, Instant>>,
    /// (entity, kind) pairs with a mutation still in flight.
    pending: Mutex<HashSet<DebounceKey>>,
    local_seq: AtomicU64,
}

impl std::fmt::Debug for MutateInner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MutateInner")
            .field("owner", &self.owner)
            .field("pending", &self.pending.lock().unwrap().len())
            .finish()
    }
}

impl OptimisticMutationManager {
    pub(crate) fn new(
        owner: UserId,
        store: Arc<Mutex<EntityStore>>,
        bus: Arc<NotificationBus>,
        remote: Arc<dyn RemoteFeed>,
        persistence: Arc<dyn Persistence>,
        cooldown: Duration,
    ) -> Self {
        Self {
            inner: Arc::new(MutateInner {
                owner,
                store,
                bus,
                remote,
                persistence,
                cooldown,
                recent: Mutex::new(HashMap::new()),
                pending: Mutex::new(HashSet::new()),
                local_seq: AtomicU64::new(1),
            }),
        }
    }

    /// Apply a field-level mutation optimistically and reconcile it with
    /// the server.
    ///
    /// The speculative values are in the store and announced on the bus
    /// before the remote call is awaited; the returned entity is the
    /// settled state. On failure the captured pre-image is restored exactly
    /// and a [`StoreEvent::MutationRolledBack`] is published.
    pub async fn apply(&self, entity_id: EntityId, patch: EntityPatch) -> Result<Entity> {
        let inner = &self.inner;

        if patch.is_empty() {
            return Err(Error::InvalidArgument("empty mutation payload".into()));
        }

        let kind = patch.kind();
        let key = (entity_id.clone(), kind);
        self.claim(&key)?;

        // Optimistic write, before the first await on the remote.
        let mut record = match self.write_speculative(&entity_id, &patch, kind) {
            Ok(record) => record,
            Err(e) => {
                self.release(&key);
                return Err(e);
            }
        };

        let op = MutationOp::Update {
            entity_id: entity_id.clone(),
            patch: patch.clone(),
        };
        let settled = match inner.remote.send_mutation(op).await {
            Ok(result) => {
                record.state = MutationState::Confirmed;
                // Overlay only the fields the server actually returned;
                // everything else keeps the optimistic local value. Where
                // the server diverged, the server wins.
                let confirmed = {
                    let mut store = inner.store.lock().unwrap();
                    store.get(&entity_id).cloned().map(|mut current| {
                        result.patch.apply_to(&mut current);
                        store.put(current.clone());
                        current
                    })
                };
                match confirmed {
                    Some(confirmed) => {
                        if !result.patch.is_empty() {
                            inner
                                .bus
                                .publish(&StoreEvent::EntityUpdated(confirmed.clone()));
                        }
                        self.persist(&confirmed).await;
                        Ok(confirmed)
                    }
                    // Deleted while the mutation was in flight.
                    None => Err(Error::UnknownEntity(entity_id.clone())),
                }
            }
            Err(e) => {
                debug!("mutation on {} failed, rolling back: {}", entity_id, e);
                record.state = MutationState::RolledBack;
                let restored = {
                    let mut store = inner.store.lock().unwrap();
                    store.get(&entity_id).cloned().map(|mut current| {
                        record.pre_image.apply_to(&mut current);
                        store.put(current.clone());
                        current
                    })
                };
                if let Some(restored) = restored {
                    inner.bus.publish(&StoreEvent::MutationRolledBack {
                        entity: restored,
                        patch: record.patch.clone(),
                    });
                }
                Err(e)
            }
        };

        self.release(&key);
        settled
    }

    /// Submit a new post or message optimistically under a temporary local
    /// ID, reconciled to the server-issued canonical ID on acknowledgement.
    pub async fn submit(&self, draft: Draft) -> Result<Entity> {
        let inner = &self.inner;

        if draft.content.trim().is_empty() {
            return Err(Error::InvalidArgument("content cannot be empty".into()));
        }
        if draft.kind == EntityKind::Message && draft.recipient.is_none() {
            return Err(Error::InvalidArgument("message requires a recipient".into()));
        }

        let temp_id = EntityId::local(inner.local_seq.fetch_add(1, Ordering::Relaxed));
        let temp = Entity {
            id: temp_id.clone(),
            kind: draft.kind,
            author: inner.owner.clone(),
            recipient: draft.recipient,
            created_at: now_millis(),
            content: Some(draft.content),
            ..Default::default()
        };

        {
            inner.store.lock().unwrap().put(temp.clone());
        }
        inner.bus.publish(&StoreEvent::EntityCreated(temp.clone()));

        let op = MutationOp::Create {
            entity: temp.clone(),
        };
        match inner.remote.send_mutation(op).await {
            Ok(result) => {
                let mut acked = temp;
                match result.entity_id {
                    Some(canonical) => {
                        acked.local_id = Some(acked.id.clone());
                        acked.id = canonical;
                    }
                    None => warn!("create ack carried no canonical id, keeping {}", acked.id),
                }
                result.patch.apply_to(&mut acked);
                if acked.revision == 0 {
                    acked.revision = 1;
                }

                // Merge performs the temp-id re-keying, so an acknowledged
                // submission never shows up twice.
                {
                    inner.store.lock().unwrap().merge(vec![acked.clone()]);
                }
                inner.bus.publish(&StoreEvent::EntityUpdated(acked.clone()));
                self.persist(&acked).await;
                Ok(acked)
            }
            Err(e) => {
                debug!("submission {} failed, withdrawing: {}", temp_id, e);
                inner.store.lock().unwrap().remove(&temp_id);
                inner.bus.publish(&StoreEvent::EntityDeleted(temp_id));
                Err(e)
            }
        }
    }

    /// Delete an entity optimistically; failure reinstates the snapshot.
    pub async fn delete(&self, entity_id: EntityId) -> Result<()> {
        let inner = &self.inner;
        let key = (entity_id.clone(), MutationKind::Delete);
        self.claim(&key)?;

        let snapshot = match inner.store.lock().unwrap().remove(&entity_id) {
            Some(entity) => entity,
            None => {
                self.release(&key);
                return Err(Error::UnknownEntity(entity_id));
            }
        };
        inner
            .bus
            .publish(&StoreEvent::EntityDeleted(entity_id.clone()));

        let op = MutationOp::Delete {
            entity_id: entity_id.clone(),
        };
        let outcome = match inner.remote.send_mutation(op).await {
            Ok(_) => Ok(()),
            Err(e) => {
                debug!("delete of {} failed, reinstating: {}", entity_id, e);
                inner.store.lock().unwrap().put(snapshot.clone());
                inner.bus.publish(&StoreEvent::EntityCreated(snapshot));
                Err(e)
            }
        };

        self.release(&key);
        outcome
    }

    /// Reserve a (entity, kind) slot, rejecting duplicates inside the
    /// cooldown window or while a prior call is still in flight.
    fn claim(&self, key: &DebounceKey) -> Result<()> {
        let inner = &self.inner;
        let mut pending = inner.pending.lock().unwrap();
        if pending.contains(key) {
            return Err(Error::Debounced);
        }

        let mut recent = inner.recent.lock().unwrap();
        if let Some(last) = recent.get(key) {
            if last.elapsed() < inner.cooldown {
                return Err(Error::Debounced);
            }
        }

        recent.insert(key.clone(), Instant::now());
        pending.insert(key.clone());
        Ok(())
    }

    fn release(&self, key: &DebounceKey) {
        self.inner.pending.lock().unwrap().remove(key);
    }

    fn write_speculative(
        &self,
        entity_id: &EntityId,
        patch: &EntityPatch,
        kind: MutationKind,
    ) -> Result<MutationRecord> {
        let inner = &self.inner;
        let (record, speculative) = {
            let mut store = inner.store.lock().unwrap();
            let entity = store
                .get(entity_id)
                .ok_or_else(|| Error::UnknownEntity(entity_id.clone()))?;
            let pre_image = patch.capture(entity);

            let mut speculative = entity.clone();
            patch.apply_to(&mut speculative);
            // The local bump is what shields the speculative values from a
            // stale remote snapshot during merge.
            speculative.revision = entity.revision + 1;
            store.put(speculative.clone());

            let record = MutationRecord {
                entity_id: entity_id.clone(),
                kind,
                patch: patch.clone(),
                pre_image,
                state: MutationState::Pending,
            };
            (record, speculative)
        };

        inner.bus.publish(&StoreEvent::EntityUpdated(speculative));
        Ok(record)
    }

    async fn persist(&self, entity: &Entity) {
        if let Err(e) = self.inner.persistence.save_batch(&[entity.clone()]).await {
            warn!("persisting settled mutation failed: {}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{MemoryPersistence, MemoryRemote};
    use crate::bus::EventKind;
    use crate::models::MutationResult;
    use pretty_assertions::assert_eq;
    use std::sync::atomic::AtomicUsize;

    struct Fixture {
        manager: OptimisticMutationManager,
        remote: Arc<MemoryRemote>,
        bus: Arc<NotificationBus>,
        store: Arc<Mutex<EntityStore>>,
    }

    fn fixture(cooldown: Duration) -> Fixture {
        let remote = Arc::new(MemoryRemote::new());
        let bus = Arc::new(NotificationBus::new());
        let store = Arc::new(Mutex::new(EntityStore::new()));

        let mut seeded = Entity {
            id: "a".into(),
            author: "other".into(),
            created_at: 1,
            revision: 3,
            ..Default::default()
        };
        seeded.counts.favorites = 10;
        store.lock().unwrap().put(seeded);

        let manager = OptimisticMutationManager::new(
            "me".into(),
            store.clone(),
            bus.clone(),
            remote.clone(),
            Arc::new(MemoryPersistence::new()),
            cooldown,
        );
        Fixture {
            manager,
            remote,
            bus,
            store,
        }
    }

    fn stored(f: &Fixture, id: &str) -> Entity {
        f.store.lock().unwrap().get(&id.into()).cloned().unwrap()
    }

    #[tokio::test]
    async fn test_apply_confirms_with_optimistic_values() {
        let f = fixture(Duration::ZERO);
        let patch = EntityPatch::toggle_favorite(&stored(&f, "a"));

        let settled = f.manager.apply("a".into(), patch).await.unwrap();

        // The default remote echoes nothing back, so the optimistic values
        // stand after confirmation.
        assert!(settled.flags.favorited);
        assert_eq!(settled.counts.favorites, 11);
        assert_eq!(settled.revision, 4);
        assert_eq!(f.remote.sent_count(), 1);
        assert_eq!(stored(&f, "a").counts.favorites, 11);
    }

    #[tokio::test]
    async fn test_server_overlay_only_echoed_fields() {
        let f = fixture(Duration::ZERO);
        f.remote.push_result(MutationResult {
            entity_id: None,
            patch: EntityPatch {
                favorites: Some(42),
                revision: Some(9),
                ..Default::default()
            },
        });

        let patch = EntityPatch::toggle_favorite(&stored(&f, "a"));
        let settled = f.manager.apply("a".into(), patch).await.unwrap();

        // Server-recomputed count wins; the un-echoed flag keeps its
        // optimistic value.
        assert_eq!(settled.counts.favorites, 42);
        assert!(settled.flags.favorited);
        assert_eq!(settled.revision, 9);
    }

    #[tokio::test]
    async fn test_rollback_is_exact() {
        let f = fixture(Duration::ZERO);
        let original = stored(&f, "a");
        f.remote.set_fail_mutations(true);

        let rollbacks = Arc::new(AtomicUsize::new(0));
        let counter = rollbacks.clone();
        f.bus
            .subscribe_all(EventKind::MutationRolledBack, move |_| {
                counter.fetch_add(1, Ordering::SeqCst);
            });

        let patch = EntityPatch::toggle_favorite(&original);
        let err = f.manager.apply("a".into(), patch).await.unwrap_err();
        assert!(matches!(err, Error::Remote { .. }));

        let restored = stored(&f, "a");
        assert_eq!(restored.flags, original.flags);
        assert_eq!(restored.counts, original.counts);
        assert_eq!(restored.revision, original.revision);
        assert_eq!(rollbacks.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_stale_echo_after_rollback_is_noop() {
        let f = fixture(Duration::ZERO);
        f.remote.set_fail_mutations(true);
        let patch = EntityPatch::toggle_favorite(&stored(&f, "a"));
        let _ = f.manager.apply("a".into(), patch).await;

        // A stale remote echo of the pre-mutation state must not churn the
        // store: the post-rollback state already matches.
        let echo = stored(&f, "a");
        let report = f.store.lock().unwrap().merge(vec![echo]);
        assert!(!report.changed());
    }

    #[tokio::test]
    async fn test_empty_patch_rejected_before_any_write() {
        let f = fixture(Duration::ZERO);
        let err = f
            .manager
            .apply("a".into(), EntityPatch::default())
            .await
            .unwrap_err();

        assert!(matches!(err, Error::InvalidArgument(_)));
        assert_eq!(f.remote.sent_count(), 0);
        assert_eq!(stored(&f, "a").revision, 3);
    }

    #[tokio::test]
    async fn test_unknown_entity() {
        let f = fixture(Duration::ZERO);
        let err = f
            .manager
            .apply(
                "missing".into(),
                EntityPatch {
                    favorited: Some(true),
                    ..Default::default()
                },
            )
            .await
            .unwrap_err();
        assert!(matches!(err, Error::UnknownEntity(_)));
        assert_eq!(f.remote.sent_count(), 0);
    }

    #[tokio::test]
    async fn test_rapid_repeat_is_debounced() {
        let f = fixture(DEFAULT_MUTATION_COOLDOWN);
        let patch = EntityPatch::toggle_favorite(&stored(&f, "a"));

        f.manager.apply("a".into(), patch.clone()).await.unwrap();
        let err = f.manager.apply("a".into(), patch).await.unwrap_err();

        assert!(matches!(err, Error::Debounced));
        // The duplicate never reached the remote.
        assert_eq!(f.remote.sent_count(), 1);
        // The counter was adjusted once, not twice.
        assert_eq!(stored(&f, "a").counts.favorites, 11);
    }

    #[tokio::test]
    async fn test_different_kinds_are_not_debounced_together() {
        let f = fixture(DEFAULT_MUTATION_COOLDOWN);

        let fav = EntityPatch::toggle_favorite(&stored(&f, "a"));
        f.manager.apply("a".into(), fav).await.unwrap();

        let bookmark = EntityPatch::toggle_bookmark(&stored(&f, "a"));
        f.manager.apply("a".into(), bookmark).await.unwrap();

        assert_eq!(f.remote.sent_count(), 2);
    }

    #[tokio::test]
    async fn test_submit_rekeys_to_canonical_id() {
        let f = fixture(Duration::ZERO);
        let before = f.store.lock().unwrap().len();

        let settled = f
            .manager
            .submit(Draft {
                kind: EntityKind::Message,
                recipient: Some("them".into()),
                content: "hello".into(),
            })
            .await
            .unwrap();

        assert_eq!(settled.id.as_str(), "srv-1");
        assert!(settled.local_id.as_ref().unwrap().is_local());

        let store = f.store.lock().unwrap();
        // Exactly one new entity: the temporary entry was re-keyed, not
        // duplicated.
        assert_eq!(store.len(), before + 1);
        assert!(store.contains(&"srv-1".into()));
        assert!(!store.contains(settled.local_id.as_ref().unwrap()));
    }

    #[tokio::test]
    async fn test_submit_empty_content_rejected() {
        let f = fixture(Duration::ZERO);
        let err = f
            .manager
            .submit(Draft {
                content: "   ".into(),
                ..Default::default()
            })
            .await
            .unwrap_err();
        assert!(matches!(err, Error::InvalidArgument(_)));
        assert_eq!(f.remote.sent_count(), 0);
    }

    #[tokio::test]
    async fn test_submit_failure_withdraws_temp_entity() {
        let f = fixture(Duration::ZERO);
        f.remote.set_fail_mutations(true);
        let before = f.store.lock().unwrap().len();

        let deletions = Arc::new(AtomicUsize::new(0));
        let counter = deletions.clone();
        f.bus.subscribe_all(EventKind::EntityDeleted, move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        let err = f
            .manager
            .submit(Draft {
                content: "doomed".into(),
                ..Default::default()
            })
            .await
            .unwrap_err();

        assert!(matches!(err, Error::Remote { .. }));
        assert_eq!(f.store.lock().unwrap().len(), before);
        assert_eq!(deletions.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_delete_failure_reinstates_snapshot() {
        let f = fixture(Duration::ZERO);
        f.remote.set_fail_mutations(true);

        let err = f.manager.delete("a".into()).await.unwrap_err();
        assert!(matches!(err, Error::Remote { .. }));

        let restored = stored(&f, "a");
        assert_eq!(restored.counts.favorites, 10);
        assert_eq!(restored.revision, 3);
    }

    #[tokio::test]
    async fn test_delete_success() {
        let f = fixture(Duration::ZERO);
        f.manager.delete("a".into()).await.unwrap();
        assert!(!f.store.lock().unwrap().contains(&"a".into()));
    }
}
