//! In-memory ordered, de-duplicated entity collection.

use std::collections::HashMap;

use crate::models::{Entity, EntityId};

/// Ordered, de-duplicated collection of cached entities.
///
/// Not thread-safe on its own; the engine confines all mutation to a single
/// execution context per store.
#[derive(Debug, Default)]
pub struct EntityStore {
    entities: HashMap<EntityId, Entity>,
    /// Iteration order: newest first, ties broken by ID.
    order: Vec<EntityId>,
}

/// What a merge did, entity by entity.
///
/// The store emits no events; callers decide what to publish from this.
#[derive(Debug, Clone, Default)]
pub struct MergeReport {
    /// IDs inserted for the first time.
    pub created: Vec<EntityId>,
    /// IDs replaced by a fresher copy (including re-keyed local IDs).
    pub updated: Vec<EntityId>,
    /// Incoming entries dropped because the cached copy was at least as fresh.
    pub skipped_stale: usize,
    /// Incoming entries dropped for missing an ID.
    pub skipped_malformed: usize,
}

impl MergeReport {
    /// Whether the merge changed the store at all.
    pub fn changed(&self) -> bool {
        !self.created.is_empty() || !self.updated.is_empty()
    }
}

impl EntityStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Union a fetched batch into the store.
    ///
    /// Absent entities are inserted; present ones are replaced only when the
    /// incoming copy is strictly fresher, so an in-flight optimistic
    /// mutation is never clobbered by an older remote snapshot. Entities
    /// cached locally but absent from `batch` are retained. Entries with an
    /// empty ID are skipped and counted, never aborting the merge.
    pub fn merge(&mut self, batch: Vec<Entity>) -> MergeReport {
        let mut report = MergeReport::default();

        for incoming in batch {
            if incoming.id.is_empty() {
                report.skipped_malformed += 1;
                continue;
            }

            // A locally submitted entity comes back under its server-issued
            // canonical ID; drop the temporary entry before inserting so the
            // submission never shows up twice.
            if let Some(local_id) = incoming.local_id.as_ref() {
                if local_id != &incoming.id && self.entities.remove(local_id).is_some() {
                    self.order.retain(|id| id != local_id);
                    let id = incoming.id.clone();
                    report.updated.push(id.clone());
                    match self.entities.get(&id) {
                        // A fetch raced ahead of the ack and already cached
                        // the canonical copy; the freshness guard still
                        // decides whose content stands.
                        Some(existing) => {
                            if incoming.is_fresher_than(existing) {
                                self.reposition(incoming);
                            }
                        }
                        None => {
                            self.entities.insert(id.clone(), incoming);
                            self.insert_sorted(id);
                        }
                    }
                    continue;
                }
            }

            match self.entities.get(&incoming.id) {
                Some(existing) => {
                    if incoming.is_fresher_than(existing) {
                        report.updated.push(incoming.id.clone());
                        self.reposition(incoming);
                    } else {
                        report.skipped_stale += 1;
                    }
                }
                None => {
                    let id = incoming.id.clone();
                    report.created.push(id.clone());
                    self.entities.insert(id.clone(), incoming);
                    self.insert_sorted(id);
                }
            }
        }

        report
    }

    /// Replace an entity unconditionally, bypassing the freshness guard.
    ///
    /// Used by the mutation manager for optimistic writes and exact
    /// rollbacks, both of which must land regardless of revision.
    pub fn put(&mut self, entity: Entity) {
        if self.entities.contains_key(&entity.id) {
            self.reposition(entity);
        } else {
            let id = entity.id.clone();
            self.entities.insert(id.clone(), entity);
            self.insert_sorted(id);
        }
    }

    /// Return a read-only ordered page. Empty when `offset` exceeds size.
    pub fn page(&self, offset: usize, limit: usize) -> Vec<Entity> {
        self.order
            .iter()
            .skip(offset)
            .take(limit)
            .filter_map(|id| self.entities.get(id))
            .cloned()
            .collect()
    }

    /// Get an entity by ID.
    pub fn get(&self, id: &EntityId) -> Option<&Entity> {
        self.entities.get(id)
    }

    /// Check if an entity is cached.
    pub fn contains(&self, id: &EntityId) -> bool {
        self.entities.contains_key(id)
    }

    /// Remove an entity, returning it if it was cached.
    pub fn remove(&mut self, id: &EntityId) -> Option<Entity> {
        let removed = self.entities.remove(id);
        if removed.is_some() {
            self.order.retain(|existing| existing != id);
        }
        removed
    }

    /// Number of cached entities.
    pub fn len(&self) -> usize {
        self.entities.len()
    }

    /// Check if the store is empty.
    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }

    /// Collect entities matching a predicate, in display order.
    pub fn entities_with(&self, pred: impl Fn(&Entity) -> bool) -> Vec<Entity> {
        self.order
            .iter()
            .filter_map(|id| self.entities.get(id))
            .filter(|e| pred(e))
            .cloned()
            .collect()
    }

    fn insert_sorted(&mut self, id: EntityId) {
        self.order.push(id);
        self.resort();
    }

    fn reposition(&mut self, entity: Entity) {
        self.entities.insert(entity.id.clone(), entity);
        self.resort();
    }

    fn resort(&mut self) {
        let entities = &self.entities;
        self.order.sort_by(|a, b| {
            let ea = &entities[a];
            let eb = &entities[b];
            ea.display_cmp(eb)
        });
    }
}
