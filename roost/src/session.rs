//! Per-conversation session aggregation.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use log::debug;

use crate::backend::Persistence;
use crate::bus::{NotificationBus, StoreEvent};
use crate::error::Result;
use crate::models::{Entity, Session, UserId};
use crate::store::EntityStore;

/// Derives one aggregate conversation record per counterpart from the raw
/// message stream. At most one session exists per (owner, counterpart).
#[derive(Debug, Clone)]
pub struct SessionRegistry {
    inner: Arc<SessionInner>,
}

struct SessionInner {
    owner: UserId,
    /// Keyed by counterpart; the (owner, counterpart) uniqueness invariant
    /// is the map key.
    sessions: Mutex<HashMap<UserId, Session>>,
    store: Arc<Mutex<EntityStore>>,
    bus: Arc<NotificationBus>,
    persistence: Arc<dyn Persistence>,
}

impl std::fmt::Debug for SessionInner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionInner")
            .field("owner", &self.owner)
            .field("sessions", &self.sessions.lock().unwrap().len())
            .finish()
    }
}

impl SessionRegistry {
    pub(crate) fn new(
        owner: UserId,
        store: Arc<Mutex<EntityStore>>,
        bus: Arc<NotificationBus>,
        persistence: Arc<dyn Persistence>,
    ) -> Self {
        Self {
            inner: Arc::new(SessionInner {
                owner,
                sessions: Mutex::new(HashMap::new()),
                store,
                bus,
                persistence,
            }),
        }
    }

    /// Hydrate the registry from persistence. Returns the session count.
    pub async fn load(&self) -> Result<usize> {
        let inner = &self.inner;
        let loaded = inner.persistence.load_sessions(&inner.owner).await?;
        let mut sessions = inner.sessions.lock().unwrap();
        for session in loaded {
            sessions.insert(session.counterpart.clone(), session);
        }
        Ok(sessions.len())
    }

    /// All sessions, most recently active first.
    pub fn sessions(&self) -> Vec<Session> {
        let mut all: Vec<Session> = self
            .inner
            .sessions
            .lock()
            .unwrap()
            .values()
            .cloned()
            .collect();
        all.sort_by(|a, b| b.last_active.cmp(&a.last_active).then_with(|| b.id.cmp(&a.id)));
        all
    }

    /// Look up one session by counterpart.
    pub fn session(&self, counterpart: &UserId) -> Option<Session> {
        self.inner.sessions.lock().unwrap().get(counterpart).cloned()
    }

    /// Total number of unread conversations.
    pub fn unread_count(&self) -> usize {
        self.inner
            .sessions
            .lock()
            .unwrap()
            .values()
            .filter(|s| s.unread)
            .count()
    }

    /// Create or update the session for `counterpart` from a candidate
    /// latest message.
    ///
    /// A candidate whose ID already equals the current latest is a no-op,
    /// so repeated background polls never cause redundant writes or
    /// notification storms. The latest pointer moves only when the
    /// candidate is newer by application-level ordering (timestamp, then
    /// ID — wall-clock alone is never trusted across devices). Unread
    /// becomes true only for an incoming new-latest.
    pub async fn upsert(
        &self,
        counterpart: &UserId,
        latest: &Entity,
        incoming: bool,
    ) -> Result<Option<Session>> {
        let inner = &self.inner;

        let candidate = {
            let sessions = inner.sessions.lock().unwrap();
            match sessions.get(counterpart) {
                Some(existing) => {
                    if existing.latest_entity == latest.id {
                        return Ok(None);
                    }
                    let newer = {
                        let store = inner.store.lock().unwrap();
                        match store.get(&existing.latest_entity) {
                            Some(current) => latest.is_newer_than(current),
                            // Latest evicted from the store: fall back to the
                            // session's own fields, with the same id tiebreak
                            // so a timestamp tie never moves the pointer
                            // backwards.
                            None => {
                                latest.created_at > existing.last_active
                                    || (latest.created_at == existing.last_active
                                        && latest.id > existing.latest_entity)
                            }
                        }
                    };
                    if !newer {
                        return Ok(None);
                    }
                    let mut updated = existing.clone();
                    updated.latest_entity = latest.id.clone();
                    updated.last_active = latest.created_at;
                    updated.unread = incoming;
                    updated
                }
                None => {
                    let mut created = Session::new(inner.owner.clone(), counterpart.clone());
                    created.latest_entity = latest.id.clone();
                    created.last_active = latest.created_at;
                    created.unread = incoming;
                    created
                }
            }
        };

        inner.persistence.save_session(&candidate).await?;
        inner
            .sessions
            .lock()
            .unwrap()
            .insert(counterpart.clone(), candidate.clone());
        inner
            .bus
            .publish(&StoreEvent::SessionChanged(candidate.clone()));
        Ok(Some(candidate))
    }

    /// Fold a batch of entities into sessions. Non-message entities and
    /// messages not involving this owner are ignored. Returns how many
    /// sessions changed.
    pub async fn ingest(&self, batch: &[Entity]) -> Result<usize> {
        let owner = self.inner.owner.clone();
        let mut changed = 0;
        for entity in batch {
            if let Some(counterpart) = entity.counterpart_for(&owner).cloned() {
                let incoming = entity.is_incoming_for(&owner);
                if self.upsert(&counterpart, entity, incoming).await?.is_some() {
                    changed += 1;
                }
            }
        }
        Ok(changed)
    }

    /// Acknowledge the conversation as read. Returns false when there was
    /// nothing to clear.
    pub async fn mark_read(&self, counterpart: &UserId) -> Result<bool> {
        let inner = &self.inner;
        let cleared = {
            let sessions = inner.sessions.lock().unwrap();
            match sessions.get(counterpart) {
                Some(session) if session.unread => {
                    let mut cleared = session.clone();
                    cleared.unread = false;
                    Some(cleared)
                }
                _ => None,
            }
        };

        match cleared {
            Some(session) => {
                inner.persistence.save_session(&session).await?;
                inner
                    .sessions
                    .lock()
                    .unwrap()
                    .insert(counterpart.clone(), session.clone());
                inner.bus.publish(&StoreEvent::SessionChanged(session));
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Delete the session and cascade deletion of the conversation's
    /// entities, both in persistence and in the in-memory store.
    pub async fn remove(&self, counterpart: &UserId) -> Result<()> {
        let inner = &self.inner;

        let removed = inner.sessions.lock().unwrap().remove(counterpart);
        inner
            .persistence
            .delete_session(&inner.owner, counterpart)
            .await?;

        {
            let mut store = inner.store.lock().unwrap();
            let doomed = store.entities_with(|e| e.counterpart_for(&inner.owner) == Some(counterpart));
            for entity in doomed {
                store.remove(&entity.id);
            }
        }

        if let Some(session) = removed {
            inner.bus.publish(&StoreEvent::SessionRemoved(session.id));
        }
        Ok(())
    }

    /// Cascade hook for an entity deletion: if the deleted message was a
    /// session's latest, repoint at the next-newest cached message, or
    /// drop the session when the conversation is now empty.
    pub async fn entity_deleted(&self, deleted: &Entity) -> Result<()> {
        let inner = &self.inner;
        let counterpart = match deleted.counterpart_for(&inner.owner) {
            Some(c) => c.clone(),
            None => return Ok(()),
        };

        let was_latest = {
            let sessions = inner.sessions.lock().unwrap();
            matches!(sessions.get(&counterpart), Some(s) if s.latest_entity == deleted.id)
        };
        if !was_latest {
            return Ok(());
        }

        let replacement = {
            let store = inner.store.lock().unwrap();
            store
                .entities_with(|e| {
                    e.id != deleted.id && e.counterpart_for(&inner.owner) == Some(&counterpart)
                })
                .into_iter()
                .next()
        };

        match replacement {
            Some(next) => {
                let updated = {
                    let sessions = inner.sessions.lock().unwrap();
                    let mut session = match sessions.get(&counterpart) {
                        Some(s) => s.clone(),
                        None => return Ok(()),
                    };
                    session.latest_entity = next.id.clone();
                    session.last_active = next.created_at;
                    session.unread = session.unread && next.is_incoming_for(&inner.owner);
                    session
                };
                inner.persistence.save_session(&updated).await?;
                inner
                    .sessions
                    .lock()
                    .unwrap()
                    .insert(counterpart.clone(), updated.clone());
                inner.bus.publish(&StoreEvent::SessionChanged(updated));
            }
            None => {
                debug!("conversation with {} is empty after delete", counterpart);
                self.remove(&counterpart).await?;
            }
        }
        Ok(())
    }
}
