//! In-memory backend implementations.
//!
//! `MemoryRemote` is a scripted stand-in for the remote service with
//! failure and offline injection; `MemoryPersistence` is a HashMap-backed
//! persistence engine. Both power the tests and the demo CLI.

use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::RwLock;

use super::traits::{Persistence, RemoteFeed};
use crate::error::{Error, Result};
use crate::models::{Entity, EntityId, MutationOp, MutationResult, Session, SessionId, UserId};

#[derive(Debug, Default)]
struct RemoteState {
    pages: Vec<Vec<Option<Entity>>>,
    fail_next_fetch: bool,
    fail_mutations: bool,
    queued_results: VecDeque<MutationResult>,
    sent: Vec<MutationOp>,
    next_server_id: u64,
}

/// Scripted in-memory remote feed.
#[derive(Debug, Default)]
pub struct MemoryRemote {
    state: RwLock<RemoteState>,
    online: AtomicBool,
}

impl MemoryRemote {
    /// Create an online remote with no pages.
    pub fn new() -> Self {
        Self {
            state: RwLock::new(RemoteState {
                next_server_id: 1,
                ..Default::default()
            }),
            online: AtomicBool::new(true),
        }
    }

    /// Replace the scripted pages. Page `n` answers cursor `n`.
    pub fn set_pages(&self, pages: Vec<Vec<Option<Entity>>>) {
        self.state.write().unwrap().pages = pages;
    }

    /// Append one scripted page.
    pub fn push_page(&self, page: Vec<Option<Entity>>) {
        self.state.write().unwrap().pages.push(page);
    }

    /// Toggle connectivity.
    pub fn set_online(&self, online: bool) {
        self.online.store(online, Ordering::SeqCst);
    }

    /// Make the next fetch fail with a network error.
    pub fn fail_next_fetch(&self) {
        self.state.write().unwrap().fail_next_fetch = true;
    }

    /// Make every mutation fail with a remote rejection.
    pub fn set_fail_mutations(&self, fail: bool) {
        self.state.write().unwrap().fail_mutations = fail;
    }

    /// Queue an explicit result for the next mutation.
    pub fn push_result(&self, result: MutationResult) {
        self.state.write().unwrap().queued_results.push_back(result);
    }

    /// Every mutation sent so far, in order.
    pub fn sent_ops(&self) -> Vec<MutationOp> {
        self.state.read().unwrap().sent.clone()
    }

    /// Number of mutations sent so far.
    pub fn sent_count(&self) -> usize {
        self.state.read().unwrap().sent.len()
    }
}

#[async_trait]
impl RemoteFeed for MemoryRemote {
    async fn fetch_page(
        &self,
        cursor: u64,
        _page_size: usize,
        _prefer_cache: bool,
    ) -> Result<Vec<Option<Entity>>> {
        if !self.is_online() {
            return Err(Error::Offline);
        }

        let mut state = self.state.write().unwrap();
        if state.fail_next_fetch {
            state.fail_next_fetch = false;
            return Err(Error::network("simulated fetch failure"));
        }

        Ok(state
            .pages
            .get(cursor as usize)
            .cloned()
            .unwrap_or_default())
    }

    async fn send_mutation(&self, op: MutationOp) -> Result<MutationResult> {
        if !self.is_online() {
            return Err(Error::Offline);
        }

        let mut state = self.state.write().unwrap();
        if state.fail_mutations {
            return Err(Error::remote("500", "simulated mutation rejection"));
        }

        state.sent.push(op.clone());

        if let Some(result) = state.queued_results.pop_front() {
            return Ok(result);
        }

        // Default behavior: creates get a server ID, updates echo nothing
        // beyond what the caller already wrote.
        match op {
            MutationOp::Create { .. } => {
                let id = EntityId::new(format!("srv-{}", state.next_server_id));
                state.next_server_id += 1;
                Ok(MutationResult {
                    entity_id: Some(id),
                    patch: Default::default(),
                })
            }
            MutationOp::Update { .. } | MutationOp::Delete { .. } => Ok(MutationResult::default()),
        }
    }

    fn is_online(&self) -> bool {
        self.online.load(Ordering::SeqCst)
    }
}

/// HashMap-backed persistence engine.
#[derive(Debug, Default)]
pub struct MemoryPersistence {
    entities: RwLock<HashMap<EntityId, Entity>>,
    sessions: RwLock<HashMap<SessionId, Session>>,
}

impl MemoryPersistence {
    /// Create an empty persistence backend.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of persisted entities.
    pub fn entity_count(&self) -> usize {
        self.entities.read().unwrap().len()
    }
}

#[async_trait]
impl Persistence for MemoryPersistence {
    async fn load_all(&self, _owner: &UserId) -> Result<Vec<Entity>> {
        Ok(self.entities.read().unwrap().values().cloned().collect())
    }

    async fn save_batch(&self, batch: &[Entity]) -> Result<()> {
        let mut entities = self.entities.write().unwrap();
        for entity in batch {
            entities.insert(entity.id.clone(), entity.clone());
        }
        Ok(())
    }

    async fn load_sessions(&self, owner: &UserId) -> Result<Vec<Session>> {
        Ok(self
            .sessions
            .read()
            .unwrap()
            .values()
            .filter(|s| &s.owner == owner)
            .cloned()
            .collect())
    }

    async fn save_session(&self, session: &Session) -> Result<()> {
        self.sessions
            .write()
            .unwrap()
            .insert(session.id.clone(), session.clone());
        Ok(())
    }

    async fn delete_session(&self, owner: &UserId, counterpart: &UserId) -> Result<()> {
        let id = SessionId::compose(owner, counterpart);
        self.sessions.write().unwrap().remove(&id);
        // Cascade: drop the conversation's messages.
        self.entities
            .write()
            .unwrap()
            .retain(|_, e| e.counterpart_for(owner) != Some(counterpart));
        Ok(())
    }
}
