//! JSON-file persistence backend.
//!
//! One cache file beside the executable keeps entities and sessions
//! across invocations, which is what makes the cache-first load phase
//! visible from a short-lived CLI process.

use async_trait::async_trait;
use roost::{Entity, EntityId, Error, Persistence, Result, Session, SessionId, UserId};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::path::PathBuf;

#[derive(Debug, Default, Serialize, Deserialize)]
struct CacheFile {
    entities: HashMap<EntityId, Entity>,
    sessions: HashMap<SessionId, Session>,
}

/// Persistence engine backed by a single JSON file.
#[derive(Debug)]
pub struct JsonPersistence {
    path: PathBuf,
}

impl JsonPersistence {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }

    fn read(&self) -> Result<CacheFile> {
        if !self.path.exists() {
            return Ok(CacheFile::default());
        }
        let content = fs::read_to_string(&self.path)
            .map_err(|e| Error::persistence(format!("read {}: {}", self.path.display(), e)))?;
        Ok(serde_json::from_str(&content)?)
    }

    fn write(&self, cache: &CacheFile) -> Result<()> {
        let content = serde_json::to_string_pretty(cache)?;
        fs::write(&self.path, content)
            .map_err(|e| Error::persistence(format!("write {}: {}", self.path.display(), e)))
    }
}

#[async_trait]
impl Persistence for JsonPersistence {
    async fn load_all(&self, _owner: &UserId) -> Result<Vec<Entity>> {
        Ok(self.read()?.entities.into_values().collect())
    }

    async fn save_batch(&self, batch: &[Entity]) -> Result<()> {
        let mut cache = self.read()?;
        for entity in batch {
            cache.entities.insert(entity.id.clone(), entity.clone());
        }
        self.write(&cache)
    }

    async fn load_sessions(&self, owner: &UserId) -> Result<Vec<Session>> {
        Ok(self
            .read()?
            .sessions
            .into_values()
            .filter(|s| &s.owner == owner)
            .collect())
    }

    async fn save_session(&self, session: &Session) -> Result<()> {
        let mut cache = self.read()?;
        cache.sessions.insert(session.id.clone(), session.clone());
        self.write(&cache)
    }

    async fn delete_session(&self, owner: &UserId, counterpart: &UserId) -> Result<()> {
        let mut cache = self.read()?;
        cache
            .sessions
            .remove(&SessionId::compose(owner, counterpart));
        cache
            .entities
            .retain(|_, e| e.counterpart_for(owner) != Some(counterpart));
        self.write(&cache)
    }
}
