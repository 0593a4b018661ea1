//! Directory store contract and in-memory implementation.

use std::collections::{HashMap, HashSet};
use std::sync::Mutex;

use async_trait::async_trait;

use crate::error::{Error, Result};

use super::agent::AgentRecord;

/// Shared key/value directory contract: an active-id set plus one attribute
/// record per agent.
///
/// Each method must be atomic with respect to concurrent callers. `upsert`
/// pairs the set-add with the record-write, `remove` pairs the set-remove
/// with the record-delete; a caller must never observe an id in the set
/// without its record or the other way around.
#[async_trait]
pub trait DirectoryStore: Send + Sync {
    /// Add `id` to the active set and write its record, as one operation.
    async fn upsert(&self, id: &str, record: AgentRecord) -> Result<()>;

    /// Remove `id` from the active set and delete its record, as one
    /// operation. Removing an absent id is a no-op.
    async fn remove(&self, id: &str) -> Result<()>;

    /// Members of the active-id set.
    async fn ids(&self) -> Result<Vec<String>>;

    /// The record for `id`, or None if absent.
    async fn record(&self, id: &str) -> Result<Option<AgentRecord>>;
}

#[derive(Default)]
struct MemoryInner {
    active: HashSet<String>,
    records: HashMap<String, AgentRecord>,
}

/// Process-local store: the set and record map live under one mutex, so every
/// call is trivially atomic. Share via `Arc` to back several bus instances.
#[derive(Default)]
pub struct MemoryStore {
    inner: Mutex<MemoryInner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, MemoryInner>> {
        self.inner
            .lock()
            .map_err(|_| Error::Store("directory mutex poisoned".to_string()))
    }
}

#[async_trait]
impl DirectoryStore for MemoryStore {
    async fn upsert(&self, id: &str, record: AgentRecord) -> Result<()> {
        let mut inner = self.lock()?;
        inner.active.insert(id.to_string());
        inner.records.insert(id.to_string(), record);
        Ok(())
    }

    async fn remove(&self, id: &str) -> Result<()> {
        let mut inner = self.lock()?;
        inner.active.remove(id);
        inner.records.remove(id);
        Ok(())
    }

    async fn ids(&self) -> Result<Vec<String>> {
        let inner = self.lock()?;
        let mut ids: Vec<String> = inner.active.iter().cloned().collect();
        ids.sort();
        Ok(ids)
    }

    async fn record(&self, id: &str) -> Result<Option<AgentRecord>> {
        let inner = self.lock()?;
        Ok(inner.records.get(id).cloned())
    }
}
