//! Shared JSON-file directory store.
//!
//! Backs the registry when several processes share one machine. Every
//! operation takes the exclusive file lock, rewrites the whole document, and
//! releases the lock, so the active-id set and the per-agent records always
//! change together.

use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::Result;

use super::agent::AgentRecord;
use super::lock::with_lock;
use super::store::DirectoryStore;

/// On-disk document: id set plus record map, serialized as one unit.
#[derive(Debug, Default, Serialize, Deserialize)]
struct Directory {
    active: BTreeSet<String>,
    records: BTreeMap<String, AgentRecord>,
}

/// Directory store backed by a lock-guarded JSON file.
pub struct FileStore {
    path: PathBuf,
}

impl FileStore {
    /// Open a store at the given path, creating parent directories.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        Ok(Self { path })
    }

    fn read_document(path: &Path) -> Result<Directory> {
        if !path.exists() {
            return Ok(Directory::default());
        }
        let content = std::fs::read_to_string(path)?;
        if content.trim().is_empty() {
            return Ok(Directory::default());
        }
        Ok(serde_json::from_str(&content)?)
    }

    fn write_document(path: &Path, doc: &Directory) -> Result<()> {
        let content = serde_json::to_string_pretty(doc)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    fn mutate<T>(&self, f: impl FnOnce(&mut Directory) -> T) -> Result<T> {
        with_lock(&self.path, || {
            let mut doc = Self::read_document(&self.path)?;
            let out = f(&mut doc);
            Self::write_document(&self.path, &doc)?;
            Ok(out)
        })
    }

    fn read<T>(&self, f: impl FnOnce(&Directory) -> T) -> Result<T> {
        with_lock(&self.path, || {
            let doc = Self::read_document(&self.path)?;
            Ok(f(&doc))
        })
    }
}

#[async_trait]
impl DirectoryStore for FileStore {
    async fn upsert(&self, id: &str, record: AgentRecord) -> Result<()> {
        self.mutate(|doc| {
            doc.active.insert(id.to_string());
            doc.records.insert(id.to_string(), record);
        })
    }

    async fn remove(&self, id: &str) -> Result<()> {
        self.mutate(|doc| {
            doc.active.remove(id);
            doc.records.remove(id);
        })
    }

    async fn ids(&self) -> Result<Vec<String>> {
        self.read(|doc| doc.active.iter().cloned().collect())
    }

    async fn record(&self, id: &str) -> Result<Option<AgentRecord>> {
        self.read(|doc| doc.records.get(id).cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{AgentStatus, AgentType};
    use crate::registry::agent::Agent;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_visible_across_store_instances() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("directory.json");

        let writer = FileStore::open(&path).unwrap();
        let reader = FileStore::open(&path).unwrap();

        let agent = Agent::new("perf-1", AgentType::Performance)
            .with_capability("profiling")
            .with_status(AgentStatus::Active);
        writer.upsert("perf-1", agent.record()).await.unwrap();

        // A second handle on the same path sees the write, as a separate
        // process would.
        assert_eq!(reader.ids().await.unwrap(), vec!["perf-1".to_string()]);
        let rec = reader.record("perf-1").await.unwrap().unwrap();
        assert_eq!(rec.status, AgentStatus::Active);

        reader.remove("perf-1").await.unwrap();
        assert!(writer.ids().await.unwrap().is_empty());
        assert!(writer.record("perf-1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_empty_file_reads_as_empty_directory() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("directory.json");
        std::fs::write(&path, "").unwrap();

        let store = FileStore::open(&path).unwrap();
        assert!(store.ids().await.unwrap().is_empty());
    }
}
