use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tracing::warn;

use crate::domain::{DomainError, FileRecord, FileStatus};

const SNAPSHOT_VERSION: u32 = 1;

#[derive(Serialize, Deserialize)]
struct RegistrySnapshot {
    version: u32,
    records: Vec<FileRecord>,
}

/// One [`FileRecord`] per workspace file, keyed by canonical path.
///
/// The registry is the source of truth for the whole-file hash
/// short-circuit: an unchanged hash means the file skips chunking,
/// embedding and storage entirely.
pub struct FileRegistry {
    records: Arc<RwLock<HashMap<String, FileRecord>>>,
}

impl FileRegistry {
    pub fn new() -> Self {
        Self {
            records: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Loads from `path`; a corrupt snapshot is discarded with a warning:
    /// records are rebuilt by the next index run.
    pub async fn load(path: &Path) -> Self {
        if !path.exists() {
            return Self::new();
        }
        let raw = match tokio::fs::read(path).await {
            Ok(raw) => raw,
            Err(e) => {
                warn!("Failed to read file registry snapshot: {}", e);
                return Self::new();
            }
        };
        match serde_json::from_slice::<RegistrySnapshot>(&raw) {
            Ok(snapshot) if snapshot.version == SNAPSHOT_VERSION => {
                let records = snapshot
                    .records
                    .into_iter()
                    .map(|r| (r.path().to_string(), r))
                    .collect();
                Self {
                    records: Arc::new(RwLock::new(records)),
                }
            }
            Ok(snapshot) => {
                warn!(
                    "Discarding file registry snapshot with version {}",
                    snapshot.version
                );
                Self::new()
            }
            Err(e) => {
                warn!("Discarding corrupt file registry snapshot: {}", e);
                Self::new()
            }
        }
    }

    pub async fn persist(&self, path: &Path) -> Result<(), DomainError> {
        let snapshot = {
            let records = self.records.read().await;
            RegistrySnapshot {
                version: SNAPSHOT_VERSION,
                records: records.values().cloned().collect(),
            }
        };
        let raw = serde_json::to_vec(&snapshot)
            .map_err(|e| DomainError::storage(format!("serialize file registry: {e}")))?;
        tokio::fs::write(path, raw).await?;
        Ok(())
    }

    pub async fn get(&self, path: &str) -> Option<FileRecord> {
        self.records.read().await.get(path).cloned()
    }

    pub async fn upsert(&self, record: FileRecord) {
        self.records
            .write()
            .await
            .insert(record.path().to_string(), record);
    }

    pub async fn remove(&self, path: &str) -> Option<FileRecord> {
        self.records.write().await.remove(path)
    }

    /// Applies `update` to the record for `path`, inserting a fresh pending
    /// record first if none exists.
    pub async fn update<F>(&self, path: &str, update: F) -> FileRecord
    where
        F: FnOnce(&mut FileRecord),
    {
        let mut records = self.records.write().await;
        let record = records
            .entry(path.to_string())
            .or_insert_with(|| FileRecord::new(path.to_string()));
        update(record);
        record.clone()
    }

    /// Demotes every indexed record to pending, defeating the whole-file
    /// hash short-circuit. Used when a dependent store was reset and its
    /// contents must be re-committed; excluded and skipped records keep
    /// their status.
    pub async fn invalidate_indexed(&self) -> usize {
        let mut records = self.records.write().await;
        let mut demoted = 0;
        for record in records.values_mut() {
            if record.status() == FileStatus::Indexed {
                record.mark_pending();
                demoted += 1;
            }
        }
        demoted
    }

    pub async fn matches_hash(&self, path: &str, hash: &str) -> bool {
        self.records
            .read()
            .await
            .get(path)
            .map(|r| r.matches_hash(hash))
            .unwrap_or(false)
    }

    pub async fn with_status(&self, status: FileStatus) -> Vec<FileRecord> {
        self.records
            .read()
            .await
            .values()
            .filter(|r| r.status() == status)
            .cloned()
            .collect()
    }

    pub async fn len(&self) -> usize {
        self.records.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.records.read().await.is_empty()
    }

    pub async fn snapshot(&self) -> Vec<FileRecord> {
        let mut records: Vec<FileRecord> =
            self.records.read().await.values().cloned().collect();
        records.sort_by(|a, b| a.path().cmp(b.path()));
        records
    }
}

impl Default for FileRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_update_inserts_pending_record() {
        let registry = FileRegistry::new();
        let record = registry
            .update("src/lib.rs", |r| r.mark_indexing("h1".to_string()))
            .await;
        assert_eq!(record.status(), FileStatus::Indexing);
        assert_eq!(registry.len().await, 1);
    }

    #[tokio::test]
    async fn test_matches_hash_requires_indexed_status() {
        let registry = FileRegistry::new();
        registry
            .update("a.rs", |r| {
                r.mark_indexed("hash1".to_string(), vec!["c1".to_string()])
            })
            .await;

        assert!(registry.matches_hash("a.rs", "hash1").await);
        assert!(!registry.matches_hash("a.rs", "hash2").await);
        assert!(!registry.matches_hash("missing.rs", "hash1").await);
    }

    #[tokio::test]
    async fn test_snapshot_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("registry.json");

        let registry = FileRegistry::new();
        registry
            .update("a.rs", |r| {
                r.mark_indexed("h".to_string(), vec!["c1".to_string()])
            })
            .await;
        registry.persist(&path).await.unwrap();

        let restored = FileRegistry::load(&path).await;
        let record = restored.get("a.rs").await.unwrap();
        assert_eq!(record.status(), FileStatus::Indexed);
        assert_eq!(record.content_hash(), "h");
    }
}
