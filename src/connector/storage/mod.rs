//! Persisted index state: vector store, embedding cache, file registry and
//! the serialized dependency graph, each independently rebuildable from
//! source if corrupted.

mod embedding_cache;
mod file_registry;
mod vector_store;

pub use embedding_cache::*;
pub use file_registry::*;
pub use vector_store::*;

use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::domain::{DependencyGraph, DomainError, IndexConfig};

const GRAPH_SNAPSHOT_VERSION: u32 = 1;

#[derive(Serialize, Deserialize)]
struct GraphSnapshot {
    version: u32,
    graph: DependencyGraph,
}

/// Process-scoped index state with explicit init and teardown.
///
/// Loaded (or created) once on startup and flushed on shutdown; components
/// receive references to the stores they need instead of reaching into
/// globals. The dependency graph sits behind a synchronous `RwLock` that is
/// never held across an await point, so any reader observes forward and
/// reverse edges together.
pub struct IndexStores {
    pub vectors: Arc<LocalVectorStore>,
    pub cache: Arc<EmbeddingCache>,
    pub registry: Arc<FileRegistry>,
    pub graph: Arc<RwLock<DependencyGraph>>,
    data_dir: PathBuf,
    rebuild_required: bool,
}

impl IndexStores {
    pub async fn load_or_create(
        data_dir: &Path,
        config: &IndexConfig,
    ) -> Result<Self, DomainError> {
        tokio::fs::create_dir_all(data_dir).await?;
        let mut rebuild_required = false;

        let vectors = match LocalVectorStore::load(&data_dir.join("vectors.json")).await {
            Ok(store) => Arc::new(store),
            Err(e) if e.is_corruption() => {
                warn!("Vector store failed integrity check ({}); a full re-index is required", e);
                rebuild_required = true;
                Arc::new(LocalVectorStore::new())
            }
            Err(e) => return Err(e),
        };

        let graph = match Self::load_graph(&data_dir.join("graph.json")).await {
            Ok(graph) => graph,
            Err(e) if e.is_corruption() => {
                warn!("Dependency graph failed integrity check ({}); a full re-index is required", e);
                rebuild_required = true;
                DependencyGraph::new()
            }
            Err(e) => return Err(e),
        };

        let cache = Arc::new(
            EmbeddingCache::load(&data_dir.join("cache.json"), config.cache_max_bytes).await,
        );
        let registry = Arc::new(FileRegistry::load(&data_dir.join("registry.json")).await);

        if rebuild_required {
            // An intact registry would otherwise short-circuit every file as
            // unchanged and the reset stores would stay empty.
            let demoted = registry.invalidate_indexed().await;
            info!(
                "Rebuilding index stores from source files ({} records invalidated)",
                demoted
            );
        }

        Ok(Self {
            vectors,
            cache,
            registry,
            graph: Arc::new(RwLock::new(graph)),
            data_dir: data_dir.to_path_buf(),
            rebuild_required,
        })
    }

    async fn load_graph(path: &Path) -> Result<DependencyGraph, DomainError> {
        if !path.exists() {
            return Ok(DependencyGraph::new());
        }
        let raw = tokio::fs::read(path).await?;
        let snapshot: GraphSnapshot = serde_json::from_slice(&raw)
            .map_err(|e| DomainError::corruption(format!("dependency graph snapshot: {e}")))?;
        if snapshot.version != GRAPH_SNAPSHOT_VERSION {
            return Err(DomainError::corruption(format!(
                "dependency graph snapshot version {} (expected {})",
                snapshot.version, GRAPH_SNAPSHOT_VERSION
            )));
        }
        Ok(snapshot.graph)
    }

    /// True when a persisted store failed its integrity check on load and
    /// the caller should schedule a full re-index.
    pub fn rebuild_required(&self) -> bool {
        self.rebuild_required
    }

    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    /// Flushes all stores to disk.
    pub async fn persist(&self) -> Result<(), DomainError> {
        self.vectors
            .persist(&self.data_dir.join("vectors.json"))
            .await?;
        self.cache.persist(&self.data_dir.join("cache.json")).await?;
        self.registry
            .persist(&self.data_dir.join("registry.json"))
            .await?;

        let snapshot = {
            let graph = self.graph.read().expect("graph lock poisoned");
            GraphSnapshot {
                version: GRAPH_SNAPSHOT_VERSION,
                graph: graph.clone(),
            }
        };
        let raw = serde_json::to_vec(&snapshot)
            .map_err(|e| DomainError::storage(format!("serialize dependency graph: {e}")))?;
        tokio::fs::write(self.data_dir.join("graph.json"), raw).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::models::{DependencyEdge, ImportKind};

    #[tokio::test]
    async fn test_load_or_create_starts_empty() {
        let dir = tempfile::tempdir().unwrap();
        let stores = IndexStores::load_or_create(dir.path(), &IndexConfig::default())
            .await
            .unwrap();
        assert!(!stores.rebuild_required());
        assert!(stores.registry.is_empty().await);
    }

    #[tokio::test]
    async fn test_graph_persists_across_restart() {
        let dir = tempfile::tempdir().unwrap();
        let config = IndexConfig::default();

        {
            let stores = IndexStores::load_or_create(dir.path(), &config).await.unwrap();
            stores.graph.write().unwrap().add_file(
                "a.rs",
                vec![DependencyEdge::new(
                    "a.rs".into(),
                    "b.rs".into(),
                    ImportKind::Use,
                    1,
                )],
            );
            stores.persist().await.unwrap();
        }

        let stores = IndexStores::load_or_create(dir.path(), &config).await.unwrap();
        let graph = stores.graph.read().unwrap();
        assert!(graph.dependents("b.rs").into_paths().contains("a.rs"));
    }

    #[tokio::test]
    async fn test_corrupt_vector_snapshot_triggers_rebuild() {
        let dir = tempfile::tempdir().unwrap();
        tokio::fs::write(dir.path().join("vectors.json"), b"not json")
            .await
            .unwrap();

        let stores = IndexStores::load_or_create(dir.path(), &IndexConfig::default())
            .await
            .unwrap();
        assert!(stores.rebuild_required());
    }

    #[tokio::test]
    async fn test_rebuild_defeats_the_hash_shortcircuit() {
        let dir = tempfile::tempdir().unwrap();
        let config = IndexConfig::default();

        {
            let stores = IndexStores::load_or_create(dir.path(), &config).await.unwrap();
            stores
                .registry
                .update("a.rs", |r| {
                    r.mark_indexed("h1".to_string(), vec!["c1".to_string()])
                })
                .await;
            stores
                .registry
                .upsert(crate::domain::FileRecord::excluded(
                    ".env".to_string(),
                    "sensitive file name",
                ))
                .await;
            stores.persist().await.unwrap();
        }

        tokio::fs::write(dir.path().join("vectors.json"), b"not json")
            .await
            .unwrap();

        let stores = IndexStores::load_or_create(dir.path(), &config).await.unwrap();
        assert!(stores.rebuild_required());
        // The indexed record no longer passes as unchanged, so the next
        // pass re-commits its chunks; exclusions are preserved.
        assert!(!stores.registry.matches_hash("a.rs", "h1").await);
        let record = stores.registry.get("a.rs").await.unwrap();
        assert_eq!(record.status(), crate::domain::FileStatus::Pending);
        let excluded = stores.registry.get(".env").await.unwrap();
        assert_eq!(excluded.status(), crate::domain::FileStatus::Excluded);
    }
}
