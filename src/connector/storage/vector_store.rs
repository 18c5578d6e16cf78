use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tracing::debug;

use crate::application::{VectorIndex, VectorStoreStats};
use crate::domain::{Chunk, DomainError, SearchResult};

const SNAPSHOT_VERSION: u32 = 1;

/// Local chunk/embedding store backed by in-memory maps with a JSON
/// snapshot on disk.
///
/// Embeddings are L2-normalized at insert, so similarity search is a plain
/// dot product over contiguous `f32` data: ~38M multiply-adds for the
/// documented ceiling of 100k chunks at 384 dimensions, comfortably inside
/// the 300 ms search budget without approximation. Scores are exact: the
/// true top-K by cosine similarity, normalized to [0, 1]. A per-file id map
/// keeps `remove_file` and `file_chunks` proportional to the file's own
/// chunk count.
pub struct LocalVectorStore {
    inner: Arc<RwLock<StoreInner>>,
}

#[derive(Default)]
struct StoreInner {
    chunks: HashMap<String, Chunk>,
    by_file: HashMap<String, Vec<String>>,
    dimensions: Option<usize>,
}

#[derive(Serialize, Deserialize)]
struct Snapshot {
    version: u32,
    dimensions: Option<usize>,
    chunks: Vec<Chunk>,
}

impl LocalVectorStore {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(RwLock::new(StoreInner::default())),
        }
    }

    /// Loads a snapshot from `path`. A missing file yields an empty store;
    /// an unreadable or structurally invalid snapshot is `Corruption`, so
    /// the caller can rebuild from source.
    pub async fn load(path: &Path) -> Result<Self, DomainError> {
        if !path.exists() {
            return Ok(Self::new());
        }

        let raw = tokio::fs::read(path).await?;
        let snapshot: Snapshot = serde_json::from_slice(&raw)
            .map_err(|e| DomainError::corruption(format!("vector store snapshot: {e}")))?;
        if snapshot.version != SNAPSHOT_VERSION {
            return Err(DomainError::corruption(format!(
                "vector store snapshot version {} (expected {})",
                snapshot.version, SNAPSHOT_VERSION
            )));
        }

        let mut inner = StoreInner {
            dimensions: snapshot.dimensions,
            ..StoreInner::default()
        };
        for chunk in snapshot.chunks {
            let embedding = chunk.embedding().ok_or_else(|| {
                DomainError::corruption(format!(
                    "stored chunk {} has no embedding",
                    chunk.id()
                ))
            })?;
            if let Some(dims) = inner.dimensions {
                if embedding.len() != dims {
                    return Err(DomainError::corruption(format!(
                        "stored chunk {} has {} dimensions (expected {})",
                        chunk.id(),
                        embedding.len(),
                        dims
                    )));
                }
            }
            inner
                .by_file
                .entry(chunk.file_path().to_string())
                .or_default()
                .push(chunk.id().to_string());
            inner.chunks.insert(chunk.id().to_string(), chunk);
        }

        debug!("Loaded {} chunks from vector store snapshot", inner.chunks.len());
        Ok(Self {
            inner: Arc::new(RwLock::new(inner)),
        })
    }

    pub async fn persist(&self, path: &Path) -> Result<(), DomainError> {
        let inner = self.inner.read().await;
        let snapshot = Snapshot {
            version: SNAPSHOT_VERSION,
            dimensions: inner.dimensions,
            chunks: inner.chunks.values().cloned().collect(),
        };
        drop(inner);

        let raw = serde_json::to_vec(&snapshot)
            .map_err(|e| DomainError::storage(format!("serialize vector store: {e}")))?;
        tokio::fs::write(path, raw).await?;
        Ok(())
    }
}

impl Default for LocalVectorStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl VectorIndex for LocalVectorStore {
    async fn add(&self, chunks: Vec<Chunk>) -> Result<(), DomainError> {
        let mut inner = self.inner.write().await;

        for mut chunk in chunks {
            let embedding = match chunk.embedding() {
                Some(e) => e.to_vec(),
                None => {
                    return Err(DomainError::invalid_input(format!(
                        "chunk {} has no embedding",
                        chunk.id()
                    )))
                }
            };
            match inner.dimensions {
                None => inner.dimensions = Some(embedding.len()),
                Some(dims) if dims != embedding.len() => {
                    return Err(DomainError::invalid_input(format!(
                        "chunk {} has {} dimensions (store has {})",
                        chunk.id(),
                        embedding.len(),
                        dims
                    )));
                }
                Some(_) => {}
            }

            chunk.set_embedding(normalize(embedding));
            inner
                .by_file
                .entry(chunk.file_path().to_string())
                .or_default()
                .push(chunk.id().to_string());
            inner.chunks.insert(chunk.id().to_string(), chunk);
        }

        Ok(())
    }

    async fn search(
        &self,
        query_embedding: &[f32],
        top_k: usize,
    ) -> Result<Vec<SearchResult>, DomainError> {
        let inner = self.inner.read().await;
        if let Some(dims) = inner.dimensions {
            if query_embedding.len() != dims {
                return Err(DomainError::invalid_input(format!(
                    "query embedding has {} dimensions (store has {})",
                    query_embedding.len(),
                    dims
                )));
            }
        }

        let query = normalize(query_embedding.to_vec());
        let mut scored: Vec<(f32, &str)> = inner
            .chunks
            .values()
            .filter_map(|chunk| {
                chunk
                    .embedding()
                    .map(|e| (cosine_score(&query, e), chunk.id()))
            })
            .collect();

        // Descending by score, ascending by chunk id on ties: repeated
        // identical calls against an unchanged store return identical lists.
        scored.sort_unstable_by(|a, b| {
            b.0.partial_cmp(&a.0)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.1.cmp(b.1))
        });
        scored.truncate(top_k);

        Ok(scored
            .into_iter()
            .map(|(score, id)| SearchResult::new(inner.chunks[id].clone(), score))
            .collect())
    }

    async fn lexical_search(
        &self,
        query: &str,
        top_k: usize,
    ) -> Result<Vec<SearchResult>, DomainError> {
        let terms: HashSet<String> = tokenize(query);
        if terms.is_empty() {
            return Ok(Vec::new());
        }

        let inner = self.inner.read().await;
        let mut scored: Vec<(f32, &str)> = inner
            .chunks
            .values()
            .filter_map(|chunk| {
                let tokens = tokenize(chunk.content());
                let hits = terms.iter().filter(|t| tokens.contains(*t)).count();
                if hits == 0 {
                    return None;
                }
                let symbol_hits = chunk
                    .symbols()
                    .iter()
                    .filter(|s| terms.contains(&s.to_lowercase()))
                    .count();
                let score =
                    (hits + symbol_hits) as f32 / (terms.len() + symbol_hits) as f32;
                Some((score.min(1.0), chunk.id()))
            })
            .collect();

        scored.sort_unstable_by(|a, b| {
            b.0.partial_cmp(&a.0)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.1.cmp(b.1))
        });
        scored.truncate(top_k);

        Ok(scored
            .into_iter()
            .map(|(score, id)| SearchResult::new(inner.chunks[id].clone(), score))
            .collect())
    }

    async fn file_chunks(&self, path: &str) -> Result<Vec<Chunk>, DomainError> {
        let inner = self.inner.read().await;
        let mut chunks: Vec<Chunk> = inner
            .by_file
            .get(path)
            .into_iter()
            .flatten()
            .filter_map(|id| inner.chunks.get(id).cloned())
            .collect();
        chunks.sort_by_key(Chunk::seq_index);
        Ok(chunks)
    }

    async fn remove_file(&self, path: &str) -> Result<u64, DomainError> {
        let mut inner = self.inner.write().await;
        let ids = inner.by_file.remove(path).unwrap_or_default();
        let mut removed = 0u64;
        for id in ids {
            if inner.chunks.remove(&id).is_some() {
                removed += 1;
            }
        }
        if removed > 0 {
            debug!("Removed {} chunks for {}", removed, path);
        }
        Ok(removed)
    }

    async fn stats(&self) -> Result<VectorStoreStats, DomainError> {
        let inner = self.inner.read().await;
        let approximate_bytes: u64 = inner
            .chunks
            .values()
            .map(|c| {
                c.content().len() as u64
                    + c.embedding().map(|e| e.len() * 4).unwrap_or(0) as u64
            })
            .sum();
        Ok(VectorStoreStats {
            chunk_count: inner.chunks.len() as u64,
            file_count: inner.by_file.len() as u64,
            dimensions: inner.dimensions,
            approximate_bytes,
        })
    }
}

fn normalize(mut vector: Vec<f32>) -> Vec<f32> {
    let magnitude: f32 = vector.iter().map(|x| x * x).sum::<f32>().sqrt();
    if magnitude > 0.0 {
        for x in &mut vector {
            *x /= magnitude;
        }
    }
    vector
}

/// Dot product of two normalized vectors mapped from [-1, 1] to [0, 1].
fn cosine_score(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() {
        return 0.0;
    }
    let dot: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    ((dot + 1.0) / 2.0).clamp(0.0, 1.0)
}

fn tokenize(text: &str) -> HashSet<String> {
    text.split(|c: char| !c.is_alphanumeric() && c != '_')
        .filter(|t| t.len() > 1)
        .map(|t| t.to_lowercase())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::Language;

    fn chunk_with_embedding(path: &str, content: &str, embedding: Vec<f32>) -> Chunk {
        Chunk::new(path.to_string(), content.to_string(), 1, 2, Language::Rust)
            .with_embedding(embedding)
    }

    #[tokio::test]
    async fn test_search_orders_descending_and_respects_top_k() {
        let store = LocalVectorStore::new();
        store
            .add(vec![
                chunk_with_embedding("a.rs", "fn a() {}", vec![1.0, 0.0]),
                chunk_with_embedding("b.rs", "fn b() {}", vec![0.7, 0.7]),
                chunk_with_embedding("c.rs", "fn c() {}", vec![0.0, 1.0]),
            ])
            .await
            .unwrap();

        let results = store.search(&[1.0, 0.0], 2).await.unwrap();
        assert_eq!(results.len(), 2);
        assert!(results[0].score() >= results[1].score());
        assert_eq!(results[0].chunk().file_path(), "a.rs");
        assert_eq!(results[1].chunk().file_path(), "b.rs");
    }

    #[tokio::test]
    async fn test_search_is_deterministic_on_ties() {
        let store = LocalVectorStore::new();
        store
            .add(vec![
                chunk_with_embedding("a.rs", "fn a() {}", vec![1.0, 0.0]),
                chunk_with_embedding("b.rs", "fn b() {}", vec![1.0, 0.0]),
                chunk_with_embedding("c.rs", "fn c() {}", vec![1.0, 0.0]),
            ])
            .await
            .unwrap();

        let first = store.search(&[1.0, 0.0], 3).await.unwrap();
        let second = store.search(&[1.0, 0.0], 3).await.unwrap();
        let first_ids: Vec<&str> = first.iter().map(|r| r.chunk().id()).collect();
        let second_ids: Vec<&str> = second.iter().map(|r| r.chunk().id()).collect();
        assert_eq!(first_ids, second_ids);

        // Ties broken by ascending chunk id.
        let mut sorted = first_ids.clone();
        sorted.sort();
        assert_eq!(first_ids, sorted);
    }

    #[tokio::test]
    async fn test_add_without_embedding_is_rejected() {
        let store = LocalVectorStore::new();
        let bare = Chunk::new(
            "a.rs".to_string(),
            "fn a() {}".to_string(),
            1,
            1,
            Language::Rust,
        );
        let err = store.add(vec![bare]).await.unwrap_err();
        assert!(matches!(err, DomainError::InvalidInput(_)));
    }

    #[tokio::test]
    async fn test_remove_file_deletes_every_owned_chunk() {
        let store = LocalVectorStore::new();
        store
            .add(vec![
                chunk_with_embedding("a.rs", "fn a() {}", vec![1.0, 0.0]),
                chunk_with_embedding("a.rs", "fn a2() {}", vec![0.5, 0.5]),
                chunk_with_embedding("b.rs", "fn b() {}", vec![0.0, 1.0]),
            ])
            .await
            .unwrap();

        let removed = store.remove_file("a.rs").await.unwrap();
        assert_eq!(removed, 2);
        assert!(store.file_chunks("a.rs").await.unwrap().is_empty());
        assert_eq!(store.stats().await.unwrap().chunk_count, 1);
    }

    #[tokio::test]
    async fn test_file_chunks_ordered_by_sequence() {
        let store = LocalVectorStore::new();
        let c0 = chunk_with_embedding("a.rs", "first", vec![1.0, 0.0]).with_sequence(0, 2);
        let c1 = chunk_with_embedding("a.rs", "second", vec![0.0, 1.0]).with_sequence(1, 2);
        store.add(vec![c1, c0]).await.unwrap();

        let chunks = store.file_chunks("a.rs").await.unwrap();
        assert_eq!(chunks[0].content(), "first");
        assert_eq!(chunks[1].content(), "second");
    }

    #[tokio::test]
    async fn test_lexical_search_matches_tokens() {
        let store = LocalVectorStore::new();
        store
            .add(vec![
                chunk_with_embedding("auth.rs", "fn authenticate_user() {}", vec![1.0, 0.0]),
                chunk_with_embedding("math.rs", "fn add(a: i32) {}", vec![0.0, 1.0]),
            ])
            .await
            .unwrap();

        let results = store.lexical_search("authenticate_user", 5).await.unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].chunk().file_path(), "auth.rs");
    }

    #[tokio::test]
    async fn test_snapshot_roundtrip_and_corruption() {
        let dir = tempfile::tempdir().unwrap();
        let snapshot_path = dir.path().join("vectors.json");

        let store = LocalVectorStore::new();
        store
            .add(vec![chunk_with_embedding("a.rs", "fn a() {}", vec![1.0, 0.0])])
            .await
            .unwrap();
        store.persist(&snapshot_path).await.unwrap();

        let restored = LocalVectorStore::load(&snapshot_path).await.unwrap();
        assert_eq!(restored.stats().await.unwrap().chunk_count, 1);

        tokio::fs::write(&snapshot_path, b"{ not json")
            .await
            .unwrap();
        let err = match LocalVectorStore::load(&snapshot_path).await {
            Ok(_) => panic!("corrupt snapshot should not load"),
            Err(e) => e,
        };
        assert!(err.is_corruption());
    }
}
