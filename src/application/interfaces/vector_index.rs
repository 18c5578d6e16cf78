use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::domain::{Chunk, DomainError, SearchResult};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VectorStoreStats {
    pub chunk_count: u64,
    pub file_count: u64,
    pub dimensions: Option<usize>,
    pub approximate_bytes: u64,
}

/// Chunk/embedding storage with a similarity-search contract.
///
/// `search` returns results in strictly descending score order (cosine
/// similarity normalized to [0, 1]), ties broken by chunk id for
/// determinism. `remove_file` must be called before `add` when re-indexing
/// a modified file: stale chunks never coexist with fresh ones for the
/// same path.
#[async_trait]
pub trait VectorIndex: Send + Sync {
    /// Inserts chunks that already carry embeddings.
    async fn add(&self, chunks: Vec<Chunk>) -> Result<(), DomainError>;

    async fn search(
        &self,
        query_embedding: &[f32],
        top_k: usize,
    ) -> Result<Vec<SearchResult>, DomainError>;

    /// Purely local token-overlap scoring; the offline fallback when no
    /// query embedding can be computed.
    async fn lexical_search(
        &self,
        query: &str,
        top_k: usize,
    ) -> Result<Vec<SearchResult>, DomainError>;

    /// All chunks owned by `path`, ordered by sequence index.
    async fn file_chunks(&self, path: &str) -> Result<Vec<Chunk>, DomainError>;

    /// Deletes every chunk whose owning path matches; returns the count.
    async fn remove_file(&self, path: &str) -> Result<u64, DomainError>;

    async fn stats(&self) -> Result<VectorStoreStats, DomainError>;
}
