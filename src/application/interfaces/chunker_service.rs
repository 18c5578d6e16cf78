use async_trait::async_trait;

use crate::domain::{Chunk, Language};

/// Output of one chunking pass over a file.
#[derive(Debug, Clone)]
pub struct ChunkSet {
    pub chunks: Vec<Chunk>,
    /// True when structural parsing failed and the line-window fallback was
    /// used; symbols are empty in that case.
    pub fallback: bool,
}

impl ChunkSet {
    pub fn empty() -> Self {
        Self {
            chunks: Vec::new(),
            fallback: false,
        }
    }
}

/// Turns file content into an ordered sequence of boundary-preserving
/// chunks with overlap.
///
/// Chunking must never raise a terminal error: structural-parse failure is
/// resolved by a deterministic line-window fallback, reported via
/// [`ChunkSet::fallback`]. Worst case is degraded chunk quality, not a
/// failed index.
#[async_trait]
pub trait ChunkerService: Send + Sync {
    async fn chunk(&self, content: &str, file_path: &str, language: Language) -> ChunkSet;

    fn supports_language(&self, language: Language) -> bool;
}
