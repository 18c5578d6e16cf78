//! Offline-first code knowledge index: incremental chunking and embedding,
//! a local vector store, a file dependency graph and retrieval-augmented
//! query modes on top of them.

pub mod application;
pub mod connector;
pub mod domain;

pub use application::interfaces::{
    ChunkSet, ChunkerService, EmbeddingProvider, GenerationProvider, VectorIndex,
    VectorStoreStats,
};
pub use application::use_cases::{
    ArchitectureOverview, ChatAnswer, ChatEngine, ComponentRanker, FileOutcome, ImpactAnalysis,
    ImpactReport, InDegreeRanker, IndexEvent, IndexReport, IndexingCoordinator, NavigatorResponse,
    NavigatorSearch, WorkspaceIndexer,
};
pub use connector::chunker::{ImportResolver, TreeSitterChunker};
pub use connector::embedding::{HttpEmbeddingProvider, MockEmbeddingProvider};
pub use connector::generation::HttpGenerationClient;
pub use connector::storage::{EmbeddingCache, FileRegistry, IndexStores, LocalVectorStore};
pub use domain::{
    Chunk, DependencyEdge, DependencyGraph, DomainError, FileChangeEvent, FileChangeKind,
    FileRecord, FileStatus, GraphLookup, ImportKind, IndexConfig, Language, QueryHistory,
    SearchQuery, SearchResult,
};
