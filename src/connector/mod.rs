//! Concrete adapters behind the application interfaces: tree-sitter
//! chunking, embedding providers, generation client and persisted stores.

pub mod chunker;
pub mod embedding;
pub mod generation;
pub mod storage;
