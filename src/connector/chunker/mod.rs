//! Source file decomposition: structural chunking via tree-sitter and
//! lexical import resolution for the dependency graph.

mod import_resolver;
mod treesitter_chunker;

pub use import_resolver::ImportResolver;
pub use treesitter_chunker::TreeSitterChunker;
