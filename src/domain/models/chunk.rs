use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::file_record::compute_content_hash;
use super::Language;

/// A boundary-preserving unit of source text sized for embedding.
///
/// Chunks are owned exclusively by the file that produced them: a file
/// modification destroys its old chunks and generates new ones, never a
/// merge. The `content_hash` covers the chunk's own text (distinct from the
/// whole-file hash) and is the cache key for embedding reuse.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Chunk {
    id: String,
    file_path: String,
    start_line: u32,
    end_line: u32,
    content: String,
    symbols: Vec<String>,
    language: Language,
    content_hash: String,
    seq_index: u32,
    seq_total: u32,
    embedding: Option<Vec<f32>>,
}

impl Chunk {
    pub fn new(
        file_path: String,
        content: String,
        start_line: u32,
        end_line: u32,
        language: Language,
    ) -> Self {
        let content_hash = compute_content_hash(content.as_bytes());
        Self {
            id: Uuid::new_v4().to_string(),
            file_path,
            start_line,
            end_line,
            content,
            symbols: Vec::new(),
            language,
            content_hash,
            seq_index: 0,
            seq_total: 1,
            embedding: None,
        }
    }

    pub fn with_symbols(mut self, symbols: Vec<String>) -> Self {
        self.symbols = symbols;
        self
    }

    pub fn with_sequence(mut self, index: u32, total: u32) -> Self {
        self.seq_index = index;
        self.seq_total = total;
        self
    }

    pub fn with_embedding(mut self, embedding: Vec<f32>) -> Self {
        self.embedding = Some(embedding);
        self
    }

    pub fn set_embedding(&mut self, embedding: Vec<f32>) {
        self.embedding = Some(embedding);
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn file_path(&self) -> &str {
        &self.file_path
    }

    pub fn start_line(&self) -> u32 {
        self.start_line
    }

    pub fn end_line(&self) -> u32 {
        self.end_line
    }

    pub fn content(&self) -> &str {
        &self.content
    }

    pub fn symbols(&self) -> &[String] {
        &self.symbols
    }

    pub fn language(&self) -> Language {
        self.language
    }

    pub fn content_hash(&self) -> &str {
        &self.content_hash
    }

    pub fn seq_index(&self) -> u32 {
        self.seq_index
    }

    pub fn seq_total(&self) -> u32 {
        self.seq_total
    }

    pub fn embedding(&self) -> Option<&[f32]> {
        self.embedding.as_deref()
    }

    pub fn has_embedding(&self) -> bool {
        self.embedding.is_some()
    }

    pub fn location(&self) -> String {
        format!("{}:{}-{}", self.file_path, self.start_line, self.end_line)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_chunk_hash_covers_own_text() {
        let a = Chunk::new(
            "a.rs".to_string(),
            "fn one() {}".to_string(),
            1,
            1,
            Language::Rust,
        );
        let b = Chunk::new(
            "b.rs".to_string(),
            "fn one() {}".to_string(),
            10,
            10,
            Language::Rust,
        );

        // Same text, same hash: even across files and line ranges.
        assert_eq!(a.content_hash(), b.content_hash());
        assert_ne!(a.id(), b.id());
    }

    #[test]
    fn test_chunk_builders() {
        let chunk = Chunk::new(
            "src/lib.rs".to_string(),
            "pub fn run() {}".to_string(),
            3,
            5,
            Language::Rust,
        )
        .with_symbols(vec!["run".to_string()])
        .with_sequence(1, 4)
        .with_embedding(vec![0.0, 1.0]);

        assert_eq!(chunk.symbols(), ["run".to_string()]);
        assert_eq!(chunk.seq_index(), 1);
        assert_eq!(chunk.seq_total(), 4);
        assert!(chunk.has_embedding());
        assert_eq!(chunk.location(), "src/lib.rs:3-5");
    }
}
