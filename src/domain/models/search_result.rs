use serde::{Deserialize, Serialize};

use super::Chunk;

/// A single chunk hit with its cosine-similarity score in [0, 1].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchResult {
    chunk: Chunk,
    score: f32,
}

impl SearchResult {
    pub fn new(chunk: Chunk, score: f32) -> Self {
        Self { chunk, score }
    }

    pub fn chunk(&self) -> &Chunk {
        &self.chunk
    }

    pub fn into_chunk(self) -> Chunk {
        self.chunk
    }

    pub fn score(&self) -> f32 {
        self.score
    }

    pub fn is_relevant(&self, threshold: f32) -> bool {
        self.score >= threshold
    }

    pub fn display_line(&self) -> String {
        format!("{} (score: {:.3})", self.chunk.location(), self.score)
    }
}

/// Navigator-mode grouping: one entry per file, ordered by best chunk score.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileMatch {
    file_path: String,
    best_score: f32,
    results: Vec<SearchResult>,
}

impl FileMatch {
    pub fn new(file_path: String, results: Vec<SearchResult>) -> Self {
        let best_score = results
            .iter()
            .map(SearchResult::score)
            .fold(0.0_f32, f32::max);
        Self {
            file_path,
            best_score,
            results,
        }
    }

    pub fn file_path(&self) -> &str {
        &self.file_path
    }

    pub fn best_score(&self) -> f32 {
        self.best_score
    }

    pub fn results(&self) -> &[SearchResult] {
        &self.results
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchQuery {
    query: String,
    limit: usize,
    min_score: Option<f32>,
}

impl SearchQuery {
    pub fn new(query: impl Into<String>) -> Self {
        Self {
            query: query.into(),
            limit: 10,
            min_score: None,
        }
    }

    pub fn with_limit(mut self, limit: usize) -> Self {
        // Ensure at least 1 result is requested
        self.limit = limit.max(1);
        self
    }

    pub fn with_min_score(mut self, score: f32) -> Self {
        self.min_score = Some(score);
        self
    }

    pub fn query(&self) -> &str {
        &self.query
    }

    pub fn limit(&self) -> usize {
        self.limit
    }

    pub fn min_score(&self) -> Option<f32> {
        self.min_score
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::Language;

    fn sample_chunk(path: &str, score_marker: &str) -> Chunk {
        Chunk::new(
            path.to_string(),
            format!("fn {}() {{}}", score_marker),
            1,
            1,
            Language::Rust,
        )
    }

    #[test]
    fn test_search_result_relevance() {
        let result = SearchResult::new(sample_chunk("a.rs", "alpha"), 0.82);
        assert!(result.is_relevant(0.5));
        assert!(!result.is_relevant(0.9));
    }

    #[test]
    fn test_file_match_best_score() {
        let results = vec![
            SearchResult::new(sample_chunk("a.rs", "alpha"), 0.4),
            SearchResult::new(sample_chunk("a.rs", "beta"), 0.7),
        ];
        let file_match = FileMatch::new("a.rs".to_string(), results);
        assert!((file_match.best_score() - 0.7).abs() < f32::EPSILON);
        assert_eq!(file_match.results().len(), 2);
    }

    #[test]
    fn test_search_query_builder() {
        let query = SearchQuery::new("parse config").with_limit(0).with_min_score(0.3);
        assert_eq!(query.limit(), 1);
        assert_eq!(query.min_score(), Some(0.3));
        assert_eq!(query.query(), "parse config");
    }
}
