use serde::{Deserialize, Serialize};

/// Tunables for the indexing pipeline and query engine.
///
/// Chunk size and overlap are measured in tokens, not characters. The cache
/// ceiling and search budget mirror the documented defaults (1 GiB, 300 ms).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexConfig {
    pub chunk_target_tokens: usize,
    pub chunk_overlap_tokens: usize,
    /// Upper bound on texts per embedding request.
    pub embed_batch_size: usize,
    pub cache_max_bytes: u64,
    pub search_top_k: usize,
    pub search_budget_ms: u64,
    /// Files larger than this are a permanent-input failure, not indexed.
    pub max_file_bytes: u64,
    /// Failed files are retried this many times, then skipped.
    pub max_retries: u32,
    /// Directory names excluded from discovery, on top of gitignore rules.
    pub excluded_dirs: Vec<String>,
    pub network_timeout_secs: u64,
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self {
            chunk_target_tokens: 256,
            chunk_overlap_tokens: 32,
            embed_batch_size: 25,
            cache_max_bytes: 1024 * 1024 * 1024,
            search_top_k: 10,
            search_budget_ms: 300,
            max_file_bytes: 2 * 1024 * 1024,
            max_retries: 3,
            excluded_dirs: vec![
                ".git".to_string(),
                ".hg".to_string(),
                ".svn".to_string(),
                "node_modules".to_string(),
                "target".to_string(),
                "dist".to_string(),
                "build".to_string(),
                "__pycache__".to_string(),
                ".venv".to_string(),
                "vendor".to_string(),
            ],
            network_timeout_secs: 10,
        }
    }
}

impl IndexConfig {
    pub fn is_excluded_dir(&self, name: &str) -> bool {
        self.excluded_dirs.iter().any(|d| d == name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match_documented_budgets() {
        let config = IndexConfig::default();
        assert_eq!(config.embed_batch_size, 25);
        assert_eq!(config.cache_max_bytes, 1024 * 1024 * 1024);
        assert_eq!(config.search_budget_ms, 300);
        assert_eq!(config.max_retries, 3);
        assert!(config.is_excluded_dir("node_modules"));
        assert!(!config.is_excluded_dir("src"));
    }
}
