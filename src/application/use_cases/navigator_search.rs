use std::sync::Arc;
use std::time::Instant;

use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::application::interfaces::{EmbeddingProvider, VectorIndex};
use crate::domain::{
    DomainError, FileMatch, QueryHistory, QueryHistoryEntry, QueryMode, SearchQuery, SearchResult,
};

/// Navigator-mode response: per-file groups plus degradation status.
#[derive(Debug, Clone)]
pub struct NavigatorResponse {
    pub matches: Vec<FileMatch>,
    /// True when the query embedding could not be computed and results come
    /// from local lexical scoring instead.
    pub degraded: bool,
    pub latency_ms: u64,
}

/// Semantic file navigation: embed the query, rank chunks, group by file.
///
/// An embedding outage downgrades to lexical scoring over the local store
/// rather than failing; the response is flagged so callers can tell the
/// difference. Recovery is lazy: the next query simply tries the provider
/// again.
pub struct NavigatorSearch {
    embedder: Arc<dyn EmbeddingProvider>,
    vectors: Arc<dyn VectorIndex>,
    history: Arc<Mutex<QueryHistory>>,
}

impl NavigatorSearch {
    pub fn new(
        embedder: Arc<dyn EmbeddingProvider>,
        vectors: Arc<dyn VectorIndex>,
        history: Arc<Mutex<QueryHistory>>,
    ) -> Self {
        Self {
            embedder,
            vectors,
            history,
        }
    }

    pub async fn search(&self, query: &SearchQuery) -> Result<NavigatorResponse, DomainError> {
        if query.query().trim().is_empty() {
            return Err(DomainError::invalid_input("empty query"));
        }
        let started = Instant::now();

        let (results, degraded) = match self.embed_query(query.query()).await {
            Ok(embedding) => (
                self.vectors.search(&embedding, query.limit()).await?,
                false,
            ),
            Err(e) if e.is_transient() => {
                warn!("Embedding unavailable, using lexical fallback: {}", e);
                (
                    self.vectors
                        .lexical_search(query.query(), query.limit())
                        .await?,
                    true,
                )
            }
            Err(e) => return Err(e),
        };

        let results: Vec<SearchResult> = match query.min_score() {
            Some(threshold) => results
                .into_iter()
                .filter(|r| r.is_relevant(threshold))
                .collect(),
            None => results,
        };

        let matches = group_by_file(results);
        let latency_ms = started.elapsed().as_millis() as u64;
        debug!(
            "Navigator query matched {} files in {}ms (degraded: {})",
            matches.len(),
            latency_ms,
            degraded
        );

        let result_count = matches.iter().map(|m| m.results().len()).sum();
        self.history.lock().await.record(QueryHistoryEntry::new(
            query.query().to_string(),
            QueryMode::Search,
            result_count,
            latency_ms,
        ));

        Ok(NavigatorResponse {
            matches,
            degraded,
            latency_ms,
        })
    }

    async fn embed_query(&self, query: &str) -> Result<Vec<f32>, DomainError> {
        let mut vectors = self.embedder.embed(&[query.to_string()]).await?;
        vectors
            .pop()
            .ok_or_else(|| DomainError::internal("provider returned no query embedding"))
    }
}

/// Groups ranked results into one [`FileMatch`] per file, ordered by best
/// chunk score descending with path as the deterministic tie-break.
fn group_by_file(results: Vec<SearchResult>) -> Vec<FileMatch> {
    let mut order: Vec<String> = Vec::new();
    let mut grouped: std::collections::HashMap<String, Vec<SearchResult>> =
        std::collections::HashMap::new();
    for result in results {
        let path = result.chunk().file_path().to_string();
        if !grouped.contains_key(&path) {
            order.push(path.clone());
        }
        grouped.entry(path).or_default().push(result);
    }

    let mut matches: Vec<FileMatch> = order
        .into_iter()
        .map(|path| {
            let results = grouped.remove(&path).unwrap_or_default();
            FileMatch::new(path, results)
        })
        .collect();
    matches.sort_by(|a, b| {
        b.best_score()
            .partial_cmp(&a.best_score())
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.file_path().cmp(b.file_path()))
    });
    matches
}
