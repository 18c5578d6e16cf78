use std::sync::Arc;
use std::time::Instant;

use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::application::interfaces::{EmbeddingProvider, GenerationProvider, VectorIndex};
use crate::domain::{
    DomainError, QueryHistory, QueryHistoryEntry, QueryMode, SearchResult,
};

const CONTEXT_CHUNKS: usize = 6;
const MAX_EXCERPT_CHARS: usize = 2_000;

/// Provenance for one excerpt that fed the answer.
#[derive(Debug, Clone)]
pub struct SourceRef {
    pub location: String,
    pub score: f32,
}

#[derive(Debug, Clone)]
pub struct ChatAnswer {
    /// `None` when generation was unavailable; `sources` still carries the
    /// retrieved excerpts so the caller has something to show.
    pub answer: Option<String>,
    pub degraded: bool,
    pub sources: Vec<SourceRef>,
    pub latency_ms: u64,
}

/// Retrieval-augmented question answering over the local index.
///
/// Retrieval is always local; only the final generation step talks to the
/// network. When that step is unavailable the engine degrades to returning
/// sources without prose instead of erroring, and retries on the next call.
pub struct ChatEngine {
    embedder: Arc<dyn EmbeddingProvider>,
    vectors: Arc<dyn VectorIndex>,
    generator: Arc<dyn GenerationProvider>,
    history: Arc<Mutex<QueryHistory>>,
}

impl ChatEngine {
    pub fn new(
        embedder: Arc<dyn EmbeddingProvider>,
        vectors: Arc<dyn VectorIndex>,
        generator: Arc<dyn GenerationProvider>,
        history: Arc<Mutex<QueryHistory>>,
    ) -> Self {
        Self {
            embedder,
            vectors,
            generator,
            history,
        }
    }

    pub async fn ask(&self, question: &str) -> Result<ChatAnswer, DomainError> {
        if question.trim().is_empty() {
            return Err(DomainError::invalid_input("empty question"));
        }
        let started = Instant::now();

        let (results, mut degraded) = self.retrieve(question).await?;
        let sources: Vec<SourceRef> = results
            .iter()
            .map(|r| SourceRef {
                location: r.chunk().location(),
                score: r.score(),
            })
            .collect();

        let answer = if results.is_empty() {
            Some("No indexed code matched the question.".to_string())
        } else {
            let context: Vec<String> = results.iter().map(excerpt).collect();
            match self.generator.generate(question, &context).await {
                Ok(text) => Some(text),
                Err(e) if e.is_transient() => {
                    warn!("Generation unavailable, returning sources only: {}", e);
                    degraded = true;
                    None
                }
                Err(e) => return Err(e),
            }
        };

        let latency_ms = started.elapsed().as_millis() as u64;
        debug!(
            "Chat answered with {} sources in {}ms (degraded: {})",
            sources.len(),
            latency_ms,
            degraded
        );
        self.history.lock().await.record(QueryHistoryEntry::new(
            question.to_string(),
            QueryMode::Chat,
            sources.len(),
            latency_ms,
        ));

        Ok(ChatAnswer {
            answer,
            degraded,
            sources,
            latency_ms,
        })
    }

    async fn retrieve(&self, question: &str) -> Result<(Vec<SearchResult>, bool), DomainError> {
        match self.embedder.embed(&[question.to_string()]).await {
            Ok(mut vectors) => {
                let embedding = vectors
                    .pop()
                    .ok_or_else(|| DomainError::internal("provider returned no query embedding"))?;
                Ok((self.vectors.search(&embedding, CONTEXT_CHUNKS).await?, false))
            }
            Err(e) if e.is_transient() => {
                warn!("Embedding unavailable, retrieving lexically: {}", e);
                Ok((
                    self.vectors.lexical_search(question, CONTEXT_CHUNKS).await?,
                    true,
                ))
            }
            Err(e) => Err(e),
        }
    }
}

/// Labels an excerpt with its provenance so the model can cite it.
fn excerpt(result: &SearchResult) -> String {
    let chunk = result.chunk();
    let mut text = chunk.content();
    if text.len() > MAX_EXCERPT_CHARS {
        let mut cut = MAX_EXCERPT_CHARS;
        while !text.is_char_boundary(cut) {
            cut -= 1;
        }
        text = &text[..cut];
    }
    format!("{}\n{}", chunk.location(), text)
}
