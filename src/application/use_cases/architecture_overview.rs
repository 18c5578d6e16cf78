use std::sync::{Arc, RwLock};
use std::time::Instant;

use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::application::interfaces::{GenerationProvider, VectorIndex};
use crate::domain::{
    DependencyGraph, DomainError, QueryHistory, QueryHistoryEntry, QueryMode,
};

const MAX_COMPONENTS: usize = 8;
const CENTRAL_FILES_PER_COMPONENT: usize = 3;
const MAX_EXCERPT_CHARS: usize = 1_200;

/// Orders a component's files by importance. Pluggable so callers can swap
/// the centrality heuristic without touching the report pipeline.
pub trait ComponentRanker: Send + Sync {
    fn rank(&self, graph: &DependencyGraph, component: &[String]) -> Vec<String>;
}

/// Default ranking: files most depended upon first, path as tie-break.
pub struct InDegreeRanker;

impl ComponentRanker for InDegreeRanker {
    fn rank(&self, graph: &DependencyGraph, component: &[String]) -> Vec<String> {
        let mut ranked: Vec<(usize, String)> = component
            .iter()
            .map(|path| (graph.in_degree(path), path.clone()))
            .collect();
        ranked.sort_by(|a, b| b.0.cmp(&a.0).then_with(|| a.1.cmp(&b.1)));
        ranked.into_iter().map(|(_, path)| path).collect()
    }
}

#[derive(Debug, Clone)]
pub struct ComponentSummary {
    pub files: Vec<String>,
    /// Top-ranked files, the ones the prose summary is grounded on.
    pub central_files: Vec<String>,
    /// `None` when generation was unavailable for this component.
    pub summary: Option<String>,
}

#[derive(Debug, Clone)]
pub struct OverviewReport {
    /// Largest components first.
    pub components: Vec<ComponentSummary>,
    pub cycles: Vec<Vec<String>>,
    pub degraded: bool,
    pub latency_ms: u64,
}

/// Architecture-overview mode: derive components from the dependency graph,
/// rank files within each, and summarize the central ones.
///
/// The structure (components, central files, cycles) is computed entirely
/// locally; only the prose summaries need the generation provider, so an
/// outage degrades to a structure-only report.
pub struct ArchitectureOverview {
    graph: Arc<RwLock<DependencyGraph>>,
    vectors: Arc<dyn VectorIndex>,
    generator: Arc<dyn GenerationProvider>,
    ranker: Arc<dyn ComponentRanker>,
    history: Arc<Mutex<QueryHistory>>,
}

impl ArchitectureOverview {
    pub fn new(
        graph: Arc<RwLock<DependencyGraph>>,
        vectors: Arc<dyn VectorIndex>,
        generator: Arc<dyn GenerationProvider>,
        history: Arc<Mutex<QueryHistory>>,
    ) -> Self {
        Self {
            graph,
            vectors,
            generator,
            ranker: Arc::new(InDegreeRanker),
            history,
        }
    }

    pub fn with_ranker(mut self, ranker: Arc<dyn ComponentRanker>) -> Self {
        self.ranker = ranker;
        self
    }

    pub async fn generate(&self) -> Result<OverviewReport, DomainError> {
        let started = Instant::now();

        // Structure is extracted under the lock; nothing async happens here.
        let (components, cycles) = {
            let graph = self.graph.read().expect("graph lock poisoned");
            let components: Vec<(Vec<String>, Vec<String>)> = graph
                .components()
                .into_iter()
                .take(MAX_COMPONENTS)
                .map(|files| {
                    let ranked = self.ranker.rank(&graph, &files);
                    (files, ranked)
                })
                .collect();
            (components, graph.find_cycles())
        };

        let mut degraded = false;
        let mut summaries = Vec::with_capacity(components.len());
        for (files, ranked) in components {
            let central_files: Vec<String> = ranked
                .into_iter()
                .take(CENTRAL_FILES_PER_COMPONENT)
                .collect();

            let summary = match self.summarize_component(&central_files).await {
                Ok(text) => Some(text),
                Err(e) if e.is_transient() => {
                    warn!("Generation unavailable for component summary: {}", e);
                    degraded = true;
                    None
                }
                Err(e) => return Err(e),
            };
            summaries.push(ComponentSummary {
                files,
                central_files,
                summary,
            });
        }

        let latency_ms = started.elapsed().as_millis() as u64;
        debug!(
            "Overview produced {} components, {} cycles in {}ms",
            summaries.len(),
            cycles.len(),
            latency_ms
        );
        self.history.lock().await.record(QueryHistoryEntry::new(
            "architecture overview".to_string(),
            QueryMode::Overview,
            summaries.len(),
            latency_ms,
        ));

        Ok(OverviewReport {
            components: summaries,
            cycles,
            degraded,
            latency_ms,
        })
    }

    async fn summarize_component(&self, central_files: &[String]) -> Result<String, DomainError> {
        let mut context = Vec::new();
        for path in central_files {
            for chunk in self.vectors.file_chunks(path).await?.into_iter().take(1) {
                let mut text = chunk.content().to_string();
                if text.len() > MAX_EXCERPT_CHARS {
                    let mut cut = MAX_EXCERPT_CHARS;
                    while !text.is_char_boundary(cut) {
                        cut -= 1;
                    }
                    text.truncate(cut);
                }
                context.push(format!("{}\n{}", chunk.location(), text));
            }
        }

        let prompt = format!(
            "Summarize the role of this component in one or two sentences. \
             Its most depended-upon files are: {}.",
            central_files.join(", ")
        );
        self.generator.generate(&prompt, &context).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;

    use crate::connector::storage::LocalVectorStore;
    use crate::domain::{DependencyEdge, ImportKind};

    struct EchoGenerator;

    #[async_trait]
    impl GenerationProvider for EchoGenerator {
        async fn generate(&self, _: &str, context: &[String]) -> Result<String, DomainError> {
            Ok(format!("summary of {} excerpts", context.len()))
        }
    }

    struct OfflineGenerator;

    #[async_trait]
    impl GenerationProvider for OfflineGenerator {
        async fn generate(&self, _: &str, _: &[String]) -> Result<String, DomainError> {
            Err(DomainError::transient("endpoint unreachable"))
        }
    }

    fn graph_with_component() -> Arc<RwLock<DependencyGraph>> {
        let mut graph = DependencyGraph::new();
        graph.add_file(
            "api.rs",
            vec![DependencyEdge::new(
                "api.rs".into(),
                "core.rs".into(),
                ImportKind::Use,
                1,
            )],
        );
        graph.add_file(
            "cli.rs",
            vec![DependencyEdge::new(
                "cli.rs".into(),
                "core.rs".into(),
                ImportKind::Use,
                1,
            )],
        );
        graph.add_file("core.rs", vec![]);
        Arc::new(RwLock::new(graph))
    }

    #[tokio::test]
    async fn test_in_degree_ranker_puts_hub_first() {
        let graph = graph_with_component();
        let guard = graph.read().unwrap();
        let ranked = InDegreeRanker.rank(
            &guard,
            &["api.rs".to_string(), "cli.rs".to_string(), "core.rs".to_string()],
        );
        assert_eq!(ranked[0], "core.rs");
    }

    #[tokio::test]
    async fn test_overview_reports_components() {
        let overview = ArchitectureOverview::new(
            graph_with_component(),
            Arc::new(LocalVectorStore::new()),
            Arc::new(EchoGenerator),
            Arc::new(Mutex::new(QueryHistory::default())),
        );

        let report = overview.generate().await.unwrap();
        assert!(!report.degraded);
        assert_eq!(report.components.len(), 1);
        assert_eq!(report.components[0].central_files[0], "core.rs");
        assert!(report.components[0].summary.is_some());
        assert!(report.cycles.is_empty());
    }

    #[tokio::test]
    async fn test_outage_degrades_to_structure_only() {
        let overview = ArchitectureOverview::new(
            graph_with_component(),
            Arc::new(LocalVectorStore::new()),
            Arc::new(OfflineGenerator),
            Arc::new(Mutex::new(QueryHistory::default())),
        );

        let report = overview.generate().await.unwrap();
        assert!(report.degraded);
        assert_eq!(report.components.len(), 1);
        assert!(report.components[0].summary.is_none());
        assert!(!report.components[0].files.is_empty());
    }
}
