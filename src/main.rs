use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use clap::{Parser, Subcommand};
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn, Level};

use codeatlas::{
    ArchitectureOverview, ChatEngine, DomainError, EmbeddingProvider, GenerationProvider,
    HttpEmbeddingProvider, HttpGenerationClient, ImpactAnalysis, IndexConfig, IndexStores,
    MockEmbeddingProvider, NavigatorSearch, QueryHistory, SearchQuery, TreeSitterChunker,
    VectorIndex, WorkspaceIndexer,
};

const DATA_DIR_NAME: &str = ".codeatlas";

#[derive(Parser)]
#[command(name = "codeatlas", about = "Offline-first code knowledge index", version)]
struct Cli {
    /// Workspace root to index and query.
    #[arg(long, default_value = ".")]
    workspace: PathBuf,

    /// Index state directory (defaults to <workspace>/.codeatlas).
    #[arg(long)]
    data_dir: Option<PathBuf>,

    #[arg(short, long)]
    verbose: bool,

    /// Use deterministic offline embeddings instead of the HTTP provider.
    #[arg(long)]
    mock_embeddings: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Index the workspace incrementally.
    Index,
    /// Navigator mode: rank files relevant to a query.
    Search {
        query: String,
        #[arg(short, long, default_value_t = 10)]
        limit: usize,
    },
    /// Ask a question grounded in the indexed code.
    Chat { question: String },
    /// Summarize the workspace architecture from the dependency graph.
    Overview,
    /// List files affected by a change to the given file.
    Dependents {
        path: String,
        #[arg(long, default_value_t = 5)]
        depth: usize,
    },
    /// Show index store statistics.
    Stats,
}

/// Stands in when no generation endpoint is configured; query modes degrade
/// to local-only output instead of failing.
struct UnconfiguredGenerator;

#[async_trait]
impl GenerationProvider for UnconfiguredGenerator {
    async fn generate(&self, _: &str, _: &[String]) -> Result<String, DomainError> {
        Err(DomainError::transient(
            "no generation endpoint configured (set CODEATLAS_API_KEY)",
        ))
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let level = if cli.verbose { Level::DEBUG } else { Level::INFO };
    tracing_subscriber::fmt()
        .with_max_level(level)
        .with_target(false)
        .init();

    let workspace = cli
        .workspace
        .canonicalize()
        .with_context(|| format!("workspace not found: {:?}", cli.workspace))?;
    let data_dir = cli
        .data_dir
        .clone()
        .unwrap_or_else(|| workspace.join(DATA_DIR_NAME));

    let mut config = IndexConfig::default();
    config.excluded_dirs.push(DATA_DIR_NAME.to_string());

    let stores = IndexStores::load_or_create(&data_dir, &config).await?;
    if stores.rebuild_required() && !matches!(cli.command, Command::Index) {
        warn!("Index state was corrupt and has been reset; run `codeatlas index` to rebuild");
    }

    let timeout = Duration::from_secs(config.network_timeout_secs);
    let api_key = std::env::var("CODEATLAS_API_KEY").ok();

    let embedder: Arc<dyn EmbeddingProvider> = match (&api_key, cli.mock_embeddings) {
        (Some(key), false) => {
            let endpoint = std::env::var("CODEATLAS_EMBED_URL")
                .unwrap_or_else(|_| "https://api.openai.com/v1/embeddings".to_string());
            let model = std::env::var("CODEATLAS_EMBED_MODEL")
                .unwrap_or_else(|_| "text-embedding-3-small".to_string());
            Arc::new(HttpEmbeddingProvider::new(endpoint, key, model, 1536, timeout)?)
        }
        _ => {
            info!("Using deterministic offline embeddings");
            Arc::new(MockEmbeddingProvider::new())
        }
    };

    let generator: Arc<dyn GenerationProvider> = match &api_key {
        Some(key) => {
            let endpoint = std::env::var("CODEATLAS_CHAT_URL")
                .unwrap_or_else(|_| "https://api.anthropic.com/v1/messages".to_string());
            let model = std::env::var("CODEATLAS_CHAT_MODEL")
                .unwrap_or_else(|_| "claude-sonnet-4-5".to_string());
            Arc::new(HttpGenerationClient::new(endpoint, key, model, timeout)?)
        }
        None => Arc::new(UnconfiguredGenerator),
    };

    let chunker = Arc::new(TreeSitterChunker::with_limits(
        config.chunk_target_tokens,
        config.chunk_overlap_tokens,
    ));
    let indexer = Arc::new(WorkspaceIndexer::new(
        &workspace,
        config.clone(),
        chunker,
        Arc::clone(&embedder),
        Arc::clone(&stores.vectors) as Arc<dyn VectorIndex>,
        Arc::clone(&stores.cache),
        Arc::clone(&stores.registry),
        Arc::clone(&stores.graph),
    ));
    let history = Arc::new(Mutex::new(QueryHistory::default()));

    match cli.command {
        Command::Index => {
            let cancel = CancellationToken::new();
            let report = indexer.index_workspace(&cancel).await?;
            println!(
                "Indexed {} files ({} unchanged, {} excluded, {} skipped, {} failed, {} removed)",
                report.indexed,
                report.unchanged,
                report.excluded,
                report.skipped,
                report.failed,
                report.removed
            );
            if report.fallback_files > 0 {
                println!(
                    "{} files used line-window chunking (parse failures)",
                    report.fallback_files
                );
            }
        }
        Command::Search { query, limit } => {
            let search = NavigatorSearch::new(
                Arc::clone(&embedder),
                Arc::clone(&stores.vectors) as _,
                Arc::clone(&history),
            );
            let response = search
                .search(&SearchQuery::new(query).with_limit(limit))
                .await?;
            if response.degraded {
                println!("(embedding provider unavailable; showing lexical matches)");
            }
            for file_match in &response.matches {
                println!(
                    "{}  (score: {:.3})",
                    file_match.file_path(),
                    file_match.best_score()
                );
                for result in file_match.results() {
                    println!("    {}", result.display_line());
                }
            }
            if response.matches.is_empty() {
                println!("No matches.");
            }
        }
        Command::Chat { question } => {
            let engine = ChatEngine::new(
                Arc::clone(&embedder),
                Arc::clone(&stores.vectors) as _,
                generator,
                Arc::clone(&history),
            );
            let answer = engine.ask(&question).await?;
            match answer.answer {
                Some(text) => println!("{text}"),
                None => println!("(generation unavailable; showing retrieved sources only)"),
            }
            if !answer.sources.is_empty() {
                println!("\nSources:");
                for source in &answer.sources {
                    println!("  {} (score: {:.3})", source.location, source.score);
                }
            }
        }
        Command::Overview => {
            let overview = ArchitectureOverview::new(
                Arc::clone(&stores.graph),
                Arc::clone(&stores.vectors) as _,
                generator,
                Arc::clone(&history),
            );
            let report = overview.generate().await?;
            if report.degraded {
                println!("(generation unavailable; structural overview only)\n");
            }
            for (i, component) in report.components.iter().enumerate() {
                println!("Component {} ({} files)", i + 1, component.files.len());
                println!("  central: {}", component.central_files.join(", "));
                if let Some(summary) = &component.summary {
                    println!("  {summary}");
                }
            }
            if !report.cycles.is_empty() {
                println!("\nDependency cycles:");
                for cycle in &report.cycles {
                    println!("  {}", cycle.join(" -> "));
                }
            }
        }
        Command::Dependents { path, depth } => {
            let analysis =
                ImpactAnalysis::new(Arc::clone(&stores.graph)).with_max_depth(depth);
            let report = analysis.analyze(&path);
            if report.not_indexed {
                println!("{path} is not in the index.");
            } else if report.by_depth.is_empty() {
                println!("Nothing depends on {path}.");
            } else {
                for (level, files) in report.by_depth.iter().enumerate() {
                    println!("Depth {}: {}", level + 1, files.join(", "));
                }
                println!("{} files affected in total.", report.total_affected());
            }
        }
        Command::Stats => {
            let vector_stats = stores.vectors.stats().await?;
            let cache_stats = stores.cache.stats();
            println!(
                "Vectors: {} chunks across {} files ({} dims, ~{} KiB)",
                vector_stats.chunk_count,
                vector_stats.file_count,
                vector_stats
                    .dimensions
                    .map(|d| d.to_string())
                    .unwrap_or_else(|| "-".to_string()),
                vector_stats.approximate_bytes / 1024
            );
            println!(
                "Cache: {} entries, {} KiB, {} hits / {} misses / {} evictions",
                cache_stats.entries,
                cache_stats.total_bytes / 1024,
                cache_stats.hits,
                cache_stats.misses,
                cache_stats.evictions
            );
            println!("Registry: {} files tracked", stores.registry.len().await);
            let (nodes, edges) = {
                let graph = stores.graph.read().expect("graph lock poisoned");
                (graph.node_count(), graph.edge_count())
            };
            println!("Graph: {nodes} files, {edges} edges");
        }
    }

    stores.persist().await?;
    Ok(())
}
