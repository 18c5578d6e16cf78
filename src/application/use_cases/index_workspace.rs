use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};

use indicatif::{ProgressBar, ProgressStyle};
use regex::Regex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::application::interfaces::{ChunkerService, EmbeddingProvider, VectorIndex};
use crate::connector::chunker::ImportResolver;
use crate::connector::storage::{chunk_key, Claim, EmbeddingCache, FileRegistry, PendingSlot};
use crate::domain::models::compute_content_hash;
use crate::domain::{
    DependencyGraph, DomainError, FileRecord, FileStatus, IndexConfig, Language,
};

/// Filename patterns that mark a file as sensitive regardless of content.
const SENSITIVE_NAMES: &[&str] = &[
    ".env", ".pem", ".key", ".p12", ".pfx", "id_rsa", "id_ed25519", "secret", "credential",
];

/// Per-file result of one indexing pass.
#[derive(Debug, Clone, PartialEq)]
pub enum FileOutcome {
    Indexed { chunks: usize, fallback: bool },
    /// Whole-file hash matched the registry: nothing re-chunked, nothing
    /// re-embedded, nothing touched in storage.
    Unchanged,
    Excluded { reason: String },
    /// Permanently unprocessable (oversized, binary); parked, not retried.
    Skipped { reason: String },
    Removed,
}

/// Tally of a full workspace pass.
#[derive(Debug, Default, Clone)]
pub struct IndexReport {
    pub indexed: usize,
    pub unchanged: usize,
    pub excluded: usize,
    pub skipped: usize,
    pub failed: usize,
    pub removed: usize,
    /// Files chunked by the line-window fallback instead of structurally.
    pub fallback_files: usize,
}

impl IndexReport {
    pub fn total(&self) -> usize {
        self.indexed + self.unchanged + self.excluded + self.skipped + self.failed + self.removed
    }
}

/// Drives the index pipeline: discovery, exclusion filtering, chunking,
/// cached embedding and atomic per-file commits.
///
/// A file becomes visible to queries only after its chunks, embeddings,
/// graph edges and registry record are all committed; a failure partway
/// leaves the previous indexed state intact.
pub struct WorkspaceIndexer {
    workspace_root: PathBuf,
    config: IndexConfig,
    chunker: Arc<dyn ChunkerService>,
    embedder: Arc<dyn EmbeddingProvider>,
    vectors: Arc<dyn VectorIndex>,
    cache: Arc<EmbeddingCache>,
    registry: Arc<FileRegistry>,
    graph: Arc<RwLock<DependencyGraph>>,
    /// Known workspace files, kept current across passes so import
    /// resolution sees files discovered in the same run.
    files: RwLock<HashSet<String>>,
    secret_patterns: Vec<Regex>,
}

impl WorkspaceIndexer {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        workspace_root: impl Into<PathBuf>,
        config: IndexConfig,
        chunker: Arc<dyn ChunkerService>,
        embedder: Arc<dyn EmbeddingProvider>,
        vectors: Arc<dyn VectorIndex>,
        cache: Arc<EmbeddingCache>,
        registry: Arc<FileRegistry>,
        graph: Arc<RwLock<DependencyGraph>>,
    ) -> Self {
        let secret_patterns = [
            r"AKIA[0-9A-Z]{16}",
            r"-----BEGIN [A-Z ]*PRIVATE KEY-----",
            r#"(?i)(api[_-]?key|secret|token|password)\s*[:=]\s*["'][A-Za-z0-9/+_\-]{16,}["']"#,
        ]
        .iter()
        .filter_map(|p| Regex::new(p).ok())
        .collect();

        Self {
            workspace_root: workspace_root.into(),
            config,
            chunker,
            embedder,
            vectors,
            cache,
            registry,
            graph,
            files: RwLock::new(HashSet::new()),
            secret_patterns,
        }
    }

    pub fn config(&self) -> &IndexConfig {
        &self.config
    }

    pub fn workspace_root(&self) -> &Path {
        &self.workspace_root
    }

    pub fn registry(&self) -> &FileRegistry {
        &self.registry
    }

    pub fn vector_index(&self) -> &Arc<dyn VectorIndex> {
        &self.vectors
    }

    pub fn graph(&self) -> &Arc<RwLock<DependencyGraph>> {
        &self.graph
    }

    pub fn cache(&self) -> &EmbeddingCache {
        &self.cache
    }

    /// Walks the workspace honoring gitignore rules plus the configured
    /// directory exclusions; returns workspace-relative paths.
    pub fn discover_files(&self) -> Result<Vec<String>, DomainError> {
        let excluded = self.config.excluded_dirs.clone();
        let mut paths = Vec::new();
        let walker = ignore::WalkBuilder::new(&self.workspace_root)
            .hidden(false)
            .git_ignore(true)
            .git_exclude(true)
            .filter_entry(move |entry| {
                let name = entry.file_name().to_string_lossy();
                !(entry.file_type().map(|t| t.is_dir()).unwrap_or(false)
                    && excluded.iter().any(|d| d == name.as_ref()))
            })
            .build();

        for entry in walker {
            let entry = entry.map_err(|e| DomainError::storage(format!("walk workspace: {e}")))?;
            if !entry.file_type().map(|t| t.is_file()).unwrap_or(false) {
                continue;
            }
            if let Ok(rel) = entry.path().strip_prefix(&self.workspace_root) {
                paths.push(rel.to_string_lossy().replace('\\', "/"));
            }
        }
        paths.sort();

        {
            let mut files = self.files.write().expect("file set lock poisoned");
            files.clear();
            files.extend(paths.iter().cloned());
        }
        Ok(paths)
    }

    /// Indexes every discovered file, reporting progress. Individual file
    /// failures are recorded and counted; only cancellation and storage
    /// failures abort the pass.
    pub async fn index_workspace(
        &self,
        cancel: &CancellationToken,
    ) -> Result<IndexReport, DomainError> {
        let paths = self.discover_files()?;
        info!("Indexing {} files under {:?}", paths.len(), self.workspace_root);

        let progress = ProgressBar::new(paths.len() as u64);
        if let Ok(style) =
            ProgressStyle::with_template("{bar:40} {pos}/{len} {msg}")
        {
            progress.set_style(style);
        }

        let mut report = IndexReport::default();
        for path in &paths {
            if cancel.is_cancelled() {
                progress.abandon_with_message("cancelled");
                return Err(DomainError::Cancelled);
            }
            progress.set_message(path.clone());
            match self.index_file(path, cancel).await {
                Ok(FileOutcome::Indexed { fallback, .. }) => {
                    report.indexed += 1;
                    if fallback {
                        report.fallback_files += 1;
                    }
                }
                Ok(FileOutcome::Unchanged) => report.unchanged += 1,
                Ok(FileOutcome::Excluded { .. }) => report.excluded += 1,
                Ok(FileOutcome::Skipped { .. }) => report.skipped += 1,
                Ok(FileOutcome::Removed) => report.removed += 1,
                Err(DomainError::Cancelled) => {
                    progress.abandon_with_message("cancelled");
                    return Err(DomainError::Cancelled);
                }
                Err(e) => {
                    warn!("Failed to index {}: {}", path, e);
                    let max_retries = self.config.max_retries;
                    let record = self
                        .registry
                        .update(path, |r| {
                            r.mark_failed(e.to_string());
                            if r.retry_count() >= max_retries {
                                r.mark_skipped();
                            }
                        })
                        .await;
                    if record.status() == FileStatus::Skipped {
                        warn!(
                            "Giving up on {} after {} attempts",
                            path,
                            record.retry_count()
                        );
                    }
                    report.failed += 1;
                }
            }
            progress.inc(1);
        }
        progress.finish_with_message("done");

        info!(
            "Index pass complete: {} indexed, {} unchanged, {} excluded, {} failed",
            report.indexed, report.unchanged, report.excluded, report.failed
        );
        Ok(report)
    }

    /// Indexes a single file end to end. Transient errors propagate so the
    /// caller can apply its retry policy; terminal conditions come back as
    /// an outcome.
    pub async fn index_file(
        &self,
        path: &str,
        cancel: &CancellationToken,
    ) -> Result<FileOutcome, DomainError> {
        if let Some(reason) = self.sensitive_name_reason(path) {
            return Ok(self.exclude_file(path, reason).await?);
        }

        let absolute = self.workspace_root.join(path);
        let bytes = match tokio::fs::read(&absolute).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Ok(self.remove_file(path).await?);
            }
            Err(e) => return Err(e.into()),
        };

        if bytes.len() as u64 > self.config.max_file_bytes {
            let reason = format!("file exceeds {} bytes", self.config.max_file_bytes);
            self.registry
                .update(path, |r| {
                    r.mark_failed(reason.clone());
                    r.mark_skipped();
                })
                .await;
            return Ok(FileOutcome::Skipped { reason });
        }
        if bytes.contains(&0) {
            let reason = "binary content".to_string();
            self.registry
                .update(path, |r| {
                    r.mark_failed(reason.clone());
                    r.mark_skipped();
                })
                .await;
            return Ok(FileOutcome::Skipped { reason });
        }

        let file_hash = compute_content_hash(&bytes);
        if self.registry.matches_hash(path, &file_hash).await {
            debug!("{} unchanged, skipping", path);
            return Ok(FileOutcome::Unchanged);
        }

        // A file parked after exhausting its retry budget stays parked until
        // its content actually changes.
        if let Some(record) = self.registry.get(path).await {
            if record.status() == FileStatus::Skipped && record.content_hash() == file_hash {
                let reason = record
                    .failure_reason()
                    .unwrap_or("retry budget exhausted")
                    .to_string();
                return Ok(FileOutcome::Skipped { reason });
            }
        }

        let content = String::from_utf8_lossy(&bytes).into_owned();
        if self.content_has_secrets(&content) {
            return Ok(self.exclude_file(path, "embedded secret detected").await?);
        }

        self.files
            .write()
            .expect("file set lock poisoned")
            .insert(path.to_string());
        self.registry
            .update(path, |r| r.mark_indexing(file_hash.clone()))
            .await;

        let language = Language::from_path(Path::new(path));
        let chunk_set = self.chunker.chunk(&content, path, language).await;
        let fallback = chunk_set.fallback;
        let mut chunks = chunk_set.chunks;

        let edges = {
            let files = self.files.read().expect("file set lock poisoned");
            ImportResolver::new(files.clone()).resolve(&content, path, language)
        };

        self.embed_chunks(&mut chunks, cancel).await?;

        if cancel.is_cancelled() {
            return Err(DomainError::Cancelled);
        }

        // Commit: replace chunks, then edges, then the registry record.
        // Old chunks never coexist with new ones for the same path.
        let chunk_ids: Vec<String> = chunks.iter().map(|c| c.id().to_string()).collect();
        let chunk_count = chunks.len();
        self.vectors.remove_file(path).await?;
        self.vectors.add(chunks).await?;
        {
            let mut graph = self.graph.write().expect("graph lock poisoned");
            graph.add_file(path, edges);
        }
        self.registry
            .update(path, |r| r.mark_indexed(file_hash.clone(), chunk_ids.clone()))
            .await;

        Ok(FileOutcome::Indexed {
            chunks: chunk_count,
            fallback,
        })
    }

    /// Resolves embeddings for every chunk, cache first, deduplicating
    /// in-flight work per content hash and batching provider calls.
    async fn embed_chunks(
        &self,
        chunks: &mut [crate::domain::Chunk],
        cancel: &CancellationToken,
    ) -> Result<(), DomainError> {
        let keys: Vec<String> = chunks
            .iter()
            .map(|c| chunk_key(c.content_hash()))
            .collect();
        let _pin = self.cache.pin_batch(&keys);

        // Repeated hashes within one file must collapse to a single claim:
        // claiming the same key twice from this task would leave the second
        // claim waiting on a slot only this task can complete.
        let mut unique: Vec<(String, Vec<usize>)> = Vec::new();
        let mut slot_of: HashMap<&str, usize> = HashMap::new();
        for (i, key) in keys.iter().enumerate() {
            match slot_of.get(key.as_str()) {
                Some(&pos) => unique[pos].1.push(i),
                None => {
                    slot_of.insert(key.as_str(), unique.len());
                    unique.push((key.clone(), vec![i]));
                }
            }
        }

        let mut owed: Vec<(Vec<usize>, PendingSlot)> = Vec::new();
        for (key, indices) in unique {
            if cancel.is_cancelled() {
                return Err(DomainError::Cancelled);
            }
            loop {
                match self.cache.claim(&key) {
                    Claim::Hit(vector) => {
                        for &i in &indices {
                            chunks[i].set_embedding(vector.clone());
                        }
                        break;
                    }
                    Claim::Owed(slot) => {
                        owed.push((indices, slot));
                        break;
                    }
                    Claim::Wait(ticket) => {
                        if let Some(vector) = ticket.wait().await {
                            for &i in &indices {
                                chunks[i].set_embedding(vector.clone());
                            }
                            break;
                        }
                        // Owner failed; claim again and compute ourselves.
                    }
                }
            }
        }

        let batch_size = self
            .config
            .embed_batch_size
            .min(self.embedder.max_batch_size())
            .max(1);
        while !owed.is_empty() {
            if cancel.is_cancelled() {
                return Err(DomainError::Cancelled);
            }
            let take = batch_size.min(owed.len());
            let batch: Vec<(Vec<usize>, PendingSlot)> = owed.drain(..take).collect();
            let texts: Vec<String> = batch
                .iter()
                .map(|(indices, _)| chunks[indices[0]].content().to_string())
                .collect();

            // On failure the slots drop, releasing any waiters.
            let vectors = self.embedder.embed(&texts).await?;
            if vectors.len() != texts.len() {
                return Err(DomainError::internal(format!(
                    "provider returned {} vectors for {} texts",
                    vectors.len(),
                    texts.len()
                )));
            }
            for ((indices, slot), vector) in batch.into_iter().zip(vectors) {
                for &i in &indices {
                    chunks[i].set_embedding(vector.clone());
                }
                slot.complete(vector);
            }
        }
        Ok(())
    }

    /// Marks `path` excluded and scrubs any previously indexed state for it.
    async fn exclude_file(&self, path: &str, reason: &str) -> Result<FileOutcome, DomainError> {
        info!("Excluding {}: {}", path, reason);
        self.vectors.remove_file(path).await?;
        {
            let mut graph = self.graph.write().expect("graph lock poisoned");
            graph.remove_file(path);
        }
        self.registry
            .upsert(FileRecord::excluded(path.to_string(), reason))
            .await;
        Ok(FileOutcome::Excluded {
            reason: reason.to_string(),
        })
    }

    /// Scrubs all index state for a file that no longer exists on disk.
    pub async fn remove_file(&self, path: &str) -> Result<FileOutcome, DomainError> {
        let removed = self.vectors.remove_file(path).await?;
        {
            let mut graph = self.graph.write().expect("graph lock poisoned");
            graph.remove_file(path);
        }
        self.registry.remove(path).await;
        self.files
            .write()
            .expect("file set lock poisoned")
            .remove(path);
        debug!("Removed {} ({} chunks)", path, removed);
        Ok(FileOutcome::Removed)
    }

    fn sensitive_name_reason(&self, path: &str) -> Option<&'static str> {
        let name = Path::new(path)
            .file_name()
            .map(|n| n.to_string_lossy().to_lowercase())?;
        SENSITIVE_NAMES
            .iter()
            .find(|pattern| name.contains(*pattern))
            .map(|_| "sensitive file name")
    }

    fn content_has_secrets(&self, content: &str) -> bool {
        self.secret_patterns.iter().any(|p| p.is_match(content))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connector::chunker::TreeSitterChunker;
    use crate::connector::embedding::MockEmbeddingProvider;
    use crate::connector::storage::LocalVectorStore;

    fn indexer(root: &Path) -> WorkspaceIndexer {
        let config = IndexConfig::default();
        WorkspaceIndexer::new(
            root,
            config.clone(),
            Arc::new(TreeSitterChunker::with_limits(
                config.chunk_target_tokens,
                config.chunk_overlap_tokens,
            )),
            Arc::new(MockEmbeddingProvider::new()),
            Arc::new(LocalVectorStore::new()),
            Arc::new(EmbeddingCache::new(config.cache_max_bytes)),
            Arc::new(FileRegistry::new()),
            Arc::new(RwLock::new(DependencyGraph::new())),
        )
    }

    #[tokio::test]
    async fn test_index_then_reindex_is_unchanged() {
        let dir = tempfile::tempdir().unwrap();
        tokio::fs::write(dir.path().join("lib.rs"), "pub fn run() {}\n")
            .await
            .unwrap();

        let indexer = indexer(dir.path());
        let cancel = CancellationToken::new();
        indexer.discover_files().unwrap();

        let first = indexer.index_file("lib.rs", &cancel).await.unwrap();
        assert!(matches!(first, FileOutcome::Indexed { .. }));

        let second = indexer.index_file("lib.rs", &cancel).await.unwrap();
        assert_eq!(second, FileOutcome::Unchanged);
    }

    #[tokio::test]
    async fn test_sensitive_filename_is_excluded() {
        let dir = tempfile::tempdir().unwrap();
        tokio::fs::write(dir.path().join(".env"), "DATABASE_URL=postgres://x\n")
            .await
            .unwrap();

        let indexer = indexer(dir.path());
        let outcome = indexer
            .index_file(".env", &CancellationToken::new())
            .await
            .unwrap();
        assert!(matches!(outcome, FileOutcome::Excluded { .. }));

        let record = indexer.registry.get(".env").await.unwrap();
        assert_eq!(record.status(), crate::domain::FileStatus::Excluded);
        assert_eq!(indexer.vectors.stats().await.unwrap().chunk_count, 0);
    }

    #[tokio::test]
    async fn test_embedded_secret_is_excluded() {
        let dir = tempfile::tempdir().unwrap();
        tokio::fs::write(
            dir.path().join("config.py"),
            "api_key = \"AKIAIOSFODNN7EXAMPLE12\"\n",
        )
        .await
        .unwrap();

        let indexer = indexer(dir.path());
        let outcome = indexer
            .index_file("config.py", &CancellationToken::new())
            .await
            .unwrap();
        assert!(matches!(outcome, FileOutcome::Excluded { .. }));
    }

    #[tokio::test]
    async fn test_deleted_file_is_scrubbed() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("gone.rs");
        tokio::fs::write(&path, "pub fn gone() {}\n").await.unwrap();

        let indexer = indexer(dir.path());
        let cancel = CancellationToken::new();
        indexer.discover_files().unwrap();
        indexer.index_file("gone.rs", &cancel).await.unwrap();
        assert!(indexer.vectors.stats().await.unwrap().chunk_count > 0);

        tokio::fs::remove_file(&path).await.unwrap();
        let outcome = indexer.index_file("gone.rs", &cancel).await.unwrap();
        assert_eq!(outcome, FileOutcome::Removed);
        assert_eq!(indexer.vectors.stats().await.unwrap().chunk_count, 0);
        assert!(indexer.registry.get("gone.rs").await.is_none());
    }

    #[tokio::test]
    async fn test_oversized_file_is_skipped_permanently() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = IndexConfig::default();
        config.max_file_bytes = 16;
        tokio::fs::write(dir.path().join("big.rs"), "x".repeat(64))
            .await
            .unwrap();

        let indexer = WorkspaceIndexer::new(
            dir.path(),
            config.clone(),
            Arc::new(TreeSitterChunker::new()),
            Arc::new(MockEmbeddingProvider::new()),
            Arc::new(LocalVectorStore::new()),
            Arc::new(EmbeddingCache::new(config.cache_max_bytes)),
            Arc::new(FileRegistry::new()),
            Arc::new(RwLock::new(DependencyGraph::new())),
        );

        let outcome = indexer
            .index_file("big.rs", &CancellationToken::new())
            .await
            .unwrap();
        assert!(matches!(outcome, FileOutcome::Skipped { .. }));
        let record = indexer.registry.get("big.rs").await.unwrap();
        assert_eq!(record.status(), crate::domain::FileStatus::Skipped);
    }

    #[tokio::test]
    async fn test_repetitive_file_with_duplicate_chunk_hashes_indexes() {
        let dir = tempfile::tempdir().unwrap();
        // Enough identical lines to produce several byte-identical
        // line-window chunks, all sharing one content hash.
        let line = "value = value + increment\n";
        tokio::fs::write(dir.path().join("notes.txt"), line.repeat(400))
            .await
            .unwrap();

        let indexer = indexer(dir.path());
        indexer.discover_files().unwrap();

        let outcome = tokio::time::timeout(
            std::time::Duration::from_secs(5),
            indexer.index_file("notes.txt", &CancellationToken::new()),
        )
        .await
        .expect("indexing a repetitive file must not stall")
        .unwrap();

        let chunk_count = match outcome {
            FileOutcome::Indexed { chunks, fallback } => {
                assert!(fallback);
                assert!(chunks > 2);
                chunks
            }
            other => panic!("expected indexed outcome, got {:?}", other),
        };
        // Duplicate hashes collapsed to fewer cache entries than chunks,
        // and every chunk still carries an embedding.
        assert!(indexer.cache.stats().entries < chunk_count as u64);
        for chunk in indexer.vectors.file_chunks("notes.txt").await.unwrap() {
            assert!(chunk.embedding().is_some());
        }
    }

    #[tokio::test]
    async fn test_repeated_failures_park_file_as_skipped() {
        struct BrokenProvider;

        #[async_trait::async_trait]
        impl crate::application::interfaces::EmbeddingProvider for BrokenProvider {
            async fn embed(
                &self,
                _texts: &[String],
            ) -> Result<Vec<Vec<f32>>, DomainError> {
                Err(DomainError::transient("endpoint unreachable"))
            }

            fn dimensions(&self) -> usize {
                384
            }
        }

        let dir = tempfile::tempdir().unwrap();
        tokio::fs::write(dir.path().join("lib.rs"), "pub fn run() {}\n")
            .await
            .unwrap();

        let mut config = IndexConfig::default();
        config.max_retries = 2;
        let indexer = WorkspaceIndexer::new(
            dir.path(),
            config.clone(),
            Arc::new(TreeSitterChunker::new()),
            Arc::new(BrokenProvider),
            Arc::new(LocalVectorStore::new()),
            Arc::new(EmbeddingCache::new(config.cache_max_bytes)),
            Arc::new(FileRegistry::new()),
            Arc::new(RwLock::new(DependencyGraph::new())),
        );
        let cancel = CancellationToken::new();

        for _ in 0..2 {
            let report = indexer.index_workspace(&cancel).await.unwrap();
            assert_eq!(report.failed, 1);
        }
        let record = indexer.registry.get("lib.rs").await.unwrap();
        assert_eq!(record.status(), FileStatus::Skipped);

        // Further passes report the parked file instead of retrying it.
        let report = indexer.index_workspace(&cancel).await.unwrap();
        assert_eq!(report.failed, 0);
        assert_eq!(report.skipped, 1);
    }

    #[tokio::test]
    async fn test_workspace_pass_builds_graph_edges() {
        let dir = tempfile::tempdir().unwrap();
        tokio::fs::create_dir(dir.path().join("src")).await.unwrap();
        tokio::fs::write(
            dir.path().join("src/main.rs"),
            "mod config;\n\nfn main() {}\n",
        )
        .await
        .unwrap();
        tokio::fs::write(dir.path().join("src/config.rs"), "pub struct Config;\n")
            .await
            .unwrap();

        let indexer = indexer(dir.path());
        let report = indexer
            .index_workspace(&CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(report.indexed, 2);

        let graph = indexer.graph.read().unwrap();
        assert!(graph
            .dependents("src/config.rs")
            .into_paths()
            .contains("src/main.rs"));
    }
}
