use std::path::Path;
use std::sync::Arc;

use tokio::sync::{broadcast, mpsc, oneshot, Mutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::application::use_cases::index_workspace::{FileOutcome, WorkspaceIndexer};
use crate::domain::{DomainError, FileChangeEvent, FileChangeKind};

const BACKGROUND_QUEUE_CAPACITY: usize = 1024;
const PRIORITY_QUEUE_CAPACITY: usize = 64;
const EVENT_CHANNEL_CAPACITY: usize = 256;

/// Progress notification, one per completed unit of background work.
#[derive(Debug, Clone)]
pub enum IndexEvent {
    Indexed {
        path: String,
        chunks: usize,
    },
    Unchanged {
        path: String,
    },
    Excluded {
        path: String,
        reason: String,
    },
    Removed {
        path: String,
    },
    Failed {
        path: String,
        reason: String,
        will_retry: bool,
    },
    Skipped {
        path: String,
        reason: String,
    },
}

struct PriorityRequest {
    path: String,
    reply: oneshot::Sender<Result<FileOutcome, DomainError>>,
}

/// Serializes all index mutations through a single worker task.
///
/// File-change events queue in discovery order on the background channel; a
/// priority channel lets callers force one file to the front and await its
/// outcome. The worker drains the priority channel before touching the
/// background queue, so an interactive request never sits behind a bulk
/// re-index. Transient failures re-enqueue the file until its retry budget
/// is spent, then park it as skipped.
pub struct IndexingCoordinator {
    background_tx: mpsc::Sender<FileChangeEvent>,
    priority_tx: mpsc::Sender<PriorityRequest>,
    events: broadcast::Sender<IndexEvent>,
    cancel: CancellationToken,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl IndexingCoordinator {
    pub fn spawn(indexer: Arc<WorkspaceIndexer>) -> Self {
        let (background_tx, background_rx) = mpsc::channel(BACKGROUND_QUEUE_CAPACITY);
        let (priority_tx, priority_rx) = mpsc::channel(PRIORITY_QUEUE_CAPACITY);
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        let cancel = CancellationToken::new();

        let worker = tokio::spawn(worker_loop(
            indexer,
            background_rx,
            priority_rx,
            background_tx.clone(),
            events.clone(),
            cancel.clone(),
        ));

        Self {
            background_tx,
            priority_tx,
            events,
            cancel,
            worker: Mutex::new(Some(worker)),
        }
    }

    /// Queues a file change for background processing in arrival order.
    pub async fn enqueue_change(&self, event: FileChangeEvent) -> Result<(), DomainError> {
        self.background_tx
            .send(event)
            .await
            .map_err(|_| DomainError::Cancelled)
    }

    /// Indexes one file ahead of all queued background work and returns its
    /// outcome.
    pub async fn index_file_now(&self, path: impl Into<String>) -> Result<FileOutcome, DomainError> {
        let (reply, rx) = oneshot::channel();
        self.priority_tx
            .send(PriorityRequest {
                path: path.into(),
                reply,
            })
            .await
            .map_err(|_| DomainError::Cancelled)?;
        rx.await.map_err(|_| DomainError::Cancelled)?
    }

    pub fn subscribe(&self) -> broadcast::Receiver<IndexEvent> {
        self.events.subscribe()
    }

    /// Stops the worker after its current file finishes.
    pub async fn shutdown(&self) {
        self.cancel.cancel();
        let handle = self.worker.lock().await.take();
        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                warn!("Index worker ended abnormally: {}", e);
            }
        }
        info!("Indexing coordinator stopped");
    }
}

async fn worker_loop(
    indexer: Arc<WorkspaceIndexer>,
    mut background_rx: mpsc::Receiver<FileChangeEvent>,
    mut priority_rx: mpsc::Receiver<PriorityRequest>,
    requeue_tx: mpsc::Sender<FileChangeEvent>,
    events: broadcast::Sender<IndexEvent>,
    cancel: CancellationToken,
) {
    loop {
        tokio::select! {
            biased;

            _ = cancel.cancelled() => break,

            Some(request) = priority_rx.recv() => {
                let result = indexer.index_file(&request.path, &cancel).await;
                if let Ok(outcome) = &result {
                    publish_outcome(&events, &request.path, outcome);
                }
                let _ = request.reply.send(result);
            }

            Some(change) = background_rx.recv() => {
                process_change(&indexer, change, &requeue_tx, &events, &cancel).await;
            }

            else => break,
        }
    }
    debug!("Index worker loop exited");
}

async fn process_change(
    indexer: &WorkspaceIndexer,
    change: FileChangeEvent,
    requeue_tx: &mpsc::Sender<FileChangeEvent>,
    events: &broadcast::Sender<IndexEvent>,
    cancel: &CancellationToken,
) {
    let path = relative_path(indexer.workspace_root(), &change.path);

    if change.kind == FileChangeKind::Deleted {
        match indexer.remove_file(&path).await {
            Ok(_) => {
                let _ = events.send(IndexEvent::Removed { path });
            }
            Err(e) => warn!("Failed to remove {}: {}", path, e),
        }
        return;
    }

    match indexer.index_file(&path, cancel).await {
        Ok(outcome) => publish_outcome(events, &path, &outcome),
        Err(DomainError::Cancelled) => {}
        Err(e) => {
            let record = indexer
                .registry()
                .update(&path, |r| r.mark_failed(e.to_string()))
                .await;

            let retryable = e.is_transient() && record.retry_count() < indexer.config().max_retries;
            if retryable {
                debug!(
                    "Re-queueing {} after transient failure (attempt {})",
                    path,
                    record.retry_count()
                );
                let _ = events.send(IndexEvent::Failed {
                    path: path.clone(),
                    reason: e.to_string(),
                    will_retry: true,
                });
                let _ = requeue_tx.try_send(change);
            } else {
                warn!("Giving up on {}: {}", path, e);
                indexer.registry().update(&path, |r| r.mark_skipped()).await;
                let _ = events.send(IndexEvent::Skipped {
                    path,
                    reason: e.to_string(),
                });
            }
        }
    }
}

fn publish_outcome(events: &broadcast::Sender<IndexEvent>, path: &str, outcome: &FileOutcome) {
    let event = match outcome {
        FileOutcome::Indexed { chunks, .. } => IndexEvent::Indexed {
            path: path.to_string(),
            chunks: *chunks,
        },
        FileOutcome::Unchanged => IndexEvent::Unchanged {
            path: path.to_string(),
        },
        FileOutcome::Excluded { reason } => IndexEvent::Excluded {
            path: path.to_string(),
            reason: reason.clone(),
        },
        FileOutcome::Skipped { reason } => IndexEvent::Skipped {
            path: path.to_string(),
            reason: reason.clone(),
        },
        FileOutcome::Removed => IndexEvent::Removed {
            path: path.to_string(),
        },
    };
    let _ = events.send(event);
}

fn relative_path(root: &Path, path: &Path) -> String {
    path.strip_prefix(root)
        .unwrap_or(path)
        .to_string_lossy()
        .replace('\\', "/")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::RwLock;

    use crate::connector::chunker::TreeSitterChunker;
    use crate::connector::embedding::MockEmbeddingProvider;
    use crate::connector::storage::{EmbeddingCache, FileRegistry, LocalVectorStore};
    use crate::domain::{DependencyGraph, IndexConfig};

    fn spawn_coordinator(root: &Path) -> (IndexingCoordinator, Arc<WorkspaceIndexer>) {
        let config = IndexConfig::default();
        let indexer = Arc::new(WorkspaceIndexer::new(
            root,
            config.clone(),
            Arc::new(TreeSitterChunker::new()),
            Arc::new(MockEmbeddingProvider::new()),
            Arc::new(LocalVectorStore::new()),
            Arc::new(EmbeddingCache::new(config.cache_max_bytes)),
            Arc::new(FileRegistry::new()),
            Arc::new(RwLock::new(DependencyGraph::new())),
        ));
        (IndexingCoordinator::spawn(Arc::clone(&indexer)), indexer)
    }

    #[tokio::test]
    async fn test_priority_request_returns_outcome() {
        let dir = tempfile::tempdir().unwrap();
        tokio::fs::write(dir.path().join("lib.rs"), "pub fn run() {}\n")
            .await
            .unwrap();

        let (coordinator, _indexer) = spawn_coordinator(dir.path());
        let outcome = coordinator.index_file_now("lib.rs").await.unwrap();
        assert!(matches!(outcome, FileOutcome::Indexed { .. }));
        coordinator.shutdown().await;
    }

    #[tokio::test]
    async fn test_background_change_emits_event() {
        let dir = tempfile::tempdir().unwrap();
        tokio::fs::write(dir.path().join("app.py"), "def run():\n    pass\n")
            .await
            .unwrap();

        let (coordinator, _indexer) = spawn_coordinator(dir.path());
        let mut events = coordinator.subscribe();
        coordinator
            .enqueue_change(FileChangeEvent::created(dir.path().join("app.py")))
            .await
            .unwrap();

        match events.recv().await.unwrap() {
            IndexEvent::Indexed { path, chunks } => {
                assert_eq!(path, "app.py");
                assert!(chunks > 0);
            }
            other => panic!("unexpected event: {other:?}"),
        }
        coordinator.shutdown().await;
    }

    #[tokio::test]
    async fn test_deletion_event_scrubs_file() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("tmp.rs");
        tokio::fs::write(&file, "pub fn tmp() {}\n").await.unwrap();

        let (coordinator, indexer) = spawn_coordinator(dir.path());
        coordinator.index_file_now("tmp.rs").await.unwrap();

        tokio::fs::remove_file(&file).await.unwrap();
        let mut events = coordinator.subscribe();
        coordinator
            .enqueue_change(FileChangeEvent::deleted(file))
            .await
            .unwrap();

        match events.recv().await.unwrap() {
            IndexEvent::Removed { path } => assert_eq!(path, "tmp.rs"),
            other => panic!("unexpected event: {other:?}"),
        }
        assert!(indexer.registry().get("tmp.rs").await.is_none());
        coordinator.shutdown().await;
    }

    #[tokio::test]
    async fn test_shutdown_stops_worker() {
        let dir = tempfile::tempdir().unwrap();
        let (coordinator, _indexer) = spawn_coordinator(dir.path());
        coordinator.shutdown().await;
        assert!(coordinator.index_file_now("x.rs").await.is_err());
    }
}
