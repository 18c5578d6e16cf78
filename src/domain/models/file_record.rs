use serde::{Deserialize, Serialize};

/// Per-file indexing state machine.
///
/// `pending -> indexing -> {indexed, failed}`; a failed file is retried a
/// bounded number of times and then parked in `skipped`, which is surfaced
/// to the user instead of being retried silently forever. `excluded` marks
/// files that matched the sensitive-content filters and must never reach
/// the chunker or any network call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FileStatus {
    Pending,
    Indexing,
    Indexed,
    Failed,
    Skipped,
    Excluded,
}

impl FileStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            FileStatus::Indexed | FileStatus::Skipped | FileStatus::Excluded
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            FileStatus::Pending => "pending",
            FileStatus::Indexing => "indexing",
            FileStatus::Indexed => "indexed",
            FileStatus::Failed => "failed",
            FileStatus::Skipped => "skipped",
            FileStatus::Excluded => "excluded",
        }
    }
}

impl std::fmt::Display for FileStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// One record per indexed file. The chunk-id list always matches exactly the
/// chunks currently stored for that path: no orphans, no duplicates.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileRecord {
    path: String,
    content_hash: String,
    indexed_at: i64,
    status: FileStatus,
    failure_reason: Option<String>,
    retry_count: u32,
    chunk_ids: Vec<String>,
}

impl FileRecord {
    pub fn new(path: String) -> Self {
        Self {
            path,
            content_hash: String::new(),
            indexed_at: 0,
            status: FileStatus::Pending,
            failure_reason: None,
            retry_count: 0,
            chunk_ids: Vec::new(),
        }
    }

    pub fn excluded(path: String, reason: impl Into<String>) -> Self {
        Self {
            path,
            content_hash: String::new(),
            indexed_at: current_timestamp(),
            status: FileStatus::Excluded,
            failure_reason: Some(reason.into()),
            retry_count: 0,
            chunk_ids: Vec::new(),
        }
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn content_hash(&self) -> &str {
        &self.content_hash
    }

    pub fn indexed_at(&self) -> i64 {
        self.indexed_at
    }

    pub fn status(&self) -> FileStatus {
        self.status
    }

    pub fn failure_reason(&self) -> Option<&str> {
        self.failure_reason.as_deref()
    }

    pub fn retry_count(&self) -> u32 {
        self.retry_count
    }

    pub fn chunk_ids(&self) -> &[String] {
        &self.chunk_ids
    }

    /// Records the content hash being processed so that a later failure or
    /// skip can be matched against the exact content that produced it.
    /// `matches_hash` still requires `Indexed`, so an interrupted run never
    /// passes the short-circuit.
    pub fn mark_indexing(&mut self, content_hash: String) {
        self.status = FileStatus::Indexing;
        self.content_hash = content_hash;
    }

    pub fn mark_indexed(&mut self, content_hash: String, chunk_ids: Vec<String>) {
        self.content_hash = content_hash;
        self.chunk_ids = chunk_ids;
        self.indexed_at = current_timestamp();
        self.status = FileStatus::Indexed;
        self.failure_reason = None;
        self.retry_count = 0;
    }

    pub fn mark_failed(&mut self, reason: impl Into<String>) {
        self.status = FileStatus::Failed;
        self.failure_reason = Some(reason.into());
        self.retry_count += 1;
    }

    pub fn mark_skipped(&mut self) {
        self.status = FileStatus::Skipped;
    }

    pub fn mark_pending(&mut self) {
        self.status = FileStatus::Pending;
    }

    pub fn matches_hash(&self, hash: &str) -> bool {
        self.status == FileStatus::Indexed && self.content_hash == hash
    }
}

/// Computes the SHA-256 digest of exact byte content, hex-encoded.
pub fn compute_content_hash(content: &[u8]) -> String {
    use sha2::{Digest, Sha256};
    let hash = Sha256::digest(content);
    format!("{:x}", hash)
}

pub fn current_timestamp() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}
