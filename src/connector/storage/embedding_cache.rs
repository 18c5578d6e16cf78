use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, Mutex};

use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tracing::{debug, warn};

use crate::domain::models::current_timestamp;
use crate::domain::DomainError;

const SNAPSHOT_VERSION: u32 = 1;
/// Bookkeeping overhead charged per entry on top of the vector payload.
const ENTRY_OVERHEAD_BYTES: u64 = 64;

/// Builds the namespaced cache key for a chunk-content hash.
pub fn chunk_key(content_hash: &str) -> String {
    format!("chunk:{content_hash}")
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct CacheEntry {
    vector: Vec<f32>,
    inserted_at: i64,
    /// Logical access ordinal; monotonic, so LRU ordering is deterministic
    /// even when wall-clock resolution would tie.
    last_access: u64,
    access_count: u64,
    bytes: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheStats {
    pub entries: u64,
    pub total_bytes: u64,
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
}

#[derive(Debug, Clone, PartialEq)]
enum PendingOutcome {
    Pending,
    Done(Vec<f32>),
    Failed,
}

struct CacheState {
    entries: HashMap<String, CacheEntry>,
    pending: HashMap<String, watch::Receiver<PendingOutcome>>,
    /// Pin refcounts; pinned keys are never evicted (in-progress batches).
    pins: HashMap<String, u32>,
    /// Eviction ceiling; every insert path trims back to this.
    max_bytes: u64,
    total_bytes: u64,
    clock: u64,
    hits: u64,
    misses: u64,
    evictions: u64,
}

impl CacheState {
    fn empty(max_bytes: u64) -> Self {
        Self {
            entries: HashMap::new(),
            pending: HashMap::new(),
            pins: HashMap::new(),
            max_bytes,
            total_bytes: 0,
            clock: 0,
            hits: 0,
            misses: 0,
            evictions: 0,
        }
    }

    fn insert(&mut self, key: String, vector: Vec<f32>) {
        let bytes = key.len() as u64 + (vector.len() * 4) as u64 + ENTRY_OVERHEAD_BYTES;
        self.clock += 1;
        if let Some(old) = self.entries.insert(
            key,
            CacheEntry {
                vector,
                inserted_at: current_timestamp(),
                last_access: self.clock,
                access_count: 0,
                bytes,
            },
        ) {
            self.total_bytes -= old.bytes;
        }
        self.total_bytes += bytes;
        let ceiling = self.max_bytes;
        self.evict_to(ceiling);
    }

    fn evict_to(&mut self, target_bytes: u64) {
        if self.total_bytes <= target_bytes {
            return;
        }

        let mut candidates: Vec<(u64, String)> = self
            .entries
            .iter()
            .filter(|(key, _)| !self.pins.contains_key(*key))
            .map(|(key, entry)| (entry.last_access, key.clone()))
            .collect();
        candidates.sort_unstable();

        for (_, key) in candidates {
            if self.total_bytes <= target_bytes {
                break;
            }
            if let Some(entry) = self.entries.remove(&key) {
                self.total_bytes -= entry.bytes;
                self.evictions += 1;
            }
        }
    }
}

/// Content-addressed embedding cache.
///
/// The correctness contract is hash equality: an entry is retrievable iff
/// its key's source content is byte-identical to what produced it. Eviction
/// is least-recently-used by last-access ordinal, triggered when total size
/// exceeds the configured ceiling; entries pinned by an in-progress
/// indexing batch are never evicted. `claim` serializes concurrent work on
/// the same hash so at most one embedding computation per unique hash is in
/// flight.
pub struct EmbeddingCache {
    state: Arc<Mutex<CacheState>>,
}

/// Outcome of [`EmbeddingCache::claim`].
pub enum Claim {
    /// The vector was already cached.
    Hit(Vec<f32>),
    /// The caller owns the computation and must `complete` or drop the slot.
    Owed(PendingSlot),
    /// Another caller is computing this hash; await the ticket.
    Wait(PendingTicket),
}

/// Held by the single caller responsible for computing a missing embedding.
/// Dropping the slot without completing it releases waiting callers so they
/// can retry themselves.
pub struct PendingSlot {
    state: Arc<Mutex<CacheState>>,
    key: String,
    tx: Option<watch::Sender<PendingOutcome>>,
}

impl PendingSlot {
    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn complete(mut self, vector: Vec<f32>) {
        let mut state = self.state.lock().expect("cache lock poisoned");
        state.insert(self.key.clone(), vector.clone());
        state.pending.remove(&self.key);
        drop(state);
        if let Some(tx) = self.tx.take() {
            let _ = tx.send(PendingOutcome::Done(vector));
        }
    }
}

impl Drop for PendingSlot {
    fn drop(&mut self) {
        if let Some(tx) = self.tx.take() {
            let mut state = self.state.lock().expect("cache lock poisoned");
            state.pending.remove(&self.key);
            drop(state);
            let _ = tx.send(PendingOutcome::Failed);
        }
    }
}

pub struct PendingTicket {
    rx: watch::Receiver<PendingOutcome>,
}

impl PendingTicket {
    /// Resolves once the owning caller finishes. `None` means the owner
    /// failed or gave up; the waiter should claim again.
    pub async fn wait(mut self) -> Option<Vec<f32>> {
        loop {
            match self.rx.borrow().clone() {
                PendingOutcome::Done(vector) => return Some(vector),
                PendingOutcome::Failed => return None,
                PendingOutcome::Pending => {}
            }
            if self.rx.changed().await.is_err() {
                return None;
            }
        }
    }
}

/// Guard pinning a batch of keys against eviction. Unpins on drop.
pub struct BatchPin {
    state: Arc<Mutex<CacheState>>,
    keys: Vec<String>,
}

impl Drop for BatchPin {
    fn drop(&mut self) {
        let mut state = self.state.lock().expect("cache lock poisoned");
        for key in &self.keys {
            if let Some(count) = state.pins.get_mut(key) {
                *count -= 1;
                if *count == 0 {
                    state.pins.remove(key);
                }
            }
        }
    }
}

impl EmbeddingCache {
    pub fn new(max_bytes: u64) -> Self {
        Self {
            state: Arc::new(Mutex::new(CacheState::empty(max_bytes))),
        }
    }

    pub fn max_bytes(&self) -> u64 {
        self.state.lock().expect("cache lock poisoned").max_bytes
    }

    pub fn get(&self, key: &str) -> Option<Vec<f32>> {
        let mut state = self.state.lock().expect("cache lock poisoned");
        state.clock += 1;
        let clock = state.clock;
        match state.entries.get_mut(key) {
            Some(entry) => {
                entry.last_access = clock;
                entry.access_count += 1;
                let vector = entry.vector.clone();
                state.hits += 1;
                Some(vector)
            }
            None => {
                state.misses += 1;
                None
            }
        }
    }

    pub fn put(&self, key: &str, vector: Vec<f32>) {
        let mut state = self.state.lock().expect("cache lock poisoned");
        state.insert(key.to_string(), vector);
    }

    pub fn evict_to(&self, target_bytes: u64) {
        let mut state = self.state.lock().expect("cache lock poisoned");
        state.evict_to(target_bytes);
    }

    pub fn contains(&self, key: &str) -> bool {
        let state = self.state.lock().expect("cache lock poisoned");
        state.entries.contains_key(key)
    }

    /// Hit, ownership of the computation, or a ticket on someone else's.
    pub fn claim(&self, key: &str) -> Claim {
        let mut state = self.state.lock().expect("cache lock poisoned");
        state.clock += 1;
        let clock = state.clock;
        if let Some(entry) = state.entries.get_mut(key) {
            entry.last_access = clock;
            entry.access_count += 1;
            let vector = entry.vector.clone();
            state.hits += 1;
            return Claim::Hit(vector);
        }
        state.misses += 1;

        if let Some(rx) = state.pending.get(key) {
            return Claim::Wait(PendingTicket { rx: rx.clone() });
        }

        let (tx, rx) = watch::channel(PendingOutcome::Pending);
        state.pending.insert(key.to_string(), rx);
        Claim::Owed(PendingSlot {
            state: Arc::clone(&self.state),
            key: key.to_string(),
            tx: Some(tx),
        })
    }

    pub fn pin_batch(&self, keys: &[String]) -> BatchPin {
        let mut state = self.state.lock().expect("cache lock poisoned");
        for key in keys {
            *state.pins.entry(key.clone()).or_insert(0) += 1;
        }
        BatchPin {
            state: Arc::clone(&self.state),
            keys: keys.to_vec(),
        }
    }

    pub fn stats(&self) -> CacheStats {
        let state = self.state.lock().expect("cache lock poisoned");
        CacheStats {
            entries: state.entries.len() as u64,
            total_bytes: state.total_bytes,
            hits: state.hits,
            misses: state.misses,
            evictions: state.evictions,
        }
    }

    /// Loads from `path`; a missing file yields an empty cache. A corrupt
    /// snapshot is logged and discarded: the cache is always rebuildable
    /// from source, so this is never fatal.
    pub async fn load(path: &Path, max_bytes: u64) -> Self {
        if !path.exists() {
            return Self::new(max_bytes);
        }
        let raw = match tokio::fs::read(path).await {
            Ok(raw) => raw,
            Err(e) => {
                warn!("Failed to read embedding cache snapshot: {}", e);
                return Self::new(max_bytes);
            }
        };
        let snapshot: CacheSnapshot = match serde_json::from_slice(&raw) {
            Ok(s) => s,
            Err(e) => {
                warn!("Discarding corrupt embedding cache snapshot: {}", e);
                return Self::new(max_bytes);
            }
        };
        if snapshot.version != SNAPSHOT_VERSION {
            warn!(
                "Discarding embedding cache snapshot with version {}",
                snapshot.version
            );
            return Self::new(max_bytes);
        }

        let cache = Self::new(max_bytes);
        {
            let mut state = cache.state.lock().expect("cache lock poisoned");
            for (key, vector) in snapshot.entries {
                state.insert(key, vector);
            }
            // Loading is not cache traffic.
            state.hits = 0;
            state.misses = 0;
            state.evictions = 0;
        }
        debug!("Loaded embedding cache snapshot from {:?}", path);
        cache
    }

    pub async fn persist(&self, path: &Path) -> Result<(), DomainError> {
        let snapshot = {
            let state = self.state.lock().expect("cache lock poisoned");
            CacheSnapshot {
                version: SNAPSHOT_VERSION,
                entries: state
                    .entries
                    .iter()
                    .map(|(key, entry)| (key.clone(), entry.vector.clone()))
                    .collect(),
            }
        };
        let raw = serde_json::to_vec(&snapshot)
            .map_err(|e| DomainError::storage(format!("serialize embedding cache: {e}")))?;
        tokio::fs::write(path, raw).await?;
        Ok(())
    }
}

#[derive(Serialize, Deserialize)]
struct CacheSnapshot {
    version: u32,
    entries: Vec<(String, Vec<f32>)>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vec_of(len: usize) -> Vec<f32> {
        vec![0.5; len]
    }

    #[test]
    fn test_get_put_roundtrip_and_counters() {
        let cache = EmbeddingCache::new(10_000);
        assert!(cache.get("chunk:a").is_none());

        cache.put("chunk:a", vec![1.0, 2.0]);
        assert_eq!(cache.get("chunk:a"), Some(vec![1.0, 2.0]));

        let stats = cache.stats();
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 1);
        assert_eq!(stats.entries, 1);
    }

    #[test]
    fn test_eviction_removes_least_recently_used_first() {
        // Room for roughly two entries.
        let entry_bytes = 7 + 4 * 100 + ENTRY_OVERHEAD_BYTES as usize;
        let cache = EmbeddingCache::new((entry_bytes * 2) as u64 + 10);

        cache.put("chunk:a", vec_of(100));
        cache.put("chunk:b", vec_of(100));
        // Touch a so b becomes the oldest.
        cache.get("chunk:a");

        cache.put("chunk:c", vec_of(100));
        assert!(cache.contains("chunk:a"));
        assert!(!cache.contains("chunk:b"));
        assert!(cache.contains("chunk:c"));
        assert!(cache.stats().total_bytes <= cache.max_bytes());
    }

    #[test]
    fn test_pinned_entries_survive_eviction() {
        let entry_bytes = 7 + 4 * 100 + ENTRY_OVERHEAD_BYTES as usize;
        let cache = EmbeddingCache::new((entry_bytes * 2) as u64 + 10);

        cache.put("chunk:a", vec_of(100));
        let pin = cache.pin_batch(&["chunk:a".to_string()]);

        cache.put("chunk:b", vec_of(100));
        cache.put("chunk:c", vec_of(100));

        // a is the LRU entry but pinned; b had to go instead.
        assert!(cache.contains("chunk:a"));
        drop(pin);

        cache.evict_to(entry_bytes as u64);
        assert!(!cache.contains("chunk:a") || cache.stats().entries == 1);
    }

    #[test]
    fn test_completed_claims_respect_the_ceiling() {
        let entry_bytes = 7 + 4 * 100 + ENTRY_OVERHEAD_BYTES as usize;
        let cache = EmbeddingCache::new((entry_bytes * 2) as u64 + 10);

        // The claim/complete path is the one indexing uses; it must trim
        // back to the ceiling like put does.
        for key in ["chunk:a", "chunk:b", "chunk:c", "chunk:d", "chunk:e"] {
            match cache.claim(key) {
                Claim::Owed(slot) => slot.complete(vec_of(100)),
                _ => panic!("fresh key should be owed"),
            }
        }

        let stats = cache.stats();
        assert!(stats.total_bytes <= cache.max_bytes());
        assert_eq!(stats.entries, 2);
        assert_eq!(stats.evictions, 3);
    }

    #[tokio::test]
    async fn test_claim_deduplicates_in_flight_work() {
        let cache = EmbeddingCache::new(10_000);

        let slot = match cache.claim("chunk:x") {
            Claim::Owed(slot) => slot,
            _ => panic!("first claim should own the computation"),
        };

        let ticket = match cache.claim("chunk:x") {
            Claim::Wait(ticket) => ticket,
            _ => panic!("second claim should wait"),
        };

        let waiter = tokio::spawn(ticket.wait());
        slot.complete(vec![0.25; 4]);

        assert_eq!(waiter.await.unwrap(), Some(vec![0.25; 4]));
        assert!(matches!(cache.claim("chunk:x"), Claim::Hit(_)));
    }

    #[tokio::test]
    async fn test_dropped_slot_releases_waiters() {
        let cache = EmbeddingCache::new(10_000);

        let slot = match cache.claim("chunk:y") {
            Claim::Owed(slot) => slot,
            _ => panic!("first claim should own the computation"),
        };
        let ticket = match cache.claim("chunk:y") {
            Claim::Wait(ticket) => ticket,
            _ => panic!("second claim should wait"),
        };

        drop(slot);
        assert_eq!(ticket.wait().await, None);

        // The hash is claimable again.
        assert!(matches!(cache.claim("chunk:y"), Claim::Owed(_)));
    }

    #[tokio::test]
    async fn test_snapshot_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cache.json");

        let cache = EmbeddingCache::new(10_000);
        cache.put("chunk:a", vec![1.0, 2.0, 3.0]);
        cache.persist(&path).await.unwrap();

        let restored = EmbeddingCache::load(&path, 10_000).await;
        assert_eq!(restored.get("chunk:a"), Some(vec![1.0, 2.0, 3.0]));
    }

    #[tokio::test]
    async fn test_corrupt_snapshot_yields_empty_cache() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cache.json");
        tokio::fs::write(&path, b"]]]").await.unwrap();

        let cache = EmbeddingCache::load(&path, 10_000).await;
        assert_eq!(cache.stats().entries, 0);
    }
}
