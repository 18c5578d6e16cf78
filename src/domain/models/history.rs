use std::collections::VecDeque;

use serde::{Deserialize, Serialize};

use super::file_record::current_timestamp;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueryMode {
    Search,
    Chat,
    Overview,
}

impl QueryMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            QueryMode::Search => "search",
            QueryMode::Chat => "chat",
            QueryMode::Overview => "overview",
        }
    }
}

/// Diagnostics-only record of a query. Never correctness-bearing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueryHistoryEntry {
    query: String,
    mode: QueryMode,
    timestamp: i64,
    result_count: usize,
    latency_ms: u64,
}

impl QueryHistoryEntry {
    pub fn new(query: String, mode: QueryMode, result_count: usize, latency_ms: u64) -> Self {
        Self {
            query,
            mode,
            timestamp: current_timestamp(),
            result_count,
            latency_ms,
        }
    }

    pub fn query(&self) -> &str {
        &self.query
    }

    pub fn mode(&self) -> QueryMode {
        self.mode
    }

    pub fn timestamp(&self) -> i64 {
        self.timestamp
    }

    pub fn result_count(&self) -> usize {
        self.result_count
    }

    pub fn latency_ms(&self) -> u64 {
        self.latency_ms
    }
}

/// Bounded append-only ring of recent queries.
#[derive(Debug)]
pub struct QueryHistory {
    entries: VecDeque<QueryHistoryEntry>,
    capacity: usize,
}

impl QueryHistory {
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: VecDeque::with_capacity(capacity.min(64)),
            capacity: capacity.max(1),
        }
    }

    pub fn record(&mut self, entry: QueryHistoryEntry) {
        if self.entries.len() == self.capacity {
            self.entries.pop_front();
        }
        self.entries.push_back(entry);
    }

    pub fn entries(&self) -> impl Iterator<Item = &QueryHistoryEntry> {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl Default for QueryHistory {
    fn default() -> Self {
        Self::new(200)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_history_ring_drops_oldest() {
        let mut history = QueryHistory::new(2);
        history.record(QueryHistoryEntry::new(
            "first".to_string(),
            QueryMode::Search,
            3,
            12,
        ));
        history.record(QueryHistoryEntry::new(
            "second".to_string(),
            QueryMode::Chat,
            1,
            250,
        ));
        history.record(QueryHistoryEntry::new(
            "third".to_string(),
            QueryMode::Search,
            0,
            8,
        ));

        assert_eq!(history.len(), 2);
        let queries: Vec<&str> = history.entries().map(|e| e.query()).collect();
        assert_eq!(queries, ["second", "third"]);
    }
}
