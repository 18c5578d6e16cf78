use std::collections::{BTreeSet, VecDeque};
use std::sync::{Arc, RwLock};

use tracing::debug;

use crate::domain::{DependencyGraph, GraphLookup};

const DEFAULT_MAX_DEPTH: usize = 5;

/// Transitive dependents of one file, layered by graph distance.
#[derive(Debug, Clone)]
pub struct ImpactReport {
    pub target: String,
    /// True when the target is not in the graph at all: distinct from
    /// "indexed with no dependents".
    pub not_indexed: bool,
    pub direct: Vec<String>,
    /// `by_depth[0]` is the direct dependents, `by_depth[1]` their
    /// dependents, and so on. Each file appears once, at its shortest
    /// distance.
    pub by_depth: Vec<Vec<String>>,
}

impl ImpactReport {
    pub fn total_affected(&self) -> usize {
        self.by_depth.iter().map(Vec::len).sum()
    }
}

/// Answers "what breaks if this file changes" from the reverse dependency
/// edges. Entirely local and synchronous.
pub struct ImpactAnalysis {
    graph: Arc<RwLock<DependencyGraph>>,
    max_depth: usize,
}

impl ImpactAnalysis {
    pub fn new(graph: Arc<RwLock<DependencyGraph>>) -> Self {
        Self {
            graph,
            max_depth: DEFAULT_MAX_DEPTH,
        }
    }

    pub fn with_max_depth(mut self, max_depth: usize) -> Self {
        self.max_depth = max_depth.max(1);
        self
    }

    pub fn analyze(&self, path: &str) -> ImpactReport {
        let graph = self.graph.read().expect("graph lock poisoned");

        let direct = match graph.dependents(path) {
            GraphLookup::NotIndexed => {
                return ImpactReport {
                    target: path.to_string(),
                    not_indexed: true,
                    direct: Vec::new(),
                    by_depth: Vec::new(),
                };
            }
            GraphLookup::Known(paths) => paths,
        };

        // Breadth-first over reverse edges; visited set keeps each file at
        // its shortest distance and makes cycles terminate.
        let mut visited: BTreeSet<String> = BTreeSet::new();
        visited.insert(path.to_string());
        let mut by_depth: Vec<Vec<String>> = Vec::new();
        let mut frontier: VecDeque<String> = VecDeque::new();

        let mut level: Vec<String> = direct
            .iter()
            .filter(|p| visited.insert((*p).clone()))
            .cloned()
            .collect();

        while !level.is_empty() && by_depth.len() < self.max_depth {
            by_depth.push(level.clone());
            frontier.extend(level.drain(..));

            let mut next: BTreeSet<String> = BTreeSet::new();
            while let Some(current) = frontier.pop_front() {
                if let GraphLookup::Known(parents) = graph.dependents(&current) {
                    for parent in parents {
                        if visited.insert(parent.clone()) {
                            next.insert(parent);
                        }
                    }
                }
            }
            level = next.into_iter().collect();
        }

        let report = ImpactReport {
            target: path.to_string(),
            not_indexed: false,
            direct: by_depth.first().cloned().unwrap_or_default(),
            by_depth,
        };
        debug!(
            "Impact of {}: {} files across {} levels",
            path,
            report.total_affected(),
            report.by_depth.len()
        );
        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{DependencyEdge, ImportKind};

    fn edge(from: &str, to: &str) -> DependencyEdge {
        DependencyEdge::new(from.into(), to.into(), ImportKind::Use, 1)
    }

    fn chain_graph() -> Arc<RwLock<DependencyGraph>> {
        // top.rs -> mid.rs -> base.rs
        let mut graph = DependencyGraph::new();
        graph.add_file("top.rs", vec![edge("top.rs", "mid.rs")]);
        graph.add_file("mid.rs", vec![edge("mid.rs", "base.rs")]);
        graph.add_file("base.rs", vec![]);
        Arc::new(RwLock::new(graph))
    }

    #[test]
    fn test_layers_follow_reverse_edges() {
        let analysis = ImpactAnalysis::new(chain_graph());
        let report = analysis.analyze("base.rs");

        assert!(!report.not_indexed);
        assert_eq!(report.direct, ["mid.rs"]);
        assert_eq!(report.by_depth.len(), 2);
        assert_eq!(report.by_depth[1], ["top.rs"]);
        assert_eq!(report.total_affected(), 2);
    }

    #[test]
    fn test_unknown_file_is_flagged_not_indexed() {
        let analysis = ImpactAnalysis::new(chain_graph());
        let report = analysis.analyze("missing.rs");
        assert!(report.not_indexed);
        assert!(report.by_depth.is_empty());
    }

    #[test]
    fn test_cycle_terminates_and_deduplicates() {
        let mut graph = DependencyGraph::new();
        graph.add_file("a.rs", vec![edge("a.rs", "b.rs")]);
        graph.add_file("b.rs", vec![edge("b.rs", "c.rs")]);
        graph.add_file("c.rs", vec![edge("c.rs", "a.rs")]);

        let analysis = ImpactAnalysis::new(Arc::new(RwLock::new(graph)));
        let report = analysis.analyze("a.rs");

        // Every other file appears exactly once despite the cycle.
        assert_eq!(report.total_affected(), 2);
        let all: Vec<&String> = report.by_depth.iter().flatten().collect();
        assert!(!all.contains(&&"a.rs".to_string()));
    }

    #[test]
    fn test_depth_limit_truncates_layers() {
        let analysis = ImpactAnalysis::new(chain_graph()).with_max_depth(1);
        let report = analysis.analyze("base.rs");
        assert_eq!(report.by_depth.len(), 1);
        assert_eq!(report.total_affected(), 1);
    }
}
