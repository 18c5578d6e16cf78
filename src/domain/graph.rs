use std::collections::{BTreeMap, BTreeSet, HashSet};

use petgraph::algo::tarjan_scc;
use petgraph::graph::DiGraph;
use serde::{Deserialize, Serialize};

use crate::domain::models::DependencyEdge;

/// Result of a dependents/dependencies lookup.
///
/// Distinguishes "no dependents" from "unknown file" so callers can tell an
/// isolated file apart from one that was excluded or never indexed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GraphLookup {
    Known(BTreeSet<String>),
    NotIndexed,
}

impl GraphLookup {
    pub fn paths(&self) -> Option<&BTreeSet<String>> {
        match self {
            GraphLookup::Known(paths) => Some(paths),
            GraphLookup::NotIndexed => None,
        }
    }

    pub fn into_paths(self) -> BTreeSet<String> {
        match self {
            GraphLookup::Known(paths) => paths,
            GraphLookup::NotIndexed => BTreeSet::new(),
        }
    }

    pub fn is_not_indexed(&self) -> bool {
        matches!(self, GraphLookup::NotIndexed)
    }
}

/// Path-indexed dependency graph with forward and reverse adjacency maps.
///
/// Nodes are arena entries keyed by path; the reverse map is kept as the
/// exact transpose of the forward map on every mutation, so `dependents` is
/// a plain reverse-adjacency lookup: O(direct dependents), never a graph
/// scan. All mutation happens through `add_file`/`remove_file`, which update
/// both sides together; concurrency control is the caller's lock around the
/// whole structure.
#[derive(Debug, Default, Clone, Serialize, Deserialize)]
pub struct DependencyGraph {
    /// Raw resolved edges per importing file (kinds and lines preserved).
    edges: BTreeMap<String, Vec<DependencyEdge>>,
    forward: BTreeMap<String, BTreeSet<String>>,
    reverse: BTreeMap<String, BTreeSet<String>>,
    /// Every path that has been through `add_file` and not removed.
    known: BTreeSet<String>,
}

impl DependencyGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replaces any previously recorded edges for `path` wholesale, then
    /// inserts the new set. Idempotent under re-indexing.
    pub fn add_file(&mut self, path: &str, edges: Vec<DependencyEdge>) {
        self.clear_outgoing(path);
        self.known.insert(path.to_string());

        let mut targets: BTreeSet<String> = BTreeSet::new();
        for edge in &edges {
            if edge.to() == path {
                // Self-imports carry no traversal information.
                continue;
            }
            targets.insert(edge.to().to_string());
        }

        for target in &targets {
            self.reverse
                .entry(target.clone())
                .or_default()
                .insert(path.to_string());
        }
        if !targets.is_empty() {
            self.forward.insert(path.to_string(), targets);
        }
        if !edges.is_empty() {
            self.edges.insert(path.to_string(), edges);
        }
    }

    pub fn remove_file(&mut self, path: &str) {
        self.clear_outgoing(path);
        self.known.remove(path);
    }

    fn clear_outgoing(&mut self, path: &str) {
        if let Some(targets) = self.forward.remove(path) {
            for target in targets {
                if let Some(sources) = self.reverse.get_mut(&target) {
                    sources.remove(path);
                    if sources.is_empty() {
                        self.reverse.remove(&target);
                    }
                }
            }
        }
        self.edges.remove(path);
    }

    /// Files that import `path` (reverse edges).
    pub fn dependents(&self, path: &str) -> GraphLookup {
        if let Some(sources) = self.reverse.get(path) {
            return GraphLookup::Known(sources.clone());
        }
        if self.known.contains(path) {
            return GraphLookup::Known(BTreeSet::new());
        }
        GraphLookup::NotIndexed
    }

    /// Files that `path` imports (forward edges).
    pub fn dependencies(&self, path: &str) -> GraphLookup {
        if self.known.contains(path) {
            return GraphLookup::Known(
                self.forward.get(path).cloned().unwrap_or_default(),
            );
        }
        GraphLookup::NotIndexed
    }

    pub fn edges_for(&self, path: &str) -> &[DependencyEdge] {
        self.edges.get(path).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn contains(&self, path: &str) -> bool {
        self.known.contains(path)
    }

    pub fn files(&self) -> impl Iterator<Item = &str> {
        self.known.iter().map(String::as_str)
    }

    pub fn node_count(&self) -> usize {
        self.node_names().len()
    }

    pub fn edge_count(&self) -> usize {
        self.forward.values().map(BTreeSet::len).sum()
    }

    pub fn in_degree(&self, path: &str) -> usize {
        self.reverse.get(path).map(BTreeSet::len).unwrap_or(0)
    }

    pub fn out_degree(&self, path: &str) -> usize {
        self.forward.get(path).map(BTreeSet::len).unwrap_or(0)
    }

    /// Depth-first search with an explicit recursion stack; every back-edge
    /// to a node currently on the stack yields one cycle, reported as the
    /// ordered path segment from the revisit point to closure.
    pub fn find_cycles(&self) -> Vec<Vec<String>> {
        let mut visited: HashSet<&str> = HashSet::new();
        let mut cycles: Vec<Vec<String>> = Vec::new();
        let mut seen: HashSet<BTreeSet<String>> = HashSet::new();

        for start in self.forward.keys() {
            if visited.contains(start.as_str()) {
                continue;
            }
            let mut stack: Vec<&str> = Vec::new();
            let mut on_stack: HashSet<&str> = HashSet::new();
            self.cycle_dfs(
                start,
                &mut visited,
                &mut stack,
                &mut on_stack,
                &mut cycles,
                &mut seen,
            );
        }

        cycles
    }

    fn cycle_dfs<'a>(
        &'a self,
        node: &'a str,
        visited: &mut HashSet<&'a str>,
        stack: &mut Vec<&'a str>,
        on_stack: &mut HashSet<&'a str>,
        cycles: &mut Vec<Vec<String>>,
        seen: &mut HashSet<BTreeSet<String>>,
    ) {
        visited.insert(node);
        stack.push(node);
        on_stack.insert(node);

        if let Some(targets) = self.forward.get(node) {
            for next in targets {
                if on_stack.contains(next.as_str()) {
                    let pos = stack
                        .iter()
                        .position(|p| *p == next.as_str())
                        .unwrap_or(0);
                    let cycle: Vec<String> =
                        stack[pos..].iter().map(|p| p.to_string()).collect();
                    let signature: BTreeSet<String> = cycle.iter().cloned().collect();
                    if seen.insert(signature) {
                        cycles.push(cycle);
                    }
                } else if !visited.contains(next.as_str()) {
                    self.cycle_dfs(next, visited, stack, on_stack, cycles, seen);
                }
            }
        }

        stack.pop();
        on_stack.remove(node);
    }

    /// Connected clusters of the import graph, computed with Tarjan over
    /// the symmetrized edge set. Direction is ignored here: an acyclic
    /// subsystem is still one cluster, which is what a module-level
    /// overview wants. Each cluster is sorted, largest first.
    pub fn components(&self) -> Vec<Vec<String>> {
        let mut graph: DiGraph<String, ()> = DiGraph::new();
        let mut index = BTreeMap::new();

        for name in self.node_names() {
            let ix = graph.add_node(name.clone());
            index.insert(name, ix);
        }
        for (from, targets) in &self.forward {
            for to in targets {
                graph.add_edge(index[from], index[to], ());
                graph.add_edge(index[to], index[from], ());
            }
        }

        let mut components: Vec<Vec<String>> = tarjan_scc(&graph)
            .into_iter()
            .map(|scc| {
                let mut members: Vec<String> =
                    scc.into_iter().map(|ix| graph[ix].clone()).collect();
                members.sort();
                members
            })
            .collect();
        components.sort_by(|a, b| b.len().cmp(&a.len()).then_with(|| a.cmp(b)));
        components
    }

    fn node_names(&self) -> BTreeSet<String> {
        let mut names = self.known.clone();
        names.extend(self.forward.keys().cloned());
        names.extend(self.reverse.keys().cloned());
        names
    }

    /// The reverse map must be the exact transpose of the forward map.
    /// Cheap enough to assert in tests after any mutation sequence.
    #[cfg(test)]
    pub(crate) fn is_transpose_consistent(&self) -> bool {
        let mut expected: BTreeMap<String, BTreeSet<String>> = BTreeMap::new();
        for (from, targets) in &self.forward {
            for to in targets {
                expected
                    .entry(to.clone())
                    .or_default()
                    .insert(from.clone());
            }
        }
        expected == self.reverse
    }
}
