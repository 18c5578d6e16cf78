use serde::{Deserialize, Serialize};

/// The syntactic form an import edge was extracted from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ImportKind {
    /// `import x` / ES `import ... from` / Go `import`.
    Import,
    /// Python `from x import y`.
    From,
    /// CommonJS `require(...)`.
    Require,
    /// Rust `use` declaration.
    Use,
    /// Rust `mod` declaration.
    Mod,
}

impl ImportKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ImportKind::Import => "import",
            ImportKind::From => "from",
            ImportKind::Require => "require",
            ImportKind::Use => "use",
            ImportKind::Mod => "mod",
        }
    }
}

impl std::fmt::Display for ImportKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A directed, resolved import edge between two workspace files.
///
/// Multiple edges between the same pair are permitted (different lines or
/// kinds); traversal-level deduplication happens in the graph's adjacency
/// sets.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DependencyEdge {
    from: String,
    to: String,
    kind: ImportKind,
    line: u32,
}

impl DependencyEdge {
    pub fn new(from: String, to: String, kind: ImportKind, line: u32) -> Self {
        Self {
            from,
            to,
            kind,
            line,
        }
    }

    pub fn from(&self) -> &str {
        &self.from
    }

    pub fn to(&self) -> &str {
        &self.to
    }

    pub fn kind(&self) -> ImportKind {
        self.kind
    }

    pub fn line(&self) -> u32 {
        self.line
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_edge_accessors() {
        let edge = DependencyEdge::new(
            "src/app.ts".to_string(),
            "src/util.ts".to_string(),
            ImportKind::Import,
            3,
        );
        assert_eq!(edge.from(), "src/app.ts");
        assert_eq!(edge.to(), "src/util.ts");
        assert_eq!(edge.kind(), ImportKind::Import);
        assert_eq!(edge.line(), 3);
    }
}
