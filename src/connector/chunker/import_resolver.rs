use std::collections::{BTreeSet, HashSet};
use std::path::Path;

use streaming_iterator::StreamingIterator;
use tracing::debug;
use tree_sitter::{Parser, Query, QueryCursor};

use crate::domain::{DependencyEdge, ImportKind, Language};

/// Extensions probed when a script import omits one, TypeScript first.
fn script_extensions() -> impl Iterator<Item = &'static str> {
    Language::TypeScript
        .extensions()
        .iter()
        .chain(Language::JavaScript.extensions())
        .copied()
}

/// Extracts import statements and resolves them to workspace files.
///
/// Resolution is purely lexical against the known workspace file set:
/// nothing touches the filesystem. Specifiers that do not land on a
/// workspace file (external crates, stdlib modules, published packages)
/// are dropped rather than guessed at.
pub struct ImportResolver {
    files: HashSet<String>,
}

struct RawImport {
    specifier: String,
    kind: ImportKind,
    line: u32,
}

impl ImportResolver {
    /// `files` holds workspace-relative paths with forward slashes, the same
    /// form used as registry and graph keys.
    pub fn new(files: HashSet<String>) -> Self {
        Self { files }
    }

    pub fn resolve(
        &self,
        content: &str,
        file_path: &str,
        language: Language,
    ) -> Vec<DependencyEdge> {
        if !language.is_recognized() {
            return Vec::new();
        }
        let raw = match language {
            Language::Rust => self.extract_rust(content),
            Language::Python => self.extract_python(content),
            Language::JavaScript | Language::TypeScript => {
                self.extract_javascript(content, language)
            }
            Language::Go => self.extract_go(content),
            Language::Unknown => Vec::new(),
        };

        let mut seen = BTreeSet::new();
        let mut edges = Vec::new();
        for import in raw {
            let targets = self.resolve_specifier(&import.specifier, file_path, language);
            for target in targets {
                if target == file_path || !seen.insert(target.clone()) {
                    continue;
                }
                edges.push(DependencyEdge::new(
                    file_path.to_string(),
                    target,
                    import.kind,
                    import.line,
                ));
            }
        }
        debug!(
            "Resolved {} imports for {} ({:?})",
            edges.len(),
            file_path,
            language
        );
        edges
    }

    fn query_captures(
        &self,
        content: &str,
        ts_language: tree_sitter::Language,
        patterns: &str,
        kind_for: impl Fn(&str) -> ImportKind,
    ) -> Vec<RawImport> {
        let mut parser = Parser::new();
        if parser.set_language(&ts_language).is_err() {
            return Vec::new();
        }
        let tree = match parser.parse(content, None) {
            Some(t) => t,
            None => return Vec::new(),
        };
        let query = match Query::new(&ts_language, patterns) {
            Ok(q) => q,
            Err(_) => return Vec::new(),
        };

        let capture_names = query.capture_names();
        let mut cursor = QueryCursor::new();
        let mut imports = Vec::new();
        let mut matches_iter = cursor.matches(&query, tree.root_node(), content.as_bytes());
        while let Some(query_match) = matches_iter.next() {
            for capture in query_match.captures {
                let name = capture_names[capture.index as usize];
                let text = content[capture.node.byte_range()]
                    .trim_matches(|c| c == '"' || c == '\'' || c == '`')
                    .to_string();
                if text.is_empty() {
                    continue;
                }
                imports.push(RawImport {
                    specifier: text,
                    kind: kind_for(name),
                    line: capture.node.start_position().row as u32 + 1,
                });
            }
        }
        imports
    }

    fn extract_rust(&self, content: &str) -> Vec<RawImport> {
        self.query_captures(
            content,
            tree_sitter_rust::LANGUAGE.into(),
            r#"
            (use_declaration argument: (_) @use)
            (mod_item name: (identifier) @mod)
            "#,
            |name| match name {
                "mod" => ImportKind::Mod,
                _ => ImportKind::Use,
            },
        )
    }

    fn extract_python(&self, content: &str) -> Vec<RawImport> {
        self.query_captures(
            content,
            tree_sitter_python::LANGUAGE.into(),
            r#"
            (import_statement name: (dotted_name) @import)
            (import_statement name: (aliased_import name: (dotted_name) @import))
            (import_from_statement module_name: (dotted_name) @from)
            (import_from_statement module_name: (relative_import) @from)
            "#,
            |name| match name {
                "from" => ImportKind::From,
                _ => ImportKind::Import,
            },
        )
    }

    fn extract_javascript(&self, content: &str, language: Language) -> Vec<RawImport> {
        let ts_language: tree_sitter::Language = if language == Language::TypeScript {
            tree_sitter_typescript::LANGUAGE_TYPESCRIPT.into()
        } else {
            tree_sitter_javascript::LANGUAGE.into()
        };
        let mut imports = self.query_captures(
            content,
            ts_language,
            r#"
            (import_statement source: (string) @import)
            (export_statement source: (string) @import)
            "#,
            |_| ImportKind::Import,
        );

        // require() is a plain call expression; a line scan keeps the query
        // table small and catches the dominant CommonJS form.
        for (row, line) in content.lines().enumerate() {
            if let Some(spec) = extract_require_specifier(line) {
                imports.push(RawImport {
                    specifier: spec,
                    kind: ImportKind::Require,
                    line: row as u32 + 1,
                });
            }
        }
        imports
    }

    fn extract_go(&self, content: &str) -> Vec<RawImport> {
        self.query_captures(
            content,
            tree_sitter_go::LANGUAGE.into(),
            r#"(import_spec path: (interpreted_string_literal) @import)"#,
            |_| ImportKind::Import,
        )
    }

    fn resolve_specifier(
        &self,
        specifier: &str,
        file_path: &str,
        language: Language,
    ) -> Vec<String> {
        match language {
            Language::Rust => self.resolve_rust(specifier, file_path),
            Language::Python => self.resolve_python(specifier, file_path),
            Language::JavaScript | Language::TypeScript => {
                self.resolve_javascript(specifier, file_path)
            }
            Language::Go => self.resolve_go(specifier),
            Language::Unknown => Vec::new(),
        }
    }

    fn resolve_rust(&self, specifier: &str, file_path: &str) -> Vec<String> {
        let importer_dir = parent_dir(file_path);

        // `mod foo;` has no path separators: sibling file or directory module.
        if !specifier.contains("::") {
            return self
                .probe_module(&join(&importer_dir, specifier))
                .into_iter()
                .collect();
        }

        let segments: Vec<&str> = specifier
            .split("::")
            .map(|s| s.trim())
            .take_while(|s| !s.is_empty() && !s.starts_with('{') && *s != "*")
            .collect();
        let (base, path_segments): (String, &[&str]) = match segments.first() {
            Some(&"crate") => ("src".to_string(), &segments[1..]),
            Some(&"self") => (importer_dir.clone(), &segments[1..]),
            Some(&"super") => {
                // One `super` from foo.rs lands in foo's own directory
                // (siblings share the parent module); from mod.rs it climbs.
                let is_mod_root = file_path.ends_with("/mod.rs") || file_path == "mod.rs";
                let mut dir = if is_mod_root {
                    parent_dir(&importer_dir)
                } else {
                    importer_dir.clone()
                };
                let mut rest = &segments[1..];
                while rest.first() == Some(&"super") {
                    dir = parent_dir(&dir);
                    rest = &rest[1..];
                }
                (dir, rest)
            }
            _ => return Vec::new(), // external crate
        };

        // Longest module prefix wins: trailing segments are items, not files.
        for end in (1..=path_segments.len()).rev() {
            let candidate = join(&base, &path_segments[..end].join("/"));
            if let Some(hit) = self.probe_module(&candidate) {
                return vec![hit];
            }
        }
        Vec::new()
    }

    /// `foo.rs` or `foo/mod.rs`.
    fn probe_module(&self, stem: &str) -> Option<String> {
        let file = format!("{stem}.rs");
        if self.files.contains(&file) {
            return Some(file);
        }
        let dir_mod = format!("{stem}/mod.rs");
        if self.files.contains(&dir_mod) {
            return Some(dir_mod);
        }
        None
    }

    fn resolve_python(&self, specifier: &str, file_path: &str) -> Vec<String> {
        let importer_dir = parent_dir(file_path);
        let dots = specifier.chars().take_while(|c| *c == '.').count();
        let dotted = &specifier[dots..];

        let base = if dots > 0 {
            // One leading dot is the importer's package; each extra dot
            // climbs one level.
            let mut dir = importer_dir.clone();
            for _ in 1..dots {
                dir = parent_dir(&dir);
            }
            dir
        } else {
            String::new()
        };

        let mut stems = Vec::new();
        if !dotted.is_empty() {
            stems.push(join(&base, &dotted.replace('.', "/")));
            if dots == 0 {
                // Absolute imports may also be importer-relative in flat
                // layouts without package install.
                stems.push(join(&importer_dir, &dotted.replace('.', "/")));
            }
        } else if dots > 0 {
            stems.push(base);
        }

        for stem in stems {
            let module = format!("{stem}.py");
            if self.files.contains(&module) {
                return vec![module];
            }
            let package = format!("{stem}/__init__.py");
            if self.files.contains(&package) {
                return vec![package];
            }
        }
        Vec::new()
    }

    fn resolve_javascript(&self, specifier: &str, file_path: &str) -> Vec<String> {
        if !specifier.starts_with("./") && !specifier.starts_with("../") {
            return Vec::new(); // bare specifier: a package, not a file
        }
        let stem = join(&parent_dir(file_path), specifier);

        if self.files.contains(&stem) {
            return vec![stem];
        }
        for ext in script_extensions() {
            let candidate = format!("{stem}.{ext}");
            if self.files.contains(&candidate) {
                return vec![candidate];
            }
        }
        for ext in script_extensions() {
            let candidate = format!("{stem}/index.{ext}");
            if self.files.contains(&candidate) {
                return vec![candidate];
            }
        }
        Vec::new()
    }

    /// Go imports name package directories; the edge targets every Go file
    /// in the matched directory.
    fn resolve_go(&self, specifier: &str) -> Vec<String> {
        // The module prefix is unknown, so try every path suffix and take
        // the longest one that names a workspace directory.
        let segments: Vec<&str> = specifier.split('/').collect();
        for start in 0..segments.len() {
            let candidate = segments[start..].join("/");
            let prefix = format!("{candidate}/");
            let mut hits: Vec<String> = self
                .files
                .iter()
                .filter(|f| {
                    f.starts_with(&prefix)
                        && f.ends_with(".go")
                        && !f[prefix.len()..].contains('/')
                })
                .cloned()
                .collect();
            if !hits.is_empty() {
                hits.sort();
                return hits;
            }
        }
        Vec::new()
    }
}

fn extract_require_specifier(line: &str) -> Option<String> {
    let idx = line.find("require(")?;
    let rest = &line[idx + "require(".len()..];
    let quote = rest.chars().next().filter(|c| *c == '"' || *c == '\'')?;
    let inner = &rest[1..];
    let end = inner.find(quote)?;
    Some(inner[..end].to_string())
}

fn parent_dir(path: &str) -> String {
    Path::new(path)
        .parent()
        .map(|p| p.to_string_lossy().replace('\\', "/"))
        .unwrap_or_default()
}

/// Lexically joins and normalizes `.`/`..` without touching the filesystem.
fn join(base: &str, relative: &str) -> String {
    let mut parts: Vec<&str> = base.split('/').filter(|p| !p.is_empty()).collect();
    for segment in relative.split('/') {
        match segment {
            "" | "." => {}
            ".." => {
                parts.pop();
            }
            other => parts.push(other),
        }
    }
    parts.join("/")
}
