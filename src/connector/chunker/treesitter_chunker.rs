use async_trait::async_trait;
use streaming_iterator::StreamingIterator;
use tracing::debug;
use tree_sitter::{Parser, Query, QueryCursor};

use crate::application::{ChunkSet, ChunkerService};
use crate::domain::{Chunk, Language};

/// Structural chunker with a deterministic line-window fallback.
///
/// Chunk boundaries coincide with complete top-level constructs: top-level
/// nodes are packed into groups until the token target is reached, and a
/// construct larger than the target becomes its own chunk rather than being
/// split inside. Size and overlap are measured in whitespace tokens, not
/// characters; the trailing tokens of each chunk are duplicated at the head
/// of the next so boundary-spanning context is never lost to retrieval.
pub struct TreeSitterChunker {
    target_tokens: usize,
    overlap_tokens: usize,
}

/// One top-level construct plus any preceding gap lines (imports, comments,
/// blanks), expressed as 0-based inclusive line indices.
struct Unit {
    start_line: usize,
    end_line: usize,
}

/// A packed group of consecutive units, before overlap is applied.
struct Group {
    start_line: usize,
    end_line: usize,
}

impl TreeSitterChunker {
    pub fn new() -> Self {
        Self {
            target_tokens: 256,
            overlap_tokens: 32,
        }
    }

    pub fn with_limits(target_tokens: usize, overlap_tokens: usize) -> Self {
        Self {
            target_tokens: target_tokens.max(1),
            overlap_tokens,
        }
    }

    fn get_ts_language(&self, language: Language) -> Option<tree_sitter::Language> {
        match language {
            Language::Rust => Some(tree_sitter_rust::LANGUAGE.into()),
            Language::Python => Some(tree_sitter_python::LANGUAGE.into()),
            Language::JavaScript => Some(tree_sitter_javascript::LANGUAGE.into()),
            Language::TypeScript => Some(tree_sitter_typescript::LANGUAGE_TYPESCRIPT.into()),
            Language::Go => Some(tree_sitter_go::LANGUAGE.into()),
            Language::Unknown => None,
        }
    }

    fn symbol_query_patterns(&self, language: Language) -> &'static str {
        match language {
            Language::Rust => {
                r#"
                (function_item name: (identifier) @name)
                (struct_item name: (type_identifier) @name)
                (enum_item name: (type_identifier) @name)
                (trait_item name: (type_identifier) @name)
                (mod_item name: (identifier) @name)
                (const_item name: (identifier) @name)
                (static_item name: (identifier) @name)
                (type_item name: (type_identifier) @name)
                "#
            }
            Language::Python => {
                r#"
                (function_definition name: (identifier) @name)
                (class_definition name: (identifier) @name)
                "#
            }
            Language::JavaScript => {
                r#"
                (function_declaration name: (identifier) @name)
                (class_declaration name: (identifier) @name)
                (method_definition name: (property_identifier) @name)
                "#
            }
            Language::TypeScript => {
                r#"
                (function_declaration name: (identifier) @name)
                (class_declaration name: (type_identifier) @name)
                (method_definition name: (property_identifier) @name)
                (interface_declaration name: (type_identifier) @name)
                (type_alias_declaration name: (type_identifier) @name)
                "#
            }
            Language::Go => {
                r#"
                (function_declaration name: (identifier) @name)
                (method_declaration name: (field_identifier) @name)
                (type_declaration (type_spec name: (type_identifier) @name))
                "#
            }
            Language::Unknown => "",
        }
    }

    /// Structural pass. `None` means the caller should use the fallback.
    fn structural_chunks(
        &self,
        content: &str,
        file_path: &str,
        language: Language,
    ) -> Option<Vec<Chunk>> {
        let ts_language = self.get_ts_language(language)?;

        let mut parser = Parser::new();
        parser.set_language(&ts_language).ok()?;
        let tree = parser.parse(content, None)?;
        let root = tree.root_node();
        if root.has_error() {
            return None;
        }

        let lines: Vec<&str> = content.lines().collect();
        if lines.is_empty() {
            return Some(Vec::new());
        }

        // Tile the file into units: every line belongs to exactly one unit,
        // and every unit ends where a top-level construct ends.
        let mut units: Vec<Unit> = Vec::new();
        let mut cursor_line = 0usize;
        let mut walker = root.walk();
        for node in root.named_children(&mut walker) {
            let end = node.end_position().row.min(lines.len() - 1);
            if end < cursor_line {
                continue;
            }
            units.push(Unit {
                start_line: cursor_line,
                end_line: end,
            });
            cursor_line = end + 1;
        }
        if units.is_empty() {
            return None;
        }
        if cursor_line < lines.len() {
            if let Some(last) = units.last_mut() {
                last.end_line = lines.len() - 1;
            }
        }

        // Pack consecutive units up to the token target; an oversized unit
        // stands alone.
        let mut groups: Vec<Group> = Vec::new();
        let mut current: Option<(usize, usize, usize)> = None; // (start, end, tokens)
        for unit in &units {
            let unit_tokens = count_line_tokens(&lines, unit.start_line, unit.end_line);
            match current {
                None => current = Some((unit.start_line, unit.end_line, unit_tokens)),
                Some((start, _, tokens)) if tokens + unit_tokens > self.target_tokens => {
                    groups.push(Group {
                        start_line: start,
                        end_line: unit.start_line.saturating_sub(1),
                    });
                    current = Some((unit.start_line, unit.end_line, unit_tokens));
                }
                Some((start, _, tokens)) => {
                    current = Some((start, unit.end_line, tokens + unit_tokens));
                }
            }
        }
        if let Some((start, end, _)) = current {
            groups.push(Group {
                start_line: start,
                end_line: end,
            });
        }

        let symbols = self.collect_symbols(content, &ts_language, language);
        Some(self.materialize(file_path, language, &lines, &groups, &symbols))
    }

    /// (0-based row, name) for every symbol definition in the file.
    fn collect_symbols(
        &self,
        content: &str,
        ts_language: &tree_sitter::Language,
        language: Language,
    ) -> Vec<(usize, String)> {
        let patterns = self.symbol_query_patterns(language);
        if patterns.is_empty() {
            return Vec::new();
        }
        let query = match Query::new(ts_language, patterns) {
            Ok(q) => q,
            Err(_) => return Vec::new(),
        };

        let mut parser = Parser::new();
        if parser.set_language(ts_language).is_err() {
            return Vec::new();
        }
        let tree = match parser.parse(content, None) {
            Some(t) => t,
            None => return Vec::new(),
        };

        let mut cursor = QueryCursor::new();
        let mut symbols = Vec::new();
        let mut matches_iter = cursor.matches(&query, tree.root_node(), content.as_bytes());
        while let Some(query_match) = matches_iter.next() {
            for capture in query_match.captures {
                let row = capture.node.start_position().row;
                let name = content[capture.node.byte_range()].to_string();
                symbols.push((row, name));
            }
        }
        symbols
    }

    /// Applies overlap and builds the final chunks from packed groups.
    fn materialize(
        &self,
        file_path: &str,
        language: Language,
        lines: &[&str],
        groups: &[Group],
        symbols: &[(usize, String)],
    ) -> Vec<Chunk> {
        let total = groups.len() as u32;
        groups
            .iter()
            .enumerate()
            .map(|(i, group)| {
                let mut start = group.start_line;
                if i > 0 && self.overlap_tokens > 0 {
                    start = self.overlap_start(lines, groups[i - 1].start_line, group.start_line);
                }

                let text = lines[start..=group.end_line].join("\n");
                let chunk_symbols: Vec<String> = symbols
                    .iter()
                    .filter(|(row, _)| *row >= group.start_line && *row <= group.end_line)
                    .map(|(_, name)| name.clone())
                    .collect();

                Chunk::new(
                    file_path.to_string(),
                    text,
                    start as u32 + 1,
                    group.end_line as u32 + 1,
                    language,
                )
                .with_symbols(chunk_symbols)
                .with_sequence(i as u32, total)
            })
            .collect()
    }

    /// Walks back from `boundary` toward `floor` until at least
    /// `overlap_tokens` tokens are covered.
    fn overlap_start(&self, lines: &[&str], floor: usize, boundary: usize) -> usize {
        let mut start = boundary;
        let mut tokens = 0usize;
        while start > floor && tokens < self.overlap_tokens {
            start -= 1;
            tokens += count_tokens(lines[start]);
        }
        start
    }

    /// Fixed-size line-window chunking with the same size/overlap targets.
    fn fallback_chunks(&self, content: &str, file_path: &str, language: Language) -> Vec<Chunk> {
        let lines: Vec<&str> = content.lines().collect();
        if lines.is_empty() {
            return Vec::new();
        }

        let mut groups: Vec<Group> = Vec::new();
        let mut start = 0usize;
        let mut tokens = 0usize;
        for (i, line) in lines.iter().enumerate() {
            tokens += count_tokens(line);
            if tokens >= self.target_tokens {
                groups.push(Group {
                    start_line: start,
                    end_line: i,
                });
                start = i + 1;
                tokens = 0;
            }
        }
        if start < lines.len() {
            groups.push(Group {
                start_line: start,
                end_line: lines.len() - 1,
            });
        }

        self.materialize(file_path, language, &lines, &groups, &[])
    }
}

impl Default for TreeSitterChunker {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ChunkerService for TreeSitterChunker {
    async fn chunk(&self, content: &str, file_path: &str, language: Language) -> ChunkSet {
        if content.trim().is_empty() {
            return ChunkSet::empty();
        }

        if let Some(chunks) = self.structural_chunks(content, file_path, language) {
            debug!(
                "Chunked {} into {} structural chunks ({:?})",
                file_path,
                chunks.len(),
                language
            );
            return ChunkSet {
                chunks,
                fallback: false,
            };
        }

        let chunks = self.fallback_chunks(content, file_path, language);
        debug!(
            "Chunked {} into {} line-window chunks (fallback)",
            file_path,
            chunks.len()
        );
        ChunkSet {
            chunks,
            fallback: true,
        }
    }

    fn supports_language(&self, language: Language) -> bool {
        self.get_ts_language(language).is_some()
    }
}

fn count_tokens(line: &str) -> usize {
    line.split_whitespace().count()
}

fn count_line_tokens(lines: &[&str], start: usize, end: usize) -> usize {
    lines[start..=end.min(lines.len() - 1)]
        .iter()
        .map(|l| count_tokens(l))
        .sum()
}
