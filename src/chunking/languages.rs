use tracing::warn;

/// Window size for the line-based fallback chunker.
const NAIVE_CHUNK_LINES: usize = 30;
const NAIVE_CHUNK_OVERLAP: usize = 15;

/// Declarations below this many characters are folded into their neighbours
/// rather than indexed on their own.
const MIN_CHUNK_CHARS: usize = 50;

#[derive(Clone)]
pub struct LanguageConfig {
    /// Language names this config answers to, canonical name first.
    pub language_ids: &'static [&'static str],

    /// File extensions that classify a file as this language.
    pub file_extensions: &'static [&'static str],

    /// tree-sitter grammar for this language.
    pub grammar: fn() -> tree_sitter::Language,

    /// Top-level node kinds that form standalone snippets.
    pub declaration_kinds: &'static [&'static str],
}

fn rust_config() -> LanguageConfig {
    LanguageConfig {
        language_ids: &["rust"],
        file_extensions: &["rs"],
        grammar: tree_sitter_rust::language,
        declaration_kinds: &[
            "function_item",
            "struct_item",
            "enum_item",
            "trait_item",
            "impl_item",
            "mod_item",
            "macro_definition",
        ],
    }
}

fn python_config() -> LanguageConfig {
    LanguageConfig {
        language_ids: &["python"],
        file_extensions: &["py"],
        grammar: tree_sitter_python::language,
        declaration_kinds: &[
            "function_definition",
            "class_definition",
            "decorated_definition",
        ],
    }
}

fn javascript_config() -> LanguageConfig {
    LanguageConfig {
        language_ids: &["javascript", "jsx"],
        file_extensions: &["js", "jsx", "mjs"],
        grammar: tree_sitter_javascript::language,
        declaration_kinds: &[
            "function_declaration",
            "class_declaration",
            "generator_function_declaration",
            "lexical_declaration",
            "export_statement",
        ],
    }
}

fn typescript_config() -> LanguageConfig {
    LanguageConfig {
        language_ids: &["typescript", "tsx"],
        file_extensions: &["ts", "tsx"],
        grammar: tree_sitter_typescript::language_typescript,
        declaration_kinds: &[
            "function_declaration",
            "class_declaration",
            "interface_declaration",
            "enum_declaration",
            "type_alias_declaration",
            "lexical_declaration",
            "export_statement",
        ],
    }
}

/// Extensions for a language name, used to push language filters down into
/// the file table. Covers more languages than we have grammars for; a
/// filterable language only needs a stable extension set.
pub fn extensions_for_language(language: &str) -> Option<&'static [&'static str]> {
    match language.to_lowercase().as_str() {
        "rust" => Some(&["rs"]),
        "python" => Some(&["py"]),
        "javascript" | "jsx" => Some(&["js", "jsx", "mjs"]),
        "typescript" | "tsx" => Some(&["ts", "tsx"]),
        "go" | "golang" => Some(&["go"]),
        "java" => Some(&["java"]),
        "kotlin" => Some(&["kt", "kts"]),
        "c" => Some(&["c", "h"]),
        "cpp" | "c++" => Some(&["cc", "cpp", "cxx", "hpp", "hxx"]),
        "ruby" => Some(&["rb"]),
        "php" => Some(&["php"]),
        "csharp" | "c#" => Some(&["cs"]),
        "swift" => Some(&["swift"]),
        "scala" => Some(&["scala"]),
        "shell" | "bash" => Some(&["sh", "bash"]),
        "sql" => Some(&["sql"]),
        "markdown" => Some(&["md", "markdown"]),
        _ => None,
    }
}

#[derive(Clone)]
pub struct LanguageRegistry {
    configs: Vec<LanguageConfig>,
}

impl LanguageRegistry {
    pub fn init() -> Self {
        Self {
            configs: vec![
                rust_config(),
                python_config(),
                javascript_config(),
                typescript_config(),
            ],
        }
    }

    pub fn for_extension(&self, extension: &str) -> Option<&LanguageConfig> {
        self.configs
            .iter()
            .find(|config| config.file_extensions.contains(&extension))
    }

    /// Slice one file into snippets: declaration-level via tree-sitter when
    /// a grammar is registered, overlapping line windows otherwise.
    pub fn chunk_file(&self, path: &str, buffer: &str, extension: &str) -> Vec<String> {
        let Some(config) = self.for_extension(extension) else {
            return naive_chunker(buffer, NAIVE_CHUNK_LINES, NAIVE_CHUNK_OVERLAP);
        };

        let mut parser = tree_sitter::Parser::new();
        if parser.set_language((config.grammar)()).is_err() {
            warn!(path, extension, "failed to load grammar, falling back");
            return naive_chunker(buffer, NAIVE_CHUNK_LINES, NAIVE_CHUNK_OVERLAP);
        }

        let Some(tree) = parser.parse(buffer.as_bytes(), None) else {
            warn!(path, extension, "parse produced no tree, falling back");
            return naive_chunker(buffer, NAIVE_CHUNK_LINES, NAIVE_CHUNK_OVERLAP);
        };

        let chunks = declaration_chunks(tree.root_node(), config, buffer);
        if chunks.is_empty() {
            // a file of imports and statements still deserves one snippet
            return naive_chunker(buffer, NAIVE_CHUNK_LINES, NAIVE_CHUNK_OVERLAP);
        }
        chunks
    }
}

/// Collect top-level declarations as snippets. Small fragments are folded
/// into the next declaration so attribute or import runs are not lost.
fn declaration_chunks(
    root: tree_sitter::Node<'_>,
    config: &LanguageConfig,
    buffer: &str,
) -> Vec<String> {
    let mut chunks = vec![];
    let mut pending_start: Option<usize> = None;

    let mut cursor = root.walk();
    for child in root.children(&mut cursor) {
        if !config.declaration_kinds.contains(&child.kind()) {
            continue;
        }

        let start = pending_start.take().unwrap_or_else(|| child.start_byte());
        let end = child.end_byte();
        let Some(text) = buffer.get(start..end) else {
            continue;
        };
        let text = text.trim();

        if text.len() < MIN_CHUNK_CHARS {
            // too small on its own; prepend to whatever comes next
            pending_start = Some(start);
            continue;
        }

        chunks.push(text.to_owned());
    }

    chunks
}

/// Split a buffer into overlapping line windows.
fn naive_chunker(buffer: &str, line_count: usize, overlap: usize) -> Vec<String> {
    let lines = buffer.lines().collect::<Vec<_>>();
    let mut chunks = vec![];
    let mut start = 0;

    while start < lines.len() {
        let end = (start + line_count).min(lines.len());
        let chunk = lines[start..end].join("\n");
        if !chunk.trim().is_empty() {
            chunks.push(chunk);
        }
        start += line_count - overlap;
    }

    chunks
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rust_functions_become_snippets() {
        let registry = LanguageRegistry::init();
        let source = r#"
use std::fmt;

pub fn add(a: i32, b: i32) -> i32 {
    a + b
}

pub fn subtract(a: i32, b: i32) -> i32 {
    a - b
}
"#;
        let chunks = registry.chunk_file("src/math.rs", source, "rs");
        assert_eq!(chunks.len(), 2);
        assert!(chunks[0].contains("fn add"));
        assert!(chunks[1].contains("fn subtract"));
    }

    #[test]
    fn python_classes_become_snippets() {
        let registry = LanguageRegistry::init();
        let source = r#"
import math


class Calculator:
    def add(self, a, b):
        return a + b

    def subtract(self, a, b):
        return a - b
"#;
        let chunks = registry.chunk_file("calculator.py", source, "py");
        assert_eq!(chunks.len(), 1);
        assert!(chunks[0].contains("class Calculator"));
    }

    #[test]
    fn unknown_language_uses_line_windows() {
        let registry = LanguageRegistry::init();
        let source = (0..100)
            .map(|i| format!("line {i}"))
            .collect::<Vec<_>>()
            .join("\n");
        let chunks = registry.chunk_file("notes.txt", &source, "txt");
        assert!(chunks.len() > 1);
        assert!(chunks[0].starts_with("line 0"));
    }

    #[test]
    fn naive_chunker_overlaps_windows() {
        let buffer = (0..60)
            .map(|i| i.to_string())
            .collect::<Vec<_>>()
            .join("\n");
        let chunks = naive_chunker(&buffer, 30, 15);
        assert_eq!(chunks.len(), 4);
        assert!(chunks[1].starts_with("15"));
    }

    #[test]
    fn language_extension_sets() {
        assert_eq!(extensions_for_language("go"), Some(&["go"][..]));
        assert_eq!(extensions_for_language("Rust"), Some(&["rs"][..]));
        assert_eq!(extensions_for_language("brainfuck"), None);
    }
}
