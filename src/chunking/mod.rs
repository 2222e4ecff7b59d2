pub mod languages;

pub use languages::{extensions_for_language, LanguageRegistry};

/// The AST-slicing surface the extraction handler consumes. Implementations
/// take one file's content and return the semantic fragments worth indexing
/// on their own.
pub trait SnippetExtractor: Send + Sync {
    fn extract(&self, path: &str, content: &str, extension: &str) -> Vec<String>;
}

/// Default extractor: tree-sitter declaration slicing where a grammar is
/// registered, line-window chunking everywhere else.
pub struct TreeSitterExtractor {
    registry: LanguageRegistry,
}

impl TreeSitterExtractor {
    pub fn new() -> Self {
        Self {
            registry: LanguageRegistry::init(),
        }
    }
}

impl Default for TreeSitterExtractor {
    fn default() -> Self {
        Self::new()
    }
}

impl SnippetExtractor for TreeSitterExtractor {
    fn extract(&self, path: &str, content: &str, extension: &str) -> Vec<String> {
        self.registry.chunk_file(path, content, extension)
    }
}

/// Pull fenced code blocks out of a Markdown document. Used by example
/// extraction: a README's ```-fenced samples are usage examples even though
/// they never appear as files.
pub fn markdown_code_blocks(content: &str) -> Vec<String> {
    let mut blocks = vec![];
    let mut current: Option<Vec<&str>> = None;

    for line in content.lines() {
        let trimmed = line.trim_start();
        if trimmed.starts_with("```") {
            match current.take() {
                Some(block) => {
                    if !block.is_empty() {
                        blocks.push(block.join("\n"));
                    }
                }
                None => current = Some(vec![]),
            }
        } else if let Some(block) = current.as_mut() {
            block.push(line);
        }
    }

    blocks
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn markdown_blocks_are_extracted_without_fences() {
        let doc = "# Usage\n\n```rust\nlet x = 1;\nlet y = 2;\n```\n\ntext\n\n```\nplain block\n```\n";
        let blocks = markdown_code_blocks(doc);
        assert_eq!(blocks.len(), 2);
        assert_eq!(blocks[0], "let x = 1;\nlet y = 2;");
        assert_eq!(blocks[1], "plain block");
    }

    #[test]
    fn unterminated_fence_is_dropped() {
        let doc = "```js\nconsole.log('dangling')\n";
        assert!(markdown_code_blocks(doc).is_empty());
    }

    #[test]
    fn extractor_falls_back_for_unknown_extensions() {
        let extractor = TreeSitterExtractor::new();
        let go = "package main\n\nfunc Add(a, b int) int {\n\treturn a + b\n}\n";
        let snippets = extractor.extract("src/main.go", go, "go");
        assert!(!snippets.is_empty());
        assert!(snippets.iter().any(|s| s.contains("func Add")));
    }
}
