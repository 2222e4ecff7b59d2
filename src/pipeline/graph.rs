use std::fmt;

use serde::{Deserialize, Serialize};

/// Every unit of work the queue knows how to dispatch. The wire form is the
/// snake_case name stored in the task row.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum Operation {
    Clone,
    Sync,
    ScanCommit,
    ExtractSnippetsForCommit,
    ExtractExamplesForCommit,
    CreateBm25IndexForCommit,
    CreateCodeEmbeddingsForCommit,
    CreateExampleCodeEmbeddingsForCommit,
    CreateSummaryEnrichmentForCommit,
    CreateExampleSummaryForCommit,
    CreateSummaryEmbeddingsForCommit,
    CreateExampleSummaryEmbeddingsForCommit,
    CreateArchitectureEnrichmentForCommit,
    CreatePublicApiDocsForCommit,
    CreateCommitDescriptionForCommit,
    CreateDatabaseSchemaForCommit,
    CreateCookbookForCommit,
    DeleteRepository,
    RescanCommit,
}

impl Operation {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Clone => "clone",
            Self::Sync => "sync",
            Self::ScanCommit => "scan_commit",
            Self::ExtractSnippetsForCommit => "extract_snippets_for_commit",
            Self::ExtractExamplesForCommit => "extract_examples_for_commit",
            Self::CreateBm25IndexForCommit => "create_bm25_index_for_commit",
            Self::CreateCodeEmbeddingsForCommit => "create_code_embeddings_for_commit",
            Self::CreateExampleCodeEmbeddingsForCommit => {
                "create_example_code_embeddings_for_commit"
            }
            Self::CreateSummaryEnrichmentForCommit => "create_summary_enrichment_for_commit",
            Self::CreateExampleSummaryForCommit => "create_example_summary_for_commit",
            Self::CreateSummaryEmbeddingsForCommit => "create_summary_embeddings_for_commit",
            Self::CreateExampleSummaryEmbeddingsForCommit => {
                "create_example_summary_embeddings_for_commit"
            }
            Self::CreateArchitectureEnrichmentForCommit => {
                "create_architecture_enrichment_for_commit"
            }
            Self::CreatePublicApiDocsForCommit => "create_public_api_docs_for_commit",
            Self::CreateCommitDescriptionForCommit => "create_commit_description_for_commit",
            Self::CreateDatabaseSchemaForCommit => "create_database_schema_for_commit",
            Self::CreateCookbookForCommit => "create_cookbook_for_commit",
            Self::DeleteRepository => "delete_repository",
            Self::RescanCommit => "rescan_commit",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        ALL_OPERATIONS.iter().copied().find(|op| op.as_str() == s)
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

pub const ALL_OPERATIONS: &[Operation] = &[
    Operation::Clone,
    Operation::Sync,
    Operation::ScanCommit,
    Operation::ExtractSnippetsForCommit,
    Operation::ExtractExamplesForCommit,
    Operation::CreateBm25IndexForCommit,
    Operation::CreateCodeEmbeddingsForCommit,
    Operation::CreateExampleCodeEmbeddingsForCommit,
    Operation::CreateSummaryEnrichmentForCommit,
    Operation::CreateExampleSummaryForCommit,
    Operation::CreateSummaryEmbeddingsForCommit,
    Operation::CreateExampleSummaryEmbeddingsForCommit,
    Operation::CreateArchitectureEnrichmentForCommit,
    Operation::CreatePublicApiDocsForCommit,
    Operation::CreateCommitDescriptionForCommit,
    Operation::CreateDatabaseSchemaForCommit,
    Operation::CreateCookbookForCommit,
    Operation::DeleteRepository,
    Operation::RescanCommit,
];

/// The per-commit indexing fan-out, in the order it is enqueued after a
/// commit scan. FIFO claiming within one priority class preserves this
/// order on a single worker.
pub const SCAN_SUCCESSORS: &[Operation] = &[
    Operation::ExtractSnippetsForCommit,
    Operation::ExtractExamplesForCommit,
    Operation::CreateBm25IndexForCommit,
    Operation::CreateCodeEmbeddingsForCommit,
    Operation::CreateExampleCodeEmbeddingsForCommit,
    Operation::CreateSummaryEnrichmentForCommit,
    Operation::CreateExampleSummaryForCommit,
    Operation::CreateSummaryEmbeddingsForCommit,
    Operation::CreateExampleSummaryEmbeddingsForCommit,
    Operation::CreateArchitectureEnrichmentForCommit,
    Operation::CreatePublicApiDocsForCommit,
    Operation::CreateCommitDescriptionForCommit,
    Operation::CreateDatabaseSchemaForCommit,
    Operation::CreateCookbookForCommit,
];

/// Declarative successor table. A handler that finishes without a fatal
/// error (completed or skipped) enqueues exactly these operations; a failed
/// handler enqueues nothing and the chain stops there.
pub fn successors(operation: Operation) -> &'static [Operation] {
    match operation {
        Operation::Clone => &[Operation::Sync],
        Operation::Sync => &[Operation::ScanCommit],
        Operation::ScanCommit => SCAN_SUCCESSORS,
        Operation::RescanCommit => &[Operation::ScanCommit],
        _ => &[],
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wire_names_roundtrip() {
        for op in ALL_OPERATIONS {
            assert_eq!(Operation::parse(op.as_str()), Some(*op));
        }
        assert_eq!(Operation::parse("make_coffee"), None);
    }

    #[test]
    fn scan_fans_out_to_the_whole_chain() {
        let chain = successors(Operation::ScanCommit);
        assert_eq!(chain.len(), 14);
        assert_eq!(chain[0], Operation::ExtractSnippetsForCommit);
        assert_eq!(*chain.last().unwrap(), Operation::CreateCookbookForCommit);
    }

    #[test]
    fn leaves_have_no_successors() {
        assert!(successors(Operation::CreateCookbookForCommit).is_empty());
        assert!(successors(Operation::DeleteRepository).is_empty());
    }
}
