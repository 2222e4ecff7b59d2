pub mod commits;
pub mod enrichments;
pub mod repositories;
pub mod snippets;

pub use commits::CommitStore;
pub use enrichments::EnrichmentStore;
pub use repositories::RepositoryStore;
pub use snippets::{SnippetFilters, SnippetStore};
