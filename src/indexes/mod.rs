pub mod bm25;
pub mod vector;

pub use bm25::{Bm25Index, Document};
pub use vector::{EmbeddingTask, VectorStore};

/// One scored hit out of either search store. `doc_id` is a snippet sha or
/// an `enrichment:<id>` reference; scores are positive-better in both
/// stores.
#[derive(Debug, Clone, PartialEq)]
pub struct SearchHit {
    pub doc_id: String,
    pub score: f32,
}
