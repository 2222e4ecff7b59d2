use std::sync::Arc;

use once_cell::sync::OnceCell;
use tracing::warn;

use super::config::Configuration;
use super::logging::tracing_subscribe;
use crate::chunking::SnippetExtractor;
use crate::db::SqlDb;
use crate::git::GitBackend;
use crate::indexes::{Bm25Index, EmbeddingTask, VectorStore};
use crate::llm::{EmbeddingProvider, TextProvider};
use crate::queue::TaskQueue;
use crate::store::{CommitStore, EnrichmentStore, RepositoryStore, SnippetStore};
use crate::tracker::{DbReporter, LogReporter, Reporter, StatusStore, TrackerHub};

static LOGGER_INSTALLED: OnceCell<bool> = OnceCell::new();

/// Process-wide wiring: configuration, the content store, the task queue
/// and the search stores. Cheap to clone; every field is shared.
#[derive(Clone)]
pub struct Application {
    pub config: Arc<Configuration>,
    pub db: SqlDb,
    pub repositories: RepositoryStore,
    pub commits: CommitStore,
    pub snippets: SnippetStore,
    pub enrichments: EnrichmentStore,
    pub queue: TaskQueue,
    pub statuses: StatusStore,
    pub tracker_hub: TrackerHub,
    pub git: Arc<dyn GitBackend>,
    pub extractor: Arc<dyn SnippetExtractor>,
    pub text_provider: Option<Arc<dyn TextProvider>>,
    pub embedding_provider: Option<Arc<dyn EmbeddingProvider>>,
    pub bm25: Arc<Bm25Index>,
    pub code_vectors: Option<Arc<VectorStore>>,
    pub text_vectors: Option<Arc<VectorStore>>,
}

impl Application {
    /// Wire an application from already-built parts. This is the seam tests
    /// and the library client use to substitute providers or the git
    /// backend.
    pub fn assemble(
        config: Configuration,
        db: SqlDb,
        bm25: Arc<Bm25Index>,
        git: Arc<dyn GitBackend>,
        extractor: Arc<dyn SnippetExtractor>,
        text_provider: Option<Arc<dyn TextProvider>>,
        embedding_provider: Option<Arc<dyn EmbeddingProvider>>,
    ) -> Self {
        let tracker_hub = TrackerHub::new(vec![
            Arc::new(LogReporter) as Arc<dyn Reporter>,
            Arc::new(DbReporter::new(db.clone())),
        ]);

        let (code_vectors, text_vectors) = match &embedding_provider {
            Some(provider) => (
                Some(Arc::new(VectorStore::new(
                    db.clone(),
                    EmbeddingTask::Code,
                    provider.dimensions(),
                ))),
                Some(Arc::new(VectorStore::new(
                    db.clone(),
                    EmbeddingTask::Text,
                    provider.dimensions(),
                ))),
            ),
            None => (None, None),
        };

        Self {
            repositories: RepositoryStore::new(db.clone()),
            commits: CommitStore::new(db.clone()),
            snippets: SnippetStore::new(db.clone()),
            enrichments: EnrichmentStore::new(db.clone()),
            queue: TaskQueue::new(db.clone()),
            statuses: StatusStore::new(db.clone()),
            tracker_hub,
            git,
            extractor,
            text_provider,
            embedding_provider,
            bm25,
            code_vectors,
            text_vectors,
            config: Arc::new(config),
            db,
        }
    }

    pub fn install_logging(config: &Configuration) {
        if let Some(true) = LOGGER_INSTALLED.get() {
            return;
        }

        if !tracing_subscribe(config) {
            warn!("failed to install tracing subscriber, one is probably installed already");
        }

        _ = LOGGER_INSTALLED.set(true);
    }
}
