use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::Mutex;
use tracing::info;

use crate::application::{Application, Configuration};
use crate::chunking::{SnippetExtractor, TreeSitterExtractor};
use crate::db;
use crate::error::{Error, Result};
use crate::git::{CliGit, GitBackend};
use crate::indexes::Bm25Index;
use crate::llm::{EmbeddingProvider, TextProvider};
use crate::model::{sanitize_remote_url, Enrichment, EntityType, Repository};
use crate::pipeline::{Operation, WorkerPool};
use crate::queue::{Payload, Task, TaskFilter, PRIORITY_USER};
use crate::search::{multi_search, MultiRequest, MultiResult, SearchFilters};

/// Composable client configuration. Storage is mandatory; everything else
/// has a sensible default or is optional.
pub struct ClientOptions {
    config: Configuration,
    in_memory: bool,
    storage_set: bool,
    git: Arc<dyn GitBackend>,
    extractor: Arc<dyn SnippetExtractor>,
    text_provider: Option<Arc<dyn TextProvider>>,
    embedding_provider: Option<Arc<dyn EmbeddingProvider>>,
}

impl Default for ClientOptions {
    fn default() -> Self {
        Self {
            config: Configuration::default(),
            in_memory: false,
            storage_set: false,
            git: Arc::new(CliGit),
            extractor: Arc::new(TreeSitterExtractor::new()),
            text_provider: None,
            embedding_provider: None,
        }
    }
}

impl ClientOptions {
    /// Derive options from a parsed configuration: storage under the data
    /// dir plus providers for whichever endpoints are configured.
    pub fn with_configuration(config: Configuration) -> Self {
        let text_provider: Option<Arc<dyn TextProvider>> =
            config.llm_api_base.as_ref().map(|base| {
                Arc::new(crate::llm::OpenAiTextProvider::new(
                    base,
                    config.llm_api_key.as_deref().unwrap_or_default(),
                    &config.llm_model,
                )) as Arc<dyn TextProvider>
            });

        let embedding_provider: Option<Arc<dyn EmbeddingProvider>> =
            config.embedding_api_base.as_ref().map(|base| {
                Arc::new(crate::llm::OpenAiEmbeddingProvider::new(
                    base,
                    config.embedding_api_key.as_deref().unwrap_or_default(),
                    &config.embedding_model,
                    config.embedding_dimensions,
                )) as Arc<dyn EmbeddingProvider>
            });

        Self {
            config,
            storage_set: true,
            text_provider,
            embedding_provider,
            ..Self::default()
        }
    }

    pub fn data_dir(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.data_dir = path.into();
        self
    }

    pub fn sqlite(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.db_path = Some(path.into());
        self.storage_set = true;
        self
    }

    /// Throwaway in-memory storage and indexes. Mostly for tests.
    pub fn in_memory(mut self) -> Self {
        self.in_memory = true;
        self.storage_set = true;
        self
    }

    pub fn workers(mut self, workers: usize) -> Self {
        self.config.workers = workers;
        self
    }

    pub fn api_keys(mut self, keys: Vec<String>) -> Self {
        self.config.api_keys = keys;
        self
    }

    pub fn text_provider(mut self, provider: Arc<dyn TextProvider>) -> Self {
        self.text_provider = Some(provider);
        self
    }

    pub fn embedding_provider(mut self, provider: Arc<dyn EmbeddingProvider>) -> Self {
        self.embedding_provider = Some(provider);
        self
    }

    pub fn git_backend(mut self, git: Arc<dyn GitBackend>) -> Self {
        self.git = git;
        self
    }

    pub fn extractor(mut self, extractor: Arc<dyn SnippetExtractor>) -> Self {
        self.extractor = extractor;
        self
    }
}

#[derive(Debug, Clone, Default)]
pub struct SearchOptions {
    pub limit: usize,
    pub semantic_weight: Option<f64>,
    pub languages: Vec<String>,
    pub repositories: Vec<i64>,
    pub enrichment_types: Vec<String>,
    pub min_score: Option<f64>,
}

/// The embeddable client. Owns the process-wide state (data dir, worker
/// pool, stores); constructed by `new`, torn down by `close`.
pub struct Client {
    app: Application,
    pool: Mutex<Option<WorkerPool>>,
    closed: AtomicBool,
}

impl Client {
    pub async fn new(options: ClientOptions) -> Result<Self> {
        if !options.storage_set {
            return Err(Error::NoStorage);
        }

        let ClientOptions {
            config,
            in_memory,
            git,
            extractor,
            text_provider,
            embedding_provider,
            ..
        } = options;

        let (db, bm25) = if in_memory {
            (db::init_in_memory().await?, Bm25Index::in_memory()?)
        } else {
            tokio::fs::create_dir_all(&config.data_dir)
                .await
                .map_err(anyhow::Error::from)?;
            (
                db::init(&config.db_path()).await?,
                Bm25Index::open_or_create(&config.index_dir().join("bm25"))?,
            )
        };

        let workers = config.workers;
        let app = Application::assemble(
            config,
            db,
            Arc::new(bm25),
            git,
            extractor,
            text_provider,
            embedding_provider,
        );

        let pool = WorkerPool::start(app.clone(), workers);
        info!(workers, "client initialised");

        Ok(Self {
            app,
            pool: Mutex::new(Some(pool)),
            closed: AtomicBool::new(false),
        })
    }

    fn ensure_open(&self) -> Result<()> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(Error::ClientClosed);
        }
        Ok(())
    }

    /// The wired application, for embedding the HTTP layer on top of a
    /// client.
    pub fn application(&self) -> &Application {
        &self.app
    }

    pub fn repositories(&self) -> Repositories<'_> {
        Repositories { client: self }
    }

    pub fn enrichments(&self) -> Enrichments<'_> {
        Enrichments { client: self }
    }

    pub fn tasks(&self) -> Tasks<'_> {
        Tasks { client: self }
    }

    /// Hybrid search over the indexed corpus. The query drives both the
    /// keyword and the semantic lists.
    pub async fn search(&self, query: &str, options: SearchOptions) -> Result<MultiResult> {
        self.ensure_open()?;

        let request = MultiRequest {
            top_k: if options.limit == 0 { 10 } else { options.limit },
            text_query: Some(query.to_owned()),
            code_query: Some(query.to_owned()),
            filters: SearchFilters {
                languages: options.languages,
                repositories: options.repositories,
                enrichment_types: options.enrichment_types,
                ..Default::default()
            },
            semantic_weight: options.semantic_weight,
            min_score: options.min_score,
        };

        multi_search(&self.app, &request).await
    }

    /// Block until the queue is drained and no handler is running.
    pub async fn wait_until_idle(&self) -> Result<()> {
        self.ensure_open()?;
        let pool = self.pool.lock().await;
        if let Some(pool) = pool.as_ref() {
            pool.wait_idle().await;
        }
        Ok(())
    }

    /// Stop the workers and release the pool. Idempotent in effect; the
    /// second call reports `client_closed`.
    pub async fn close(&self) -> Result<()> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Err(Error::ClientClosed);
        }

        if let Some(pool) = self.pool.lock().await.take() {
            pool.shutdown().await;
        }
        Ok(())
    }
}

pub struct Repositories<'a> {
    client: &'a Client,
}

impl Repositories<'_> {
    /// Register a remote and enqueue its clone. Ingesting a URL that is
    /// already tracked returns the existing repository without dispatching
    /// anything.
    pub async fn clone(&self, remote_url: &str) -> Result<Repository> {
        self.client.ensure_open()?;
        let app = &self.client.app;

        let sanitized = sanitize_remote_url(remote_url);
        if let Some(existing) = app.repositories.get_by_sanitized_url(&sanitized).await? {
            return Ok(existing);
        }

        let repo = app.repositories.create(remote_url).await?;
        app.queue
            .enqueue(
                &[Operation::Clone],
                PRIORITY_USER,
                &Payload::for_repository(repo.id),
            )
            .await?;
        Ok(repo)
    }

    pub async fn get(&self, id: i64) -> Result<Repository> {
        self.client.ensure_open()?;
        self.client
            .app
            .repositories
            .get(id)
            .await?
            .ok_or_else(|| Error::not_found(format!("repository {id}")))
    }

    pub async fn list(&self) -> Result<Vec<Repository>> {
        self.client.ensure_open()?;
        self.client.app.repositories.list().await
    }

    /// Queue a delete. The handler drains pending work for the repository
    /// before removing anything.
    pub async fn delete(&self, id: i64) -> Result<()> {
        self.client.ensure_open()?;
        let app = &self.client.app;

        // fail fast on unknown ids instead of queueing a doomed task
        if app.repositories.get(id).await?.is_none() {
            return Err(Error::not_found(format!("repository {id}")));
        }

        app.queue
            .enqueue(
                &[Operation::DeleteRepository],
                PRIORITY_USER,
                &Payload::for_repository(id),
            )
            .await?;
        Ok(())
    }

    pub async fn sync(&self, id: i64) -> Result<()> {
        self.client.ensure_open()?;
        let app = &self.client.app;

        if app.repositories.get(id).await?.is_none() {
            return Err(Error::not_found(format!("repository {id}")));
        }

        app.queue
            .enqueue(
                &[Operation::Sync],
                PRIORITY_USER,
                &Payload::for_repository(id),
            )
            .await?;
        Ok(())
    }
}

pub struct Enrichments<'a> {
    client: &'a Client,
}

impl Enrichments<'_> {
    pub async fn for_commit(&self, commit_sha: &str) -> Result<Vec<Enrichment>> {
        self.client.ensure_open()?;
        self.client
            .app
            .enrichments
            .for_entity(EntityType::Commit, commit_sha, None)
            .await
    }

    pub async fn get(&self, id: &str) -> Result<Enrichment> {
        self.client.ensure_open()?;
        self.client
            .app
            .enrichments
            .get(id)
            .await?
            .ok_or_else(|| Error::not_found(format!("enrichment {id}")))
    }
}

pub struct Tasks<'a> {
    client: &'a Client,
}

impl Tasks<'_> {
    pub async fn list(&self) -> Result<Vec<Task>> {
        self.client.ensure_open()?;
        self.client.app.queue.list(&TaskFilter::default()).await
    }

    pub async fn get(&self, id: i64) -> Result<Task> {
        self.client.ensure_open()?;
        self.client
            .app
            .queue
            .get(id)
            .await?
            .ok_or_else(|| Error::not_found(format!("task {id}")))
    }

    pub async fn cancel(&self, id: i64) -> Result<()> {
        self.client.ensure_open()?;
        self.client.app.queue.cancel(id).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn new_without_storage_is_rejected() {
        let result = Client::new(ClientOptions::default()).await;
        assert!(matches!(result, Err(Error::NoStorage)));
    }

    #[tokio::test]
    async fn close_is_terminal() {
        let client = Client::new(ClientOptions::default().in_memory())
            .await
            .unwrap();

        client.close().await.unwrap();
        assert!(matches!(client.close().await, Err(Error::ClientClosed)));
        assert!(matches!(
            client.repositories().list().await,
            Err(Error::ClientClosed)
        ));
    }
}
