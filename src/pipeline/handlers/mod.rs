mod bm25;
mod clone;
mod commit_docs;
mod delete;
mod embeddings;
mod examples;
mod prompts;
mod rescan;
mod scan;
mod snippets;
mod summaries;
mod sync;

use std::collections::HashMap;
use std::sync::Arc;

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::application::Application;
use crate::model::Repository;
use crate::pipeline::graph::Operation;
use crate::queue::Payload;
use crate::tracker::Tracker;

/// What a handler reports back to the worker. Completed and skipped both
/// count as "finished without fatal error", so both enqueue the graph
/// successors; only an Err return stops the chain.
#[derive(Debug)]
pub struct Outcome {
    pub status: OutcomeStatus,
    pub next_payload: Option<Payload>,
    /// Suppress successor enqueueing even though the handler did not fail.
    /// Used when there is nothing downstream could work on, e.g. a sync
    /// that found no branches.
    pub halt: bool,
}

#[derive(Debug, PartialEq, Eq)]
pub enum OutcomeStatus {
    Completed,
    Skipped(String),
}

impl Outcome {
    pub fn completed() -> Self {
        Self {
            status: OutcomeStatus::Completed,
            next_payload: None,
            halt: false,
        }
    }

    pub fn completed_with(payload: Payload) -> Self {
        Self {
            status: OutcomeStatus::Completed,
            next_payload: Some(payload),
            halt: false,
        }
    }

    pub fn skipped(reason: impl Into<String>) -> Self {
        Self {
            status: OutcomeStatus::Skipped(reason.into()),
            next_payload: None,
            halt: false,
        }
    }

    pub fn halted(reason: impl Into<String>) -> Self {
        Self {
            status: OutcomeStatus::Skipped(reason.into()),
            next_payload: None,
            halt: true,
        }
    }
}

/// One queue operation's implementation. Handlers are idempotent: re-running
/// against already-done work reports skipped rather than duplicating rows.
#[async_trait]
pub trait Handler: Send + Sync {
    async fn run(
        &self,
        app: &Application,
        payload: &Payload,
        tracker: &Tracker,
        cancel: &CancellationToken,
    ) -> Result<Outcome>;
}

/// Maps each operation to its handler. Built once at pool start.
pub struct HandlerRegistry {
    handlers: HashMap<Operation, Arc<dyn Handler>>,
}

impl HandlerRegistry {
    pub fn full() -> Self {
        let mut handlers: HashMap<Operation, Arc<dyn Handler>> = HashMap::new();

        handlers.insert(Operation::Clone, Arc::new(clone::CloneHandler));
        handlers.insert(Operation::Sync, Arc::new(sync::SyncHandler));
        handlers.insert(Operation::ScanCommit, Arc::new(scan::ScanCommitHandler));
        handlers.insert(
            Operation::ExtractSnippetsForCommit,
            Arc::new(snippets::ExtractSnippetsHandler),
        );
        handlers.insert(
            Operation::ExtractExamplesForCommit,
            Arc::new(examples::ExtractExamplesHandler),
        );
        handlers.insert(
            Operation::CreateBm25IndexForCommit,
            Arc::new(bm25::CreateBm25IndexHandler),
        );
        handlers.insert(
            Operation::CreateCodeEmbeddingsForCommit,
            Arc::new(embeddings::CodeEmbeddingsHandler),
        );
        handlers.insert(
            Operation::CreateExampleCodeEmbeddingsForCommit,
            Arc::new(embeddings::ExampleCodeEmbeddingsHandler),
        );
        handlers.insert(
            Operation::CreateSummaryEnrichmentForCommit,
            Arc::new(summaries::SummaryEnrichmentHandler),
        );
        handlers.insert(
            Operation::CreateExampleSummaryForCommit,
            Arc::new(summaries::ExampleSummaryHandler),
        );
        handlers.insert(
            Operation::CreateSummaryEmbeddingsForCommit,
            Arc::new(embeddings::SummaryEmbeddingsHandler),
        );
        handlers.insert(
            Operation::CreateExampleSummaryEmbeddingsForCommit,
            Arc::new(embeddings::ExampleSummaryEmbeddingsHandler),
        );
        handlers.insert(
            Operation::CreateArchitectureEnrichmentForCommit,
            Arc::new(commit_docs::ArchitectureHandler),
        );
        handlers.insert(
            Operation::CreatePublicApiDocsForCommit,
            Arc::new(commit_docs::PublicApiDocsHandler),
        );
        handlers.insert(
            Operation::CreateCommitDescriptionForCommit,
            Arc::new(commit_docs::CommitDescriptionHandler),
        );
        handlers.insert(
            Operation::CreateDatabaseSchemaForCommit,
            Arc::new(commit_docs::DatabaseSchemaHandler),
        );
        handlers.insert(
            Operation::CreateCookbookForCommit,
            Arc::new(commit_docs::CookbookHandler),
        );
        handlers.insert(
            Operation::DeleteRepository,
            Arc::new(delete::DeleteRepositoryHandler),
        );
        handlers.insert(Operation::RescanCommit, Arc::new(rescan::RescanCommitHandler));

        Self { handlers }
    }

    pub fn get(&self, operation: Operation) -> Option<Arc<dyn Handler>> {
        self.handlers.get(&operation).cloned()
    }
}

/// Payload helpers shared by every handler.
pub(crate) async fn required_repository(
    app: &Application,
    payload: &Payload,
) -> Result<Repository> {
    let repo_id = payload
        .repository_id()
        .ok_or_else(|| anyhow!("payload is missing repository_id"))?;
    app.repositories
        .get(repo_id)
        .await?
        .ok_or_else(|| anyhow!("repository {repo_id} does not exist"))
}

pub(crate) fn required_commit_sha(payload: &Payload) -> Result<String> {
    payload
        .commit_sha()
        .map(str::to_owned)
        .ok_or_else(|| anyhow!("payload is missing commit_sha"))
}

pub(crate) fn ensure_not_cancelled(cancel: &CancellationToken) -> Result<()> {
    if cancel.is_cancelled() {
        return Err(anyhow!("cancelled"));
    }
    Ok(())
}
