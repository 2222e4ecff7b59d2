use anyhow::{anyhow, Result};
use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::application::Application;
use crate::indexes::VectorStore;
use crate::model::{EnrichmentSubkind, EntityType};
use crate::queue::Payload;
use crate::tracker::Tracker;

use super::{ensure_not_cancelled, required_commit_sha, Handler, Outcome};

const EMBED_BATCH_SIZE: usize = 32;

/// Embed `(doc_id, text)` pairs in batches and insert them into the vector
/// store. A failed provider batch is logged and skipped; a store error
/// (dimension mismatch above all) aborts.
async fn embed_and_index(
    app: &Application,
    store: &VectorStore,
    entries: &[(String, String)],
    tracker: &Tracker,
    cancel: &CancellationToken,
) -> Result<usize> {
    let provider = app
        .embedding_provider
        .as_ref()
        .ok_or_else(|| anyhow!("embedding provider disappeared mid-run"))?;

    tracker.set_total(entries.len() as i64).await;
    let mut indexed = 0;

    for batch in entries.chunks(EMBED_BATCH_SIZE) {
        ensure_not_cancelled(cancel)?;

        let texts: Vec<String> = batch.iter().map(|(_, text)| text.clone()).collect();
        let vectors = match provider.embed(&texts).await {
            Ok(vectors) => vectors,
            Err(err) => {
                warn!(?err, batch = batch.len(), "embedding batch failed, continuing");
                continue;
            }
        };

        let rows: Vec<(String, Vec<f32>)> = batch
            .iter()
            .map(|(doc_id, _)| doc_id.clone())
            .zip(vectors)
            .collect();

        indexed += store.index(&rows).await?;
        tracker
            .set_current(indexed as i64, format!("embedded {indexed} documents"))
            .await;
    }

    Ok(indexed)
}

/// Embed snippet bodies into the code vector space, keyed by snippet sha.
pub struct CodeEmbeddingsHandler;

#[async_trait]
impl Handler for CodeEmbeddingsHandler {
    async fn run(
        &self,
        app: &Application,
        payload: &Payload,
        tracker: &Tracker,
        cancel: &CancellationToken,
    ) -> Result<Outcome> {
        let commit_sha = required_commit_sha(payload)?;
        let Some(store) = &app.code_vectors else {
            return Ok(Outcome::skipped("no embedding provider configured"));
        };

        let shas = app.snippets.shas_for_commit(&commit_sha).await?;
        if shas.is_empty() {
            return Ok(Outcome::skipped("no snippets for commit"));
        }

        let missing = store.missing(&shas).await?;
        if missing.is_empty() {
            return Ok(Outcome::skipped("all code embeddings already present"));
        }

        let mut entries = Vec::with_capacity(missing.len());
        for sha in &missing {
            if let Some(snippet) = app.snippets.get(sha).await? {
                entries.push((snippet.sha, snippet.content));
            }
        }

        let indexed = embed_and_index(app, store, &entries, tracker, cancel).await?;
        info!(commit = %commit_sha, indexed, "code embeddings created");
        Ok(Outcome::completed())
    }
}

/// Embed example enrichments into the code vector space under
/// `enrichment:<id>` doc ids; examples are not snippets.
pub struct ExampleCodeEmbeddingsHandler;

#[async_trait]
impl Handler for ExampleCodeEmbeddingsHandler {
    async fn run(
        &self,
        app: &Application,
        payload: &Payload,
        tracker: &Tracker,
        cancel: &CancellationToken,
    ) -> Result<Outcome> {
        let commit_sha = required_commit_sha(payload)?;
        let Some(store) = &app.code_vectors else {
            return Ok(Outcome::skipped("no embedding provider configured"));
        };

        let examples = app
            .enrichments
            .for_entity(
                EntityType::Commit,
                &commit_sha,
                Some(EnrichmentSubkind::Example),
            )
            .await?;
        if examples.is_empty() {
            return Ok(Outcome::skipped("no examples for commit"));
        }

        let mut entries = vec![];
        for example in &examples {
            let doc_id = example.doc_id();
            if !store.contains(&doc_id).await? {
                entries.push((doc_id, example.content.clone()));
            }
        }
        if entries.is_empty() {
            return Ok(Outcome::skipped("all example code embeddings already present"));
        }

        let indexed = embed_and_index(app, store, &entries, tracker, cancel).await?;
        info!(commit = %commit_sha, indexed, "example code embeddings created");
        Ok(Outcome::completed())
    }
}

/// Embed snippet summaries into the text vector space, keyed by the
/// summarised snippet's sha so semantic hits resolve straight to snippets.
pub struct SummaryEmbeddingsHandler;

#[async_trait]
impl Handler for SummaryEmbeddingsHandler {
    async fn run(
        &self,
        app: &Application,
        payload: &Payload,
        tracker: &Tracker,
        cancel: &CancellationToken,
    ) -> Result<Outcome> {
        let commit_sha = required_commit_sha(payload)?;
        let Some(store) = &app.text_vectors else {
            return Ok(Outcome::skipped("no embedding provider configured"));
        };

        let shas = app.snippets.shas_for_commit(&commit_sha).await?;
        if shas.is_empty() {
            return Ok(Outcome::skipped("no snippets for commit"));
        }

        let mut entries = vec![];
        for sha in &shas {
            let summaries = app
                .enrichments
                .for_entity(
                    EntityType::Snippet,
                    sha,
                    Some(EnrichmentSubkind::SnippetSummary),
                )
                .await?;
            let Some(summary) = summaries.first() else {
                continue;
            };
            if !store.contains(sha).await? {
                entries.push((sha.clone(), summary.content.clone()));
            }
        }

        if entries.is_empty() {
            return Ok(Outcome::skipped(
                "all summary enrichments already have embeddings",
            ));
        }

        let indexed = embed_and_index(app, store, &entries, tracker, cancel).await?;
        info!(commit = %commit_sha, indexed, "summary embeddings created");
        Ok(Outcome::completed())
    }
}

/// Embed example summaries into the text vector space under
/// `enrichment:<id>` doc ids.
pub struct ExampleSummaryEmbeddingsHandler;

#[async_trait]
impl Handler for ExampleSummaryEmbeddingsHandler {
    async fn run(
        &self,
        app: &Application,
        payload: &Payload,
        tracker: &Tracker,
        cancel: &CancellationToken,
    ) -> Result<Outcome> {
        let commit_sha = required_commit_sha(payload)?;
        let Some(store) = &app.text_vectors else {
            return Ok(Outcome::skipped("no embedding provider configured"));
        };

        let summaries = app
            .enrichments
            .for_entity(
                EntityType::Commit,
                &commit_sha,
                Some(EnrichmentSubkind::ExampleSummary),
            )
            .await?;
        if summaries.is_empty() {
            return Ok(Outcome::skipped("no example summaries for commit"));
        }

        let mut entries = vec![];
        for summary in &summaries {
            let doc_id = summary.doc_id();
            if !store.contains(&doc_id).await? {
                entries.push((doc_id, summary.content.clone()));
            }
        }
        if entries.is_empty() {
            return Ok(Outcome::skipped(
                "all example summary embeddings already present",
            ));
        }

        let indexed = embed_and_index(app, store, &entries, tracker, cancel).await?;
        info!(commit = %commit_sha, indexed, "example summary embeddings created");
        Ok(Outcome::completed())
    }
}
