use anyhow::Result;
use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::application::Application;
use crate::model::{Enrichment, EnrichmentSubkind, EntityType};
use crate::queue::Payload;
use crate::tracker::Tracker;

use super::{ensure_not_cancelled, required_commit_sha, Handler, Outcome};
use super::prompts;

/// Summarise every snippet of the commit that has no summary yet. Summaries
/// attach to the snippet, not the commit: a shared snippet is summarised
/// once no matter how many commits carry it.
pub struct SummaryEnrichmentHandler;

#[async_trait]
impl Handler for SummaryEnrichmentHandler {
    async fn run(
        &self,
        app: &Application,
        payload: &Payload,
        tracker: &Tracker,
        cancel: &CancellationToken,
    ) -> Result<Outcome> {
        let commit_sha = required_commit_sha(payload)?;
        let Some(provider) = &app.text_provider else {
            return Ok(Outcome::skipped("no text provider configured"));
        };

        let shas = app.snippets.shas_for_commit(&commit_sha).await?;
        if shas.is_empty() {
            return Ok(Outcome::skipped("no snippets for commit"));
        }

        let mut todo = vec![];
        for sha in &shas {
            let existing = app
                .enrichments
                .for_entity(
                    EntityType::Snippet,
                    sha,
                    Some(EnrichmentSubkind::SnippetSummary),
                )
                .await?;
            if existing.is_empty() {
                todo.push(sha.clone());
            }
        }

        if todo.is_empty() {
            return Ok(Outcome::skipped("all snippets already summarised"));
        }

        tracker.set_total(todo.len() as i64).await;
        let mut written = 0;

        for (i, sha) in todo.iter().enumerate() {
            ensure_not_cancelled(cancel)?;

            let Some(snippet) = app.snippets.get(sha).await? else {
                continue;
            };

            let prompt = prompts::snippet_summary(&snippet.extension, &snippet.content);
            let summary = match provider.generate_text(&prompt).await {
                Ok(summary) => summary,
                Err(err) => {
                    warn!(snippet = %sha, ?err, "summary generation failed, continuing");
                    continue;
                }
            };

            let enrichment = Enrichment::new(EnrichmentSubkind::SnippetSummary, summary);
            app.enrichments
                .save(&enrichment, &[(EntityType::Snippet, sha.clone())])
                .await?;
            written += 1;

            tracker
                .set_current((i + 1) as i64, format!("summarised {sha}"))
                .await;
        }

        info!(commit = %commit_sha, written, "snippet summaries created");
        Ok(Outcome::completed())
    }
}

/// Summarise each extracted example into a `usage/example_summary`
/// enrichment on the commit.
pub struct ExampleSummaryHandler;

#[async_trait]
impl Handler for ExampleSummaryHandler {
    async fn run(
        &self,
        app: &Application,
        payload: &Payload,
        tracker: &Tracker,
        cancel: &CancellationToken,
    ) -> Result<Outcome> {
        let commit_sha = required_commit_sha(payload)?;
        let Some(provider) = &app.text_provider else {
            return Ok(Outcome::skipped("no text provider configured"));
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

        let existing = app
            .enrichments
            .for_entity(
                EntityType::Commit,
                &commit_sha,
                Some(EnrichmentSubkind::ExampleSummary),
            )
            .await?;
        if !existing.is_empty() {
            return Ok(Outcome::skipped("examples already summarised"));
        }

        tracker.set_total(examples.len() as i64).await;
        let mut written = 0;

        for (i, example) in examples.iter().enumerate() {
            ensure_not_cancelled(cancel)?;

            let prompt = prompts::example_summary(&example.content);
            let summary = match provider.generate_text(&prompt).await {
                Ok(summary) => summary,
                Err(err) => {
                    warn!(example = %example.id, ?err, "example summary failed, continuing");
                    continue;
                }
            };

            let enrichment = Enrichment::new(EnrichmentSubkind::ExampleSummary, summary);
            app.enrichments
                .save(&enrichment, &[(EntityType::Commit, commit_sha.clone())])
                .await?;
            written += 1;

            tracker
                .set_current((i + 1) as i64, "summarising examples")
                .await;
        }

        info!(commit = %commit_sha, written, "example summaries created");
        Ok(Outcome::completed())
    }
}
