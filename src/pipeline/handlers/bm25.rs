use anyhow::Result;
use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::application::Application;
use crate::indexes::Document;
use crate::queue::Payload;
use crate::tracker::Tracker;

use super::{ensure_not_cancelled, required_commit_sha, Handler, Outcome};

/// Feed the commit's snippets into the keyword index. The index refuses
/// ids it has seen, so re-running is naturally a no-op.
pub struct CreateBm25IndexHandler;

#[async_trait]
impl Handler for CreateBm25IndexHandler {
    async fn run(
        &self,
        app: &Application,
        payload: &Payload,
        tracker: &Tracker,
        cancel: &CancellationToken,
    ) -> Result<Outcome> {
        let commit_sha = required_commit_sha(payload)?;

        let shas = app.snippets.shas_for_commit(&commit_sha).await?;
        if shas.is_empty() {
            return Ok(Outcome::skipped("no snippets to index for commit"));
        }

        ensure_not_cancelled(cancel)?;
        tracker.set_total(shas.len() as i64).await;

        let mut documents = Vec::with_capacity(shas.len());
        for (i, sha) in shas.iter().enumerate() {
            if let Some(snippet) = app.snippets.get(sha).await? {
                documents.push(Document {
                    id: snippet.sha,
                    text: snippet.content,
                });
            }
            tracker.set_current((i + 1) as i64, "collecting snippets").await;
        }

        let added = app.bm25.index(&documents).await?;
        if added == 0 {
            return Ok(Outcome::skipped("all snippets already in the keyword index"));
        }

        info!(commit = %commit_sha, added, "bm25 index updated");
        Ok(Outcome::completed())
    }
}
