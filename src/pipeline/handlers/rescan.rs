use anyhow::Result;
use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::application::Application;
use crate::model::EntityType;
use crate::queue::Payload;
use crate::tracker::Tracker;

use super::{required_commit_sha, required_repository, Handler, Outcome};

/// Prepare a commit for re-indexing: old task statuses and the commit's
/// enrichments go away, the commit row and its snippets stay. The graph
/// re-enters at scan, which skips straight through to the fan-out.
pub struct RescanCommitHandler;

#[async_trait]
impl Handler for RescanCommitHandler {
    async fn run(
        &self,
        app: &Application,
        payload: &Payload,
        _tracker: &Tracker,
        _cancel: &CancellationToken,
    ) -> Result<Outcome> {
        let repo = required_repository(app, payload).await?;
        let commit_sha = required_commit_sha(payload)?;

        app.statuses.clear_for_trackable(&repo.id.to_string()).await?;
        let removed = app
            .enrichments
            .delete_for_entities(EntityType::Commit, &[commit_sha.clone()])
            .await?;

        info!(repo = repo.id, commit = %commit_sha, removed, "commit cleared for rescan");
        Ok(Outcome::completed())
    }
}
