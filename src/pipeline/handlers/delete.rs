use anyhow::Result;
use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::application::Application;
use crate::model::EntityType;
use crate::queue::Payload;
use crate::tracker::Tracker;

use super::{required_repository, Handler, Outcome};

/// Tear a repository down: drain its pending tasks, remove commit-bound
/// enrichments and snippet associations, delete the working copy and let
/// the FK cascade take the rest.
pub struct DeleteRepositoryHandler;

#[async_trait]
impl Handler for DeleteRepositoryHandler {
    async fn run(
        &self,
        app: &Application,
        payload: &Payload,
        tracker: &Tracker,
        _cancel: &CancellationToken,
    ) -> Result<Outcome> {
        let repo = required_repository(app, payload).await?;

        let drained = app.queue.drain_for_repository(repo.id).await?;
        tracker
            .set_current(0, format!("drained {drained} pending tasks"))
            .await;

        let commit_shas: Vec<String> = app
            .commits
            .for_repository(repo.id)
            .await?
            .into_iter()
            .map(|commit| commit.sha)
            .collect();

        app.enrichments
            .delete_for_entities(EntityType::Commit, &commit_shas)
            .await?;
        app.snippets
            .delete_associations_for_commits(&commit_shas)
            .await?;

        if let Some(working_copy) = &repo.working_copy_path {
            if let Err(err) = tokio::fs::remove_dir_all(working_copy).await {
                if err.kind() != std::io::ErrorKind::NotFound {
                    warn!(?err, path = %working_copy.display(), "failed to remove working copy");
                }
            }
        }

        app.statuses.clear_for_trackable(&repo.id.to_string()).await?;
        app.repositories.delete(repo.id).await?;

        info!(repo = repo.id, commits = commit_shas.len(), "repository deleted");
        Ok(Outcome::completed())
    }
}
