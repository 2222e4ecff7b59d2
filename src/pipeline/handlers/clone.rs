use anyhow::Result;
use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::application::Application;
use crate::queue::Payload;
use crate::tracker::Tracker;

use super::{ensure_not_cancelled, required_repository, Handler, Outcome};

/// Clone the remote into the data dir and persist the working copy path.
/// A repository that already has a live working copy is skipped; sync picks
/// it up from there.
pub struct CloneHandler;

#[async_trait]
impl Handler for CloneHandler {
    async fn run(
        &self,
        app: &Application,
        payload: &Payload,
        tracker: &Tracker,
        cancel: &CancellationToken,
    ) -> Result<Outcome> {
        let repo = required_repository(app, payload).await?;

        if let Some(existing) = &repo.working_copy_path {
            if existing.join(".git").exists() {
                return Ok(Outcome::skipped(format!(
                    "already cloned at {}",
                    existing.display()
                )));
            }
        }

        ensure_not_cancelled(cancel)?;

        let target = app.config.clone_target(&repo.sanitized_url);
        tracker.set_current(0, format!("cloning {}", repo.sanitized_url)).await;

        let working_copy = app.git.clone_repository(&repo.remote_url, &target).await?;
        app.repositories
            .set_working_copy(repo.id, &working_copy)
            .await?;

        info!(repo = %repo.sanitized_url, path = %working_copy.display(), "cloned repository");
        Ok(Outcome::completed())
    }
}
