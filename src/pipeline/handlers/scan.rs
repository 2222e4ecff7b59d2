use anyhow::{anyhow, Result};
use async_trait::async_trait;
use chrono::Utc;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::application::Application;
use crate::model::Commit;
use crate::queue::Payload;
use crate::store::commits::NewFile;
use crate::tracker::Tracker;

use super::{ensure_not_cancelled, required_commit_sha, required_repository, Handler, Outcome};

/// Persist a commit's metadata and file listing. A commit that is already
/// in the store short-circuits to skipped; the fan-out still runs so a
/// rescan can rebuild downstream artifacts.
pub struct ScanCommitHandler;

#[async_trait]
impl Handler for ScanCommitHandler {
    async fn run(
        &self,
        app: &Application,
        payload: &Payload,
        tracker: &Tracker,
        cancel: &CancellationToken,
    ) -> Result<Outcome> {
        let repo = required_repository(app, payload).await?;
        let commit_sha = required_commit_sha(payload)?;

        if app.commits.exists(repo.id, &commit_sha).await? {
            return Ok(Outcome::skipped("commit already scanned"));
        }

        let working_copy = repo
            .working_copy_path
            .clone()
            .ok_or_else(|| anyhow!("repository {} has no working copy", repo.id))?;

        ensure_not_cancelled(cancel)?;

        let info = app.git.commit_info(&working_copy, &commit_sha).await?;
        app.commits
            .save(&Commit {
                repo_id: repo.id,
                sha: info.sha.clone(),
                author: info.author,
                message: info.message,
                parent_sha: info.parent_sha,
                authored_at: info.authored_at,
                created_at: Utc::now(),
            })
            .await?;

        let entries = app.git.list_files(&working_copy, &commit_sha).await?;
        tracker.set_total(entries.len() as i64).await;

        let mut files = Vec::with_capacity(entries.len());
        for (i, entry) in entries.iter().enumerate() {
            ensure_not_cancelled(cancel)?;

            let extension = entry
                .path
                .rsplit_once('.')
                .map(|(_, ext)| ext.to_lowercase())
                .unwrap_or_default();
            let mime = mime_guess::from_path(&entry.path)
                .first_or_octet_stream()
                .to_string();

            files.push(NewFile {
                path: entry.path.clone(),
                blob_sha: entry.blob_sha.clone(),
                mime,
                extension,
                size: entry.size,
            });

            tracker
                .set_current((i + 1) as i64, format!("scanned {}", entry.path))
                .await;
        }

        app.commits.save_files(repo.id, &commit_sha, &files).await?;
        info!(repo = repo.id, commit = %commit_sha, files = files.len(), "commit scanned");

        Ok(Outcome::completed())
    }
}
