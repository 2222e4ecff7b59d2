use anyhow::{anyhow, Result};
use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::application::Application;
use crate::model::{Branch, Tag};
use crate::queue::Payload;
use crate::tracker::Tracker;

use super::{ensure_not_cancelled, required_repository, Handler, Outcome};

/// Update the working copy, recompute branches and tags, and enqueue the
/// scan chain for the commit the repository tracks.
///
/// The commit to index resolves in order: a pinned tracking commit, the
/// tracking branch's head, the default branch's head, the first branch's
/// head.
pub struct SyncHandler;

#[async_trait]
impl Handler for SyncHandler {
    async fn run(
        &self,
        app: &Application,
        payload: &Payload,
        tracker: &Tracker,
        cancel: &CancellationToken,
    ) -> Result<Outcome> {
        let repo = required_repository(app, payload).await?;

        let working_copy = repo
            .working_copy_path
            .clone()
            .ok_or_else(|| anyhow!("repository {} has no working copy", repo.id))?;
        if !working_copy.join(".git").exists() {
            return Err(anyhow!(
                "working copy {} has gone missing",
                working_copy.display()
            ));
        }

        ensure_not_cancelled(cancel)?;
        tracker.set_current(0, "updating working copy").await;
        app.git.update(&working_copy).await?;

        let branch_infos = app.git.branches(&working_copy).await?;
        let branches: Vec<Branch> = branch_infos
            .iter()
            .map(|info| Branch {
                repo_id: repo.id,
                name: info.name.clone(),
                head_sha: info.head_sha.clone(),
                is_default: info.is_default,
            })
            .collect();
        app.commits.replace_branches(repo.id, &branches).await?;

        let tag_infos = app.git.tags(&working_copy).await?;
        let tags: Vec<Tag> = tag_infos
            .iter()
            .map(|info| Tag {
                repo_id: repo.id,
                name: info.name.clone(),
                target_sha: info.target_sha.clone(),
                tagger: info.tagger.clone(),
            })
            .collect();
        app.commits.replace_tags(repo.id, &tags).await?;
        debug!(
            repo = repo.id,
            branches = branches.len(),
            tags = tags.len(),
            "refreshed refs"
        );

        let commit_sha = resolve_commit(&repo.tracking_commit, &repo.tracking_branch, &branches);
        let Some(commit_sha) = commit_sha else {
            return Ok(Outcome::halted("repository has no branches to index"));
        };

        app.repositories.touch_last_scanned(repo.id).await?;
        info!(repo = repo.id, commit = %commit_sha, "sync resolved commit to index");

        Ok(Outcome::completed_with(Payload::for_commit(
            repo.id,
            &commit_sha,
        )))
    }
}

fn resolve_commit(
    tracking_commit: &Option<String>,
    tracking_branch: &Option<String>,
    branches: &[Branch],
) -> Option<String> {
    if let Some(pinned) = tracking_commit {
        return Some(pinned.clone());
    }

    if let Some(tracked) = tracking_branch {
        if let Some(branch) = branches.iter().find(|b| &b.name == tracked) {
            return Some(branch.head_sha.clone());
        }
    }

    branches
        .iter()
        .find(|b| b.is_default)
        .or_else(|| branches.first())
        .map(|b| b.head_sha.clone())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn branch(name: &str, sha: &str, is_default: bool) -> Branch {
        Branch {
            repo_id: 1,
            name: name.into(),
            head_sha: sha.into(),
            is_default,
        }
    }

    #[test]
    fn pinned_commit_wins() {
        let branches = vec![branch("main", "head", true)];
        assert_eq!(
            resolve_commit(&Some("pinned".into()), &Some("main".into()), &branches),
            Some("pinned".into())
        );
    }

    #[test]
    fn tracking_branch_beats_default() {
        let branches = vec![branch("main", "m", true), branch("dev", "d", false)];
        assert_eq!(
            resolve_commit(&None, &Some("dev".into()), &branches),
            Some("d".into())
        );
    }

    #[test]
    fn falls_back_to_default_then_first() {
        let branches = vec![branch("a", "sha-a", false), branch("main", "sha-m", true)];
        assert_eq!(resolve_commit(&None, &None, &branches), Some("sha-m".into()));

        let no_default = vec![branch("only", "sha-o", false)];
        assert_eq!(resolve_commit(&None, &None, &no_default), Some("sha-o".into()));

        assert_eq!(resolve_commit(&None, &None, &[]), None);
    }
}
