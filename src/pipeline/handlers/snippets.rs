use std::collections::HashMap;

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::application::Application;
use crate::model::Snippet;
use crate::queue::Payload;
use crate::store::snippets::ExtractedSnippet;
use crate::tracker::Tracker;

use super::{ensure_not_cancelled, required_commit_sha, required_repository, Handler, Outcome};

/// Files above this size are skipped; generated bundles and vendored blobs
/// drown the index without adding searchable semantics.
const MAX_FILE_SIZE: i64 = 1024 * 1024;

/// Slice every file of the commit into snippets and persist them
/// content-addressed. Per-file failures are logged and skipped; one
/// unsliceable language must not sink the whole commit.
pub struct ExtractSnippetsHandler;

#[async_trait]
impl Handler for ExtractSnippetsHandler {
    async fn run(
        &self,
        app: &Application,
        payload: &Payload,
        tracker: &Tracker,
        cancel: &CancellationToken,
    ) -> Result<Outcome> {
        let repo = required_repository(app, payload).await?;
        let commit_sha = required_commit_sha(payload)?;

        if app.snippets.exists_for_commit(&commit_sha).await? {
            return Ok(Outcome::skipped("snippets already extracted for commit"));
        }

        let working_copy = repo
            .working_copy_path
            .clone()
            .ok_or_else(|| anyhow!("repository {} has no working copy", repo.id))?;

        let files = app.commits.files_for_commit(&commit_sha).await?;
        tracker.set_total(files.len() as i64).await;

        // content-addressing collapses identical fragments from different
        // files into one entry carrying all derivations
        let mut by_sha: HashMap<String, ExtractedSnippet> = HashMap::new();

        for (i, file) in files.iter().enumerate() {
            ensure_not_cancelled(cancel)?;
            tracker
                .set_current((i + 1) as i64, format!("slicing {}", file.path))
                .await;

            if file.size > MAX_FILE_SIZE || file.extension.is_empty() {
                continue;
            }

            let raw = match app.git.read_file(&working_copy, &commit_sha, &file.path).await {
                Ok(raw) => raw,
                Err(err) => {
                    warn!(path = %file.path, ?err, "failed to read file, skipping");
                    continue;
                }
            };
            let Ok(content) = String::from_utf8(raw) else {
                continue; // binary
            };

            let fragments = app.extractor.extract(&file.path, &content, &file.extension);
            for fragment in fragments {
                let snippet = Snippet::new(fragment, &file.extension);
                by_sha
                    .entry(snippet.sha.clone())
                    .or_insert_with(|| ExtractedSnippet {
                        snippet,
                        file_ids: vec![],
                    })
                    .file_ids
                    .push(file.id);
            }
        }

        let extracted: Vec<ExtractedSnippet> = by_sha.into_values().collect();
        if extracted.is_empty() {
            return Ok(Outcome::completed());
        }

        app.snippets.save(&commit_sha, &extracted).await?;
        info!(
            commit = %commit_sha,
            snippets = extracted.len(),
            "snippets extracted"
        );
        Ok(Outcome::completed())
    }
}
