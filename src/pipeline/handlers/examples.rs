use anyhow::{anyhow, Result};
use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::application::Application;
use crate::chunking::markdown_code_blocks;
use crate::model::{Enrichment, EnrichmentSubkind, EntityType};
use crate::queue::Payload;
use crate::tracker::Tracker;

use super::{ensure_not_cancelled, required_commit_sha, required_repository, Handler, Outcome};

const MAX_EXAMPLE_BYTES: i64 = 64 * 1024;

/// Harvest usage examples from the commit: files under example-ish
/// directories, plus fenced code blocks in Markdown docs. Each one becomes
/// a `usage/example` enrichment on the commit; their embeddings are indexed
/// later under `enrichment:<id>` doc ids.
pub struct ExtractExamplesHandler;

#[async_trait]
impl Handler for ExtractExamplesHandler {
    async fn run(
        &self,
        app: &Application,
        payload: &Payload,
        tracker: &Tracker,
        cancel: &CancellationToken,
    ) -> Result<Outcome> {
        let repo = required_repository(app, payload).await?;
        let commit_sha = required_commit_sha(payload)?;

        let existing = app
            .enrichments
            .for_entity(
                EntityType::Commit,
                &commit_sha,
                Some(EnrichmentSubkind::Example),
            )
            .await?;
        if !existing.is_empty() {
            return Ok(Outcome::skipped("examples already extracted for commit"));
        }

        let working_copy = repo
            .working_copy_path
            .clone()
            .ok_or_else(|| anyhow!("repository {} has no working copy", repo.id))?;

        let files = app.commits.files_for_commit(&commit_sha).await?;
        tracker.set_total(files.len() as i64).await;

        let mut saved = 0;
        for (i, file) in files.iter().enumerate() {
            ensure_not_cancelled(cancel)?;
            tracker
                .set_current((i + 1) as i64, format!("inspecting {}", file.path))
                .await;

            if file.size > MAX_EXAMPLE_BYTES {
                continue;
            }

            let is_markdown = matches!(file.extension.as_str(), "md" | "markdown");
            if !is_markdown && !is_example_path(&file.path) {
                continue;
            }

            let raw = match app.git.read_file(&working_copy, &commit_sha, &file.path).await {
                Ok(raw) => raw,
                Err(err) => {
                    warn!(path = %file.path, ?err, "failed to read example source");
                    continue;
                }
            };
            let Ok(content) = String::from_utf8(raw) else {
                continue;
            };

            let examples = if is_markdown {
                markdown_code_blocks(&content)
            } else {
                vec![content]
            };

            for example in examples {
                if example.trim().is_empty() {
                    continue;
                }
                let enrichment = Enrichment::new(EnrichmentSubkind::Example, example);
                app.enrichments
                    .save(
                        &enrichment,
                        &[(EntityType::Commit, commit_sha.clone())],
                    )
                    .await?;
                saved += 1;
            }
        }

        info!(commit = %commit_sha, examples = saved, "examples extracted");
        Ok(Outcome::completed())
    }
}

fn is_example_path(path: &str) -> bool {
    path.split('/').any(|segment| {
        let segment = segment.to_lowercase();
        segment == "examples" || segment == "example" || segment == "demos" || segment == "demo"
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn example_paths_are_detected_by_directory_segment() {
        assert!(is_example_path("examples/hello.rs"));
        assert!(is_example_path("pkg/demo/run.py"));
        assert!(!is_example_path("src/sampler.rs"));
        assert!(!is_example_path("exampleish/file.rs"));
    }
}
