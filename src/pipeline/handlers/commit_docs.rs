use anyhow::Result;
use async_trait::async_trait;
use std::path::Path;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::application::Application;
use crate::model::{Enrichment, EnrichmentSubkind, EntityType, SourceFile};
use crate::queue::Payload;
use crate::tracker::Tracker;

use super::prompts;
use super::{ensure_not_cancelled, required_commit_sha, required_repository, Handler, Outcome};

/// LLM inputs are capped; a giant diff or vendored schema dump gets cut
/// with a visible notice rather than blowing the context window.
const MAX_INPUT_BYTES: usize = 100_000;
const TRUNCATION_NOTICE: &str = "\n\n[input truncated]";

fn truncate_input(mut input: String) -> String {
    if input.len() > MAX_INPUT_BYTES {
        let mut cut = MAX_INPUT_BYTES;
        while !input.is_char_boundary(cut) {
            cut -= 1;
        }
        input.truncate(cut);
        input.push_str(TRUNCATION_NOTICE);
    }
    input
}

/// True when a commit-level enrichment of this subkind already exists.
async fn already_enriched(
    app: &Application,
    commit_sha: &str,
    subkind: EnrichmentSubkind,
) -> Result<bool> {
    Ok(!app
        .enrichments
        .for_entity(EntityType::Commit, commit_sha, Some(subkind))
        .await?
        .is_empty())
}

async fn persist_commit_doc(
    app: &Application,
    commit_sha: &str,
    subkind: EnrichmentSubkind,
    content: String,
) -> Result<()> {
    let enrichment = Enrichment::new(subkind, content);
    app.enrichments
        .save(&enrichment, &[(EntityType::Commit, commit_sha.to_owned())])
        .await?;
    Ok(())
}

async fn read_text_file(
    app: &Application,
    working_copy: &Path,
    commit_sha: &str,
    path: &str,
) -> Option<String> {
    match app.git.read_file(working_copy, commit_sha, path).await {
        Ok(raw) => String::from_utf8(raw).ok(),
        Err(err) => {
            warn!(path, ?err, "failed to read file for enrichment input");
            None
        }
    }
}

/// Concatenate a set of files as `== path ==` sections.
async fn gather_files(
    app: &Application,
    working_copy: &Path,
    commit_sha: &str,
    files: &[&SourceFile],
) -> String {
    let mut sections = vec![];
    for file in files.iter().take(10) {
        if let Some(content) = read_text_file(app, working_copy, commit_sha, &file.path).await {
            sections.push(format!("== {} ==\n{}", file.path, content));
        }
    }
    sections.join("\n\n")
}

/// Describe what the commit changed, from its diff.
pub struct CommitDescriptionHandler;

#[async_trait]
impl Handler for CommitDescriptionHandler {
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
        if already_enriched(app, &commit_sha, EnrichmentSubkind::CommitDescription).await? {
            return Ok(Outcome::skipped("commit already described"));
        }

        let repo = required_repository(app, payload).await?;
        let working_copy = repo
            .working_copy_path
            .clone()
            .ok_or_else(|| anyhow::anyhow!("repository {} has no working copy", repo.id))?;
        let commit = app
            .commits
            .get(repo.id, &commit_sha)
            .await?
            .ok_or_else(|| anyhow::anyhow!("commit {commit_sha} not scanned yet"))?;

        ensure_not_cancelled(cancel)?;
        tracker.set_current(0, "rendering diff").await;

        let diff = truncate_input(app.git.diff(&working_copy, &commit_sha).await?);
        let description = provider
            .generate_text(&prompts::commit_description(&commit.message, &diff))
            .await?;

        persist_commit_doc(
            app,
            &commit_sha,
            EnrichmentSubkind::CommitDescription,
            description,
        )
        .await?;
        info!(commit = %commit_sha, "commit description created");
        Ok(Outcome::completed())
    }
}

/// Physical-architecture notes, from container and deployment files.
pub struct ArchitectureHandler;

#[async_trait]
impl Handler for ArchitectureHandler {
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
        if already_enriched(app, &commit_sha, EnrichmentSubkind::Physical).await? {
            return Ok(Outcome::skipped("architecture already described"));
        }

        let repo = required_repository(app, payload).await?;
        let working_copy = repo
            .working_copy_path
            .clone()
            .ok_or_else(|| anyhow::anyhow!("repository {} has no working copy", repo.id))?;

        let files = app.commits.files_for_commit(&commit_sha).await?;
        let deployment: Vec<&SourceFile> = files
            .iter()
            .filter(|file| {
                let name = file.path.rsplit('/').next().unwrap_or(&file.path).to_lowercase();
                name == "dockerfile"
                    || name.starts_with("dockerfile.")
                    || name.starts_with("docker-compose")
                    || name == "compose.yaml"
                    || name == "compose.yml"
            })
            .collect();

        if deployment.is_empty() {
            return Ok(Outcome::skipped("no deployment files in commit"));
        }

        ensure_not_cancelled(cancel)?;
        tracker.set_current(0, "collecting deployment files").await;

        let inputs = truncate_input(gather_files(app, &working_copy, &commit_sha, &deployment).await);
        let description = provider
            .generate_text(&prompts::architecture(&inputs))
            .await?;

        persist_commit_doc(app, &commit_sha, EnrichmentSubkind::Physical, description).await?;
        info!(commit = %commit_sha, "architecture enrichment created");
        Ok(Outcome::completed())
    }
}

/// API docs from the public signatures visible in the commit's snippets.
pub struct PublicApiDocsHandler;

#[async_trait]
impl Handler for PublicApiDocsHandler {
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
        if already_enriched(app, &commit_sha, EnrichmentSubkind::ApiDocs).await? {
            return Ok(Outcome::skipped("api docs already generated"));
        }

        let shas = app.snippets.shas_for_commit(&commit_sha).await?;
        let mut signatures = vec![];
        for sha in &shas {
            let Some(snippet) = app.snippets.get(sha).await? else {
                continue;
            };
            signatures.extend(public_signatures(&snippet.content));
        }

        if signatures.is_empty() {
            return Ok(Outcome::skipped("no public interfaces in commit"));
        }

        ensure_not_cancelled(cancel)?;
        tracker.set_current(0, "collecting public signatures").await;

        signatures.sort();
        signatures.dedup();
        let input = truncate_input(signatures.join("\n"));
        let docs = provider.generate_text(&prompts::api_docs(&input)).await?;

        persist_commit_doc(app, &commit_sha, EnrichmentSubkind::ApiDocs, docs).await?;
        info!(commit = %commit_sha, "api docs created");
        Ok(Outcome::completed())
    }
}

/// Database schema notes, from sql and migration files.
pub struct DatabaseSchemaHandler;

#[async_trait]
impl Handler for DatabaseSchemaHandler {
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
        if already_enriched(app, &commit_sha, EnrichmentSubkind::DatabaseSchema).await? {
            return Ok(Outcome::skipped("schema already described"));
        }

        let repo = required_repository(app, payload).await?;
        let working_copy = repo
            .working_copy_path
            .clone()
            .ok_or_else(|| anyhow::anyhow!("repository {} has no working copy", repo.id))?;

        let files = app.commits.files_for_commit(&commit_sha).await?;
        let schema_files: Vec<&SourceFile> = files
            .iter()
            .filter(|file| {
                file.extension == "sql" || file.path.split('/').any(|s| s == "migrations")
            })
            .collect();

        if schema_files.is_empty() {
            return Ok(Outcome::skipped("no schema files in commit"));
        }

        ensure_not_cancelled(cancel)?;
        tracker.set_current(0, "collecting schema files").await;

        let inputs =
            truncate_input(gather_files(app, &working_copy, &commit_sha, &schema_files).await);
        let summary = provider
            .generate_text(&prompts::database_schema(&inputs))
            .await?;

        persist_commit_doc(app, &commit_sha, EnrichmentSubkind::DatabaseSchema, summary).await?;
        info!(commit = %commit_sha, "database schema enrichment created");
        Ok(Outcome::completed())
    }
}

/// A getting-started cookbook from the README and manifests.
pub struct CookbookHandler;

#[async_trait]
impl Handler for CookbookHandler {
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
        if already_enriched(app, &commit_sha, EnrichmentSubkind::Cookbook).await? {
            return Ok(Outcome::skipped("cookbook already generated"));
        }

        let repo = required_repository(app, payload).await?;
        let working_copy = repo
            .working_copy_path
            .clone()
            .ok_or_else(|| anyhow::anyhow!("repository {} has no working copy", repo.id))?;

        let files = app.commits.files_for_commit(&commit_sha).await?;
        let sources: Vec<&SourceFile> = files
            .iter()
            .filter(|file| {
                let name = file.path.rsplit('/').next().unwrap_or(&file.path).to_lowercase();
                name.starts_with("readme")
                    || matches!(
                        name.as_str(),
                        "cargo.toml"
                            | "package.json"
                            | "pyproject.toml"
                            | "setup.py"
                            | "go.mod"
                            | "makefile"
                    )
            })
            .collect();

        if sources.is_empty() {
            return Ok(Outcome::skipped("no readme or manifest in commit"));
        }

        ensure_not_cancelled(cancel)?;
        tracker.set_current(0, "collecting readme and manifests").await;

        let inputs = truncate_input(gather_files(app, &working_copy, &commit_sha, &sources).await);
        let cookbook = provider.generate_text(&prompts::cookbook(&inputs)).await?;

        persist_commit_doc(app, &commit_sha, EnrichmentSubkind::Cookbook, cookbook).await?;
        info!(commit = %commit_sha, "cookbook created");
        Ok(Outcome::completed())
    }
}

/// Lines that look like public interface declarations across the languages
/// we slice.
fn public_signatures(content: &str) -> Vec<String> {
    content
        .lines()
        .map(str::trim)
        .filter(|line| {
            line.starts_with("pub fn ")
                || line.starts_with("pub struct ")
                || line.starts_with("pub enum ")
                || line.starts_with("pub trait ")
                || line.starts_with("def ")
                || line.starts_with("class ")
                || line.starts_with("func ")
                || line.starts_with("export ")
                || line.starts_with("public ")
        })
        .map(|line| line.trim_end_matches('{').trim_end().to_owned())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn truncation_appends_a_notice() {
        let long = "x".repeat(MAX_INPUT_BYTES + 10);
        let truncated = truncate_input(long);
        assert!(truncated.ends_with(TRUNCATION_NOTICE));
        assert!(truncated.len() <= MAX_INPUT_BYTES + TRUNCATION_NOTICE.len());
    }

    #[test]
    fn short_input_is_untouched() {
        assert_eq!(truncate_input("short".into()), "short");
    }

    #[test]
    fn signature_lines_are_collected() {
        let code = "pub fn add(a: i32) -> i32 {\n    a\n}\nfn private() {}\ndef subtract(a, b):\n";
        let signatures = public_signatures(code);
        assert_eq!(
            signatures,
            vec!["pub fn add(a: i32) -> i32", "def subtract(a, b):"]
        );
    }
}
