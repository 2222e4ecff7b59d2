use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use thiserror::Error;
use tokio::process::Command;
use tracing::debug;

#[derive(Debug, Error)]
pub enum GitError {
    #[error("failed to spawn git: {0}")]
    Spawn(#[from] std::io::Error),

    #[error("git {command} failed: {stderr}")]
    Command { command: String, stderr: String },

    #[error("malformed git output: {0}")]
    Parse(String),
}

#[derive(Debug, Clone)]
pub struct BranchInfo {
    pub name: String,
    pub head_sha: String,
    pub is_default: bool,
}

#[derive(Debug, Clone)]
pub struct TagInfo {
    pub name: String,
    pub target_sha: String,
    pub tagger: Option<String>,
}

#[derive(Debug, Clone)]
pub struct CommitInfo {
    pub sha: String,
    pub author: String,
    pub message: String,
    pub parent_sha: Option<String>,
    pub authored_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone)]
pub struct FileEntry {
    pub path: String,
    pub blob_sha: String,
    pub size: i64,
}

/// The git surface the pipeline consumes. Handlers never shell out
/// themselves; everything goes through this trait so tests can substitute
/// a scripted backend.
#[async_trait]
pub trait GitBackend: Send + Sync {
    /// Clone `remote_url` into `target`. Returns the working copy path,
    /// which may differ from `target` if the directory already existed.
    async fn clone_repository(&self, remote_url: &str, target: &Path)
        -> Result<PathBuf, GitError>;

    /// Fetch and fast-forward an existing working copy.
    async fn update(&self, working_copy: &Path) -> Result<(), GitError>;

    async fn branches(&self, working_copy: &Path) -> Result<Vec<BranchInfo>, GitError>;

    async fn tags(&self, working_copy: &Path) -> Result<Vec<TagInfo>, GitError>;

    async fn commit_info(&self, working_copy: &Path, sha: &str) -> Result<CommitInfo, GitError>;

    /// Recursive file listing of the tree at `sha`.
    async fn list_files(&self, working_copy: &Path, sha: &str)
        -> Result<Vec<FileEntry>, GitError>;

    /// Contents of one blob at `sha:path`.
    async fn read_file(
        &self,
        working_copy: &Path,
        sha: &str,
        path: &str,
    ) -> Result<Vec<u8>, GitError>;

    /// The patch a commit introduced, as `git show` renders it.
    async fn diff(&self, working_copy: &Path, sha: &str) -> Result<String, GitError>;
}

/// Git CLI adapter. Every operation is one `git` subprocess with the
/// working copy as its cwd; stderr becomes the error message on non-zero
/// exit.
pub struct CliGit;

impl CliGit {
    async fn run(cwd: &Path, args: &[&str]) -> Result<Vec<u8>, GitError> {
        debug!(?cwd, ?args, "running git");
        let output = Command::new("git")
            .args(args)
            .current_dir(cwd)
            .output()
            .await?;

        if !output.status.success() {
            return Err(GitError::Command {
                command: format!("git {}", args.join(" ")),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_owned(),
            });
        }

        Ok(output.stdout)
    }

    async fn run_text(cwd: &Path, args: &[&str]) -> Result<String, GitError> {
        let stdout = Self::run(cwd, args).await?;
        Ok(String::from_utf8_lossy(&stdout).into_owned())
    }

    async fn default_branch(working_copy: &Path) -> Option<String> {
        // symbolic-ref fails on detached HEAD; that's fine, we fall back to
        // flagging nothing as default
        Self::run_text(working_copy, &["symbolic-ref", "--short", "HEAD"])
            .await
            .ok()
            .map(|s| s.trim().to_owned())
            .filter(|s| !s.is_empty())
    }
}

#[async_trait]
impl GitBackend for CliGit {
    async fn clone_repository(
        &self,
        remote_url: &str,
        target: &Path,
    ) -> Result<PathBuf, GitError> {
        if target.join(".git").exists() {
            // crash-orphaned working copy; adopt it instead of re-cloning
            debug!(?target, "working copy already present, adopting");
            return Ok(target.to_owned());
        }

        if let Some(parent) = target.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        let parent = target.parent().unwrap_or_else(|| Path::new("."));
        let dir_name = target
            .file_name()
            .ok_or_else(|| GitError::Parse(format!("bad clone target: {}", target.display())))?
            .to_string_lossy()
            .into_owned();

        Self::run(parent, &["clone", remote_url, &dir_name]).await?;
        Ok(target.to_owned())
    }

    async fn update(&self, working_copy: &Path) -> Result<(), GitError> {
        Self::run(working_copy, &["fetch", "--all", "--tags", "--prune"]).await?;
        // a local-path "remote" may have no upstream configured; pull
        // failures here are not fatal, the refs were fetched above
        if let Err(err) = Self::run(working_copy, &["pull", "--ff-only"]).await {
            debug!(?err, "pull --ff-only failed, continuing with fetched refs");
        }
        Ok(())
    }

    async fn branches(&self, working_copy: &Path) -> Result<Vec<BranchInfo>, GitError> {
        let default = Self::default_branch(working_copy).await;
        let output = Self::run_text(
            working_copy,
            &[
                "for-each-ref",
                "--format=%(refname:short)\x1f%(objectname)",
                "refs/heads",
            ],
        )
        .await?;

        Ok(output
            .lines()
            .filter_map(|line| {
                let (name, sha) = line.split_once('\x1f')?;
                Some(BranchInfo {
                    name: name.to_owned(),
                    head_sha: sha.to_owned(),
                    is_default: default.as_deref() == Some(name),
                })
            })
            .collect())
    }

    async fn tags(&self, working_copy: &Path) -> Result<Vec<TagInfo>, GitError> {
        let output = Self::run_text(
            working_copy,
            &[
                "for-each-ref",
                "--format=%(refname:short)\x1f%(*objectname)%(objectname)\x1f%(taggername)",
                "refs/tags",
            ],
        )
        .await?;

        Ok(output
            .lines()
            .filter_map(|line| {
                let mut parts = line.split('\x1f');
                let name = parts.next()?;
                let target = parts.next()?;
                let tagger = parts.next().filter(|t| !t.is_empty());
                // annotated tags render "<peeled><tag object>"; the peeled
                // commit sha is the first 40 chars either way
                let target_sha = target.get(..40).unwrap_or(target);
                Some(TagInfo {
                    name: name.to_owned(),
                    target_sha: target_sha.to_owned(),
                    tagger: tagger.map(str::to_owned),
                })
            })
            .collect())
    }

    async fn commit_info(&self, working_copy: &Path, sha: &str) -> Result<CommitInfo, GitError> {
        let output = Self::run_text(
            working_copy,
            &[
                "show",
                "--no-patch",
                "--format=%H\x1f%an <%ae>\x1f%P\x1f%at\x1f%B",
                sha,
            ],
        )
        .await?;

        let mut parts = output.splitn(5, '\x1f');
        let sha = parts
            .next()
            .ok_or_else(|| GitError::Parse("missing sha".into()))?
            .trim()
            .to_owned();
        let author = parts
            .next()
            .ok_or_else(|| GitError::Parse("missing author".into()))?
            .to_owned();
        let parents = parts
            .next()
            .ok_or_else(|| GitError::Parse("missing parents".into()))?;
        let timestamp = parts
            .next()
            .ok_or_else(|| GitError::Parse("missing timestamp".into()))?;
        let message = parts.next().unwrap_or_default().trim().to_owned();

        let parent_sha = parents.split_whitespace().next().map(str::to_owned);
        let authored_at = timestamp
            .trim()
            .parse::<i64>()
            .ok()
            .and_then(|secs| Utc.timestamp_opt(secs, 0).single());

        Ok(CommitInfo {
            sha,
            author,
            message,
            parent_sha,
            authored_at,
        })
    }

    async fn list_files(
        &self,
        working_copy: &Path,
        sha: &str,
    ) -> Result<Vec<FileEntry>, GitError> {
        let output =
            Self::run_text(working_copy, &["ls-tree", "-r", "--long", sha]).await?;

        // each line: <mode> blob <sha> <size>\t<path>
        Ok(output
            .lines()
            .filter_map(|line| {
                let (meta, path) = line.split_once('\t')?;
                let mut fields = meta.split_whitespace();
                let _mode = fields.next()?;
                let kind = fields.next()?;
                if kind != "blob" {
                    return None;
                }
                let blob_sha = fields.next()?.to_owned();
                let size = fields.next()?.parse().unwrap_or(0);
                Some(FileEntry {
                    path: path.to_owned(),
                    blob_sha,
                    size,
                })
            })
            .collect())
    }

    async fn read_file(
        &self,
        working_copy: &Path,
        sha: &str,
        path: &str,
    ) -> Result<Vec<u8>, GitError> {
        Self::run(working_copy, &["show", &format!("{sha}:{path}")]).await
    }

    async fn diff(&self, working_copy: &Path, sha: &str) -> Result<String, GitError> {
        Self::run_text(working_copy, &["show", "--format=", sha]).await
    }
}
