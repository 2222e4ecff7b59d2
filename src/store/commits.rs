use chrono::{DateTime, Utc};
use sqlx::sqlite::SqliteRow;
use sqlx::Row;

use crate::db::SqlDb;
use crate::error::Result;
use crate::model::{Branch, Commit, SourceFile, Tag};

/// Metadata for a file about to be persisted for a commit.
#[derive(Debug, Clone)]
pub struct NewFile {
    pub path: String,
    pub blob_sha: String,
    pub mime: String,
    pub extension: String,
    pub size: i64,
}

#[derive(Clone)]
pub struct CommitStore {
    db: SqlDb,
}

impl CommitStore {
    pub fn new(db: SqlDb) -> Self {
        Self { db }
    }

    pub async fn exists(&self, repo_id: i64, sha: &str) -> Result<bool> {
        let row = sqlx::query("SELECT 1 FROM commits WHERE repo_id = ? AND sha = ?")
            .bind(repo_id)
            .bind(sha)
            .fetch_optional(self.db.as_ref())
            .await?;
        Ok(row.is_some())
    }

    pub async fn get(&self, repo_id: i64, sha: &str) -> Result<Option<Commit>> {
        let row = sqlx::query("SELECT * FROM commits WHERE repo_id = ? AND sha = ?")
            .bind(repo_id)
            .bind(sha)
            .fetch_optional(self.db.as_ref())
            .await?;
        Ok(row.map(read_commit))
    }

    pub async fn save(&self, commit: &Commit) -> Result<()> {
        sqlx::query(
            "INSERT INTO commits (repo_id, sha, author, message, parent_sha, authored_at, created_at) \
             VALUES (?, ?, ?, ?, ?, ?, ?) \
             ON CONFLICT (repo_id, sha) DO NOTHING",
        )
        .bind(commit.repo_id)
        .bind(&commit.sha)
        .bind(&commit.author)
        .bind(&commit.message)
        .bind(&commit.parent_sha)
        .bind(commit.authored_at)
        .bind(commit.created_at)
        .execute(self.db.as_ref())
        .await?;
        Ok(())
    }

    pub async fn for_repository(&self, repo_id: i64) -> Result<Vec<Commit>> {
        let rows = sqlx::query("SELECT * FROM commits WHERE repo_id = ? ORDER BY created_at")
            .bind(repo_id)
            .fetch_all(self.db.as_ref())
            .await?;
        Ok(rows.into_iter().map(read_commit).collect())
    }

    pub async fn list_all(&self) -> Result<Vec<Commit>> {
        let rows = sqlx::query("SELECT * FROM commits ORDER BY repo_id, created_at")
            .fetch_all(self.db.as_ref())
            .await?;
        Ok(rows.into_iter().map(read_commit).collect())
    }

    /// Replace the branch set for a repository. Branches are recomputed on
    /// every sync; rows for branches that no longer exist are removed.
    pub async fn replace_branches(&self, repo_id: i64, branches: &[Branch]) -> Result<()> {
        let mut tx = self.db.begin().await?;

        sqlx::query("DELETE FROM branches WHERE repo_id = ?")
            .bind(repo_id)
            .execute(&mut *tx)
            .await?;

        for branch in branches {
            sqlx::query(
                "INSERT INTO branches (repo_id, name, head_sha, is_default) VALUES (?, ?, ?, ?)",
            )
            .bind(repo_id)
            .bind(&branch.name)
            .bind(&branch.head_sha)
            .bind(branch.is_default)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(())
    }

    pub async fn replace_tags(&self, repo_id: i64, tags: &[Tag]) -> Result<()> {
        let mut tx = self.db.begin().await?;

        sqlx::query("DELETE FROM tags WHERE repo_id = ?")
            .bind(repo_id)
            .execute(&mut *tx)
            .await?;

        for tag in tags {
            sqlx::query("INSERT INTO tags (repo_id, name, target_sha, tagger) VALUES (?, ?, ?, ?)")
                .bind(repo_id)
                .bind(&tag.name)
                .bind(&tag.target_sha)
                .bind(&tag.tagger)
                .execute(&mut *tx)
                .await?;
        }

        tx.commit().await?;
        Ok(())
    }

    pub async fn branches(&self, repo_id: i64) -> Result<Vec<Branch>> {
        let rows = sqlx::query("SELECT * FROM branches WHERE repo_id = ? ORDER BY name")
            .bind(repo_id)
            .fetch_all(self.db.as_ref())
            .await?;
        Ok(rows.into_iter().map(read_branch).collect())
    }

    pub async fn tags(&self, repo_id: i64) -> Result<Vec<Tag>> {
        let rows = sqlx::query("SELECT * FROM tags WHERE repo_id = ? ORDER BY name")
            .bind(repo_id)
            .fetch_all(self.db.as_ref())
            .await?;
        Ok(rows.into_iter().map(read_tag).collect())
    }

    /// Persist the file listing of a commit. Files are immutable once
    /// written; re-saving the same `(commit_sha, path)` keeps the original
    /// row.
    pub async fn save_files(
        &self,
        repo_id: i64,
        commit_sha: &str,
        files: &[NewFile],
    ) -> Result<()> {
        let mut tx = self.db.begin().await?;

        for file in files {
            sqlx::query(
                "INSERT INTO files (repo_id, commit_sha, path, blob_sha, mime, extension, size) \
                 VALUES (?, ?, ?, ?, ?, ?, ?) \
                 ON CONFLICT (commit_sha, path) DO NOTHING",
            )
            .bind(repo_id)
            .bind(commit_sha)
            .bind(&file.path)
            .bind(&file.blob_sha)
            .bind(&file.mime)
            .bind(&file.extension)
            .bind(file.size)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(())
    }

    pub async fn files_for_commit(&self, commit_sha: &str) -> Result<Vec<SourceFile>> {
        let rows = sqlx::query("SELECT * FROM files WHERE commit_sha = ? ORDER BY path")
            .bind(commit_sha)
            .fetch_all(self.db.as_ref())
            .await?;
        Ok(rows.into_iter().map(read_file).collect())
    }

    pub async fn file_count_for_commit(&self, commit_sha: &str) -> Result<i64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM files WHERE commit_sha = ?")
            .bind(commit_sha)
            .fetch_one(self.db.as_ref())
            .await?;
        Ok(count)
    }
}

fn read_commit(row: SqliteRow) -> Commit {
    Commit {
        repo_id: row.get("repo_id"),
        sha: row.get("sha"),
        author: row.get("author"),
        message: row.get("message"),
        parent_sha: row.get("parent_sha"),
        authored_at: row.get::<Option<DateTime<Utc>>, _>("authored_at"),
        created_at: row.get("created_at"),
    }
}

fn read_branch(row: SqliteRow) -> Branch {
    Branch {
        repo_id: row.get("repo_id"),
        name: row.get("name"),
        head_sha: row.get("head_sha"),
        is_default: row.get("is_default"),
    }
}

fn read_tag(row: SqliteRow) -> Tag {
    Tag {
        repo_id: row.get("repo_id"),
        name: row.get("name"),
        target_sha: row.get("target_sha"),
        tagger: row.get("tagger"),
    }
}

fn read_file(row: SqliteRow) -> SourceFile {
    SourceFile {
        id: row.get("id"),
        repo_id: row.get("repo_id"),
        commit_sha: row.get("commit_sha"),
        path: row.get("path"),
        blob_sha: row.get("blob_sha"),
        mime: row.get("mime"),
        extension: row.get("extension"),
        size: row.get("size"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db;
    use crate::store::RepositoryStore;

    async fn fixture() -> (SqlDb, i64) {
        let db = db::init_in_memory().await.unwrap();
        let repo = RepositoryStore::new(db.clone())
            .create("/tmp/fixture")
            .await
            .unwrap();
        (db, repo.id)
    }

    fn commit(repo_id: i64, sha: &str) -> Commit {
        Commit {
            repo_id,
            sha: sha.into(),
            author: "a <a@example.com>".into(),
            message: "initial".into(),
            parent_sha: None,
            authored_at: None,
            created_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn save_commit_twice_keeps_one_row() {
        let (db, repo_id) = fixture().await;
        let store = CommitStore::new(db);

        store.save(&commit(repo_id, "abc123")).await.unwrap();
        store.save(&commit(repo_id, "abc123")).await.unwrap();

        assert_eq!(store.for_repository(repo_id).await.unwrap().len(), 1);
        assert!(store.exists(repo_id, "abc123").await.unwrap());
    }

    #[tokio::test]
    async fn replace_branches_removes_stale_rows() {
        let (db, repo_id) = fixture().await;
        let store = CommitStore::new(db);

        let main = Branch {
            repo_id,
            name: "main".into(),
            head_sha: "abc".into(),
            is_default: true,
        };
        let feature = Branch {
            repo_id,
            name: "feature".into(),
            head_sha: "def".into(),
            is_default: false,
        };

        store
            .replace_branches(repo_id, &[main.clone(), feature])
            .await
            .unwrap();
        assert_eq!(store.branches(repo_id).await.unwrap().len(), 2);

        store.replace_branches(repo_id, &[main]).await.unwrap();
        let branches = store.branches(repo_id).await.unwrap();
        assert_eq!(branches.len(), 1);
        assert_eq!(branches[0].name, "main");
    }

    #[tokio::test]
    async fn files_are_immutable_per_commit_and_path() {
        let (db, repo_id) = fixture().await;
        let store = CommitStore::new(db);
        store.save(&commit(repo_id, "abc123")).await.unwrap();

        let file = NewFile {
            path: "src/main.rs".into(),
            blob_sha: "blob1".into(),
            mime: "text/x-rust".into(),
            extension: "rs".into(),
            size: 10,
        };
        store
            .save_files(repo_id, "abc123", &[file.clone()])
            .await
            .unwrap();

        let altered = NewFile {
            blob_sha: "blob2".into(),
            ..file
        };
        store.save_files(repo_id, "abc123", &[altered]).await.unwrap();

        let files = store.files_for_commit("abc123").await.unwrap();
        assert_eq!(files.len(), 1);
        assert_eq!(files[0].blob_sha, "blob1");
    }
}
