use chrono::{DateTime, Utc};
use sqlx::sqlite::SqliteRow;
use sqlx::{QueryBuilder, Row, Sqlite};

use crate::db::SqlDb;
use crate::error::Result;
use crate::model::{EntityType, HydratedSnippet, Snippet};

use super::enrichments::read_enrichment;

/// A snippet fresh out of extraction, still tied to the file rows it was
/// sliced from.
#[derive(Debug, Clone)]
pub struct ExtractedSnippet {
    pub snippet: Snippet,
    pub file_ids: Vec<i64>,
}

/// Filter set pushed down into a single candidate query. Empty vectors mean
/// "no restriction on that axis".
#[derive(Debug, Clone, Default)]
pub struct SnippetFilters {
    pub extensions: Vec<String>,
    pub repository_ids: Vec<i64>,
    pub commit_shas: Vec<String>,
    pub file_paths: Vec<String>,
    pub enrichment_subkinds: Vec<String>,
    pub created_after: Option<DateTime<Utc>>,
    pub created_before: Option<DateTime<Utc>>,
}

impl SnippetFilters {
    pub fn is_empty(&self) -> bool {
        self.extensions.is_empty()
            && self.repository_ids.is_empty()
            && self.commit_shas.is_empty()
            && self.file_paths.is_empty()
            && self.enrichment_subkinds.is_empty()
            && self.created_after.is_none()
            && self.created_before.is_none()
    }
}

#[derive(Clone)]
pub struct SnippetStore {
    db: SqlDb,
}

impl SnippetStore {
    pub fn new(db: SqlDb) -> Self {
        Self { db }
    }

    /// Save extracted snippets for a commit. Content addressing makes this
    /// naturally idempotent: the snippet row is upserted by sha, and the
    /// commit association and file derivations are inserted only if absent.
    pub async fn save(&self, commit_sha: &str, snippets: &[ExtractedSnippet]) -> Result<()> {
        let mut tx = self.db.begin().await?;

        for extracted in snippets {
            let snippet = &extracted.snippet;

            sqlx::query(
                "INSERT INTO snippets (sha, content, extension, created_at) \
                 VALUES (?, ?, ?, ?) \
                 ON CONFLICT (sha) DO NOTHING",
            )
            .bind(&snippet.sha)
            .bind(&snippet.content)
            .bind(&snippet.extension)
            .bind(snippet.created_at)
            .execute(&mut *tx)
            .await?;

            sqlx::query(
                "INSERT INTO snippet_commit_associations (snippet_sha, commit_sha) \
                 VALUES (?, ?) ON CONFLICT DO NOTHING",
            )
            .bind(&snippet.sha)
            .bind(commit_sha)
            .execute(&mut *tx)
            .await?;

            for file_id in &extracted.file_ids {
                sqlx::query(
                    "INSERT INTO snippet_file_derivations (snippet_sha, file_id) \
                     VALUES (?, ?) ON CONFLICT DO NOTHING",
                )
                .bind(&snippet.sha)
                .bind(file_id)
                .execute(&mut *tx)
                .await?;
            }
        }

        tx.commit().await?;
        Ok(())
    }

    pub async fn exists_for_commit(&self, commit_sha: &str) -> Result<bool> {
        let row =
            sqlx::query("SELECT 1 FROM snippet_commit_associations WHERE commit_sha = ? LIMIT 1")
                .bind(commit_sha)
                .fetch_optional(self.db.as_ref())
                .await?;
        Ok(row.is_some())
    }

    pub async fn shas_for_commit(&self, commit_sha: &str) -> Result<Vec<String>> {
        let rows = sqlx::query(
            "SELECT snippet_sha FROM snippet_commit_associations WHERE commit_sha = ? \
             ORDER BY snippet_sha",
        )
        .bind(commit_sha)
        .fetch_all(self.db.as_ref())
        .await?;
        Ok(rows.into_iter().map(|r| r.get("snippet_sha")).collect())
    }

    pub async fn get(&self, sha: &str) -> Result<Option<Snippet>> {
        let row = sqlx::query("SELECT * FROM snippets WHERE sha = ?")
            .bind(sha)
            .fetch_optional(self.db.as_ref())
            .await?;
        Ok(row.map(read_snippet))
    }

    /// Snippets of a commit hydrated with source paths and attached
    /// enrichments.
    pub async fn for_commit(&self, commit_sha: &str) -> Result<Vec<HydratedSnippet>> {
        let rows = sqlx::query(
            "SELECT s.* FROM snippets s \
             JOIN snippet_commit_associations sca ON sca.snippet_sha = s.sha \
             WHERE sca.commit_sha = ? ORDER BY s.sha",
        )
        .bind(commit_sha)
        .fetch_all(self.db.as_ref())
        .await?;

        let mut out = Vec::with_capacity(rows.len());
        for row in rows {
            out.push(self.hydrate(read_snippet(row)).await?);
        }
        Ok(out)
    }

    pub async fn get_hydrated(&self, shas: &[String]) -> Result<Vec<HydratedSnippet>> {
        let mut out = Vec::with_capacity(shas.len());
        for sha in shas {
            if let Some(snippet) = self.get(sha).await? {
                out.push(self.hydrate(snippet).await?);
            }
        }
        Ok(out)
    }

    async fn hydrate(&self, snippet: Snippet) -> Result<HydratedSnippet> {
        let file_paths: Vec<String> = sqlx::query(
            "SELECT f.path FROM files f \
             JOIN snippet_file_derivations sfd ON sfd.file_id = f.id \
             WHERE sfd.snippet_sha = ? ORDER BY f.path",
        )
        .bind(&snippet.sha)
        .fetch_all(self.db.as_ref())
        .await?
        .into_iter()
        .map(|r| r.get("path"))
        .collect();

        let enrichments = sqlx::query(
            "SELECT e.* FROM enrichments e \
             JOIN enrichment_associations ea ON ea.enrichment_id = e.id \
             WHERE ea.entity_type = ? AND ea.entity_id = ? ORDER BY e.created_at",
        )
        .bind(EntityType::Snippet.as_str())
        .bind(&snippet.sha)
        .fetch_all(self.db.as_ref())
        .await?
        .into_iter()
        .map(read_enrichment)
        .collect();

        Ok(HydratedSnippet {
            snippet,
            file_paths,
            enrichments,
        })
    }

    /// Remove the commit's associations only. The snippet rows stay; other
    /// commits may still point at them.
    pub async fn delete_associations_for_commit(&self, commit_sha: &str) -> Result<()> {
        sqlx::query("DELETE FROM snippet_commit_associations WHERE commit_sha = ?")
            .bind(commit_sha)
            .execute(self.db.as_ref())
            .await?;
        Ok(())
    }

    pub async fn delete_associations_for_commits(&self, commit_shas: &[String]) -> Result<()> {
        for sha in commit_shas {
            self.delete_associations_for_commit(sha).await?;
        }
        Ok(())
    }

    pub async fn count(&self) -> Result<i64> {
        Ok(sqlx::query_scalar("SELECT COUNT(*) FROM snippets")
            .fetch_one(self.db.as_ref())
            .await?)
    }

    /// Resolve the candidate sha set for a filtered search in one query.
    /// Languages arrive here already mapped to extension sets.
    pub async fn candidate_shas(&self, filters: &SnippetFilters) -> Result<Vec<String>> {
        if filters.is_empty() {
            return Ok(vec![]);
        }

        let mut qb: QueryBuilder<Sqlite> = QueryBuilder::new(
            "SELECT DISTINCT s.sha FROM snippets s \
             JOIN snippet_commit_associations sca ON sca.snippet_sha = s.sha \
             JOIN commits c ON c.sha = sca.commit_sha \
             LEFT JOIN snippet_file_derivations sfd ON sfd.snippet_sha = s.sha \
             LEFT JOIN files f ON f.id = sfd.file_id \
             WHERE 1 = 1",
        );

        if !filters.extensions.is_empty() {
            qb.push(" AND s.extension IN (");
            let mut sep = qb.separated(", ");
            for extension in &filters.extensions {
                sep.push_bind(extension);
            }
            qb.push(")");
        }

        if !filters.repository_ids.is_empty() {
            qb.push(" AND c.repo_id IN (");
            let mut sep = qb.separated(", ");
            for repo_id in &filters.repository_ids {
                sep.push_bind(repo_id);
            }
            qb.push(")");
        }

        if !filters.commit_shas.is_empty() {
            qb.push(" AND sca.commit_sha IN (");
            let mut sep = qb.separated(", ");
            for sha in &filters.commit_shas {
                sep.push_bind(sha);
            }
            qb.push(")");
        }

        if !filters.file_paths.is_empty() {
            qb.push(" AND (");
            for (i, path) in filters.file_paths.iter().enumerate() {
                if i > 0 {
                    qb.push(" OR ");
                }
                qb.push("f.path LIKE ");
                qb.push_bind(format!("%{path}%"));
            }
            qb.push(")");
        }

        if !filters.enrichment_subkinds.is_empty() {
            qb.push(
                " AND EXISTS (SELECT 1 FROM enrichment_associations ea \
                  JOIN enrichments e ON e.id = ea.enrichment_id \
                  WHERE ea.entity_type = 'snippet' AND ea.entity_id = s.sha \
                  AND e.subkind IN (",
            );
            let mut sep = qb.separated(", ");
            for subkind in &filters.enrichment_subkinds {
                sep.push_bind(subkind);
            }
            qb.push("))");
        }

        if let Some(after) = filters.created_after {
            qb.push(" AND s.created_at >= ");
            qb.push_bind(after);
        }

        if let Some(before) = filters.created_before {
            qb.push(" AND s.created_at <= ");
            qb.push_bind(before);
        }

        let rows = qb.build().fetch_all(self.db.as_ref()).await?;
        Ok(rows.into_iter().map(|r| r.get("sha")).collect())
    }
}

fn read_snippet(row: SqliteRow) -> Snippet {
    Snippet {
        sha: row.get("sha"),
        content: row.get("content"),
        extension: row.get("extension"),
        created_at: row.get("created_at"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db;
    use crate::model::{Commit, Snippet};
    use crate::store::commits::NewFile;
    use crate::store::{CommitStore, RepositoryStore};

    async fn fixture() -> (SqlDb, i64) {
        let db = db::init_in_memory().await.unwrap();
        let repo = RepositoryStore::new(db.clone())
            .create("/tmp/snippets-fixture")
            .await
            .unwrap();
        (db, repo.id)
    }

    async fn seed_commit(db: &SqlDb, repo_id: i64, sha: &str) {
        CommitStore::new(db.clone())
            .save(&Commit {
                repo_id,
                sha: sha.into(),
                author: "a".into(),
                message: "m".into(),
                parent_sha: None,
                authored_at: None,
                created_at: Utc::now(),
            })
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn identical_content_collapses_to_one_row() {
        let (db, repo_id) = fixture().await;
        seed_commit(&db, repo_id, "c1").await;
        seed_commit(&db, repo_id, "c2").await;
        let store = SnippetStore::new(db);

        let snippet = Snippet::new("def add(a, b): return a + b", "py");
        let extracted = ExtractedSnippet {
            snippet: snippet.clone(),
            file_ids: vec![],
        };

        store.save("c1", &[extracted.clone()]).await.unwrap();
        store.save("c2", &[extracted]).await.unwrap();

        assert_eq!(store.count().await.unwrap(), 1);
        assert_eq!(store.shas_for_commit("c1").await.unwrap(), vec![snippet.sha.clone()]);
        assert_eq!(store.shas_for_commit("c2").await.unwrap(), vec![snippet.sha]);
    }

    #[tokio::test]
    async fn delete_associations_preserves_the_snippet() {
        let (db, repo_id) = fixture().await;
        seed_commit(&db, repo_id, "c1").await;
        seed_commit(&db, repo_id, "c2").await;
        let store = SnippetStore::new(db);

        let snippet = Snippet::new("shared body", "rs");
        let extracted = ExtractedSnippet {
            snippet: snippet.clone(),
            file_ids: vec![],
        };
        store.save("c1", &[extracted.clone()]).await.unwrap();
        store.save("c2", &[extracted]).await.unwrap();

        store.delete_associations_for_commit("c1").await.unwrap();

        assert!(store.shas_for_commit("c1").await.unwrap().is_empty());
        assert_eq!(store.shas_for_commit("c2").await.unwrap().len(), 1);
        assert!(store.get(&snippet.sha).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn candidate_query_filters_by_extension_and_path() {
        let (db, repo_id) = fixture().await;
        seed_commit(&db, repo_id, "c1").await;

        let commits = CommitStore::new(db.clone());
        commits
            .save_files(
                repo_id,
                "c1",
                &[
                    NewFile {
                        path: "src/main.go".into(),
                        blob_sha: "b1".into(),
                        mime: "text/plain".into(),
                        extension: "go".into(),
                        size: 1,
                    },
                    NewFile {
                        path: "src/calculator.py".into(),
                        blob_sha: "b2".into(),
                        mime: "text/x-python".into(),
                        extension: "py".into(),
                        size: 1,
                    },
                ],
            )
            .await
            .unwrap();
        let files = commits.files_for_commit("c1").await.unwrap();

        let store = SnippetStore::new(db);
        let go_snippet = Snippet::new("func Add(a, b int) int { return a + b }", "go");
        let py_snippet = Snippet::new("def subtract(a, b): return a - b", "py");
        store
            .save(
                "c1",
                &[
                    ExtractedSnippet {
                        snippet: go_snippet.clone(),
                        file_ids: vec![files[0].id],
                    },
                    ExtractedSnippet {
                        snippet: py_snippet.clone(),
                        file_ids: vec![files[1].id],
                    },
                ],
            )
            .await
            .unwrap();

        let only_go = store
            .candidate_shas(&SnippetFilters {
                extensions: vec!["go".into()],
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(only_go, vec![go_snippet.sha.clone()]);

        let by_path = store
            .candidate_shas(&SnippetFilters {
                file_paths: vec!["calculator".into()],
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(by_path, vec![py_snippet.sha]);

        let unfiltered = store.candidate_shas(&SnippetFilters::default()).await.unwrap();
        assert!(unfiltered.is_empty());
    }
}
