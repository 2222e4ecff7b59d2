use std::collections::HashSet;

use sqlx::Row;
use tokio::sync::Mutex;
use tracing::debug;

use crate::db::SqlDb;
use crate::error::{Error, Result};
use crate::indexes::SearchHit;

/// The two embedding spaces. Code embeddings index snippet bodies; text
/// embeddings index natural-language enrichment content.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EmbeddingTask {
    Code,
    Text,
}

impl EmbeddingTask {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Code => "code",
            Self::Text => "text",
        }
    }

    fn table(&self) -> &'static str {
        match self {
            Self::Code => "code_embeddings",
            Self::Text => "text_embeddings",
        }
    }
}

/// Vector store over a per-task sqlite table. Vectors are stored as
/// little-endian f32 blobs and scored with a brute-force cosine scan;
/// corpus sizes here are bounded by snippet counts, not web scale.
///
/// Schema creation is lazy and guarded by a mutex plus an initialised flag.
/// If init fails once (dimension mismatch), every caller keeps receiving
/// the same error until restart.
pub struct VectorStore {
    db: SqlDb,
    task: EmbeddingTask,
    dimensions: usize,
    initialised: Mutex<bool>,
}

impl VectorStore {
    pub fn new(db: SqlDb, task: EmbeddingTask, dimensions: usize) -> Self {
        Self {
            db,
            task,
            dimensions,
            initialised: Mutex::new(false),
        }
    }

    pub fn task(&self) -> EmbeddingTask {
        self.task
    }

    /// Create the embedding table on first use and pin its dimension. A
    /// table created with a different dimension is a fatal, non-retryable
    /// mismatch; no rows are ever written past it.
    async fn ensure_initialised(&self) -> Result<()> {
        let mut initialised = self.initialised.lock().await;
        if *initialised {
            return Ok(());
        }

        sqlx::query(
            "CREATE TABLE IF NOT EXISTS embedding_dimensions ( \
                 task_name TEXT PRIMARY KEY, \
                 dimensions INTEGER NOT NULL)",
        )
        .execute(self.db.as_ref())
        .await?;

        let existing: Option<i64> =
            sqlx::query_scalar("SELECT dimensions FROM embedding_dimensions WHERE task_name = ?")
                .bind(self.task.name())
                .fetch_optional(self.db.as_ref())
                .await?;

        if let Some(existing) = existing {
            if existing as usize != self.dimensions {
                return Err(Error::DimensionMismatch {
                    existing: existing as usize,
                    provided: self.dimensions,
                });
            }
        } else {
            sqlx::query("INSERT INTO embedding_dimensions (task_name, dimensions) VALUES (?, ?)")
                .bind(self.task.name())
                .bind(self.dimensions as i64)
                .execute(self.db.as_ref())
                .await?;
        }

        sqlx::query(&format!(
            "CREATE TABLE IF NOT EXISTS {} ( \
                 doc_id TEXT PRIMARY KEY, \
                 vector BLOB NOT NULL)",
            self.task.table()
        ))
        .execute(self.db.as_ref())
        .await?;

        *initialised = true;
        debug!(task = self.task.name(), dimensions = self.dimensions, "vector store ready");
        Ok(())
    }

    pub async fn contains(&self, doc_id: &str) -> Result<bool> {
        self.ensure_initialised().await?;
        let row = sqlx::query(&format!(
            "SELECT 1 FROM {} WHERE doc_id = ?",
            self.task.table()
        ))
        .bind(doc_id)
        .fetch_optional(self.db.as_ref())
        .await?;
        Ok(row.is_some())
    }

    /// Which of the given ids have no embedding yet.
    pub async fn missing(&self, doc_ids: &[String]) -> Result<Vec<String>> {
        self.ensure_initialised().await?;
        let mut missing = vec![];
        for doc_id in doc_ids {
            if !self.contains(doc_id).await? {
                missing.push(doc_id.clone());
            }
        }
        Ok(missing)
    }

    /// Insert vectors for ids that are not present yet. Vector length is
    /// checked against the pinned dimension on every write.
    pub async fn index(&self, entries: &[(String, Vec<f32>)]) -> Result<usize> {
        self.ensure_initialised().await?;

        for (_, vector) in entries {
            if vector.len() != self.dimensions {
                return Err(Error::DimensionMismatch {
                    existing: self.dimensions,
                    provided: vector.len(),
                });
            }
        }

        let mut tx = self.db.begin().await?;
        let mut added = 0;
        for (doc_id, vector) in entries {
            let result = sqlx::query(&format!(
                "INSERT INTO {} (doc_id, vector) VALUES (?, ?) \
                 ON CONFLICT (doc_id) DO NOTHING",
                self.task.table()
            ))
            .bind(doc_id)
            .bind(encode_vector(vector))
            .execute(&mut *tx)
            .await?;
            added += result.rows_affected() as usize;
        }
        tx.commit().await?;

        Ok(added)
    }

    /// Brute-force cosine search. Distances are normalised to
    /// positive-better similarity as `1 - distance / 2`.
    pub async fn search(
        &self,
        query: &[f32],
        limit: usize,
        restrict: Option<&HashSet<String>>,
    ) -> Result<Vec<SearchHit>> {
        self.ensure_initialised().await?;

        if query.len() != self.dimensions {
            return Err(Error::DimensionMismatch {
                existing: self.dimensions,
                provided: query.len(),
            });
        }

        let rows = sqlx::query(&format!("SELECT doc_id, vector FROM {}", self.task.table()))
            .fetch_all(self.db.as_ref())
            .await?;

        let mut hits: Vec<SearchHit> = rows
            .into_iter()
            .filter_map(|row| {
                let doc_id: String = row.get("doc_id");
                if let Some(ids) = restrict.filter(|ids| !ids.is_empty()) {
                    if !ids.contains(&doc_id) {
                        return None;
                    }
                }
                let vector = decode_vector(row.get("vector"));
                let distance = cosine_distance(query, &vector);
                Some(SearchHit {
                    doc_id,
                    score: 1.0 - distance / 2.0,
                })
            })
            .collect();

        hits.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.doc_id.cmp(&b.doc_id))
        });
        hits.truncate(limit);
        Ok(hits)
    }

    pub async fn doc_ids(&self) -> Result<Vec<String>> {
        self.ensure_initialised().await?;
        let rows = sqlx::query(&format!(
            "SELECT doc_id FROM {} ORDER BY doc_id",
            self.task.table()
        ))
        .fetch_all(self.db.as_ref())
        .await?;
        Ok(rows.into_iter().map(|r| r.get("doc_id")).collect())
    }
}

fn encode_vector(vector: &[f32]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(vector.len() * 4);
    for value in vector {
        bytes.extend_from_slice(&value.to_le_bytes());
    }
    bytes
}

fn decode_vector(bytes: Vec<u8>) -> Vec<f32> {
    bytes
        .chunks_exact(4)
        .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
        .collect()
}

/// `1 - cos(a, b)`, in `[0, 2]`. Zero vectors are maximally distant.
fn cosine_distance(a: &[f32], b: &[f32]) -> f32 {
    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();

    if norm_a == 0.0 || norm_b == 0.0 {
        return 2.0;
    }
    1.0 - dot / (norm_a * norm_b)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db;

    async fn store(dimensions: usize) -> VectorStore {
        VectorStore::new(
            db::init_in_memory().await.unwrap(),
            EmbeddingTask::Code,
            dimensions,
        )
    }

    #[tokio::test]
    async fn vectors_roundtrip_through_blobs() {
        let vector = vec![0.5_f32, -1.25, 3.0];
        assert_eq!(decode_vector(encode_vector(&vector)), vector);
    }

    #[tokio::test]
    async fn dimension_mismatch_is_fatal_and_writes_nothing() {
        let db = db::init_in_memory().await.unwrap();

        let first = VectorStore::new(db.clone(), EmbeddingTask::Code, 3);
        first
            .index(&[("a".to_string(), vec![1.0, 0.0, 0.0])])
            .await
            .unwrap();

        let second = VectorStore::new(db.clone(), EmbeddingTask::Code, 4);
        let err = second
            .index(&[("b".to_string(), vec![1.0, 0.0, 0.0, 0.0])])
            .await
            .unwrap_err();
        assert!(matches!(err, Error::DimensionMismatch { existing: 3, provided: 4 }));

        // nothing was written through the mismatched store
        assert_eq!(first.doc_ids().await.unwrap(), vec!["a".to_string()]);
    }

    #[tokio::test]
    async fn search_ranks_by_cosine_similarity() {
        let store = store(2).await;
        store
            .index(&[
                ("east".to_string(), vec![1.0, 0.0]),
                ("north".to_string(), vec![0.0, 1.0]),
                ("west".to_string(), vec![-1.0, 0.0]),
            ])
            .await
            .unwrap();

        let hits = store.search(&[1.0, 0.1], 3, None).await.unwrap();
        assert_eq!(hits.len(), 3);
        assert_eq!(hits[0].doc_id, "east");
        assert_eq!(hits[2].doc_id, "west");
        assert!(hits[0].score > hits[1].score && hits[1].score > hits[2].score);
        // similarity is in [0, 1]
        assert!(hits.iter().all(|h| (0.0..=1.0).contains(&h.score)));
    }

    #[tokio::test]
    async fn restriction_and_idempotent_insert() {
        let store = store(2).await;
        let entries = vec![
            ("a".to_string(), vec![1.0, 0.0]),
            ("b".to_string(), vec![0.0, 1.0]),
        ];
        assert_eq!(store.index(&entries).await.unwrap(), 2);
        assert_eq!(store.index(&entries).await.unwrap(), 0);

        let only_b: HashSet<String> = ["b".to_string()].into();
        let hits = store.search(&[1.0, 0.0], 10, Some(&only_b)).await.unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].doc_id, "b");

        assert_eq!(
            store.missing(&["a".to_string(), "c".to_string()]).await.unwrap(),
            vec!["c".to_string()]
        );
    }
}
