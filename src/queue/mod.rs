use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde_json::{Map, Value};
use sha2::{Digest, Sha256};
use sqlx::sqlite::SqliteRow;
use sqlx::Row;
use tokio::sync::Notify;
use tracing::debug;

use crate::db::SqlDb;
use crate::error::{Error, Result};
use crate::pipeline::graph::Operation;

/// How long a claim may sit before another worker is allowed to steal the
/// row. Only matters after a crash; live workers delete their row when done.
const STALE_CLAIM_TTL: Duration = Duration::from_secs(15 * 60);

pub const PRIORITY_USER: i64 = 0;
pub const PRIORITY_INDEX: i64 = 5;

/// Operation-specific task arguments, a JSON object with string keys.
/// `serde_json::Map` is key-sorted, so its serialization is canonical and
/// safe to hash for dedup.
#[derive(Debug, Clone, Default, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct Payload(Map<String, Value>);

impl Payload {
    pub fn for_repository(repository_id: i64) -> Self {
        let mut map = Map::new();
        map.insert("repository_id".into(), repository_id.into());
        Self(map)
    }

    pub fn for_commit(repository_id: i64, commit_sha: &str) -> Self {
        let mut map = Map::new();
        map.insert("repository_id".into(), repository_id.into());
        map.insert("commit_sha".into(), commit_sha.into());
        Self(map)
    }

    pub fn repository_id(&self) -> Option<i64> {
        self.0.get("repository_id").and_then(Value::as_i64)
    }

    pub fn commit_sha(&self) -> Option<&str> {
        self.0.get("commit_sha").and_then(Value::as_str)
    }

    pub fn canonical_json(&self) -> String {
        serde_json::to_string(&self.0).expect("payload is always serializable")
    }

    fn parse(raw: &str) -> Self {
        serde_json::from_str(raw).unwrap_or_default()
    }
}

pub fn dedup_key(operation: Operation, payload: &Payload) -> String {
    let mut hasher = Sha256::new();
    hasher.update(operation.as_str().as_bytes());
    hasher.update(b":");
    hasher.update(payload.canonical_json().as_bytes());
    hex::encode(hasher.finalize())
}

#[derive(Debug, Clone)]
pub struct Task {
    pub id: i64,
    pub dedup_key: String,
    pub operation: Operation,
    pub payload: Payload,
    pub priority: i64,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Default)]
pub struct TaskFilter {
    pub operation: Option<Operation>,
    pub repository_id: Option<i64>,
}

/// Persistent at-most-once-dispatch task queue backed by the tasks table.
///
/// Dedup keys make enqueueing idempotent, the claim statement is a single
/// atomic UPDATE, and completion is represented by deleting the row.
#[derive(Clone)]
pub struct TaskQueue {
    db: SqlDb,
    notify: Arc<Notify>,
}

impl TaskQueue {
    pub fn new(db: SqlDb) -> Self {
        Self {
            db,
            notify: Arc::new(Notify::new()),
        }
    }

    /// Wakes up when new work may be available.
    pub fn wakeup(&self) -> Arc<Notify> {
        self.notify.clone()
    }

    /// Insert one row per operation. Rows whose dedup key already exists are
    /// silently discarded.
    pub async fn enqueue(
        &self,
        operations: &[Operation],
        priority: i64,
        payload: &Payload,
    ) -> Result<()> {
        let raw_payload = payload.canonical_json();

        for operation in operations {
            let key = dedup_key(*operation, payload);
            let result = sqlx::query(
                "INSERT INTO tasks (dedup_key, operation, payload, priority, created_at) \
                 VALUES (?, ?, ?, ?, ?) \
                 ON CONFLICT (dedup_key) DO NOTHING",
            )
            .bind(&key)
            .bind(operation.as_str())
            .bind(&raw_payload)
            .bind(priority)
            .bind(Utc::now())
            .execute(self.db.as_ref())
            .await?;

            if result.rows_affected() == 0 {
                debug!(%operation, "task already queued, dropping duplicate");
            }
        }

        self.notify.notify_waiters();
        Ok(())
    }

    /// Atomically claim up to `n` unclaimed rows in `(priority, created_at)`
    /// order. Claims from crashed workers become stealable after the TTL.
    pub async fn claim(&self, n: i64) -> Result<Vec<Task>> {
        let now = Utc::now();
        let stale_before = now - chrono::Duration::from_std(STALE_CLAIM_TTL).expect("fits");

        let rows = sqlx::query(
            "UPDATE tasks SET claimed_at = ? \
             WHERE id IN ( \
                 SELECT id FROM tasks \
                 WHERE claimed_at IS NULL OR claimed_at < ? \
                 ORDER BY priority ASC, created_at ASC, id ASC \
                 LIMIT ?) \
             RETURNING id, dedup_key, operation, payload, priority, created_at",
        )
        .bind(now)
        .bind(stale_before)
        .bind(n)
        .fetch_all(self.db.as_ref())
        .await?;

        Ok(rows.into_iter().filter_map(read_task).collect())
    }

    /// Completion is the absence of the row; status lives in task_statuses.
    pub async fn complete(&self, id: i64) -> Result<()> {
        self.remove(id).await
    }

    /// Failed tasks are not retried automatically; retry is a handler
    /// policy. The row goes away either way so the queue cannot wedge.
    pub async fn fail(&self, id: i64) -> Result<()> {
        self.remove(id).await
    }

    pub async fn cancel(&self, id: i64) -> Result<()> {
        let result = sqlx::query("DELETE FROM tasks WHERE id = ? AND claimed_at IS NULL")
            .bind(id)
            .execute(self.db.as_ref())
            .await?;
        if result.rows_affected() == 0 {
            return Err(Error::not_found(format!("pending task {id}")));
        }
        Ok(())
    }

    async fn remove(&self, id: i64) -> Result<()> {
        sqlx::query("DELETE FROM tasks WHERE id = ?")
            .bind(id)
            .execute(self.db.as_ref())
            .await?;
        Ok(())
    }

    /// Remove pending tasks whose payload references the repository. Runs
    /// ahead of repository deletion so no handler resurrects state for a
    /// row that is about to disappear.
    pub async fn drain_for_repository(&self, repository_id: i64) -> Result<u64> {
        let result = sqlx::query(
            "DELETE FROM tasks \
             WHERE claimed_at IS NULL \
             AND json_extract(payload, '$.repository_id') = ?",
        )
        .bind(repository_id)
        .execute(self.db.as_ref())
        .await?;
        Ok(result.rows_affected())
    }

    pub async fn get(&self, id: i64) -> Result<Option<Task>> {
        let row = sqlx::query("SELECT * FROM tasks WHERE id = ?")
            .bind(id)
            .fetch_optional(self.db.as_ref())
            .await?;
        Ok(row.and_then(read_task))
    }

    pub async fn list(&self, filter: &TaskFilter) -> Result<Vec<Task>> {
        let rows = sqlx::query("SELECT * FROM tasks ORDER BY priority ASC, created_at ASC, id ASC")
            .fetch_all(self.db.as_ref())
            .await?;

        Ok(rows
            .into_iter()
            .filter_map(read_task)
            .filter(|task| {
                filter
                    .operation
                    .map(|op| task.operation == op)
                    .unwrap_or(true)
                    && filter
                        .repository_id
                        .map(|id| task.payload.repository_id() == Some(id))
                        .unwrap_or(true)
            })
            .collect())
    }

    pub async fn count(&self) -> Result<i64> {
        Ok(sqlx::query_scalar("SELECT COUNT(*) FROM tasks")
            .fetch_one(self.db.as_ref())
            .await?)
    }
}

fn read_task(row: SqliteRow) -> Option<Task> {
    let operation = Operation::parse(&row.get::<String, _>("operation"))?;
    Some(Task {
        id: row.get("id"),
        dedup_key: row.get("dedup_key"),
        operation,
        payload: Payload::parse(&row.get::<String, _>("payload")),
        priority: row.get("priority"),
        created_at: row.get("created_at"),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db;

    async fn queue() -> TaskQueue {
        TaskQueue::new(db::init_in_memory().await.unwrap())
    }

    #[tokio::test]
    async fn duplicate_enqueue_keeps_one_row() {
        let queue = queue().await;
        let payload = Payload::for_commit(1, "abc123");

        for _ in 0..5 {
            queue
                .enqueue(&[Operation::ScanCommit], PRIORITY_INDEX, &payload)
                .await
                .unwrap();
        }

        assert_eq!(queue.count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn claim_orders_by_priority_then_fifo() {
        let queue = queue().await;

        queue
            .enqueue(
                &[Operation::CreateCookbookForCommit],
                PRIORITY_INDEX,
                &Payload::for_commit(1, "c1"),
            )
            .await
            .unwrap();
        queue
            .enqueue(&[Operation::Clone], PRIORITY_USER, &Payload::for_repository(1))
            .await
            .unwrap();

        let claimed = queue.claim(2).await.unwrap();
        assert_eq!(claimed.len(), 2);
        assert_eq!(claimed[0].operation, Operation::Clone);
        assert_eq!(claimed[1].operation, Operation::CreateCookbookForCommit);

        // claimed rows are not claimable again
        assert!(queue.claim(2).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn completion_removes_the_row() {
        let queue = queue().await;
        queue
            .enqueue(&[Operation::Sync], PRIORITY_USER, &Payload::for_repository(7))
            .await
            .unwrap();

        let task = queue.claim(1).await.unwrap().remove(0);
        queue.complete(task.id).await.unwrap();

        assert_eq!(queue.count().await.unwrap(), 0);
        // and the dedup key is free again
        queue
            .enqueue(&[Operation::Sync], PRIORITY_USER, &Payload::for_repository(7))
            .await
            .unwrap();
        assert_eq!(queue.count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn drain_removes_only_that_repositorys_pending_tasks() {
        let queue = queue().await;
        queue
            .enqueue(
                &[Operation::CreateSummaryEnrichmentForCommit],
                PRIORITY_INDEX,
                &Payload::for_commit(1, "c1"),
            )
            .await
            .unwrap();
        queue
            .enqueue(
                &[Operation::CreateSummaryEnrichmentForCommit],
                PRIORITY_INDEX,
                &Payload::for_commit(2, "c2"),
            )
            .await
            .unwrap();

        let drained = queue.drain_for_repository(1).await.unwrap();
        assert_eq!(drained, 1);

        let remaining = queue.list(&TaskFilter::default()).await.unwrap();
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0].payload.repository_id(), Some(2));
    }

    #[tokio::test]
    async fn dedup_key_is_stable_across_payload_key_order() {
        let mut a = Map::new();
        a.insert("repository_id".into(), 1.into());
        a.insert("commit_sha".into(), "abc".into());

        let mut b = Map::new();
        b.insert("commit_sha".into(), "abc".into());
        b.insert("repository_id".into(), 1.into());

        assert_eq!(
            dedup_key(Operation::ScanCommit, &Payload(a)),
            dedup_key(Operation::ScanCommit, &Payload(b))
        );
    }
}
