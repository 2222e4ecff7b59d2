use std::fmt;
use std::sync::{Arc, Mutex, Weak};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::SqliteRow;
use sqlx::Row;
use tracing::{debug, warn};

use crate::db::SqlDb;
use crate::error::Result;
use crate::pipeline::graph::Operation;

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TrackerState {
    Pending,
    Started,
    InProgress,
    Completed,
    Failed,
    Skipped,
}

impl TrackerState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Started => "started",
            Self::InProgress => "in_progress",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Skipped => "skipped",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(Self::Pending),
            "started" => Some(Self::Started),
            "in_progress" => Some(Self::InProgress),
            "completed" => Some(Self::Completed),
            "failed" => Some(Self::Failed),
            "skipped" => Some(Self::Skipped),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Skipped)
    }
}

impl fmt::Display for TrackerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One row of hierarchical operation status, mirrored to every reporter on
/// each mutation.
#[derive(Debug, Clone, serde::Serialize)]
pub struct StatusSnapshot {
    pub id: String,
    pub operation: String,
    pub trackable_type: String,
    pub trackable_id: String,
    pub parent_id: Option<String>,
    pub state: TrackerState,
    pub current: i64,
    pub total: i64,
    pub message: Option<String>,
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[async_trait]
pub trait Reporter: Send + Sync {
    async fn report(&self, snapshot: &StatusSnapshot);
}

/// Logs every status mutation through tracing.
pub struct LogReporter;

#[async_trait]
impl Reporter for LogReporter {
    async fn report(&self, snapshot: &StatusSnapshot) {
        match snapshot.state {
            TrackerState::Failed => warn!(
                operation = %snapshot.operation,
                trackable = %snapshot.trackable_id,
                error = ?snapshot.error,
                "operation failed"
            ),
            _ => debug!(
                operation = %snapshot.operation,
                trackable = %snapshot.trackable_id,
                state = %snapshot.state,
                current = snapshot.current,
                total = snapshot.total,
                message = ?snapshot.message,
                "operation progress"
            ),
        }
    }
}

/// Mirrors status mutations into the task_statuses table.
pub struct DbReporter {
    db: SqlDb,
}

impl DbReporter {
    pub fn new(db: SqlDb) -> Self {
        Self { db }
    }
}

#[async_trait]
impl Reporter for DbReporter {
    async fn report(&self, snapshot: &StatusSnapshot) {
        let result = sqlx::query(
            "INSERT INTO task_statuses \
             (id, operation, trackable_type, trackable_id, parent_id, state, current, total, \
              message, error, created_at, updated_at) \
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?) \
             ON CONFLICT (id) DO UPDATE SET \
             state = excluded.state, current = excluded.current, total = excluded.total, \
             message = excluded.message, error = excluded.error, updated_at = excluded.updated_at",
        )
        .bind(&snapshot.id)
        .bind(&snapshot.operation)
        .bind(&snapshot.trackable_type)
        .bind(&snapshot.trackable_id)
        .bind(&snapshot.parent_id)
        .bind(snapshot.state.as_str())
        .bind(snapshot.current)
        .bind(snapshot.total)
        .bind(&snapshot.message)
        .bind(&snapshot.error)
        .bind(snapshot.created_at)
        .bind(snapshot.updated_at)
        .execute(self.db.as_ref())
        .await;

        if let Err(err) = result {
            warn!(?err, "failed to persist task status");
        }
    }
}

struct TrackerShared {
    reporters: Arc<Vec<Arc<dyn Reporter>>>,
    snapshot: Mutex<StatusSnapshot>,
    parent: Option<Weak<TrackerShared>>,
    children: Mutex<Vec<Arc<TrackerShared>>>,
}

/// A handle to one running operation. Mutations notify all reporters;
/// terminal transitions roll up into the parent tracker.
#[derive(Clone)]
pub struct Tracker {
    shared: Arc<TrackerShared>,
}

/// Creates root trackers wired to a fixed reporter set.
#[derive(Clone)]
pub struct TrackerHub {
    reporters: Arc<Vec<Arc<dyn Reporter>>>,
}

impl TrackerHub {
    pub fn new(reporters: Vec<Arc<dyn Reporter>>) -> Self {
        Self {
            reporters: Arc::new(reporters),
        }
    }

    /// A hub that reports nowhere. Useful in tests.
    pub fn disabled() -> Self {
        Self::new(vec![])
    }

    pub fn tracker(&self, operation: Operation, trackable_id: impl ToString) -> Tracker {
        self.tracker_inner(operation.as_str(), trackable_id.to_string(), None)
    }

    fn tracker_inner(
        &self,
        operation: &str,
        trackable_id: String,
        parent: Option<&Arc<TrackerShared>>,
    ) -> Tracker {
        let now = Utc::now();
        let snapshot = StatusSnapshot {
            id: uuid::Uuid::new_v4().to_string(),
            operation: operation.to_owned(),
            trackable_type: "repository".to_owned(),
            trackable_id,
            parent_id: None,
            state: TrackerState::Pending,
            current: 0,
            total: 0,
            message: None,
            error: None,
            created_at: now,
            updated_at: now,
        };

        let shared = Arc::new(TrackerShared {
            reporters: self.reporters.clone(),
            snapshot: Mutex::new(snapshot),
            parent: parent.map(Arc::downgrade),
            children: Mutex::new(vec![]),
        });

        Tracker { shared }
    }
}

impl Tracker {
    /// Spawn a child operation under this tracker. The child's terminal
    /// transitions update this tracker's rolled-up state.
    pub fn child(&self, operation: Operation) -> Tracker {
        let (trackable_id, parent_id) = {
            let snapshot = self.shared.snapshot.lock().unwrap();
            (snapshot.trackable_id.clone(), snapshot.id.clone())
        };

        let hub = TrackerHub {
            reporters: self.shared.reporters.clone(),
        };
        let child = hub.tracker_inner(operation.as_str(), trackable_id, Some(&self.shared));
        child.shared.snapshot.lock().unwrap().parent_id = Some(parent_id);

        self.shared
            .children
            .lock()
            .unwrap()
            .push(child.shared.clone());
        child
    }

    pub async fn start(&self) {
        self.mutate(|s| s.state = TrackerState::Started).await;
    }

    pub async fn set_total(&self, total: i64) {
        self.mutate(|s| {
            s.total = total.max(0);
            s.current = s.current.min(s.total);
        })
        .await;
    }

    /// `current` is clamped into `0..=total` once a total is known.
    pub async fn set_current(&self, current: i64, message: impl Into<String>) {
        self.mutate(|s| {
            s.state = TrackerState::InProgress;
            s.current = if s.total > 0 {
                current.clamp(0, s.total)
            } else {
                current.max(0)
            };
            s.message = Some(message.into());
        })
        .await;
    }

    pub async fn skip(&self, reason: impl Into<String>) {
        self.mutate(|s| {
            s.state = TrackerState::Skipped;
            s.message = Some(reason.into());
        })
        .await;
        self.rollup_parent().await;
    }

    pub async fn fail(&self, error: impl fmt::Display) {
        self.mutate(|s| {
            s.state = TrackerState::Failed;
            s.error = Some(error.to_string());
        })
        .await;
        self.rollup_parent().await;
    }

    pub async fn complete(&self) {
        self.mutate(|s| {
            s.state = TrackerState::Completed;
            if s.total > 0 {
                s.current = s.total;
            }
        })
        .await;
        self.rollup_parent().await;
    }

    pub fn state(&self) -> TrackerState {
        self.shared.snapshot.lock().unwrap().state
    }

    pub fn snapshot(&self) -> StatusSnapshot {
        self.shared.snapshot.lock().unwrap().clone()
    }

    async fn mutate(&self, apply: impl FnOnce(&mut StatusSnapshot)) {
        let snapshot = {
            let mut snapshot = self.shared.snapshot.lock().unwrap();
            apply(&mut snapshot);
            snapshot.updated_at = Utc::now();
            snapshot.clone()
        };

        for reporter in self.shared.reporters.iter() {
            reporter.report(&snapshot).await;
        }
    }

    /// A parent is failed if any child failed, completed once every child is
    /// terminal with no failures, and in progress otherwise.
    async fn rollup_parent(&self) {
        let Some(parent) = self.shared.parent.as_ref().and_then(Weak::upgrade) else {
            return;
        };

        let rolled_up = {
            let children = parent.children.lock().unwrap();
            let states: Vec<TrackerState> = children
                .iter()
                .map(|child| child.snapshot.lock().unwrap().state)
                .collect();

            if states.iter().any(|s| *s == TrackerState::Failed) {
                TrackerState::Failed
            } else if states.iter().all(|s| s.is_terminal()) {
                TrackerState::Completed
            } else {
                TrackerState::InProgress
            }
        };

        let parent_tracker = Tracker { shared: parent };
        parent_tracker.mutate(|s| s.state = rolled_up).await;
    }
}

/// Read/admin access to persisted task statuses.
#[derive(Clone)]
pub struct StatusStore {
    db: SqlDb,
}

impl StatusStore {
    pub fn new(db: SqlDb) -> Self {
        Self { db }
    }

    pub async fn for_trackable(&self, trackable_id: &str) -> Result<Vec<StatusSnapshot>> {
        let rows = sqlx::query(
            "SELECT * FROM task_statuses WHERE trackable_id = ? ORDER BY created_at, id",
        )
        .bind(trackable_id)
        .fetch_all(self.db.as_ref())
        .await?;
        Ok(rows.into_iter().filter_map(read_status).collect())
    }

    pub async fn clear_for_trackable(&self, trackable_id: &str) -> Result<()> {
        sqlx::query("DELETE FROM task_statuses WHERE trackable_id = ?")
            .bind(trackable_id)
            .execute(self.db.as_ref())
            .await?;
        Ok(())
    }
}

fn read_status(row: SqliteRow) -> Option<StatusSnapshot> {
    let state = TrackerState::parse(&row.get::<String, _>("state"))?;
    Some(StatusSnapshot {
        id: row.get("id"),
        operation: row.get("operation"),
        trackable_type: row.get("trackable_type"),
        trackable_id: row.get("trackable_id"),
        parent_id: row.get("parent_id"),
        state,
        current: row.get("current"),
        total: row.get("total"),
        message: row.get("message"),
        error: row.get("error"),
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db;

    #[tokio::test]
    async fn current_is_clamped_to_total() {
        let tracker = TrackerHub::disabled().tracker(Operation::ScanCommit, "1");
        tracker.set_total(3).await;
        tracker.set_current(10, "overshoot").await;

        let snapshot = tracker.snapshot();
        assert_eq!(snapshot.current, 3);
        assert_eq!(snapshot.total, 3);
    }

    #[tokio::test]
    async fn parent_rolls_up_child_states() {
        let parent = TrackerHub::disabled().tracker(Operation::ScanCommit, "1");
        let a = parent.child(Operation::ExtractSnippetsForCommit);
        let b = parent.child(Operation::CreateBm25IndexForCommit);

        a.complete().await;
        assert_eq!(parent.state(), TrackerState::InProgress);

        b.skip("already indexed").await;
        assert_eq!(parent.state(), TrackerState::Completed);
    }

    #[tokio::test]
    async fn any_failed_child_fails_the_parent() {
        let parent = TrackerHub::disabled().tracker(Operation::ScanCommit, "1");
        let a = parent.child(Operation::ExtractSnippetsForCommit);
        let b = parent.child(Operation::CreateBm25IndexForCommit);

        a.fail("boom").await;
        b.complete().await;

        assert_eq!(parent.state(), TrackerState::Failed);
    }

    #[tokio::test]
    async fn db_reporter_upserts_rows() {
        let db = db::init_in_memory().await.unwrap();
        let hub = TrackerHub::new(vec![Arc::new(DbReporter::new(db.clone())) as Arc<dyn Reporter>]);
        let store = StatusStore::new(db);

        let tracker = hub.tracker(Operation::Sync, "42");
        tracker.start().await;
        tracker.set_total(2).await;
        tracker.set_current(2, "done syncing").await;
        tracker.complete().await;

        let statuses = store.for_trackable("42").await.unwrap();
        assert_eq!(statuses.len(), 1);
        assert_eq!(statuses[0].state, TrackerState::Completed);
        assert_eq!(statuses[0].current, 2);
    }
}
