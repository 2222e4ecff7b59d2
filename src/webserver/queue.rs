use std::sync::Arc;

use axum::extract::State;
use axum::response::IntoResponse;
use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::client::Client;
use crate::queue::Task;

use super::types::{json, ApiResponse, Result};

#[derive(Serialize)]
pub(crate) struct QueueResponse {
    pub tasks: Vec<QueuedTask>,
}

#[derive(Serialize)]
pub(crate) struct QueuedTask {
    pub id: i64,
    pub operation: String,
    pub repository_id: Option<i64>,
    pub commit_sha: Option<String>,
    pub priority: i64,
    pub created_at: DateTime<Utc>,
}

impl ApiResponse for QueueResponse {}

impl From<Task> for QueuedTask {
    fn from(task: Task) -> Self {
        Self {
            id: task.id,
            operation: task.operation.to_string(),
            repository_id: task.payload.repository_id(),
            commit_sha: task.payload.commit_sha().map(str::to_owned),
            priority: task.priority,
            created_at: task.created_at,
        }
    }
}

pub(super) async fn list(State(client): State<Arc<Client>>) -> Result<impl IntoResponse> {
    let tasks = client.tasks().list().await?;
    Ok(json(QueueResponse {
        tasks: tasks.into_iter().map(QueuedTask::from).collect(),
    }))
}
