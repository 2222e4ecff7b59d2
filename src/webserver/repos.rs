use std::sync::Arc;

use axum::extract::{Path, State};
use axum::response::IntoResponse;
use serde::{Deserialize, Serialize};

use crate::client::Client;
use crate::model::{Commit, HydratedSnippet, Repository, SourceFile, Tag};
use crate::tracker::StatusSnapshot;

use super::types::{json, ApiResponse, Result};

#[derive(Serialize)]
#[serde(rename_all = "snake_case")]
pub(crate) enum ReposResponse {
    List(Vec<Repository>),
    Item(Repository),
    Status(Vec<StatusSnapshot>),
    Commits(Vec<Commit>),
    Tags(Vec<Tag>),
    Files(Vec<SourceFile>),
    Snippets(Vec<HydratedSnippet>),
    Embeddings(Vec<EmbeddingRef>),
    Deleted,
}

impl ApiResponse for ReposResponse {}

#[derive(Serialize, Debug)]
pub(crate) struct EmbeddingRef {
    pub doc_id: String,
    pub task: &'static str,
}

#[derive(Deserialize)]
pub(crate) struct CreateRepoRequest {
    pub url: String,
}

pub(super) async fn list(State(client): State<Arc<Client>>) -> Result<impl IntoResponse> {
    let repos = client.repositories().list().await?;
    Ok(json(ReposResponse::List(repos)))
}

pub(super) async fn create(
    State(client): State<Arc<Client>>,
    axum::Json(request): axum::Json<CreateRepoRequest>,
) -> Result<impl IntoResponse> {
    let repo = client.repositories().clone(&request.url).await?;
    Ok(json(ReposResponse::Item(repo)))
}

pub(super) async fn get(
    State(client): State<Arc<Client>>,
    Path(id): Path<i64>,
) -> Result<impl IntoResponse> {
    let repo = client.repositories().get(id).await?;
    Ok(json(ReposResponse::Item(repo)))
}

pub(super) async fn delete(
    State(client): State<Arc<Client>>,
    Path(id): Path<i64>,
) -> Result<impl IntoResponse> {
    client.repositories().delete(id).await?;
    Ok(json(ReposResponse::Deleted))
}

pub(super) async fn status(
    State(client): State<Arc<Client>>,
    Path(id): Path<i64>,
) -> Result<impl IntoResponse> {
    let statuses = client
        .application()
        .statuses
        .for_trackable(&id.to_string())
        .await?;
    Ok(json(ReposResponse::Status(statuses)))
}

pub(super) async fn commits(
    State(client): State<Arc<Client>>,
    Path(id): Path<i64>,
) -> Result<impl IntoResponse> {
    let commits = client.application().commits.for_repository(id).await?;
    Ok(json(ReposResponse::Commits(commits)))
}

pub(super) async fn tags(
    State(client): State<Arc<Client>>,
    Path(id): Path<i64>,
) -> Result<impl IntoResponse> {
    let tags = client.application().commits.tags(id).await?;
    Ok(json(ReposResponse::Tags(tags)))
}

pub(super) async fn files(
    State(client): State<Arc<Client>>,
    Path((_id, sha)): Path<(i64, String)>,
) -> Result<impl IntoResponse> {
    let files = client.application().commits.files_for_commit(&sha).await?;
    Ok(json(ReposResponse::Files(files)))
}

pub(super) async fn snippets(
    State(client): State<Arc<Client>>,
    Path((_id, sha)): Path<(i64, String)>,
) -> Result<impl IntoResponse> {
    let snippets = client.application().snippets.for_commit(&sha).await?;
    Ok(json(ReposResponse::Snippets(snippets)))
}

/// Which of the commit's snippets carry embeddings, per task.
pub(super) async fn embeddings(
    State(client): State<Arc<Client>>,
    Path((_id, sha)): Path<(i64, String)>,
) -> Result<impl IntoResponse> {
    let app = client.application();
    let shas = app.snippets.shas_for_commit(&sha).await?;

    let mut refs = vec![];
    for (store, task) in [(&app.code_vectors, "code"), (&app.text_vectors, "text")] {
        let Some(store) = store else { continue };
        for snippet_sha in &shas {
            if store.contains(snippet_sha).await? {
                refs.push(EmbeddingRef {
                    doc_id: snippet_sha.clone(),
                    task,
                });
            }
        }
    }

    Ok(json(ReposResponse::Embeddings(refs)))
}

pub(super) async fn all_commits(
    State(client): State<Arc<Client>>,
) -> Result<impl IntoResponse> {
    let commits = client.application().commits.list_all().await?;
    Ok(json(ReposResponse::Commits(commits)))
}
