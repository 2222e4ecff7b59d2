use std::sync::Arc;

use axum::extract::State;
use axum::http::StatusCode;

use crate::client::Client;

/// 200 when the database answers, 503 otherwise.
pub(super) async fn health(State(client): State<Arc<Client>>) -> StatusCode {
    let db = client.application().db.as_ref();
    match sqlx::query("SELECT 1").execute(db).await {
        Ok(_) => StatusCode::OK,
        Err(_) => StatusCode::SERVICE_UNAVAILABLE,
    }
}
