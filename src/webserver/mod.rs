mod enrichments;
mod health;
mod queue;
mod repos;
mod search;
mod types;

use std::sync::Arc;

use axum::extract::State;
use axum::http::{header, Request, StatusCode};
use axum::middleware::{self, Next};
use axum::response::Response;
use axum::routing::{get, post};
use axum::Router;
use tower_http::catch_panic::CatchPanicLayer;
use tower_http::cors::CorsLayer;

use crate::client::Client;

/// The `/api/v1` surface plus `/healthz`. Bearer auth guards the api
/// routes when keys are configured; health stays open for probes.
pub fn router(client: Arc<Client>) -> Router {
    let api = Router::new()
        .route("/repositories", get(repos::list).post(repos::create))
        .route(
            "/repositories/:id",
            get(repos::get).delete(repos::delete),
        )
        .route("/repositories/:id/status", get(repos::status))
        .route("/repositories/:id/commits", get(repos::commits))
        .route("/repositories/:id/tags", get(repos::tags))
        .route("/repositories/:id/commits/:sha/files", get(repos::files))
        .route(
            "/repositories/:id/commits/:sha/snippets",
            get(repos::snippets),
        )
        .route(
            "/repositories/:id/commits/:sha/embeddings",
            get(repos::embeddings),
        )
        .route("/commits", get(repos::all_commits))
        .route("/queue", get(queue::list))
        .route("/enrichments", get(enrichments::list))
        .route("/search", post(search::search))
        .route_layer(middleware::from_fn_with_state(
            client.clone(),
            bearer_auth,
        ));

    Router::new()
        .nest("/api/v1", api)
        .route("/healthz", get(health::health))
        .layer(CatchPanicLayer::new())
        .layer(CorsLayer::permissive())
        .with_state(client)
}

async fn bearer_auth<B>(
    State(client): State<Arc<Client>>,
    request: Request<B>,
    next: Next<B>,
) -> Result<Response, StatusCode> {
    let keys = &client.application().config.api_keys;
    if keys.is_empty() {
        return Ok(next.run(request).await);
    }

    let authorized = request
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "))
        .map(|token| keys.iter().any(|key| key == token))
        .unwrap_or(false);

    if !authorized {
        return Err(StatusCode::UNAUTHORIZED);
    }
    Ok(next.run(request).await)
}
