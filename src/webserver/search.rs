use std::collections::HashMap;
use std::sync::Arc;

use axum::extract::State;
use axum::response::IntoResponse;
use serde::{Deserialize, Serialize};

use crate::client::{Client, SearchOptions};
use crate::model::{Enrichment, HydratedSnippet};

use super::types::{json, ApiResponse, Result};

#[derive(Deserialize)]
pub(crate) struct SearchRequest {
    pub query: String,
    #[serde(default)]
    pub limit: Option<usize>,
    #[serde(default)]
    pub semantic_weight: Option<f64>,
    #[serde(default)]
    pub languages: Vec<String>,
    #[serde(default)]
    pub repositories: Vec<i64>,
    #[serde(default)]
    pub enrichment_types: Vec<String>,
    #[serde(default)]
    pub min_score: Option<f64>,
}

#[derive(Serialize)]
pub(crate) struct SearchResponse {
    pub snippets: Vec<HydratedSnippet>,
    pub enrichments: Vec<Enrichment>,
    pub scores: HashMap<String, f64>,
}

impl ApiResponse for SearchResponse {}

pub(super) async fn search(
    State(client): State<Arc<Client>>,
    axum::Json(request): axum::Json<SearchRequest>,
) -> Result<impl IntoResponse> {
    let result = client
        .search(
            &request.query,
            SearchOptions {
                limit: request.limit.unwrap_or(10),
                semantic_weight: request.semantic_weight,
                languages: request.languages,
                repositories: request.repositories,
                enrichment_types: request.enrichment_types,
                min_score: request.min_score,
            },
        )
        .await?;

    Ok(json(SearchResponse {
        snippets: result.snippets,
        enrichments: result.enrichments,
        scores: result.fused_scores,
    }))
}
