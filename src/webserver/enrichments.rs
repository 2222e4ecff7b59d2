use std::sync::Arc;

use axum::extract::{Query, State};
use axum::response::IntoResponse;
use serde::{Deserialize, Serialize};

use crate::client::Client;
use crate::error::Error;
use crate::model::{Enrichment, EnrichmentSubkind};

use super::types::{json, ApiResponse, Result};

#[derive(Deserialize)]
pub(crate) struct EnrichmentParams {
    #[serde(default)]
    pub commit_sha: Option<String>,
    #[serde(default)]
    pub subtype: Option<String>,
}

#[derive(Serialize)]
#[serde(rename_all = "snake_case")]
pub(crate) enum EnrichmentsResponse {
    List(Vec<Enrichment>),
}

impl ApiResponse for EnrichmentsResponse {}

pub(super) async fn list(
    State(client): State<Arc<Client>>,
    Query(params): Query<EnrichmentParams>,
) -> Result<impl IntoResponse> {
    let subkind = match &params.subtype {
        Some(raw) => Some(
            EnrichmentSubkind::parse(raw)
                .ok_or_else(|| Error::validation(format!("unknown enrichment subtype {raw}")))?,
        ),
        None => None,
    };

    let enrichments = match &params.commit_sha {
        Some(sha) => {
            let all = client.enrichments().for_commit(sha).await?;
            match subkind {
                Some(subkind) => all.into_iter().filter(|e| e.subkind == subkind).collect(),
                None => all,
            }
        }
        None => client.application().enrichments.list(subkind).await?,
    };

    Ok(json(EnrichmentsResponse::List(enrichments)))
}
