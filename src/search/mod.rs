use std::collections::{HashMap, HashSet};

use chrono::{DateTime, Utc};
use tracing::debug;

use crate::application::Application;
use crate::chunking::extensions_for_language;
use crate::error::Result;
use crate::indexes::SearchHit;
use crate::model::{Enrichment, HydratedSnippet};
use crate::store::SnippetFilters;

/// The RRF constant. With 1-based ranks a document ranked first in two
/// lists scores `2/61`.
pub const RRF_K: f64 = 60.0;

/// Fetch this many times `top_k` from each store before fusing, so that a
/// document sitting mid-list in both stores can still reach the top.
const OVERFETCH_FACTOR: usize = 2;

/// User-facing filter set. Languages are names ("go", "rust"); they are
/// mapped to extension sets before pushdown.
#[derive(Debug, Clone, Default)]
pub struct SearchFilters {
    pub languages: Vec<String>,
    pub repositories: Vec<i64>,
    pub commit_shas: Vec<String>,
    pub file_paths: Vec<String>,
    pub enrichment_types: Vec<String>,
    pub created_after: Option<DateTime<Utc>>,
    pub created_before: Option<DateTime<Utc>>,
}

impl SearchFilters {
    pub fn is_empty(&self) -> bool {
        self.languages.is_empty()
            && self.repositories.is_empty()
            && self.commit_shas.is_empty()
            && self.file_paths.is_empty()
            && self.enrichment_types.is_empty()
            && self.created_after.is_none()
            && self.created_before.is_none()
    }

    fn pushdown(&self) -> SnippetFilters {
        SnippetFilters {
            extensions: self
                .languages
                .iter()
                .flat_map(|language| match extensions_for_language(language) {
                    Some(extensions) => {
                        extensions.iter().map(|e| e.to_string()).collect::<Vec<_>>()
                    }
                    // an unmapped language name is its own extension more
                    // often than not
                    None => vec![language.to_lowercase()],
                })
                .collect(),
            repository_ids: self.repositories.clone(),
            commit_shas: self.commit_shas.clone(),
            file_paths: self.file_paths.clone(),
            enrichment_subkinds: self.enrichment_types.clone(),
            created_after: self.created_after,
            created_before: self.created_before,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct MultiRequest {
    pub top_k: usize,
    pub text_query: Option<String>,
    pub code_query: Option<String>,
    pub filters: SearchFilters,
    /// Weight of the semantic lists against the keyword list, in `[0, 1]`.
    /// `0.5` (the default) degenerates to plain unweighted RRF.
    pub semantic_weight: Option<f64>,
    pub min_score: Option<f64>,
}

#[derive(Debug, Default)]
pub struct MultiResult {
    pub snippets: Vec<HydratedSnippet>,
    pub enrichments: Vec<Enrichment>,
    pub fused_scores: HashMap<String, f64>,
}

/// Reciprocal rank fusion over any number of ranked lists. Ranks are
/// 1-based after re-sorting each list by descending score with lexicographic
/// id tie-break; a document absent from a list contributes nothing for it.
pub fn reciprocal_rank_fusion(lists: &[Vec<SearchHit>], weights: &[f64]) -> Vec<(String, f64)> {
    let mut fused: HashMap<String, f64> = HashMap::new();

    for (index, list) in lists.iter().enumerate() {
        let weight = weights.get(index).copied().unwrap_or(1.0);

        let mut ranked: Vec<&SearchHit> = list.iter().collect();
        ranked.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.doc_id.cmp(&b.doc_id))
        });

        for (position, hit) in ranked.iter().enumerate() {
            let rank = (position + 1) as f64;
            *fused.entry(hit.doc_id.clone()).or_default() += weight / (RRF_K + rank);
        }
    }

    let mut out: Vec<(String, f64)> = fused.into_iter().collect();
    out.sort_by(|a, b| {
        b.1.partial_cmp(&a.1)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.0.cmp(&b.0))
    });
    out
}

/// Hybrid search: push filters down to a candidate sha set, query the
/// keyword and vector stores concurrently, fuse with RRF, then resolve
/// enrichment doc ids back to their snippets and hydrate.
pub async fn multi_search(app: &Application, request: &MultiRequest) -> Result<MultiResult> {
    if request.top_k == 0 {
        return Ok(MultiResult::default());
    }

    let candidates: HashSet<String> = if request.filters.is_empty() {
        HashSet::new()
    } else {
        let shas = app
            .snippets
            .candidate_shas(&request.filters.pushdown())
            .await?;
        if shas.is_empty() {
            // the filters excluded everything; nothing to search
            return Ok(MultiResult::default());
        }
        shas.into_iter().collect()
    };
    let restrict = (!candidates.is_empty()).then_some(&candidates);

    let fetch = request.top_k * OVERFETCH_FACTOR;
    let semantic_weight = request.semantic_weight.unwrap_or(0.5).clamp(0.0, 1.0);

    // the keyword list and the semantic lists, gathered concurrently
    let (keyword_hits, code_hits, summary_hits) = tokio::join!(
        keyword_search(app, request, fetch, restrict),
        semantic_code_search(app, request, fetch, restrict),
        semantic_summary_search(app, request, fetch, restrict),
    );

    let mut lists = vec![];
    let mut weights = vec![];
    if let Some(hits) = keyword_hits? {
        lists.push(hits);
        weights.push(2.0 * (1.0 - semantic_weight));
    }
    for hits in [code_hits?, summary_hits?].into_iter().flatten() {
        lists.push(hits);
        weights.push(2.0 * semantic_weight);
    }

    let fused = reciprocal_rank_fusion(&lists, &weights);
    debug!(lists = lists.len(), fused = fused.len(), "search fused");

    resolve(app, request, fused).await
}

async fn keyword_search(
    app: &Application,
    request: &MultiRequest,
    fetch: usize,
    restrict: Option<&HashSet<String>>,
) -> Result<Option<Vec<SearchHit>>> {
    let Some(query) = request.text_query.as_deref().filter(|q| !q.trim().is_empty()) else {
        return Ok(None);
    };
    Ok(Some(app.bm25.search(query, fetch, restrict).await?))
}

async fn semantic_code_search(
    app: &Application,
    request: &MultiRequest,
    fetch: usize,
    restrict: Option<&HashSet<String>>,
) -> Result<Option<Vec<SearchHit>>> {
    let Some(query) = request.code_query.as_deref().filter(|q| !q.trim().is_empty()) else {
        return Ok(None);
    };
    let (Some(store), Some(provider)) = (&app.code_vectors, &app.embedding_provider) else {
        return Ok(None);
    };

    let vectors = provider
        .embed(&[query.to_owned()])
        .await
        .map_err(anyhow::Error::from)?;
    let Some(vector) = vectors.into_iter().next() else {
        return Ok(None);
    };
    Ok(Some(store.search(&vector, fetch, restrict).await?))
}

/// Semantic search over summary embeddings. Snippet summaries are keyed by
/// the snippet's own sha, so hits here land directly on snippets; example
/// summaries surface as `enrichment:<id>`.
async fn semantic_summary_search(
    app: &Application,
    request: &MultiRequest,
    fetch: usize,
    restrict: Option<&HashSet<String>>,
) -> Result<Option<Vec<SearchHit>>> {
    let Some(query) = request.text_query.as_deref().filter(|q| !q.trim().is_empty()) else {
        return Ok(None);
    };
    let (Some(store), Some(provider)) = (&app.text_vectors, &app.embedding_provider) else {
        return Ok(None);
    };

    let vectors = provider
        .embed(&[query.to_owned()])
        .await
        .map_err(anyhow::Error::from)?;
    let Some(vector) = vectors.into_iter().next() else {
        return Ok(None);
    };
    // the restrict set holds snippet shas; enrichment doc ids must survive
    // it, so restriction for the text store is applied after the scan
    let hits = store.search(&vector, fetch, None).await?;
    let hits = match restrict {
        Some(ids) => hits
            .into_iter()
            .filter(|hit| hit.doc_id.starts_with("enrichment:") || ids.contains(&hit.doc_id))
            .collect(),
        None => hits,
    };
    Ok(Some(hits))
}

/// Turn fused doc ids into hydrated snippets and enrichments. Enrichment
/// hits collapse onto their associated snippet where one exists, keeping
/// the maximum fused score.
async fn resolve(
    app: &Application,
    request: &MultiRequest,
    fused: Vec<(String, f64)>,
) -> Result<MultiResult> {
    let mut snippet_scores: HashMap<String, f64> = HashMap::new();
    let mut enrichments = vec![];
    let mut seen_enrichments = HashSet::new();

    for (doc_id, score) in fused {
        if let Some(min) = request.min_score {
            if score < min {
                continue;
            }
        }

        if let Some(enrichment_id) = doc_id.strip_prefix("enrichment:") {
            let Some(enrichment) = app.enrichments.get(enrichment_id).await? else {
                continue;
            };

            for association in app.enrichments.associations_for(enrichment_id).await? {
                if association.entity_type == crate::model::EntityType::Snippet {
                    let entry = snippet_scores
                        .entry(association.entity_id.clone())
                        .or_insert(score);
                    *entry = entry.max(score);
                }
            }

            if seen_enrichments.insert(enrichment.id.clone())
                && enrichments.len() < request.top_k
            {
                enrichments.push(enrichment);
            }
        } else {
            let entry = snippet_scores.entry(doc_id).or_insert(score);
            *entry = entry.max(score);
        }
    }

    let mut ranked: Vec<(String, f64)> = snippet_scores.iter().map(|(k, v)| (k.clone(), *v)).collect();
    ranked.sort_by(|a, b| {
        b.1.partial_cmp(&a.1)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.0.cmp(&b.0))
    });
    ranked.truncate(request.top_k);

    let shas: Vec<String> = ranked.iter().map(|(sha, _)| sha.clone()).collect();
    let snippets = app.snippets.get_hydrated(&shas).await?;

    Ok(MultiResult {
        snippets,
        enrichments,
        fused_scores: ranked.into_iter().collect(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hit(id: &str, score: f32) -> SearchHit {
        SearchHit {
            doc_id: id.into(),
            score,
        }
    }

    #[test]
    fn rank_one_in_both_lists_scores_two_over_sixty_one() {
        let lists = vec![
            vec![hit("d", 9.0), hit("x", 1.0)],
            vec![hit("d", 0.99), hit("y", 0.5)],
        ];
        let fused = reciprocal_rank_fusion(&lists, &[1.0, 1.0]);

        let d = fused.iter().find(|(id, _)| id == "d").unwrap();
        assert!((d.1 - 2.0 / 61.0).abs() < 1e-12);
    }

    #[test]
    fn documents_missing_from_a_list_are_skipped_for_it() {
        let lists = vec![
            vec![hit("a", 2.0), hit("b", 1.0)],
            vec![hit("b", 5.0)],
        ];
        let fused = reciprocal_rank_fusion(&lists, &[1.0, 1.0]);

        let a = fused.iter().find(|(id, _)| id == "a").unwrap();
        let b = fused.iter().find(|(id, _)| id == "b").unwrap();
        assert!((a.1 - 1.0 / 61.0).abs() < 1e-12);
        assert!((b.1 - (1.0 / 62.0 + 1.0 / 61.0)).abs() < 1e-12);
        // b beats a: present in both lists
        assert_eq!(fused[0].0, "b");
    }

    #[test]
    fn ties_break_by_descending_score_then_id() {
        // equal scores: rank order within the list must be by id
        let lists = vec![vec![hit("beta", 1.0), hit("alpha", 1.0)]];
        let fused = reciprocal_rank_fusion(&lists, &[1.0]);

        assert_eq!(fused[0].0, "alpha");
        assert!((fused[0].1 - 1.0 / 61.0).abs() < 1e-12);
        assert!((fused[1].1 - 1.0 / 62.0).abs() < 1e-12);
    }

    #[test]
    fn weights_scale_list_contributions() {
        let lists = vec![vec![hit("k", 1.0)], vec![hit("v", 1.0)]];
        let fused = reciprocal_rank_fusion(&lists, &[2.0 * 0.25, 2.0 * 0.75]);

        let k = fused.iter().find(|(id, _)| id == "k").unwrap();
        let v = fused.iter().find(|(id, _)| id == "v").unwrap();
        assert!(v.1 > k.1);
        assert!((k.1 - 0.5 / 61.0).abs() < 1e-12);
        assert!((v.1 - 1.5 / 61.0).abs() < 1e-12);
    }
}
