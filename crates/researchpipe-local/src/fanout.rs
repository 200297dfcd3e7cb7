use crate::planner::{PlannedQuery, QueryPlan};
use futures_util::StreamExt;
use researchpipe_core::{Category, Recency, SearchHit, SearchProvider, SearchQuery};
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone)]
pub struct FanoutOptions {
    pub recency: Recency,
    pub concurrency: usize,
    pub timeout_ms: Option<u64>,
}

async fn search_one(
    provider: &dyn SearchProvider,
    pq: &PlannedQuery,
    max_results: usize,
    opts: &FanoutOptions,
    cancel: &CancellationToken,
) -> Vec<SearchHit> {
    if cancel.is_cancelled() {
        return Vec::new();
    }
    let q = SearchQuery {
        query: pq.query.clone(),
        recency: opts.recency,
        max_results,
        timeout_ms: opts.timeout_ms,
    };
    let res = tokio::select! {
        biased;
        _ = cancel.cancelled() => return Vec::new(),
        r = provider.search(&q) => r,
    };
    match res {
        Ok(hits) => hits
            .into_iter()
            .map(|h| SearchHit {
                category: pq.category.clone(),
                ..h
            })
            .collect(),
        Err(e) => {
            tracing::warn!(category = %pq.category, error = %e, "search category failed; continuing without it");
            Vec::new()
        }
    }
}

/// Run the planned searches with bounded concurrency.
///
/// Results come back general first, then facets in table order. A failing category
/// contributes nothing and never cancels its siblings.
pub async fn fan_out(
    provider: &dyn SearchProvider,
    plan: &QueryPlan,
    opts: &FanoutOptions,
    cancel: &CancellationToken,
) -> Vec<SearchHit> {
    let runs_facets = plan.runs_facets();
    let work: Vec<(&PlannedQuery, usize)> = plan
        .queries
        .iter()
        .filter(|pq| runs_facets || pq.category == Category::General)
        .map(|pq| (pq, plan.requested_for(&pq.category)))
        .collect();

    let per_category: Vec<Vec<SearchHit>> = futures_util::stream::iter(work)
        .map(|(pq, n)| search_one(provider, pq, n, opts, cancel))
        .buffered(opts.concurrency.max(1))
        .collect()
        .await;

    per_category.into_iter().flatten().collect()
}
