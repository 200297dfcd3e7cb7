//! Search → dedup → extraction for one research request.

use crate::config::ResearchConfig;
use crate::dedup::{build_candidates, CandidateSet, ShuffleMode};
use crate::extract::{ContentExtractor, ExtractOutcome};
use crate::fanout::{fan_out, FanoutOptions};
use crate::planner::{clamp_depth, plan};
use crate::ratelimit::PoliteLimiter;
use crate::retry::BackoffPolicy;
use crate::search::SerpApiSearchProvider;
use chrono::{DateTime, Utc};
use futures_util::StreamExt;
use researchpipe_core::{Error, ExtractedDocument, FetchBackend, Recency, SearchHit, SearchProvider};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::Instrument;

/// Everything one query needs, built fresh per request.
#[derive(Debug, Clone)]
pub struct RequestContext {
    pub request_id: String,
    pub query: String,
    pub recency: Recency,
    pub depth: usize,
    pub custom_urls: Vec<String>,
    pub shuffle: ShuffleMode,
    pub cancel: CancellationToken,
    pub started_at: DateTime<Utc>,
}

impl RequestContext {
    pub fn new(query: impl Into<String>, recency: Recency, depth: usize, custom_urls: Vec<String>) -> Self {
        Self {
            request_id: format!("{:016x}", fastrand::u64(..)),
            query: query.into(),
            recency,
            depth: clamp_depth(depth),
            custom_urls,
            shuffle: ShuffleMode::Shuffle { seed: None },
            cancel: CancellationToken::new(),
            started_at: Utc::now(),
        }
    }

    pub fn with_shuffle(mut self, shuffle: ShuffleMode) -> Self {
        self.shuffle = shuffle;
        self
    }

    pub fn with_cancel(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }
}

pub struct Researcher {
    search: Option<Arc<dyn SearchProvider>>,
    extractor: ContentExtractor,
    config: ResearchConfig,
}

impl Researcher {
    pub fn new(
        search: Option<Arc<dyn SearchProvider>>,
        fetcher: Arc<dyn FetchBackend>,
        config: ResearchConfig,
    ) -> Self {
        let policy = BackoffPolicy::fixed(config.extract_max_attempts, config.extract_retry_pause());
        let extractor = ContentExtractor::new(
            fetcher,
            policy,
            config.fetch_timeout_ms,
            config.fetch_max_bytes,
        );
        Self {
            search,
            extractor,
            config,
        }
    }

    /// SerpApi search when its key is configured; custom URLs still work without it.
    pub fn from_env(client: reqwest::Client, config: ResearchConfig) -> Self {
        let search: Option<Arc<dyn SearchProvider>> =
            match SerpApiSearchProvider::from_env(client.clone()) {
                Ok(p) => Some(Arc::new(p)),
                Err(Error::NotConfigured(msg)) => {
                    tracing::debug!(%msg, "search provider not configured");
                    None
                }
                Err(e) => {
                    tracing::warn!(error = %e, "search provider unavailable");
                    None
                }
            };
        let fetcher: Arc<dyn FetchBackend> = Arc::new(crate::LocalFetcher::new(client));
        Self::new(search, fetcher, config)
    }

    pub fn config(&self) -> &ResearchConfig {
        &self.config
    }

    pub fn has_search(&self) -> bool {
        self.search.is_some()
    }

    pub fn extractor(&self) -> &ContentExtractor {
        &self.extractor
    }

    /// Plan, fan out and dedup. Without a search provider only custom URLs remain.
    pub async fn gather_candidates(&self, ctx: &RequestContext) -> CandidateSet {
        let hits: Vec<SearchHit> = match &self.search {
            Some(provider) => {
                let p = plan(&ctx.query, ctx.depth);
                let opts = FanoutOptions {
                    recency: ctx.recency,
                    concurrency: self.config.search_concurrency,
                    timeout_ms: Some(self.config.search_timeout_ms),
                };
                fan_out(provider.as_ref(), &p, &opts, &ctx.cancel).await
            }
            None => {
                tracing::warn!("no search credential configured; using custom URLs only");
                Vec::new()
            }
        };
        build_candidates(hits, &ctx.custom_urls)
    }

    /// Extract up to `depth` documents from `candidates`, visited in the given order.
    ///
    /// Output is sorted by candidate position, so it depends only on which candidates succeeded.
    pub async fn extract_documents(
        &self,
        candidates: Vec<SearchHit>,
        depth: usize,
        ctx: &RequestContext,
    ) -> Vec<ExtractedDocument> {
        let quota = clamp_depth(depth);
        let done = AtomicUsize::new(0);
        let limiter = PoliteLimiter::new(self.config.min_interval());
        let max_chars = self.config.max_content_chars;

        let done = &done;
        let limiter = &limiter;
        let mut kept: Vec<(usize, ExtractedDocument)> =
            futures_util::stream::iter(candidates.into_iter().enumerate())
                .map(|(pos, hit)| async move {
                    if done.load(Ordering::SeqCst) >= quota || ctx.cancel.is_cancelled() {
                        return None;
                    }
                    let text = match self.extractor.extract(&hit.url, limiter, &ctx.cancel).await {
                        ExtractOutcome::Extracted(text) => text,
                        ExtractOutcome::Skipped(_) => return None,
                    };
                    let doc = ExtractedDocument::new(&hit, &text, max_chars)?;
                    match done.fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| {
                        (n < quota).then_some(n + 1)
                    }) {
                        Ok(prev) => {
                            tracing::info!(url = %hit.url, "processed {}/{}", prev + 1, quota);
                            Some((pos, doc))
                        }
                        Err(_) => {
                            tracing::debug!(url = %hit.url, "quota already met; discarding");
                            None
                        }
                    }
                })
                .buffer_unordered(self.config.extract_concurrency.max(1))
                .filter_map(futures_util::future::ready)
                .collect()
                .await;

        kept.sort_by_key(|(pos, _)| *pos);
        kept.into_iter().map(|(_, d)| d).collect()
    }

    /// The pipeline entry point. Never fails; an empty result means nothing was extracted.
    pub async fn search_and_extract(&self, ctx: &RequestContext) -> Vec<ExtractedDocument> {
        let span = tracing::info_span!("research", request_id = %ctx.request_id, query = %ctx.query);
        async move {
            let candidates = self.gather_candidates(ctx).await;
            tracing::info!(candidates = candidates.len(), custom = candidates.custom_len(), "candidates ready");
            let order = candidates.into_extraction_order(ctx.shuffle);
            let docs = self.extract_documents(order, ctx.depth, ctx).await;
            tracing::info!(documents = docs.len(), "extraction finished");
            docs
        }
        .instrument(span)
        .await
    }
}
