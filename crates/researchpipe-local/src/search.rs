use crate::config::{env, SERP_API_KEY_ENV};
use researchpipe_core::{Category, Error, Recency, Result, SearchHit, SearchProvider, SearchQuery};
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;

pub const SERPAPI_DEFAULT_ENDPOINT: &str = "https://serpapi.com/search.json";

fn timeout_ms_from_query(q: &SearchQuery) -> u64 {
    // Provider requests can hang indefinitely without an explicit timeout.
    q.timeout_ms.unwrap_or(20_000).clamp(1_000, 60_000)
}

/// SerpApi `tbs` value for a recency window. `None` means the parameter is omitted.
pub fn serpapi_tbs(recency: Recency) -> Option<&'static str> {
    match recency {
        Recency::AnyTime => None,
        Recency::PastYear => Some("qdr:y"),
        Recency::PastMonth => Some("qdr:m"),
        Recency::PastWeek => Some("qdr:w"),
        Recency::PastDay => Some("qdr:d"),
    }
}

fn serpapi_key_from_env() -> Option<String> {
    env(&format!("RESEARCHPIPE_{SERP_API_KEY_ENV}")).or_else(|| env(SERP_API_KEY_ENV))
}

fn serpapi_endpoint_from_env() -> Option<String> {
    env("RESEARCHPIPE_SERPAPI_ENDPOINT")
}

pub struct SerpApiSearchProvider {
    client: reqwest::Client,
    api_key: SecretString,
    endpoint: String,
}

impl std::fmt::Debug for SerpApiSearchProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SerpApiSearchProvider")
            .field("endpoint", &self.endpoint)
            .finish_non_exhaustive()
    }
}

impl SerpApiSearchProvider {
    pub fn new(client: reqwest::Client, api_key: SecretString, endpoint: impl Into<String>) -> Self {
        Self {
            client,
            api_key,
            endpoint: endpoint.into(),
        }
    }

    pub fn from_env(client: reqwest::Client) -> Result<Self> {
        let api_key = serpapi_key_from_env().ok_or_else(|| {
            Error::NotConfigured(format!(
                "missing RESEARCHPIPE_{SERP_API_KEY_ENV} (or {SERP_API_KEY_ENV})"
            ))
        })?;
        let endpoint =
            serpapi_endpoint_from_env().unwrap_or_else(|| SERPAPI_DEFAULT_ENDPOINT.to_string());
        Ok(Self::new(client, SecretString::from(api_key), endpoint))
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

#[derive(Debug, Deserialize)]
struct SerpApiResponse {
    #[serde(default)]
    organic_results: Vec<SerpApiOrganic>,
    error: Option<String>,
}

#[derive(Debug, Deserialize)]
struct SerpApiOrganic {
    title: Option<String>,
    link: Option<String>,
    snippet: Option<String>,
}

impl SerpApiResponse {
    fn into_hits(self, max_results: usize) -> Vec<SearchHit> {
        self.organic_results
            .into_iter()
            .filter_map(|r| {
                let url = r.link.filter(|l| !l.trim().is_empty())?;
                Some(SearchHit {
                    title: r.title.unwrap_or_default(),
                    url,
                    snippet: r.snippet.unwrap_or_default(),
                    category: Category::General,
                })
            })
            .take(max_results)
            .collect()
    }
}

#[async_trait::async_trait]
impl SearchProvider for SerpApiSearchProvider {
    fn name(&self) -> &'static str {
        "serpapi"
    }

    async fn search(&self, q: &SearchQuery) -> Result<Vec<SearchHit>> {
        let timeout_ms = timeout_ms_from_query(q);
        let num = q.max_results.max(1);

        let mut req = self.client.get(&self.endpoint).query(&[
            ("q", q.query.as_str()),
            ("api_key", self.api_key.expose_secret()),
            ("num", num.to_string().as_str()),
            ("engine", "google"),
            ("safe", "active"),
        ]);
        if let Some(tbs) = serpapi_tbs(q.recency) {
            req = req.query(&[("tbs", tbs)]);
        }

        let resp = req
            .timeout(std::time::Duration::from_millis(timeout_ms))
            .send()
            .await
            .map_err(|e| crate::transport_error("serpapi", e))?;
        let status = resp.status();
        if !status.is_success() {
            return Err(Error::Status {
                service: "serpapi".to_string(),
                status: status.as_u16(),
            });
        }

        let parsed: SerpApiResponse = resp
            .json()
            .await
            .map_err(|e| Error::Search(e.to_string()))?;
        if parsed.organic_results.is_empty() {
            if let Some(err) = parsed.error.as_deref() {
                // SerpApi reports "no results" through the error field with a 200.
                tracing::debug!(query = %q.query, error = err, "serpapi returned no organic results");
            }
        }
        Ok(parsed.into_hits(num))
    }
}
