use futures_util::StreamExt;
use researchpipe_core::{Error, FetchBackend, FetchRequest, FetchResponse, Result};
use std::collections::BTreeMap;
use std::time::Duration;

pub mod anthropic;
pub mod cohere;
pub mod config;
pub mod context;
pub mod dedup;
pub mod extract;
pub mod fanout;
pub mod gateway;
pub mod gemini;
pub mod openai;
pub mod pipeline;
pub mod planner;
pub mod prompt;
pub mod ratelimit;
pub mod report;
pub mod retry;
pub mod search;

/// Map a reqwest transport error into the core taxonomy, keeping timeouts distinct.
pub(crate) fn transport_error(service: &str, e: reqwest::Error) -> Error {
    if e.is_timeout() {
        Error::Timeout(format!("{service}: {e}"))
    } else {
        Error::Fetch(format!("{service}: {e}"))
    }
}

/// Build the shared HTTP client.
pub fn default_http_client() -> Result<reqwest::Client> {
    reqwest::Client::builder()
        .redirect(reqwest::redirect::Policy::limited(10))
        // Safety defaults: avoid "hang forever" on DNS/TLS/body stalls.
        // Per-request timeouts still override the overall timeout.
        .connect_timeout(Duration::from_secs(10))
        .timeout(Duration::from_secs(120))
        .build()
        .map_err(|e| Error::Fetch(e.to_string()))
}

#[derive(Debug, Clone)]
pub struct LocalFetcher {
    client: reqwest::Client,
}

impl LocalFetcher {
    pub fn new(client: reqwest::Client) -> Self {
        Self { client }
    }

    fn apply_headers(
        &self,
        mut rb: reqwest::RequestBuilder,
        headers: &BTreeMap<String, String>,
    ) -> reqwest::RequestBuilder {
        for (k, v) in headers {
            if let (Ok(name), Ok(value)) = (
                reqwest::header::HeaderName::from_bytes(k.as_bytes()),
                reqwest::header::HeaderValue::from_str(v),
            ) {
                rb = rb.header(name, value);
            }
        }
        rb
    }
}

#[async_trait::async_trait]
impl FetchBackend for LocalFetcher {
    async fn fetch(&self, req: &FetchRequest) -> Result<FetchResponse> {
        let url = url::Url::parse(&req.url).map_err(|e| Error::InvalidUrl(e.to_string()))?;

        let mut rb = self.client.get(url);
        if let Some(to) = req.timeout() {
            rb = rb.timeout(to);
        }
        rb = self.apply_headers(rb, &req.headers);
        let resp = rb.send().await.map_err(|e| transport_error("page", e))?;
        let final_url = resp.url().to_string();
        let status = resp.status().as_u16();
        let content_type = resp
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(|s| s.to_string());

        let max_bytes = req.max_bytes.unwrap_or(u64::MAX) as usize;
        let mut truncated = false;
        let mut bytes = Vec::new();
        let mut stream = resp.bytes_stream();
        while let Some(chunk) = stream.next().await {
            let chunk = chunk.map_err(|e| transport_error("page body", e))?;
            if bytes.len().saturating_add(chunk.len()) > max_bytes {
                let can_take = max_bytes.saturating_sub(bytes.len());
                bytes.extend_from_slice(&chunk[..can_take]);
                truncated = true;
                break;
            }
            bytes.extend_from_slice(&chunk);
        }

        Ok(FetchResponse {
            url: req.url.clone(),
            final_url,
            status,
            content_type,
            bytes,
            truncated,
        })
    }
}


#[cfg(test)]
mod tests {
    use super::*;
    use axum::{http::header, http::StatusCode, routing::get, Router};

    fn req(url: String, max_bytes: Option<u64>) -> FetchRequest {
        FetchRequest {
            url,
            timeout_ms: Some(2_000),
            max_bytes,
            headers: BTreeMap::new(),
        }
    }

    #[tokio::test]
    async fn local_fetcher_reports_status_and_content_type() {
        let app = Router::new()
            .route(
                "/",
                get(|| async { ([(header::CONTENT_TYPE, "text/html; charset=utf-8")], "<p>hi</p>") }),
            )
            .route("/gone", get(|| async { (StatusCode::GONE, "gone") }));
        let addr = testutil::serve(app).await;
        let fetcher = LocalFetcher::new(default_http_client().unwrap());

        let ok = fetcher.fetch(&req(format!("http://{addr}/"), None)).await.unwrap();
        assert!(ok.is_success());
        assert!(ok.is_html());
        assert_eq!(ok.text_lossy(), "<p>hi</p>");

        let gone = fetcher
            .fetch(&req(format!("http://{addr}/gone"), None))
            .await
            .unwrap();
        assert_eq!(gone.status, 410);
        assert!(!gone.is_success());
    }

    #[tokio::test]
    async fn local_fetcher_caps_body_bytes() {
        let app = Router::new().route("/", get(|| async { "x".repeat(10_000) }));
        let addr = testutil::serve(app).await;
        let fetcher = LocalFetcher::new(default_http_client().unwrap());
        let resp = fetcher
            .fetch(&req(format!("http://{addr}/"), Some(100)))
            .await
            .unwrap();
        assert_eq!(resp.bytes.len(), 100);
        assert!(resp.truncated);
    }

    #[tokio::test]
    async fn local_fetcher_forwards_headers() {
        let app = Router::new().route(
            "/",
            get(|headers: axum::http::HeaderMap| async move {
                let referer = headers
                    .get(header::REFERER)
                    .and_then(|v| v.to_str().ok())
                    .unwrap_or("")
                    .to_string();
                format!("referer={referer}")
            }),
        );
        let addr = testutil::serve(app).await;
        let fetcher = LocalFetcher::new(default_http_client().unwrap());
        let mut r = req(format!("http://{addr}/"), None);
        r.headers
            .insert("Referer".to_string(), "https://example.com/".to_string());
        let resp = fetcher.fetch(&r).await.unwrap();
        assert_eq!(resp.text_lossy(), "referer=https://example.com/");
    }

    #[tokio::test]
    async fn invalid_url_is_rejected_before_network() {
        let fetcher = LocalFetcher::new(default_http_client().unwrap());
        let err = fetcher.fetch(&req("not a url".to_string(), None)).await;
        assert!(matches!(err, Err(Error::InvalidUrl(_))));
    }
}
