use crate::ratelimit::PoliteLimiter;
use crate::retry::BackoffPolicy;
use researchpipe_core::{Error, FetchBackend, FetchRequest, Result, MIN_CONTENT_CHARS};
use serde::Serialize;
use std::collections::BTreeMap;
use std::io::Cursor;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

const BINARY_EXTENSIONS: &[&str] = &[".pdf", ".doc", ".docx", ".ppt", ".pptx", ".xls", ".xlsx"];

const USER_AGENTS: &[&str] = &[
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/124.0.0.0 Safari/537.36",
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/605.1.15 (KHTML, like Gecko) Version/17.4 Safari/605.1.15",
    "Mozilla/5.0 (X11; Linux x86_64; rv:125.0) Gecko/20100101 Firefox/125.0",
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64; rv:125.0) Gecko/20100101 Firefox/125.0",
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/124.0.0.0 Safari/537.36",
];

fn norm_ws(s: &str) -> String {
    s.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// True when the URL path names an office/PDF document we never try to read.
pub fn is_binary_document_url(url: &url::Url) -> bool {
    let path = url.path().to_ascii_lowercase();
    BINARY_EXTENSIONS.iter().any(|ext| path.ends_with(ext))
}

/// Request headers that look like an ordinary browser visit.
pub fn browser_headers(url: &str) -> BTreeMap<String, String> {
    let ua = USER_AGENTS[fastrand::usize(..USER_AGENTS.len())];
    let mut h = BTreeMap::new();
    h.insert("User-Agent".to_string(), ua.to_string());
    h.insert(
        "Accept".to_string(),
        "text/html,application/xhtml+xml,application/xml;q=0.9,*/*;q=0.8".to_string(),
    );
    h.insert("Accept-Language".to_string(), "en-US,en;q=0.9".to_string());
    h.insert("Referer".to_string(), url.to_string());
    h
}

/// Remove `<tag ...> ... </tag>` blocks, ASCII-case-insensitive on the tag name.
/// An unclosed block ends the scan and the remainder is kept as-is.
fn strip_tag_blocks(html: &str, tag: &str) -> String {
    let lower = html.to_ascii_lowercase();
    let open_pat = format!("<{}", tag.to_ascii_lowercase());
    let close_pat = format!("</{}>", tag.to_ascii_lowercase());

    let mut out = String::with_capacity(html.len());
    let mut i = 0usize;
    while let Some(rel) = lower[i..].find(&open_pat) {
        let start = i + rel;
        let body = start + open_pat.len();
        let Some(rel_end) = lower[body..].find(&close_pat) else {
            break;
        };
        out.push_str(&html[i..start]);
        i = body + rel_end + close_pat.len();
    }
    out.push_str(&html[i..]);
    out
}

fn strip_non_visible(html: &str) -> String {
    ["script", "style", "noscript", "template", "svg"]
        .iter()
        .fold(html.to_string(), |acc, tag| strip_tag_blocks(&acc, tag))
}

const BOILERPLATE_MARKS: &[&str] = &[
    "nav", "navbar", "navigation", "menu", "sidebar", "footer", "header", "banner", "cookie",
    "cookies", "consent", "advert", "ad", "ads", "promo", "subscribe", "newsletter", "comment",
    "comments",
];

/// Chrome detection by whole class/id tokens (`site-nav` matches, `canvas` does not).
/// `<article>` and `<main>` are never skipped for their class.
fn is_boilerplate_container(el: &html_scraper::ElementRef) -> bool {
    let v = el.value();
    if matches!(v.name(), "article" | "main") {
        return false;
    }
    let marks = format!(
        "{} {}",
        v.attr("class").unwrap_or(""),
        v.attr("id").unwrap_or("")
    )
    .to_ascii_lowercase();
    marks
        .split(|c: char| c.is_whitespace() || c == '-' || c == '_')
        .any(|tok| BOILERPLATE_MARKS.contains(&tok))
}

fn link_text_chars(el: &html_scraper::ElementRef, links: &html_scraper::Selector) -> usize {
    el.select(links)
        .map(|a| a.text().map(|t| t.chars().count()).sum::<usize>())
        .sum()
}

/// Readability-style selection: score every block container by its non-link text,
/// favor `<article>`/`<main>`, and return the best block's text.
fn main_content_text(html: &str) -> Option<String> {
    let doc = html_scraper::Html::parse_document(html);
    let blocks = html_scraper::Selector::parse("article, main, section, div").ok()?;
    let links = html_scraper::Selector::parse("a").ok()?;

    let mut best: Option<(i64, String)> = None;
    for el in doc.select(&blocks).take(20_000) {
        if is_boilerplate_container(&el) {
            continue;
        }
        let chars: usize = el.text().map(|t| t.chars().count()).sum();
        if chars < 20 {
            continue;
        }
        let link_chars = link_text_chars(&el, &links);
        let mut score = chars as i64 - 2 * link_chars as i64;
        score += match el.value().name() {
            "article" => 500,
            "main" => 300,
            _ => 0,
        };
        if link_chars > chars / 2 {
            score -= 500;
        }
        if best.as_ref().map_or(score > 0, |(s, _)| score > *s) {
            let text = norm_ws(&el.text().collect::<Vec<_>>().join(" "));
            best = Some((score, text));
        }
    }
    best.map(|(_, t)| t)
}

/// Render the whole (already stripped) page to text with normalized whitespace.
fn visible_text(html: &str) -> String {
    let rendered = html2text::from_read(Cursor::new(html.as_bytes()), 10_000)
        .unwrap_or_else(|_| html.to_string());
    rendered
        .lines()
        .map(norm_ws)
        .filter(|l| !l.is_empty())
        .collect::<Vec<_>>()
        .join("\n")
}

/// Which strategy produced the text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Strategy {
    MainContent,
    VisibleText,
}

/// Readable text from an HTML page, or `ThinContent` when neither strategy finds
/// at least `MIN_CONTENT_CHARS` characters.
pub fn readable_text(html: &str) -> Result<(Strategy, String)> {
    let cleaned = strip_non_visible(html);
    if let Some(main) = main_content_text(&cleaned) {
        if main.chars().count() >= MIN_CONTENT_CHARS {
            return Ok((Strategy::MainContent, main));
        }
    }
    let text = visible_text(&cleaned);
    let chars = text.chars().count();
    if chars >= MIN_CONTENT_CHARS {
        Ok((Strategy::VisibleText, text))
    } else {
        Err(Error::ThinContent { chars })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", content = "detail", rename_all = "snake_case")]
pub enum SkipReason {
    InvalidUrl(String),
    BinaryDocument,
    NotHtml(String),
    HttpStatus(u16),
    TooShort,
    Network(String),
    Cancelled,
}

impl std::fmt::Display for SkipReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SkipReason::InvalidUrl(e) => write!(f, "invalid url: {e}"),
            SkipReason::BinaryDocument => f.write_str("binary document"),
            SkipReason::NotHtml(ct) => write!(f, "not html ({ct})"),
            SkipReason::HttpStatus(s) => write!(f, "HTTP {s}"),
            SkipReason::TooShort => f.write_str("not enough readable text"),
            SkipReason::Network(e) => write!(f, "network: {e}"),
            SkipReason::Cancelled => f.write_str("cancelled"),
        }
    }
}

impl From<Error> for SkipReason {
    fn from(e: Error) -> Self {
        match e {
            Error::InvalidUrl(s) => SkipReason::InvalidUrl(s),
            Error::Content(ct) => SkipReason::NotHtml(ct),
            Error::Status { status, .. } => SkipReason::HttpStatus(status),
            Error::ThinContent { .. } => SkipReason::TooShort,
            Error::Cancelled => SkipReason::Cancelled,
            other => SkipReason::Network(other.to_string()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExtractOutcome {
    Extracted(String),
    Skipped(SkipReason),
}

#[derive(Clone)]
pub struct ContentExtractor {
    fetcher: Arc<dyn FetchBackend>,
    policy: BackoffPolicy,
    timeout_ms: u64,
    max_bytes: u64,
}

impl ContentExtractor {
    pub fn new(fetcher: Arc<dyn FetchBackend>, policy: BackoffPolicy, timeout_ms: u64, max_bytes: u64) -> Self {
        Self {
            fetcher,
            policy,
            timeout_ms,
            max_bytes,
        }
    }

    async fn attempt(&self, url: &str, limiter: &PoliteLimiter, cancel: &CancellationToken) -> Result<String> {
        limiter.acquire(cancel).await?;
        let req = FetchRequest {
            url: url.to_string(),
            timeout_ms: Some(self.timeout_ms),
            max_bytes: Some(self.max_bytes),
            headers: browser_headers(url),
        };
        let resp = self.fetcher.fetch(&req).await?;
        if !resp.is_success() {
            return Err(Error::Status {
                service: "page".to_string(),
                status: resp.status,
            });
        }
        if !resp.is_html() {
            return Err(Error::Content(
                resp.content_type.unwrap_or_else(|| "unknown".to_string()),
            ));
        }
        let (strategy, text) = readable_text(&resp.text_lossy())?;
        tracing::debug!(url, ?strategy, chars = text.chars().count(), "extracted page text");
        Ok(text)
    }

    /// Fetch one page and return its readable text. Never fails: every problem is a skip.
    pub async fn extract(
        &self,
        url: &str,
        limiter: &PoliteLimiter,
        cancel: &CancellationToken,
    ) -> ExtractOutcome {
        let parsed = match url::Url::parse(url) {
            Ok(u) => u,
            Err(e) => return ExtractOutcome::Skipped(SkipReason::InvalidUrl(e.to_string())),
        };
        if !matches!(parsed.scheme(), "http" | "https") {
            return ExtractOutcome::Skipped(SkipReason::InvalidUrl(format!(
                "unsupported scheme {}",
                parsed.scheme()
            )));
        }
        if is_binary_document_url(&parsed) {
            return ExtractOutcome::Skipped(SkipReason::BinaryDocument);
        }

        let res = self
            .policy
            .run(cancel, Error::is_transient, |_| self.attempt(url, limiter, cancel))
            .await;
        match res {
            Ok(text) => ExtractOutcome::Extracted(text),
            Err(e) => {
                tracing::warn!(url, error = %e, "skipping url");
                ExtractOutcome::Skipped(e.into())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::{article_html, serve};
    use crate::{default_http_client, LocalFetcher};
    use axum::{http::header, http::StatusCode, routing::get, Router};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    fn extractor() -> ContentExtractor {
        ContentExtractor::new(
            Arc::new(LocalFetcher::new(default_http_client().unwrap())),
            BackoffPolicy::fixed(3, Duration::from_millis(5)),
            2_000,
            5 * 1024 * 1024,
        )
    }

    fn html(body: String) -> ([(header::HeaderName, &'static str); 1], String) {
        ([(header::CONTENT_TYPE, "text/html; charset=utf-8")], body)
    }

    #[test]
    fn binary_urls_are_detected_case_insensitively() {
        let u = |s: &str| url::Url::parse(s).unwrap();
        assert!(is_binary_document_url(&u("https://x.com/report.PDF")));
        assert!(is_binary_document_url(&u("https://x.com/a/b.xlsx?dl=1")));
        assert!(!is_binary_document_url(&u("https://x.com/pdf-guide")));
        assert!(!is_binary_document_url(&u("https://x.com/page.html")));
    }

    #[test]
    fn browser_headers_refer_to_the_target() {
        let h = browser_headers("https://example.com/a");
        assert_eq!(h["Referer"], "https://example.com/a");
        assert!(USER_AGENTS.contains(&h["User-Agent"].as_str()));
        assert!(h.contains_key("Accept-Language"));
    }

    #[test]
    fn strip_tag_blocks_removes_closed_blocks_only() {
        let s = strip_tag_blocks("a<SCRIPT>x</script>b<script>y", "script");
        assert_eq!(s, "ab<script>y");
    }

    #[test]
    fn main_content_prefers_article_over_chrome() {
        let out = readable_text(&article_html("Cargo bikes")).unwrap();
        assert_eq!(out.0, Strategy::MainContent);
        assert!(out.1.contains("Cargo bikes is discussed"));
        assert!(!out.1.contains("var junk"));
        assert!(!out.1.contains("Home"));
    }

    #[test]
    fn article_and_main_are_kept_whatever_their_class() {
        let para = "Regional grid operators expanded battery storage capacity this year. ".repeat(4);
        let page = format!(
            "<html><body><main class=\"content has-sidebar\"><p>{para}</p></main>\
             <div class=\"sidebar\"><a href=\"/x\">Related link one</a></div></body></html>"
        );
        let (strategy, text) = readable_text(&page).unwrap();
        assert_eq!(strategy, Strategy::MainContent);
        assert!(text.contains("battery storage capacity"));
        assert!(!text.contains("Related link one"));

        let page = format!(
            "<html><body><article class=\"post comments-open\"><p>{para}</p></article></body></html>"
        );
        let (strategy, text) = readable_text(&page).unwrap();
        assert_eq!(strategy, Strategy::MainContent);
        assert!(text.contains("battery storage capacity"));
    }

    #[test]
    fn boilerplate_marks_match_whole_tokens_only() {
        let para = "Heat pump installations doubled in northern markets last winter. ".repeat(4);
        let page = format!(
            "<html><body><div class=\"canvas-wrapper\"><p>{para}</p></div>\
             <div id=\"site_footer\"><p>Copyright notice and imprint for the whole site here.</p></div>\
             </body></html>"
        );
        let (strategy, text) = readable_text(&page).unwrap();
        assert_eq!(strategy, Strategy::MainContent);
        assert!(text.contains("Heat pump installations"));
        assert!(!text.contains("Copyright notice"));
    }

    #[test]
    fn template_and_svg_blocks_are_not_text() {
        let para = "Fleet operators report lower maintenance costs for electric vans. ".repeat(4);
        let page = format!(
            "<html><body><article><p>{para}</p>\
             <template><p>hidden template row</p></template>\
             <svg viewBox=\"0 0 10 10\"><text>chart axis label</text></svg></article></body></html>"
        );
        let (_, text) = readable_text(&page).unwrap();
        assert!(text.contains("electric vans"));
        assert!(!text.contains("hidden template row"));
        assert!(!text.contains("chart axis label"));
    }

    #[test]
    fn falls_back_to_visible_text() {
        // No block containers at all: only the fallback can read this.
        let para = "Plain paragraph text about solar panels and rooftop installs. ".repeat(3);
        let page = format!("<html><body><p>{para}</p><style>p {{ color: red }}</style></body></html>");
        let (strategy, text) = readable_text(&page).unwrap();
        assert_eq!(strategy, Strategy::VisibleText);
        assert!(text.contains("solar panels"));
        assert!(!text.contains("color: red"));
    }

    #[test]
    fn thin_pages_are_rejected() {
        let err = readable_text("<html><body><p>tiny</p></body></html>").unwrap_err();
        assert!(matches!(err, Error::ThinContent { .. }));
    }

    #[tokio::test]
    async fn extracts_article_text_over_http() {
        let app = Router::new().route("/a", get(|| async { html(article_html("Heat pumps")) }));
        let addr = serve(app).await;
        let out = extractor()
            .extract(&format!("http://{addr}/a"), &PoliteLimiter::disabled(), &CancellationToken::new())
            .await;
        match out {
            ExtractOutcome::Extracted(t) => assert!(t.contains("Heat pumps")),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[tokio::test]
    async fn binary_url_is_skipped_without_network() {
        let hits = Arc::new(AtomicUsize::new(0));
        let h = hits.clone();
        let app = Router::new().route(
            "/report.pdf",
            get(move || {
                h.fetch_add(1, Ordering::SeqCst);
                async { "pdf" }
            }),
        );
        let addr = serve(app).await;
        let out = extractor()
            .extract(
                &format!("http://{addr}/report.pdf"),
                &PoliteLimiter::disabled(),
                &CancellationToken::new(),
            )
            .await;
        assert_eq!(out, ExtractOutcome::Skipped(SkipReason::BinaryDocument));
        assert_eq!(hits.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn thin_page_is_retried_three_times_then_skipped() {
        let hits = Arc::new(AtomicUsize::new(0));
        let h = hits.clone();
        let app = Router::new().route(
            "/thin",
            get(move || {
                h.fetch_add(1, Ordering::SeqCst);
                async { html("<p>short</p>".to_string()) }
            }),
        );
        let addr = serve(app).await;
        let out = extractor()
            .extract(&format!("http://{addr}/thin"), &PoliteLimiter::disabled(), &CancellationToken::new())
            .await;
        assert_eq!(out, ExtractOutcome::Skipped(SkipReason::TooShort));
        assert_eq!(hits.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn not_found_and_non_html_are_not_retried() {
        let hits = Arc::new(AtomicUsize::new(0));
        let (h1, h2) = (hits.clone(), hits.clone());
        let app = Router::new()
            .route(
                "/missing",
                get(move || {
                    h1.fetch_add(1, Ordering::SeqCst);
                    async { (StatusCode::NOT_FOUND, "nope") }
                }),
            )
            .route(
                "/data",
                get(move || {
                    h2.fetch_add(1, Ordering::SeqCst);
                    async { ([(header::CONTENT_TYPE, "application/json")], "{}") }
                }),
            );
        let addr = serve(app).await;
        let ex = extractor();
        let limiter = PoliteLimiter::disabled();
        let cancel = CancellationToken::new();

        let out = ex.extract(&format!("http://{addr}/missing"), &limiter, &cancel).await;
        assert_eq!(out, ExtractOutcome::Skipped(SkipReason::HttpStatus(404)));
        let out = ex.extract(&format!("http://{addr}/data"), &limiter, &cancel).await;
        assert!(matches!(out, ExtractOutcome::Skipped(SkipReason::NotHtml(_))));
        assert_eq!(hits.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn server_errors_are_retried() {
        let hits = Arc::new(AtomicUsize::new(0));
        let h = hits.clone();
        let app = Router::new().route(
            "/flaky",
            get(move || {
                let n = h.fetch_add(1, Ordering::SeqCst);
                async move {
                    if n == 0 {
                        Err(StatusCode::SERVICE_UNAVAILABLE)
                    } else {
                        Ok(html(article_html("Recovered")))
                    }
                }
            }),
        );
        let addr = serve(app).await;
        let out = extractor()
            .extract(&format!("http://{addr}/flaky"), &PoliteLimiter::disabled(), &CancellationToken::new())
            .await;
        assert!(matches!(out, ExtractOutcome::Extracted(_)));
        assert_eq!(hits.load(Ordering::SeqCst), 2);
    }
}
