use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

/// Extracted documents shorter than this (after trimming) are never constructed.
pub const MIN_CONTENT_CHARS: usize = 100;
/// Default storage bound for `ExtractedDocument::content`.
pub const MAX_CONTENT_CHARS: usize = 10_000;
/// Appended to any text that was cut to fit a character budget.
pub const TRUNCATION_MARKER: &str = "...";

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("invalid url: {0}")]
    InvalidUrl(String),
    #[error("invalid input: {0}")]
    InvalidInput(String),
    #[error("fetch failed: {0}")]
    Fetch(String),
    #[error("timed out: {0}")]
    Timeout(String),
    #[error("{service} HTTP {status}")]
    Status { service: String, status: u16 },
    #[error("unsupported content: {0}")]
    Content(String),
    #[error("extracted text too short ({chars} chars)")]
    ThinContent { chars: usize },
    #[error("search failed: {0}")]
    Search(String),
    #[error("llm failed: {0}")]
    Llm(String),
    #[error("unexpected response format: {0}")]
    Format(String),
    #[error("not configured: {0}")]
    NotConfigured(String),
    #[error("cancelled")]
    Cancelled,
}

impl Error {
    /// Transient failures are worth another attempt (network hiccups, throttling, thin pages).
    pub fn is_transient(&self) -> bool {
        match self {
            Error::Fetch(_) | Error::Timeout(_) | Error::ThinContent { .. } => true,
            Error::Status { status, .. } => {
                matches!(*status, 408 | 429) || (500..=599).contains(status)
            }
            _ => false,
        }
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, Error::Timeout(_))
    }

    /// Short user-facing hint for the class of failure.
    pub fn suggestion(&self) -> &'static str {
        match self {
            Error::NotConfigured(_) => "Check that the required API keys are set in the environment.",
            Error::Search(_) => "Verify the search API key and your internet connection.",
            Error::InvalidUrl(_) | Error::Content(_) | Error::ThinContent { .. } => {
                "Try adding specific URLs you want analyzed."
            }
            Error::Llm(_) | Error::Format(_) => "Try a different generation provider.",
            Error::Timeout(_) | Error::Fetch(_) | Error::Status { .. } => {
                "Please try again later."
            }
            Error::InvalidInput(_) => "Check the command arguments.",
            Error::Cancelled => "The request was cancelled before it finished.",
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;

/// Cut `s` to at most `max_chars` characters. Returns the kept prefix and whether anything was cut.
pub fn truncate_chars(s: &str, max_chars: usize) -> (String, bool) {
    match s.char_indices().nth(max_chars) {
        Some((byte, _)) => (s[..byte].to_string(), true),
        None => (s.to_string(), false),
    }
}

/// Like `truncate_chars`, but marks a cut with `TRUNCATION_MARKER`.
pub fn truncate_with_marker(s: &str, max_chars: usize) -> String {
    let (mut out, clipped) = truncate_chars(s, max_chars);
    if clipped {
        out.push_str(TRUNCATION_MARKER);
    }
    out
}

/// Topical facet a hit or document belongs to.
///
/// The derived ordering is the citation precedence: the named categories in declaration
/// order, then any other category alphabetically.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum Category {
    General,
    BusinessViability,
    Competitors,
    Audience,
    Trends,
    Regulatory,
    Custom,
    Other(String),
}

impl Category {
    pub fn as_str(&self) -> &str {
        match self {
            Category::General => "general",
            Category::BusinessViability => "business_viability",
            Category::Competitors => "competitors",
            Category::Audience => "audience",
            Category::Trends => "trends",
            Category::Regulatory => "regulatory",
            Category::Custom => "custom",
            Category::Other(s) => s.as_str(),
        }
    }

    /// Section heading used when rendering research context.
    pub fn banner(&self) -> String {
        match self {
            Category::General => "## GENERAL INFORMATION".to_string(),
            Category::BusinessViability => "## BUSINESS VIABILITY INFORMATION".to_string(),
            Category::Competitors => "## COMPETITOR ANALYSIS INFORMATION".to_string(),
            Category::Audience => "## TARGET AUDIENCE INFORMATION".to_string(),
            Category::Trends => "## MARKET TRENDS INFORMATION".to_string(),
            Category::Regulatory => "## REGULATORY & COMPLIANCE INFORMATION".to_string(),
            Category::Custom => "## CUSTOM SOURCES PROVIDED BY USER".to_string(),
            Category::Other(s) => format!("## {} INFORMATION", s.to_uppercase()),
        }
    }
}

impl Default for Category {
    fn default() -> Self {
        Category::General
    }
}

impl From<&str> for Category {
    fn from(s: &str) -> Self {
        match s.trim() {
            "general" => Category::General,
            "business_viability" => Category::BusinessViability,
            "competitors" => Category::Competitors,
            "audience" => Category::Audience,
            "trends" => Category::Trends,
            "regulatory" => Category::Regulatory,
            "custom" => Category::Custom,
            other => Category::Other(other.to_string()),
        }
    }
}

impl From<String> for Category {
    fn from(s: String) -> Self {
        Category::from(s.as_str())
    }
}

impl From<Category> for String {
    fn from(c: Category) -> Self {
        c.as_str().to_string()
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One search facet: the category and the suffix appended to the user's query.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchCategory {
    pub category: Category,
    pub query_suffix: &'static str,
}

impl SearchCategory {
    pub fn query_for(&self, query: &str) -> String {
        if self.query_suffix.is_empty() {
            query.to_string()
        } else {
            format!("{query} {}", self.query_suffix)
        }
    }
}

/// The fixed facet table: general first, then the five topical facets.
pub fn search_categories() -> [SearchCategory; 6] {
    [
        SearchCategory {
            category: Category::General,
            query_suffix: "",
        },
        SearchCategory {
            category: Category::BusinessViability,
            query_suffix: "business viability",
        },
        SearchCategory {
            category: Category::Competitors,
            query_suffix: "competitors SWOT analysis",
        },
        SearchCategory {
            category: Category::Audience,
            query_suffix: "target audience demographics",
        },
        SearchCategory {
            category: Category::Trends,
            query_suffix: "industry trends",
        },
        SearchCategory {
            category: Category::Regulatory,
            query_suffix: "regulatory compliance",
        },
    ]
}

/// How recent search results must be.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Recency {
    AnyTime,
    PastYear,
    #[default]
    PastMonth,
    PastWeek,
    PastDay,
}

impl Recency {
    pub fn label(&self) -> &'static str {
        match self {
            Recency::AnyTime => "Any time",
            Recency::PastYear => "Past year",
            Recency::PastMonth => "Past month",
            Recency::PastWeek => "Past week",
            Recency::PastDay => "Past day",
        }
    }
}

impl FromStr for Recency {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let norm = s
            .trim()
            .to_ascii_lowercase()
            .replace(['_', '-'], " ");
        match norm.as_str() {
            "any time" | "anytime" | "any" | "all" => Ok(Recency::AnyTime),
            "past year" | "year" | "y" => Ok(Recency::PastYear),
            "past month" | "month" | "m" => Ok(Recency::PastMonth),
            "past week" | "week" | "w" => Ok(Recency::PastWeek),
            "past day" | "day" | "d" | "24h" => Ok(Recency::PastDay),
            _ => Err(Error::InvalidInput(format!("unknown recency: {s:?}"))),
        }
    }
}

impl fmt::Display for Recency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchQuery {
    pub query: String,
    pub recency: Recency,
    pub max_results: usize,
    pub timeout_ms: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchHit {
    pub title: String,
    pub url: String,
    pub snippet: String,
    #[serde(default)]
    pub category: Category,
}

impl SearchHit {
    /// A hit synthesized for a user-supplied URL.
    pub fn custom(url: &str) -> Self {
        let host = url::Url::parse(url)
            .ok()
            .and_then(|u| u.host_str().map(|h| h.to_string()))
            .unwrap_or_default();
        Self {
            title: format!("Custom Source: {host}"),
            url: url.to_string(),
            snippet: "User-provided source".to_string(),
            category: Category::Custom,
        }
    }
}

#[async_trait::async_trait]
pub trait SearchProvider: Send + Sync {
    fn name(&self) -> &'static str;
    async fn search(&self, q: &SearchQuery) -> Result<Vec<SearchHit>>;
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FetchRequest {
    pub url: String,
    /// Timeout for the operation (network + body).
    pub timeout_ms: Option<u64>,
    /// Hard cap on bytes read from the response body.
    pub max_bytes: Option<u64>,
    pub headers: BTreeMap<String, String>,
}

impl FetchRequest {
    pub fn timeout(&self) -> Option<Duration> {
        self.timeout_ms.map(Duration::from_millis)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FetchResponse {
    pub url: String,
    pub final_url: String,
    pub status: u16,
    pub content_type: Option<String>,
    pub bytes: Vec<u8>,
    pub truncated: bool,
}

impl FetchResponse {
    pub fn text_lossy(&self) -> String {
        String::from_utf8_lossy(&self.bytes).to_string()
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    pub fn is_html(&self) -> bool {
        self.content_type
            .as_deref()
            .map(|ct| ct.to_ascii_lowercase().contains("text/html"))
            .unwrap_or(false)
    }
}

#[async_trait::async_trait]
pub trait FetchBackend: Send + Sync {
    async fn fetch(&self, req: &FetchRequest) -> Result<FetchResponse>;
}

/// A page whose readable text was extracted successfully.
///
/// Only `ExtractedDocument::new` builds these, which keeps `content` within
/// `MIN_CONTENT_CHARS..=max_content_chars` (+ marker).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExtractedDocument {
    pub title: String,
    pub url: String,
    pub snippet: String,
    pub content: String,
    pub accessed_at: DateTime<Utc>,
    pub category: Category,
}

impl ExtractedDocument {
    pub fn new(hit: &SearchHit, content: &str, max_content_chars: usize) -> Option<Self> {
        let trimmed = content.trim();
        if trimmed.chars().count() < MIN_CONTENT_CHARS {
            return None;
        }
        Some(Self {
            title: hit.title.clone(),
            url: hit.url.clone(),
            snippet: hit.snippet.clone(),
            content: truncate_with_marker(trimmed, max_content_chars.max(MIN_CONTENT_CHARS)),
            accessed_at: Utc::now(),
            category: hit.category.clone(),
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceCitation {
    pub id: usize,
    pub title: String,
    pub url: String,
    pub accessed_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResearchContext {
    pub rendered_text: String,
    pub citations: Vec<SourceCitation>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "name", rename_all = "snake_case")]
pub enum AuthScheme {
    /// `Authorization: Bearer <key>`
    Bearer,
    /// Key sent in a custom header.
    Header(String),
    /// Key sent as a URL query parameter.
    QueryParam(String),
}

/// Static description of one generation backend.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderConfig {
    pub name: String,
    /// Human-facing name used in messages ("OpenAI").
    pub label: String,
    pub endpoint: String,
    pub auth: AuthScheme,
    pub credential_env: String,
    /// Where a user can create the credential; empty when unknown.
    #[serde(default)]
    pub key_url: String,
    pub model: String,
    /// Maximum number of calls per request (first try included).
    pub max_retries: u32,
    pub timeout_ms: u64,
}

impl ProviderConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Prompt {
    pub system: String,
    pub user: String,
}

impl Prompt {
    /// System instruction and user message as one prompt, for single-string backends.
    pub fn joined(&self) -> String {
        format!("{}\n\n{}", self.system, self.user)
    }
}

/// A text-generation backend: one request shape, auth scheme and response envelope.
#[async_trait::async_trait]
pub trait GenerationBackend: Send + Sync {
    fn name(&self) -> &'static str;
    fn aliases(&self) -> &'static [&'static str] {
        &[]
    }
    fn config(&self) -> &ProviderConfig;
    /// Single attempt. Retries are the caller's business.
    async fn complete(&self, api_key: &str, prompt: &Prompt) -> Result<String>;
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeneratedReport {
    pub query: String,
    pub text: String,
    pub citations: Vec<SourceCitation>,
    pub provider: Option<String>,
    /// True when no sources were extracted and the templated report was used.
    pub fallback: bool,
    pub generated_at: DateTime<Utc>,
}
