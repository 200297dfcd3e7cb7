//! Environment-driven configuration: pipeline knobs, the provider table, credential lookup.

use researchpipe_core::{AuthScheme, ProviderConfig, MAX_CONTENT_CHARS};
use secrecy::SecretString;
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

/// Trimmed env var; empty counts as unset.
pub fn env(key: &str) -> Option<String> {
    std::env::var(key)
        .ok()
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}

pub fn env_u64(key: &str, default: u64) -> u64 {
    env(key).and_then(|v| v.parse().ok()).unwrap_or(default)
}

pub fn env_usize_clamped(key: &str, default: usize, min: usize, max: usize) -> usize {
    env(key)
        .and_then(|v| v.parse::<usize>().ok())
        .unwrap_or(default)
        .clamp(min, max)
}

pub fn env_bool(key: &str, default: bool) -> bool {
    match env(key).map(|v| v.to_ascii_lowercase()) {
        Some(v) if matches!(v.as_str(), "1" | "true" | "yes" | "on") => true,
        Some(v) if matches!(v.as_str(), "0" | "false" | "no" | "off") => false,
        _ => default,
    }
}

/// Knobs for one research run.
#[derive(Debug, Clone, Serialize)]
pub struct ResearchConfig {
    pub min_interval_ms: u64,
    pub extract_concurrency: usize,
    pub search_concurrency: usize,
    pub fetch_timeout_ms: u64,
    /// Hard cap on bytes read from a page body.
    pub fetch_max_bytes: u64,
    pub extract_max_attempts: u32,
    pub extract_retry_pause_ms: u64,
    pub max_content_chars: usize,
    pub excerpt_chars: usize,
    pub max_context_chars: usize,
    pub shuffle: bool,
    pub generation_retry_pause_ms: u64,
    pub search_timeout_ms: u64,
}

impl Default for ResearchConfig {
    fn default() -> Self {
        Self {
            min_interval_ms: 1_000,
            extract_concurrency: 4,
            search_concurrency: 6,
            fetch_timeout_ms: 15_000,
            fetch_max_bytes: 5 * 1024 * 1024,
            extract_max_attempts: 3,
            extract_retry_pause_ms: 1_000,
            max_content_chars: MAX_CONTENT_CHARS,
            excerpt_chars: 3_000,
            max_context_chars: 60_000,
            shuffle: true,
            generation_retry_pause_ms: 1_000,
            search_timeout_ms: 20_000,
        }
    }
}

impl ResearchConfig {
    pub fn from_env() -> Self {
        let d = Self::default();
        Self {
            min_interval_ms: env_u64("RESEARCHPIPE_MIN_INTERVAL_MS", d.min_interval_ms),
            extract_concurrency: env_usize_clamped(
                "RESEARCHPIPE_EXTRACT_CONCURRENCY",
                d.extract_concurrency,
                1,
                8,
            ),
            search_concurrency: env_usize_clamped(
                "RESEARCHPIPE_SEARCH_CONCURRENCY",
                d.search_concurrency,
                1,
                6,
            ),
            fetch_timeout_ms: env_u64("RESEARCHPIPE_FETCH_TIMEOUT_MS", d.fetch_timeout_ms)
                .max(100),
            fetch_max_bytes: d.fetch_max_bytes,
            extract_max_attempts: env_u64(
                "RESEARCHPIPE_EXTRACT_MAX_ATTEMPTS",
                d.extract_max_attempts as u64,
            )
            .clamp(1, 10) as u32,
            extract_retry_pause_ms: env_u64(
                "RESEARCHPIPE_EXTRACT_RETRY_PAUSE_MS",
                d.extract_retry_pause_ms,
            ),
            max_content_chars: env_usize_clamped(
                "RESEARCHPIPE_MAX_CONTENT_CHARS",
                d.max_content_chars,
                100,
                1_000_000,
            ),
            excerpt_chars: env_usize_clamped(
                "RESEARCHPIPE_EXCERPT_CHARS",
                d.excerpt_chars,
                100,
                1_000_000,
            ),
            max_context_chars: env_usize_clamped(
                "RESEARCHPIPE_MAX_CONTEXT_CHARS",
                d.max_context_chars,
                1_000,
                10_000_000,
            ),
            shuffle: env_bool("RESEARCHPIPE_SHUFFLE", d.shuffle),
            generation_retry_pause_ms: env_u64(
                "RESEARCHPIPE_GENERATION_RETRY_PAUSE_MS",
                d.generation_retry_pause_ms,
            ),
            search_timeout_ms: d.search_timeout_ms,
        }
    }

    pub fn min_interval(&self) -> Duration {
        Duration::from_millis(self.min_interval_ms)
    }

    pub fn extract_retry_pause(&self) -> Duration {
        Duration::from_millis(self.extract_retry_pause_ms)
    }

    pub fn generation_retry_pause(&self) -> Duration {
        Duration::from_millis(self.generation_retry_pause_ms)
    }
}

fn provider(
    name: &str,
    label: &str,
    default_endpoint: &str,
    auth: AuthScheme,
    credential_env: &str,
    key_url: &str,
    default_model: &str,
    timeout_ms: u64,
) -> ProviderConfig {
    let upper = name.to_ascii_uppercase();
    ProviderConfig {
        name: name.to_string(),
        label: label.to_string(),
        endpoint: env(&format!("RESEARCHPIPE_{upper}_ENDPOINT"))
            .unwrap_or_else(|| default_endpoint.to_string()),
        auth,
        credential_env: credential_env.to_string(),
        key_url: key_url.to_string(),
        model: env(&format!("RESEARCHPIPE_{upper}_MODEL"))
            .unwrap_or_else(|| default_model.to_string()),
        max_retries: 3,
        timeout_ms,
    }
}

/// The static generation provider table, with endpoint/model env overrides applied.
pub fn provider_configs() -> Vec<ProviderConfig> {
    vec![
        provider(
            "openai",
            "OpenAI",
            "https://api.openai.com/v1/chat/completions",
            AuthScheme::Bearer,
            "OPENAI_API_KEY",
            "https://platform.openai.com/api-keys",
            "gpt-4o-mini",
            60_000,
        ),
        provider(
            "gemini",
            "Google Gemini",
            "https://generativelanguage.googleapis.com/v1beta/models",
            AuthScheme::QueryParam("key".to_string()),
            "GEMINI_API_KEY",
            "https://ai.google.dev/tutorials/setup",
            "gemini-1.5-flash",
            60_000,
        ),
        provider(
            "anthropic",
            "Anthropic Claude",
            "https://api.anthropic.com/v1/messages",
            AuthScheme::Header("x-api-key".to_string()),
            "ANTHROPIC_API_KEY",
            "https://console.anthropic.com/keys",
            "claude-3-5-haiku-latest",
            90_000,
        ),
        provider(
            "cohere",
            "Cohere",
            "https://api.cohere.ai/v1/generate",
            AuthScheme::Bearer,
            "COHERE_API_KEY",
            "https://dashboard.cohere.ai/api-keys",
            "command",
            60_000,
        ),
    ]
}

pub const SERP_API_KEY_ENV: &str = "SERP_API_KEY";
pub const SERP_API_KEY_URL: &str = "https://serpapi.com/dashboard";

/// Credential lookup, resolved at call time and never cached to disk.
#[derive(Clone, Default)]
pub enum Credentials {
    /// `RESEARCHPIPE_<VAR>` first, then `<VAR>`.
    #[default]
    Env,
    Static(Arc<BTreeMap<String, String>>),
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Credentials::Env => f.write_str("Credentials::Env"),
            Credentials::Static(m) => f
                .debug_tuple("Credentials::Static")
                .field(&m.keys().collect::<Vec<_>>())
                .finish(),
        }
    }
}

impl Credentials {
    pub fn from_pairs<I, K, V>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        Credentials::Static(Arc::new(
            pairs
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        ))
    }

    pub fn lookup(&self, var: &str) -> Option<SecretString> {
        match self {
            Credentials::Env => env(&format!("RESEARCHPIPE_{var}"))
                .or_else(|| env(var))
                .map(SecretString::from),
            Credentials::Static(m) => m
                .get(var)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
                .map(SecretString::from),
        }
    }

    pub fn has(&self, var: &str) -> bool {
        self.lookup(var).is_some()
    }
}
