//! Provider registry and the generation gateway: one entry point, many interchangeable backends.

use crate::anthropic::AnthropicBackend;
use crate::cohere::CohereBackend;
use crate::config::Credentials;
use crate::gemini::GeminiBackend;
use crate::openai::OpenAiBackend;
use crate::prompt::build_prompt;
use crate::retry::BackoffPolicy;
use researchpipe_core::{AuthScheme, Error, GenerationBackend, ProviderConfig, ResearchContext, Result};
use secrecy::ExposeSecret;
use serde::de::DeserializeOwned;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

pub(crate) fn apply_auth(
    rb: reqwest::RequestBuilder,
    auth: &AuthScheme,
    api_key: &str,
) -> reqwest::RequestBuilder {
    match auth {
        AuthScheme::Bearer => rb.bearer_auth(api_key),
        AuthScheme::Header(name) => rb.header(name.as_str(), api_key),
        AuthScheme::QueryParam(name) => rb.query(&[(name.as_str(), api_key)]),
    }
}

/// Send a request and decode a JSON body. Non-2xx is `Status`, undecodable JSON is `Format`.
pub(crate) async fn post_json<T: DeserializeOwned>(rb: reqwest::RequestBuilder, service: &str) -> Result<T> {
    let resp = rb.send().await.map_err(|e| crate::transport_error(service, e))?;
    let status = resp.status();
    if !status.is_success() {
        return Err(Error::Status {
            service: service.to_string(),
            status: status.as_u16(),
        });
    }
    let body = resp
        .bytes()
        .await
        .map_err(|e| crate::transport_error(service, e))?;
    serde_json::from_slice(&body).map_err(|e| Error::Format(format!("{service}: {e}")))
}

/// Result of one generation request. Never an error: failures are user-facing text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Generation {
    Text(String),
    CredentialRequired(String),
    Failed(String),
}

impl Generation {
    pub fn text(&self) -> &str {
        match self {
            Generation::Text(s) | Generation::CredentialRequired(s) | Generation::Failed(s) => s,
        }
    }

    pub fn is_text(&self) -> bool {
        matches!(self, Generation::Text(_))
    }
}

/// Name/alias → backend. Lookups are case-insensitive.
#[derive(Clone, Default)]
pub struct ProviderRegistry {
    backends: Vec<Arc<dyn GenerationBackend>>,
    index: HashMap<String, usize>,
}

impl std::fmt::Debug for ProviderRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list()
            .entries(self.backends.iter().map(|b| b.name()))
            .finish()
    }
}

impl ProviderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(mut self, backend: Arc<dyn GenerationBackend>) -> Self {
        let idx = self.backends.len();
        self.index.insert(backend.name().to_ascii_lowercase(), idx);
        for alias in backend.aliases() {
            self.index.entry(alias.to_ascii_lowercase()).or_insert(idx);
        }
        self.backends.push(backend);
        self
    }

    /// The four built-in backends, configured from `configs` (unknown names are ignored).
    pub fn with_defaults(client: reqwest::Client, configs: Vec<ProviderConfig>) -> Self {
        configs.into_iter().fold(Self::new(), |reg, cfg| {
            let backend: Arc<dyn GenerationBackend> = match cfg.name.as_str() {
                "openai" => Arc::new(OpenAiBackend::new(client.clone(), cfg)),
                "gemini" => Arc::new(GeminiBackend::new(client.clone(), cfg)),
                "anthropic" => Arc::new(AnthropicBackend::new(client.clone(), cfg)),
                "cohere" => Arc::new(CohereBackend::new(client.clone(), cfg)),
                other => {
                    tracing::warn!(provider = other, "no backend for provider config; skipping");
                    return reg;
                }
            };
            reg.register(backend)
        })
    }

    pub fn resolve(&self, name: &str) -> Option<&Arc<dyn GenerationBackend>> {
        self.index
            .get(&name.trim().to_ascii_lowercase())
            .and_then(|i| self.backends.get(*i))
    }

    pub fn backends(&self) -> &[Arc<dyn GenerationBackend>] {
        &self.backends
    }

    pub fn names(&self) -> Vec<&'static str> {
        self.backends.iter().map(|b| b.name()).collect()
    }
}

#[derive(Debug, Clone)]
pub struct ProviderGateway {
    registry: ProviderRegistry,
    credentials: Credentials,
    retry_pause: Duration,
}

impl ProviderGateway {
    pub fn new(registry: ProviderRegistry, credentials: Credentials, retry_pause: Duration) -> Self {
        Self {
            registry,
            credentials,
            retry_pause,
        }
    }

    pub fn registry(&self) -> &ProviderRegistry {
        &self.registry
    }

    pub fn credentials(&self) -> &Credentials {
        &self.credentials
    }

    pub async fn generate(
        &self,
        provider_name: &str,
        query: &str,
        context: &ResearchContext,
        cancel: &CancellationToken,
    ) -> Generation {
        let Some(backend) = self.registry.resolve(provider_name) else {
            return Generation::Failed(format!(
                "Unknown provider {provider_name:?}. Available providers: {}.",
                self.registry.names().join(", ")
            ));
        };
        let cfg = backend.config();
        let Some(key) = self.credentials.lookup(&cfg.credential_env) else {
            tracing::warn!(provider = backend.name(), env = %cfg.credential_env, "missing credential");
            let mut msg = format!(
                "A {label} API key is required to analyze real-time search results. \
                 Set {env} (or RESEARCHPIPE_{env}) and try again.",
                label = cfg.label,
                env = cfg.credential_env
            );
            if !cfg.key_url.is_empty() {
                msg.push_str(&format!(" Get a key at {}", cfg.key_url));
            }
            return Generation::CredentialRequired(msg);
        };

        let prompt = build_prompt(query, context);
        let policy = BackoffPolicy::fixed(cfg.max_retries, self.retry_pause);
        let res = policy
            .run(cancel, Error::is_timeout, |attempt| {
                tracing::debug!(provider = backend.name(), attempt, "generation request");
                backend.complete(key.expose_secret(), &prompt)
            })
            .await;

        match res {
            Ok(text) => Generation::Text(text),
            Err(Error::Timeout(_)) => Generation::Failed(format!(
                "{} request timed out after {} attempts. Please try again later.",
                cfg.label,
                cfg.max_retries.max(1)
            )),
            Err(Error::Cancelled) => {
                Generation::Failed(format!("{} request was cancelled.", cfg.label))
            }
            Err(e) => {
                tracing::warn!(provider = backend.name(), error = %e, "generation failed");
                Generation::Failed(format!(
                    "Error with {} API: {e}. {}",
                    cfg.label,
                    e.suggestion()
                ))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::serve;
    use axum::{http::StatusCode, routing::post, Json, Router};
    use researchpipe_core::Prompt;
    use std::sync::atomic::{AtomicUsize, Ordering};

    enum Behavior {
        Timeout,
        ServerError,
        Reply,
    }

    struct MockBackend {
        config: ProviderConfig,
        behavior: Behavior,
        calls: Arc<AtomicUsize>,
    }

    #[async_trait::async_trait]
    impl GenerationBackend for MockBackend {
        fn name(&self) -> &'static str {
            "mock"
        }

        fn aliases(&self) -> &'static [&'static str] {
            &["Mock Model"]
        }

        fn config(&self) -> &ProviderConfig {
            &self.config
        }

        async fn complete(&self, api_key: &str, prompt: &Prompt) -> Result<String> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            assert_eq!(api_key, "m-key");
            match self.behavior {
                Behavior::Timeout => Err(Error::Timeout("mock".into())),
                Behavior::ServerError => Err(Error::Status {
                    service: "mock".into(),
                    status: 500,
                }),
                Behavior::Reply => Ok(format!("echo: {}", prompt.user.lines().next().unwrap_or(""))),
            }
        }
    }

    fn mock_config(endpoint: &str) -> ProviderConfig {
        ProviderConfig {
            name: "mock".to_string(),
            label: "Mock".to_string(),
            endpoint: endpoint.to_string(),
            auth: AuthScheme::Bearer,
            credential_env: "MOCK_API_KEY".to_string(),
            key_url: "https://mock.example/keys".to_string(),
            model: "m".to_string(),
            max_retries: 3,
            timeout_ms: 100,
        }
    }

    fn gateway_with(behavior: Behavior) -> (ProviderGateway, Arc<AtomicUsize>) {
        let calls = Arc::new(AtomicUsize::new(0));
        let backend = MockBackend {
            config: mock_config("http://unused"),
            behavior,
            calls: calls.clone(),
        };
        let reg = ProviderRegistry::new().register(Arc::new(backend));
        let gw = ProviderGateway::new(
            reg,
            Credentials::from_pairs([("MOCK_API_KEY", "m-key")]),
            Duration::from_millis(1),
        );
        (gw, calls)
    }

    fn ctx() -> ResearchContext {
        ResearchContext {
            rendered_text: "## GENERAL INFORMATION".to_string(),
            citations: vec![],
        }
    }

    #[tokio::test]
    async fn timeouts_are_retried_exactly_max_retries_times() {
        let (gw, calls) = gateway_with(Behavior::Timeout);
        let out = gw.generate("mock", "q", &ctx(), &CancellationToken::new()).await;
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        match out {
            Generation::Failed(msg) => assert!(msg.contains("timed out after 3 attempts"), "{msg}"),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[tokio::test]
    async fn server_error_is_not_retried() {
        let (gw, calls) = gateway_with(Behavior::ServerError);
        let out = gw.generate("mock", "q", &ctx(), &CancellationToken::new()).await;
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(matches!(out, Generation::Failed(ref m) if m.contains("HTTP 500")));
    }

    #[tokio::test]
    async fn aliases_resolve_case_insensitively() {
        let (gw, calls) = gateway_with(Behavior::Reply);
        let out = gw.generate("mock model", "ebikes", &ctx(), &CancellationToken::new()).await;
        assert_eq!(out, Generation::Text("echo: Research Query: ebikes".to_string()));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn unknown_provider_fails_without_calls() {
        let (gw, calls) = gateway_with(Behavior::Reply);
        let out = gw.generate("llama", "q", &ctx(), &CancellationToken::new()).await;
        assert!(matches!(out, Generation::Failed(ref m) if m.contains("Unknown provider")));
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn missing_credential_asks_for_it() {
        let (gw, calls) = gateway_with(Behavior::Reply);
        let no_keys = Credentials::Static(Arc::new(Default::default()));
        let gw = ProviderGateway::new(gw.registry.clone(), no_keys, Duration::ZERO);
        let out = gw.generate("mock", "q", &ctx(), &CancellationToken::new()).await;
        assert!(matches!(out, Generation::CredentialRequired(ref m) if m.contains("MOCK_API_KEY")));
        assert!(out.text().ends_with("Get a key at https://mock.example/keys"), "{}", out.text());
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn cancelled_request_makes_no_calls() {
        let (gw, calls) = gateway_with(Behavior::Timeout);
        let cancel = CancellationToken::new();
        cancel.cancel();
        let out = gw.generate("mock", "q", &ctx(), &cancel).await;
        assert!(matches!(out, Generation::Failed(ref m) if m.contains("cancelled")));
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    fn openai_gateway(endpoint: String) -> ProviderGateway {
        let mut cfg = crate::config::provider_configs()
            .into_iter()
            .find(|c| c.name == "openai")
            .unwrap();
        cfg.endpoint = endpoint;
        cfg.timeout_ms = 150;
        let reg = ProviderRegistry::with_defaults(reqwest::Client::new(), vec![cfg]);
        ProviderGateway::new(
            reg,
            Credentials::from_pairs([("OPENAI_API_KEY", "sk")]),
            Duration::from_millis(1),
        )
    }

    #[tokio::test]
    async fn slow_http_backend_is_called_three_times() {
        let hits = Arc::new(AtomicUsize::new(0));
        let h = hits.clone();
        let app = Router::new().route(
            "/v1/chat/completions",
            post(move || {
                h.fetch_add(1, Ordering::SeqCst);
                async {
                    tokio::time::sleep(Duration::from_secs(2)).await;
                    Json(serde_json::json!({"choices": []}))
                }
            }),
        );
        let addr = serve(app).await;
        let gw = openai_gateway(format!("http://{addr}/v1/chat/completions"));
        let out = gw.generate("GPT-4o mini", "q", &ctx(), &CancellationToken::new()).await;
        assert!(matches!(out, Generation::Failed(ref m) if m.contains("timed out")));
        assert_eq!(hits.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn http_500_backend_is_called_once() {
        let hits = Arc::new(AtomicUsize::new(0));
        let h = hits.clone();
        let app = Router::new().route(
            "/v1/chat/completions",
            post(move || {
                h.fetch_add(1, Ordering::SeqCst);
                async { (StatusCode::INTERNAL_SERVER_ERROR, "boom") }
            }),
        );
        let addr = serve(app).await;
        let gw = openai_gateway(format!("http://{addr}/v1/chat/completions"));
        let out = gw.generate("openai", "q", &ctx(), &CancellationToken::new()).await;
        assert!(matches!(out, Generation::Failed(_)));
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }
}
