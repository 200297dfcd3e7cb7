use crate::gateway::{apply_auth, post_json};
use researchpipe_core::{Error, GenerationBackend, Prompt, ProviderConfig, Result};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone)]
pub struct CohereBackend {
    client: reqwest::Client,
    config: ProviderConfig,
}

impl CohereBackend {
    pub fn new(client: reqwest::Client, config: ProviderConfig) -> Self {
        Self { client, config }
    }
}

#[derive(Debug, Serialize)]
struct GenerateRequest<'a> {
    model: &'a str,
    prompt: String,
    max_tokens: u32,
    temperature: f32,
    stop_sequences: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct GenerateResponse {
    #[serde(default)]
    generations: Vec<Generation>,
}

#[derive(Debug, Deserialize)]
struct Generation {
    text: Option<String>,
}

#[async_trait::async_trait]
impl GenerationBackend for CohereBackend {
    fn name(&self) -> &'static str {
        "cohere"
    }

    fn aliases(&self) -> &'static [&'static str] {
        &["command", "Cohere"]
    }

    fn config(&self) -> &ProviderConfig {
        &self.config
    }

    async fn complete(&self, api_key: &str, prompt: &Prompt) -> Result<String> {
        let req = GenerateRequest {
            model: &self.config.model,
            prompt: prompt.joined(),
            max_tokens: 4000,
            temperature: 0.3,
            stop_sequences: Vec::new(),
        };
        let rb = self
            .client
            .post(&self.config.endpoint)
            .timeout(self.config.timeout())
            .json(&req);
        let rb = apply_auth(rb, &self.config.auth, api_key);
        let parsed: GenerateResponse = post_json(rb, "cohere").await?;
        parsed
            .generations
            .into_iter()
            .next()
            .and_then(|g| g.text)
            .filter(|t| !t.trim().is_empty())
            .ok_or_else(|| Error::Format("cohere: no generations[0].text".to_string()))
    }
}
