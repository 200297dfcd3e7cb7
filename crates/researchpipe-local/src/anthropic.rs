use crate::gateway::{apply_auth, post_json};
use researchpipe_core::{Error, GenerationBackend, Prompt, ProviderConfig, Result};
use serde::{Deserialize, Serialize};

pub const ANTHROPIC_VERSION: &str = "2023-06-01";

#[derive(Debug, Clone)]
pub struct AnthropicBackend {
    client: reqwest::Client,
    config: ProviderConfig,
}

impl AnthropicBackend {
    pub fn new(client: reqwest::Client, config: ProviderConfig) -> Self {
        Self { client, config }
    }
}

#[derive(Debug, Serialize)]
struct MessagesRequest<'a> {
    model: &'a str,
    system: &'a str,
    messages: Vec<Message<'a>>,
    max_tokens: u32,
    temperature: f32,
}

#[derive(Debug, Serialize)]
struct Message<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct MessagesResponse {
    #[serde(default)]
    content: Vec<ContentBlock>,
}

#[derive(Debug, Deserialize)]
struct ContentBlock {
    #[serde(rename = "type")]
    kind: Option<String>,
    text: Option<String>,
}

impl MessagesResponse {
    fn text(self) -> Option<String> {
        let text: String = self
            .content
            .into_iter()
            .filter(|b| b.kind.as_deref().map_or(true, |k| k == "text"))
            .filter_map(|b| b.text)
            .collect();
        (!text.trim().is_empty()).then_some(text)
    }
}

#[async_trait::async_trait]
impl GenerationBackend for AnthropicBackend {
    fn name(&self) -> &'static str {
        "anthropic"
    }

    fn aliases(&self) -> &'static [&'static str] {
        &["claude", "Claude"]
    }

    fn config(&self) -> &ProviderConfig {
        &self.config
    }

    async fn complete(&self, api_key: &str, prompt: &Prompt) -> Result<String> {
        let req = MessagesRequest {
            model: &self.config.model,
            system: &prompt.system,
            messages: vec![Message {
                role: "user",
                content: &prompt.user,
            }],
            max_tokens: 4000,
            temperature: 0.3,
        };
        let rb = self
            .client
            .post(&self.config.endpoint)
            .timeout(self.config.timeout())
            .header("anthropic-version", ANTHROPIC_VERSION)
            .json(&req);
        let rb = apply_auth(rb, &self.config.auth, api_key);
        let parsed: MessagesResponse = post_json(rb, "anthropic").await?;
        parsed
            .text()
            .ok_or_else(|| Error::Format("anthropic: no text content blocks".to_string()))
    }
}
