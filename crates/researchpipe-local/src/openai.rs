use crate::gateway::{apply_auth, post_json};
use researchpipe_core::{Error, GenerationBackend, Prompt, ProviderConfig, Result};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone)]
pub struct OpenAiBackend {
    client: reqwest::Client,
    config: ProviderConfig,
}

impl OpenAiBackend {
    pub fn new(client: reqwest::Client, config: ProviderConfig) -> Self {
        Self { client, config }
    }
}

#[async_trait::async_trait]
impl GenerationBackend for OpenAiBackend {
    fn name(&self) -> &'static str {
        "openai"
    }

    fn aliases(&self) -> &'static [&'static str] {
        &["gpt", "gpt-4o-mini", "GPT-4o mini"]
    }

    fn config(&self) -> &ProviderConfig {
        &self.config
    }

    async fn complete(&self, api_key: &str, prompt: &Prompt) -> Result<String> {
        let req = ChatCompletionsRequest {
            model: self.config.model.clone(),
            messages: vec![
                Message {
                    role: "system".to_string(),
                    content: prompt.system.clone(),
                },
                Message {
                    role: "user".to_string(),
                    content: prompt.user.clone(),
                },
            ],
            temperature: 0.3,
            max_tokens: 4000,
        };

        let rb = self
            .client
            .post(&self.config.endpoint)
            .timeout(self.config.timeout())
            .json(&req);
        let rb = apply_auth(rb, &self.config.auth, api_key);
        let parsed: ChatCompletionsResponse = post_json(rb, "openai").await?;
        parsed
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .filter(|s| !s.trim().is_empty())
            .ok_or_else(|| Error::Format("openai: no choices[0].message.content".to_string()))
    }
}

#[derive(Debug, Clone, Serialize)]
struct ChatCompletionsRequest {
    model: String,
    messages: Vec<Message>,
    temperature: f64,
    max_tokens: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct Message {
    role: String,
    content: String,
}

#[derive(Debug, Clone, Deserialize)]
struct ChatCompletionsResponse {
    #[serde(default)]
    choices: Vec<Choice>,
}

#[derive(Debug, Clone, Deserialize)]
struct Choice {
    message: ChoiceMessage,
}

#[derive(Debug, Clone, Deserialize)]
struct ChoiceMessage {
    content: Option<String>,
}
