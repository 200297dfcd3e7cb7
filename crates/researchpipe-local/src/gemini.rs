//! Gemini `generateContent` backend. System and user text travel as one prompt part.

use crate::gateway::{apply_auth, post_json};
use researchpipe_core::{Error, GenerationBackend, Prompt, ProviderConfig, Result};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone)]
pub struct GeminiBackend {
    client: reqwest::Client,
    config: ProviderConfig,
}

impl GeminiBackend {
    pub fn new(client: reqwest::Client, config: ProviderConfig) -> Self {
        Self { client, config }
    }

    fn endpoint(&self) -> String {
        format!(
            "{}/{}:generateContent",
            self.config.endpoint.trim_end_matches('/'),
            self.config.model
        )
    }
}

#[derive(Debug, Serialize)]
struct ReqPart {
    text: String,
}

#[derive(Debug, Serialize)]
struct ReqContent {
    parts: Vec<ReqPart>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenCfg {
    temperature: f32,
    max_output_tokens: u32,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GeminiReq {
    contents: Vec<ReqContent>,
    generation_config: GenCfg,
}

#[derive(Debug, Deserialize)]
struct GeminiResp {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Debug, Deserialize)]
struct Candidate {
    content: Option<CandContent>,
}

#[derive(Debug, Deserialize)]
struct CandContent {
    #[serde(default)]
    parts: Vec<CandPart>,
}

#[derive(Debug, Deserialize)]
struct CandPart {
    text: Option<String>,
}

impl GeminiResp {
    fn text(self) -> Option<String> {
        let content = self.candidates.into_iter().next()?.content?;
        let text: String = content.parts.into_iter().filter_map(|p| p.text).collect();
        (!text.trim().is_empty()).then_some(text)
    }
}

#[async_trait::async_trait]
impl GenerationBackend for GeminiBackend {
    fn name(&self) -> &'static str {
        "gemini"
    }

    fn aliases(&self) -> &'static [&'static str] {
        &["google", "Gemini"]
    }

    fn config(&self) -> &ProviderConfig {
        &self.config
    }

    async fn complete(&self, api_key: &str, prompt: &Prompt) -> Result<String> {
        let req = GeminiReq {
            contents: vec![ReqContent {
                parts: vec![ReqPart {
                    text: prompt.joined(),
                }],
            }],
            generation_config: GenCfg {
                temperature: 0.3,
                max_output_tokens: 4000,
            },
        };
        let rb = self
            .client
            .post(self.endpoint())
            .timeout(self.config.timeout())
            .json(&req);
        let rb = apply_auth(rb, &self.config.auth, api_key);
        let parsed: GeminiResp = post_json(rb, "gemini").await?;
        parsed
            .text()
            .ok_or_else(|| Error::Format("gemini: no candidates[0].content.parts text".to_string()))
    }
}
