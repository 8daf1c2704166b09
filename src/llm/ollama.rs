//! Local Ollama provider, the last link in the fallback chain.

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};

use crate::config::OllamaConfig;
use crate::error::LlmError;
use crate::llm::provider::{ChatMessage, Completion, LlmProvider};

const PROVIDER: &str = "ollama";

pub struct OllamaProvider {
    client: Client,
    config: OllamaConfig,
}

impl OllamaProvider {
    pub fn new(config: OllamaConfig) -> Self {
        let client = Client::builder()
            .timeout(std::time::Duration::from_secs(300))
            .build()
            .unwrap_or_else(|_| Client::new());
        Self { client, config }
    }
}

#[async_trait]
impl LlmProvider for OllamaProvider {
    fn name(&self) -> &str {
        PROVIDER
    }

    fn model_name(&self) -> &str {
        &self.config.model
    }

    fn is_local(&self) -> bool {
        true
    }

    async fn complete(&self, messages: &[ChatMessage]) -> Result<Completion, LlmError> {
        let url = format!("{}/api/chat", self.config.base_url.trim_end_matches('/'));
        let request = OllamaChatRequest {
            model: &self.config.model,
            messages,
            stream: false,
        };

        tracing::debug!("Sending request to Ollama: {}", url);

        let response = self
            .client
            .post(&url)
            .json(&request)
            .send()
            .await
            .map_err(|e| LlmError::RequestFailed {
                provider: PROVIDER.to_string(),
                reason: e.to_string(),
            })?;

        let status = response.status();
        let text = response.text().await.unwrap_or_default();
        if !status.is_success() {
            return Err(LlmError::RequestFailed {
                provider: PROVIDER.to_string(),
                reason: format!("HTTP {}: {}", status, text),
            });
        }

        let body: OllamaChatResponse =
            serde_json::from_str(&text).map_err(|e| LlmError::InvalidResponse {
                provider: PROVIDER.to_string(),
                reason: format!("JSON parse error: {}", e),
            })?;

        Ok(Completion {
            content: body.message.content,
            tokens: body.prompt_eval_count.unwrap_or(0) + body.eval_count.unwrap_or(0),
        })
    }
}

#[derive(Serialize)]
struct OllamaChatRequest<'a> {
    model: &'a str,
    messages: &'a [ChatMessage],
    stream: bool,
}

#[derive(Deserialize)]
struct OllamaChatResponse {
    message: OllamaMessage,
    prompt_eval_count: Option<u32>,
    eval_count: Option<u32>,
}

#[derive(Deserialize)]
struct OllamaMessage {
    #[serde(default)]
    content: String,
}
