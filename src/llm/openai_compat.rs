//! OpenAI-compatible Chat Completions provider.
//!
//! Groq, Gemini (through its OpenAI endpoint) and Mistral all speak this
//! dialect, so a single implementation covers every remote backend.

use async_trait::async_trait;
use reqwest::Client;
use secrecy::ExposeSecret;
use serde::{Deserialize, Serialize};

use crate::config::RemoteProviderConfig;
use crate::error::LlmError;
use crate::llm::provider::{ChatMessage, Completion, LlmProvider};

/// Remote chat completions provider.
pub struct OpenAiCompatProvider {
    client: Client,
    config: RemoteProviderConfig,
}

impl OpenAiCompatProvider {
    pub fn new(config: RemoteProviderConfig) -> Result<Self, LlmError> {
        if config.api_key.expose_secret().is_empty() {
            return Err(LlmError::AuthFailed {
                provider: config.name.clone(),
            });
        }

        let client = Client::builder()
            .timeout(std::time::Duration::from_secs(120))
            .build()
            .unwrap_or_else(|_| Client::new());

        Ok(Self { client, config })
    }

    fn api_url(&self, path: &str) -> String {
        format!(
            "{}/{}",
            self.config.base_url.trim_end_matches('/'),
            path.trim_start_matches('/')
        )
    }

    async fn send_request<T: Serialize, R: for<'de> Deserialize<'de>>(
        &self,
        body: &T,
    ) -> Result<R, LlmError> {
        let provider = &self.config.name;
        let url = self.api_url("chat/completions");

        tracing::debug!("Sending request to {}: {}", provider, url);

        let response = self
            .client
            .post(&url)
            .bearer_auth(self.config.api_key.expose_secret())
            .json(body)
            .send()
            .await
            .map_err(|e| LlmError::RequestFailed {
                provider: provider.clone(),
                reason: e.to_string(),
            })?;

        let status = response.status();
        let retry_after = response
            .headers()
            .get(reqwest::header::RETRY_AFTER)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.parse::<u64>().ok())
            .map(std::time::Duration::from_secs);
        let response_text = response.text().await.unwrap_or_default();

        tracing::debug!("{} response status: {}", provider, status);

        if !status.is_success() {
            return Err(match status.as_u16() {
                401 | 403 => LlmError::AuthFailed {
                    provider: provider.clone(),
                },
                429 => LlmError::RateLimited {
                    provider: provider.clone(),
                    retry_after,
                },
                _ => LlmError::RequestFailed {
                    provider: provider.clone(),
                    reason: format!("HTTP {}: {}", status, truncate(&response_text, 300)),
                },
            });
        }

        serde_json::from_str(&response_text).map_err(|e| LlmError::InvalidResponse {
            provider: provider.clone(),
            reason: format!("JSON parse error: {}", e),
        })
    }
}

#[async_trait]
impl LlmProvider for OpenAiCompatProvider {
    fn name(&self) -> &str {
        &self.config.name
    }

    fn model_name(&self) -> &str {
        &self.config.model
    }

    async fn complete(&self, messages: &[ChatMessage]) -> Result<Completion, LlmError> {
        let request = ChatCompletionRequest {
            model: &self.config.model,
            messages: messages.iter().map(ChatCompletionMessage::from).collect(),
            max_tokens: Some(self.config.max_tokens),
            temperature: Some(0.4),
        };

        let response: ChatCompletionResponse = self.send_request(&request).await?;
        response_to_completion(&self.config.name, response)
    }
}

fn response_to_completion(
    provider: &str,
    response: ChatCompletionResponse,
) -> Result<Completion, LlmError> {
    let content = response
        .choices
        .into_iter()
        .next()
        .and_then(|c| c.message)
        .and_then(|m| m.content)
        .ok_or_else(|| LlmError::InvalidResponse {
            provider: provider.to_string(),
            reason: "No choices in response".to_string(),
        })?;

    let tokens = response
        .usage
        .map(|u| {
            u.total_tokens
                .unwrap_or(u.prompt_tokens.unwrap_or(0) + u.completion_tokens.unwrap_or(0))
        })
        .unwrap_or(0);

    Ok(Completion { content, tokens })
}

fn truncate(s: &str, max: usize) -> &str {
    match s.char_indices().nth(max) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}

#[derive(Debug, Serialize)]
struct ChatCompletionRequest<'a> {
    model: &'a str,
    messages: Vec<ChatCompletionMessage<'a>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
}

#[derive(Debug, Serialize)]
struct ChatCompletionMessage<'a> {
    role: &'static str,
    content: &'a str,
}

impl<'a> From<&'a ChatMessage> for ChatCompletionMessage<'a> {
    fn from(msg: &'a ChatMessage) -> Self {
        Self {
            role: msg.role.as_str(),
            content: &msg.content,
        }
    }
}

#[derive(Debug, Deserialize)]
struct ChatCompletionResponse {
    #[serde(default)]
    choices: Vec<ChatCompletionChoice>,
    usage: Option<ChatCompletionUsage>,
}

#[derive(Debug, Deserialize)]
struct ChatCompletionChoice {
    message: Option<ChatCompletionResponseMessage>,
}

#[derive(Debug, Deserialize)]
struct ChatCompletionResponseMessage {
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ChatCompletionUsage {
    prompt_tokens: Option<u32>,
    completion_tokens: Option<u32>,
    total_tokens: Option<u32>,
}
