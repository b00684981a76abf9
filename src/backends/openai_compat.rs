use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::debug;

use super::http::{call_with_retries, ensure_success, transport_error};
use super::GenerationBackend;
use crate::config::RequestConfig;
use crate::error::{BackendError, BackendResult};

/// Client for local OpenAI-compatible chat completion servers (LM Studio, Ollama, vLLM)
#[derive(Clone)]
pub struct LocalLlmClient {
    client: Client,
    base_url: String,
    model: String,
    request_config: RequestConfig,
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    temperature: f64,
    max_tokens: u32,
}

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ChoiceMessage,
}

#[derive(Debug, Deserialize)]
struct ChoiceMessage {
    #[serde(default)]
    content: String,
}

impl LocalLlmClient {
    /// Create a new local client.
    ///
    /// `timeout_ms` replaces the request timeout from `request_config`; local
    /// models routinely need minutes per completion.
    pub fn new(
        base_url: &str,
        model: impl Into<String>,
        timeout_ms: u64,
        request_config: RequestConfig,
    ) -> BackendResult<Self> {
        let request_config = RequestConfig {
            timeout_ms,
            ..request_config
        };
        let client = Client::builder()
            .timeout(Duration::from_millis(timeout_ms))
            .build()
            .map_err(BackendError::Http)?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            model: model.into(),
            request_config,
        })
    }

    /// Get the base URL (for testing)
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    async fn execute_request(&self, prompt: &str) -> BackendResult<String> {
        let url = format!("{}/v1/chat/completions", self.base_url);
        debug!(model = %self.model, prompt_len = prompt.len(), "Calling local LLM");

        let body = ChatRequest {
            model: &self.model,
            messages: vec![ChatMessage {
                role: "user",
                content: prompt,
            }],
            temperature: 0.7,
            max_tokens: 4096,
        };

        let response = self
            .client
            .post(&url)
            .header("Content-Type", "application/json")
            .json(&body)
            .send()
            .await
            .map_err(|e| transport_error(e, self.request_config.timeout_ms))?;

        let response = ensure_success(response).await?;

        let parsed: ChatResponse =
            response
                .json()
                .await
                .map_err(|e| BackendError::InvalidResponse {
                    message: format!("Failed to parse chat completion: {}", e),
                })?;

        parsed
            .choices
            .into_iter()
            .next()
            .map(|c| c.message.content.trim().to_string())
            .ok_or_else(|| BackendError::InvalidResponse {
                message: "Chat completion contained no choices".to_string(),
            })
    }
}

#[async_trait]
impl GenerationBackend for LocalLlmClient {
    async fn generate(&self, prompt: &str) -> BackendResult<String> {
        let name = self.name();
        call_with_retries(&name, &self.request_config, || self.execute_request(prompt)).await
    }

    fn name(&self) -> String {
        format!("local:{}", self.model)
    }
}
