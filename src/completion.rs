use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use crate::error::http_failure;
use crate::{RagError, Result};

#[async_trait]
pub trait CompletionService: Send + Sync {
    /// Single-turn completion; no state is carried between calls.
    async fn complete(&self, prompt: &str, max_output_tokens: u32) -> Result<String>;
    fn model(&self) -> &str;
}

#[derive(Serialize)]
struct ChatCompletionRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    max_tokens: u32,
}

#[derive(Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Deserialize)]
pub(crate) struct ChatCompletionResponse {
    #[serde(default)]
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatChoiceMessage,
}

#[derive(Deserialize)]
struct ChatChoiceMessage {
    #[serde(default)]
    content: Option<String>,
}

impl ChatCompletionResponse {
    pub(crate) fn into_text(self) -> Result<String> {
        self.choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .ok_or_else(|| RagError::Completion("Completion returned no content".to_string()))
    }
}

pub struct OpenAIChatCompletion {
    client: Client,
    api_key: String,
    model: String,
    base_url: String,
}

impl OpenAIChatCompletion {
    pub fn new(api_key: &str, model: &str, base_url: &str, timeout_ms: u64) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_millis(timeout_ms))
            .build()
            .map_err(|e| RagError::Config(format!("Failed to build completion client: {}", e)))?;

        Ok(Self {
            client,
            api_key: api_key.to_string(),
            model: model.to_string(),
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }
}

#[async_trait]
impl CompletionService for OpenAIChatCompletion {
    async fn complete(&self, prompt: &str, max_output_tokens: u32) -> Result<String> {
        let request = ChatCompletionRequest {
            model: &self.model,
            messages: vec![ChatMessage { role: "user", content: prompt }],
            max_tokens: max_output_tokens,
        };

        let response = self.client
            .post(format!("{}/chat/completions", self.base_url))
            .bearer_auth(&self.api_key)
            .json(&request)
            .send()
            .await
            .map_err(|source| RagError::Request { stage: "Completion", service: "chat completions API", source })?;

        if !response.status().is_success() {
            return Err(http_failure("Completion", "chat completions API", response).await);
        }

        let parsed: ChatCompletionResponse = response.json().await
            .map_err(|e| RagError::Completion(format!("Failed to parse completion response: {}", e)))?;

        parsed.into_text()
    }

    fn model(&self) -> &str {
        &self.model
    }
}
