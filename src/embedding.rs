use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use crate::config::EmbeddingConfig;
use crate::error::http_failure;
use crate::{RagError, Result};

#[async_trait]
pub trait EmbeddingService: Send + Sync {
    async fn embed_text(&self, text: &str) -> Result<Vec<f32>>;
    fn model(&self) -> &str;
}

#[derive(Serialize)]
struct OpenAIEmbeddingRequest<'a> {
    input: Vec<&'a str>,
    model: &'a str,
}

#[derive(Deserialize)]
struct OpenAIEmbeddingResponse {
    data: Vec<OpenAIEmbeddingData>,
}

#[derive(Deserialize)]
struct OpenAIEmbeddingData {
    embedding: Vec<f32>,
}

pub struct OpenAIEmbedding {
    client: Client,
    api_key: String,
    model: String,
    base_url: String,
}

impl OpenAIEmbedding {
    pub fn new(api_key: &str, config: &EmbeddingConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_millis(config.timeout_ms))
            .build()
            .map_err(|e| RagError::Config(format!("Failed to build embedding client: {}", e)))?;

        Ok(Self {
            client,
            api_key: api_key.to_string(),
            model: config.model.clone(),
            base_url: config.base_url.trim_end_matches('/').to_string(),
        })
    }
}

#[async_trait]
impl EmbeddingService for OpenAIEmbedding {
    async fn embed_text(&self, text: &str) -> Result<Vec<f32>> {
        let request = OpenAIEmbeddingRequest {
            input: vec![text],
            model: &self.model,
        };

        let response = self.client
            .post(format!("{}/embeddings", self.base_url))
            .bearer_auth(&self.api_key)
            .json(&request)
            .send()
            .await
            .map_err(|source| RagError::Request { stage: "Embedding", service: "embeddings API", source })?;

        if !response.status().is_success() {
            return Err(http_failure("Embedding", "embeddings API", response).await);
        }

        let parsed: OpenAIEmbeddingResponse = response.json().await
            .map_err(|e| RagError::Embedding(format!("Failed to parse embeddings response: {}", e)))?;

        parsed.data.into_iter().next()
            .map(|d| d.embedding)
            .ok_or_else(|| RagError::Embedding("No embedding returned".to_string()))
    }

    fn model(&self) -> &str {
        &self.model
    }
}
