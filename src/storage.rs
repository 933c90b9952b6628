use async_trait::async_trait;
use qdrant_client::qdrant::value::Kind;
use qdrant_client::qdrant::SearchPointsBuilder;
use qdrant_client::Qdrant;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use crate::config::{RetrievalBackend, RetrievalConfig};
use crate::error::http_failure;
use crate::{RagError, Result};

const PINECONE_API_VERSION: &str = "2024-07";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchQuery {
    pub embedding: Vec<f32>,
    pub top_k: usize,
    pub namespace: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoredPassage {
    pub text: String,
    pub score: f32,
}

#[async_trait]
pub trait VectorStorage: Send + Sync {
    /// Nearest passages, best first. An empty vec means no match.
    async fn search(&self, query: SearchQuery) -> Result<Vec<StoredPassage>>;
    fn backend(&self) -> &'static str;
}

pub async fn connect(config: &RetrievalConfig) -> Result<Arc<dyn VectorStorage>> {
    match config.backend {
        RetrievalBackend::Pinecone => Ok(Arc::new(PineconeStorage::new(config)?)),
        RetrievalBackend::Qdrant => Ok(Arc::new(QdrantStorage::new(config).await?)),
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct PineconeQueryRequest<'a> {
    vector: &'a [f32],
    top_k: usize,
    namespace: &'a str,
    include_metadata: bool,
}

#[derive(Deserialize)]
pub(crate) struct PineconeQueryResponse {
    #[serde(default)]
    pub(crate) matches: Vec<PineconeMatch>,
}

#[derive(Deserialize)]
pub(crate) struct PineconeMatch {
    id: String,
    #[serde(default)]
    score: f32,
    #[serde(default)]
    metadata: Option<HashMap<String, serde_json::Value>>,
}

pub struct PineconeStorage {
    client: Client,
    api_key: String,
    index_host: String,
    text_field: String,
}

impl PineconeStorage {
    pub fn new(config: &RetrievalConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_millis(config.timeout_ms))
            .build()
            .map_err(|e| RagError::Config(format!("Failed to build Pinecone client: {}", e)))?;

        Ok(Self {
            client,
            api_key: config.pinecone_api_key.clone(),
            index_host: normalize_host(&config.pinecone_index_host),
            text_field: config.text_field.clone(),
        })
    }
}

pub(crate) fn normalize_host(host: &str) -> String {
    let host = host.trim().trim_end_matches('/');
    if host.starts_with("http://") || host.starts_with("https://") {
        host.to_string()
    } else {
        format!("https://{}", host)
    }
}

pub(crate) fn passages_from_matches(matches: Vec<PineconeMatch>, text_field: &str) -> Vec<StoredPassage> {
    matches
        .into_iter()
        .filter_map(|m| {
            let text = m.metadata
                .as_ref()
                .and_then(|meta| meta.get(text_field))
                .and_then(|v| v.as_str())
                .map(str::to_string);
            match text {
                Some(text) => Some(StoredPassage { text, score: m.score }),
                None => {
                    tracing::debug!(id = %m.id, "Skipping match without passage text");
                    None
                }
            }
        })
        .collect()
}

#[async_trait]
impl VectorStorage for PineconeStorage {
    async fn search(&self, query: SearchQuery) -> Result<Vec<StoredPassage>> {
        let request = PineconeQueryRequest {
            vector: &query.embedding,
            top_k: query.top_k,
            namespace: &query.namespace,
            include_metadata: true,
        };

        let response = self.client
            .post(format!("{}/query", self.index_host))
            .header("Api-Key", &self.api_key)
            .header("X-Pinecone-API-Version", PINECONE_API_VERSION)
            .json(&request)
            .send()
            .await
            .map_err(|source| RagError::Request { stage: "Retrieval", service: "Pinecone", source })?;

        if !response.status().is_success() {
            return Err(http_failure("Retrieval", "Pinecone", response).await);
        }

        let parsed: PineconeQueryResponse = response.json().await
            .map_err(|e| RagError::Retrieval(format!("Failed to parse Pinecone response: {}", e)))?;

        Ok(passages_from_matches(parsed.matches, &self.text_field))
    }

    fn backend(&self) -> &'static str {
        "pinecone"
    }
}

pub struct QdrantStorage {
    client: Qdrant,
    collection: String,
    text_field: String,
}

impl QdrantStorage {
    pub async fn new(config: &RetrievalConfig) -> Result<Self> {
        let client = Qdrant::from_url(&config.qdrant_url)
            .api_key(config.qdrant_api_key.clone())
            .timeout(Duration::from_millis(config.timeout_ms))
            .build()?;

        Ok(Self {
            client,
            collection: config.qdrant_collection.clone(),
            text_field: config.text_field.clone(),
        })
    }
}

#[async_trait]
impl VectorStorage for QdrantStorage {
    async fn search(&self, query: SearchQuery) -> Result<Vec<StoredPassage>> {
        // Qdrant has no namespaces; the collection plays that role.
        let request = SearchPointsBuilder::new(
            self.collection.clone(),
            query.embedding,
            query.top_k as u64,
        )
        .with_payload(true);

        let response = self.client.search_points(request).await?;

        let passages = response
            .result
            .into_iter()
            .filter_map(|point| {
                let text = point.payload.get(&self.text_field).and_then(|value| match &value.kind {
                    Some(Kind::StringValue(s)) => Some(s.clone()),
                    _ => None,
                })?;
                Some(StoredPassage { text, score: point.score })
            })
            .collect();

        Ok(passages)
    }

    fn backend(&self) -> &'static str {
        "qdrant"
    }
}
