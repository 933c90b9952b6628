use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Instant;
use crate::embedding::EmbeddingService;
use crate::storage::{SearchQuery, VectorStorage};
use crate::Result;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoredPassage {
    pub text: String,
    pub score: f32,
}

impl ScoredPassage {
    pub fn new(text: impl Into<String>, score: f32) -> Self {
        Self { text: text.into(), score }
    }
}

#[async_trait]
pub trait Retriever: Send + Sync {
    /// At most `top_k` passages ordered best first; possibly empty.
    async fn search(&self, query: &str, top_k: usize) -> Result<Vec<ScoredPassage>>;
}

/// Embeds the query and asks a vector store for its nearest passages.
pub struct VectorRetriever {
    storage: Arc<dyn VectorStorage>,
    embedding_service: Arc<dyn EmbeddingService>,
    namespace: String,
}

impl VectorRetriever {
    pub fn new(
        storage: Arc<dyn VectorStorage>,
        embedding_service: Arc<dyn EmbeddingService>,
        namespace: impl Into<String>,
    ) -> Self {
        Self {
            storage,
            embedding_service,
            namespace: namespace.into(),
        }
    }
}

#[async_trait]
impl Retriever for VectorRetriever {
    async fn search(&self, query: &str, top_k: usize) -> Result<Vec<ScoredPassage>> {
        let start = Instant::now();
        let embedding = self.embedding_service.embed_text(query).await?;

        let results = self.storage
            .search(SearchQuery {
                embedding,
                top_k,
                namespace: self.namespace.clone(),
            })
            .await?;

        // Backends rank by their own metric; keep their order.
        let passages: Vec<ScoredPassage> = results
            .into_iter()
            .take(top_k)
            .map(|r| ScoredPassage { text: r.text, score: r.score })
            .collect();

        tracing::debug!(
            backend = self.storage.backend(),
            namespace = %self.namespace,
            hits = passages.len(),
            latency_ms = start.elapsed().as_millis() as u64,
            "Vector search finished"
        );

        Ok(passages)
    }
}
