use serde::{Deserialize, Serialize};
use std::path::Path;
use crate::{RagError, Result};

const ENV_PREFIX: &str = "RAG_EVAL";
const DEFAULT_CONFIG_NAME: &str = "rag-eval";
const REDACTED: &str = "***";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RagConfig {
    pub credentials: CredentialsConfig,
    pub retrieval: RetrievalConfig,
    pub embedding: EmbeddingConfig,
    pub generation: GenerationConfig,
    pub evaluation: EvaluationConfig,
    pub telemetry: TelemetryConfig,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CredentialsConfig {
    #[serde(default)]
    pub openai_api_key: String,
    #[serde(default)]
    pub arize_api_key: String,
    #[serde(default)]
    pub arize_project_name: String,
    #[serde(default)]
    pub arize_space_id: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RetrievalBackend {
    Pinecone,
    Qdrant,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrievalConfig {
    pub backend: RetrievalBackend,
    pub namespace: String,
    pub top_k: usize,
    // Metadata/payload key holding the passage text
    pub text_field: String,
    #[serde(default)]
    pub pinecone_api_key: String,
    #[serde(default)]
    pub pinecone_index_host: String,
    pub qdrant_url: String,
    #[serde(default)]
    pub qdrant_api_key: Option<String>,
    pub qdrant_collection: String,
    pub timeout_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbeddingConfig {
    pub model: String,
    pub base_url: String,
    pub timeout_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerationConfig {
    pub model: String,
    pub base_url: String,
    pub max_tokens: u32,
    pub timeout_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EvaluationConfig {
    pub model: String,
    pub base_url: String,
    pub provide_explanation: bool,
    pub max_tokens: u32,
    pub timeout_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TelemetryConfig {
    pub log_filter: String,
    pub ansi: bool,
}

impl Default for RagConfig {
    fn default() -> Self {
        Self {
            credentials: CredentialsConfig::default(),
            retrieval: RetrievalConfig {
                backend: RetrievalBackend::Pinecone,
                namespace: "policy-knowledge".to_string(),
                top_k: 1,
                text_field: "text".to_string(),
                pinecone_api_key: String::new(),
                pinecone_index_host: String::new(),
                qdrant_url: "http://localhost:6334".to_string(),
                qdrant_api_key: None,
                qdrant_collection: "policy-knowledge".to_string(),
                timeout_ms: 10_000,
            },
            embedding: EmbeddingConfig {
                model: "text-embedding-3-small".to_string(),
                base_url: "https://api.openai.com/v1".to_string(),
                timeout_ms: 10_000,
            },
            generation: GenerationConfig {
                model: "gpt-3.5-turbo".to_string(),
                base_url: "https://api.openai.com/v1".to_string(),
                max_tokens: 100,
                timeout_ms: 30_000,
            },
            evaluation: EvaluationConfig {
                model: "gpt-4".to_string(),
                base_url: "https://api.openai.com/v1".to_string(),
                provide_explanation: true,
                max_tokens: 256,
                timeout_ms: 60_000,
            },
            telemetry: TelemetryConfig {
                log_filter: "info".to_string(),
                ansi: true,
            },
        }
    }
}

impl RagConfig {
    /// Loads defaults, then the optional file, then `RAG_EVAL__*` variables,
    /// then the well-known bare credential variables, and validates the result.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = Self::from_sources(path, true)?;
        config.apply_env_fallbacks(|key| std::env::var(key).ok());
        config.validate()?;
        Ok(config)
    }

    pub fn from_sources(path: Option<&Path>, with_env: bool) -> Result<Self> {
        let mut builder = config::Config::builder()
            .add_source(config::Config::try_from(&RagConfig::default())?);

        builder = match path {
            Some(path) => builder.add_source(config::File::from(path).required(true)),
            None => builder.add_source(config::File::with_name(DEFAULT_CONFIG_NAME).required(false)),
        };

        if with_env {
            builder = builder.add_source(
                config::Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("__")
                    .separator("__"),
            );
        }

        Ok(builder.build()?.try_deserialize()?)
    }

    /// Fills still-empty credentials from conventional variable names.
    pub fn apply_env_fallbacks<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        let fill = |slot: &mut String, key: &str| {
            if slot.trim().is_empty() {
                if let Some(value) = lookup(key) {
                    *slot = value;
                }
            }
        };

        fill(&mut self.credentials.openai_api_key, "OPENAI_API_KEY");
        fill(&mut self.credentials.arize_api_key, "ARIZE_API_KEY");
        fill(&mut self.credentials.arize_project_name, "ARIZE_PROJECT_NAME");
        fill(&mut self.credentials.arize_space_id, "ARIZE_SPACE_ID");
        fill(&mut self.retrieval.pinecone_api_key, "PINECONE_API_KEY");
        fill(&mut self.retrieval.pinecone_index_host, "PINECONE_INDEX_HOST");
    }

    pub fn validate(&self) -> Result<()> {
        let mut problems = Vec::new();

        let required = [
            ("credentials.openai_api_key", &self.credentials.openai_api_key),
            ("credentials.arize_api_key", &self.credentials.arize_api_key),
            ("credentials.arize_project_name", &self.credentials.arize_project_name),
            ("credentials.arize_space_id", &self.credentials.arize_space_id),
            ("retrieval.namespace", &self.retrieval.namespace),
            ("retrieval.text_field", &self.retrieval.text_field),
            ("generation.model", &self.generation.model),
            ("evaluation.model", &self.evaluation.model),
            ("embedding.model", &self.embedding.model),
        ];
        for (name, value) in required {
            if value.trim().is_empty() {
                problems.push(format!("{} is missing", name));
            }
        }

        match self.retrieval.backend {
            RetrievalBackend::Pinecone => {
                if self.retrieval.pinecone_api_key.trim().is_empty() {
                    problems.push("retrieval.pinecone_api_key is missing".to_string());
                }
                if self.retrieval.pinecone_index_host.trim().is_empty() {
                    problems.push("retrieval.pinecone_index_host is missing".to_string());
                }
            }
            RetrievalBackend::Qdrant => {
                if self.retrieval.qdrant_url.trim().is_empty() {
                    problems.push("retrieval.qdrant_url is missing".to_string());
                }
                if self.retrieval.qdrant_collection.trim().is_empty() {
                    problems.push("retrieval.qdrant_collection is missing".to_string());
                }
            }
        }

        if self.retrieval.top_k == 0 {
            problems.push("retrieval.top_k must be at least 1".to_string());
        }
        if self.generation.max_tokens == 0 {
            problems.push("generation.max_tokens must be at least 1".to_string());
        }
        if self.evaluation.max_tokens == 0 {
            problems.push("evaluation.max_tokens must be at least 1".to_string());
        }

        let timeouts = [
            ("retrieval.timeout_ms", self.retrieval.timeout_ms),
            ("embedding.timeout_ms", self.embedding.timeout_ms),
            ("generation.timeout_ms", self.generation.timeout_ms),
            ("evaluation.timeout_ms", self.evaluation.timeout_ms),
        ];
        for (name, value) in timeouts {
            if value == 0 {
                problems.push(format!("{} must be positive", name));
            }
        }

        if problems.is_empty() {
            Ok(())
        } else {
            Err(RagError::Config(problems.join("; ")))
        }
    }

    /// Effective configuration as TOML with every secret masked.
    pub fn to_redacted_toml(&self) -> Result<String> {
        let mut redacted = self.clone();
        let mask = |value: &mut String| {
            if !value.is_empty() {
                *value = REDACTED.to_string();
            }
        };
        mask(&mut redacted.credentials.openai_api_key);
        mask(&mut redacted.credentials.arize_api_key);
        mask(&mut redacted.retrieval.pinecone_api_key);
        if let Some(key) = redacted.retrieval.qdrant_api_key.as_mut() {
            mask(key);
        }
        Ok(toml::to_string_pretty(&redacted)?)
    }
}
