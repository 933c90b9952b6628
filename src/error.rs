use std::future::Future;
use std::time::Duration;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, RagError>;

#[derive(Error, Debug)]
pub enum RagError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Configuration source error: {0}")]
    ConfigSource(#[from] config::ConfigError),

    #[error("Embedding error: {0}")]
    Embedding(String),

    #[error("Retrieval error: {0}")]
    Retrieval(String),

    #[error("Completion error: {0}")]
    Completion(String),

    #[error("Evaluation error: {0}")]
    Evaluation(String),

    #[error("{stage} error: {service} returned status {status}: {body}")]
    Http {
        stage: &'static str,
        service: &'static str,
        status: u16,
        body: String,
    },

    #[error("{stage} error: {service} request failed: {source}")]
    Request {
        stage: &'static str,
        service: &'static str,
        #[source]
        source: reqwest::Error,
    },

    #[error("{stage} timed out after {timeout_ms}ms")]
    Timeout { stage: &'static str, timeout_ms: u64 },

    #[error("Evaluation rows misaligned: {0}")]
    Alignment(String),

    #[error("Telemetry error: {0}")]
    Telemetry(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serde(#[from] serde_json::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("TOML error: {0}")]
    TomlSer(#[from] toml::ser::Error),

    #[error("Qdrant error: {0}")]
    QdrantClient(Box<qdrant_client::QdrantError>),
}

impl From<qdrant_client::QdrantError> for RagError {
    fn from(err: qdrant_client::QdrantError) -> Self {
        RagError::QdrantClient(Box::new(err))
    }
}

/// Coarse grouping used when reporting failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    /// Missing or invalid settings, raised before any collaborator exists.
    Configuration,
    /// A retrieval, generation or evaluation call failed.
    Collaborator,
    /// A collaborator answered with data the pipeline cannot use.
    DataShape,
}

impl ErrorCategory {
    pub fn as_str(self) -> &'static str {
        match self {
            ErrorCategory::Configuration => "configuration",
            ErrorCategory::Collaborator => "collaborator",
            ErrorCategory::DataShape => "data-shape",
        }
    }
}

impl std::fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl RagError {
    pub fn category(&self) -> ErrorCategory {
        match self {
            RagError::Config(_) | RagError::ConfigSource(_) | RagError::Telemetry(_) => {
                ErrorCategory::Configuration
            }
            RagError::Alignment(_) | RagError::Serde(_) => ErrorCategory::DataShape,
            RagError::Evaluation(msg) if msg.starts_with(UNPARSABLE_VERDICT) => {
                ErrorCategory::DataShape
            }
            _ => ErrorCategory::Collaborator,
        }
    }

    /// Whether a second attempt could plausibly succeed. Nothing retries;
    /// this only feeds logging and the isolated-run report.
    pub fn is_transient(&self) -> bool {
        match self {
            RagError::Timeout { .. } => true,
            RagError::Http { status, .. } => *status == 429 || *status >= 500,
            RagError::Request { source, .. } => !source.is_builder(),
            _ => false,
        }
    }
}

/// Runs `future` under `limit`, mapping expiry to [`RagError::Timeout`].
pub(crate) async fn with_timeout<T, F>(stage: &'static str, limit: Duration, future: F) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    match tokio::time::timeout(limit, future).await {
        Ok(result) => result,
        Err(_) => Err(RagError::Timeout {
            stage,
            timeout_ms: limit.as_millis() as u64,
        }),
    }
}

pub(crate) const UNPARSABLE_VERDICT: &str = "unparsable verdict";

/// Turns a non-success HTTP response into an error carrying status and body.
pub(crate) async fn http_failure(
    stage: &'static str,
    service: &'static str,
    response: reqwest::Response,
) -> RagError {
    let status = response.status().as_u16();
    let body = response
        .text()
        .await
        .unwrap_or_else(|_| "Unknown error".to_string());
    RagError::Http { stage, service, status, body }
}
