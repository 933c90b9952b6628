//! Log subscriber setup and telemetry registration.
//!
//! Registration checks the telemetry credentials and opens a root span
//! tagged with the project name and space id. Every batch run is
//! instrumented with that span, so all collaborator spans nest under it.

use tracing::Span;
use tracing_subscriber::EnvFilter;
use crate::config::{RagConfig, TelemetryConfig};
use crate::{RagError, Result};

#[derive(Debug, Clone)]
pub struct TelemetryGuard {
    span: Span,
    project_name: String,
    space_id: String,
}

impl TelemetryGuard {
    pub fn span(&self) -> &Span {
        &self.span
    }

    pub fn project_name(&self) -> &str {
        &self.project_name
    }

    pub fn space_id(&self) -> &str {
        &self.space_id
    }
}

pub fn register(config: &RagConfig) -> Result<TelemetryGuard> {
    let credentials = &config.credentials;
    if credentials.arize_api_key.trim().is_empty() {
        return Err(RagError::Telemetry("telemetry api key is missing".to_string()));
    }
    if credentials.arize_space_id.trim().is_empty() {
        return Err(RagError::Telemetry("telemetry space id is missing".to_string()));
    }
    if credentials.arize_project_name.trim().is_empty() {
        return Err(RagError::Telemetry("telemetry project name is missing".to_string()));
    }

    init_subscriber(&config.telemetry);

    let span = tracing::info_span!(
        "rag_eval",
        project_name = %credentials.arize_project_name,
        space_id = %credentials.arize_space_id
    );
    tracing::debug!(project_name = %credentials.arize_project_name, "Telemetry registered");

    Ok(TelemetryGuard {
        span,
        project_name: credentials.arize_project_name.clone(),
        space_id: credentials.arize_space_id.clone(),
    })
}

/// Installs the global fmt subscriber. `RUST_LOG` overrides the configured
/// filter. Logs go to stderr; stdout carries the report. A second call is a no-op.
pub fn init_subscriber(config: &TelemetryConfig) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.log_filter));

    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_ansi(config.ansi)
        .with_writer(std::io::stderr)
        .try_init();
}
