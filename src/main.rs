use anyhow::Context;
use clap::Parser;
use rag_eval::{
    config::RagConfig,
    pipeline::{RagPipeline, DEFAULT_QUESTIONS},
    report,
    telemetry,
};
use std::io;
use std::path::PathBuf;
use tracing::{info, Instrument};

#[derive(Parser)]
#[command(name = "rag-eval", version, about = "Answer a question batch with retrieved context and grade the answers")]
struct Cli {
    /// TOML configuration file (defaults to ./rag-eval.toml when present)
    #[arg(long)]
    config: Option<PathBuf>,
    /// Question to ask; repeat to build a batch. Replaces the built-in batch.
    #[arg(long = "question", value_name = "TEXT")]
    questions: Vec<String>,
    /// Keep going when a single question fails and report it in place
    #[arg(long)]
    isolate: bool,
    /// Also write the evaluated records as CSV
    #[arg(long, value_name = "PATH")]
    csv: Option<PathBuf>,
    /// Also write the evaluated records and a summary as JSON
    #[arg(long, value_name = "PATH")]
    json: Option<PathBuf>,
    /// Print the effective configuration with secrets masked, then exit
    #[arg(long)]
    print_config: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    if cli.print_config {
        let mut config = RagConfig::from_sources(cli.config.as_deref(), true)?;
        config.apply_env_fallbacks(|key| std::env::var(key).ok());
        print!("{}", config.to_redacted_toml()?);
        return Ok(());
    }

    let config = RagConfig::load(cli.config.as_deref()).context("loading configuration")?;
    let telemetry = telemetry::register(&config).context("registering telemetry")?;

    let questions: Vec<String> = if cli.questions.is_empty() {
        DEFAULT_QUESTIONS.iter().map(|q| q.to_string()).collect()
    } else {
        cli.questions.clone()
    };

    async {
        info!(project = telemetry.project_name(), questions = questions.len(), "Starting rag-eval");

        let pipeline = RagPipeline::from_config(&config)
            .await
            .context("building pipeline")?;

        let results = if cli.isolate {
            let outcomes = pipeline.run_batch_isolated(&questions).await?;
            report::write_outcomes(&mut io::stdout().lock(), &outcomes)?;
            outcomes
                .into_iter()
                .filter_map(|outcome| outcome.evaluated().cloned())
                .collect::<Vec<_>>()
        } else {
            let results = pipeline.run_batch(&questions).await?;
            report::print_report(&results)?;
            results
        };

        report::write_summary(&mut io::stdout().lock(), &report::summarize(&results))?;

        if let Some(path) = &cli.csv {
            report::write_csv(path, &results)
                .with_context(|| format!("writing CSV report to {}", path.display()))?;
        }
        if let Some(path) = &cli.json {
            report::write_json(path, &results)
                .with_context(|| format!("writing JSON report to {}", path.display()))?;
        }

        Ok::<(), anyhow::Error>(())
    }
    .instrument(telemetry.span().clone())
    .await
}
