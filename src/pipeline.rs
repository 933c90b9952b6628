//! Batch orchestration: retrieve, generate, then evaluate the whole batch once.
//!
//! Questions are processed strictly in order, one retrieval and one
//! completion per question, and the evaluator sees the full batch in a
//! single call. Evaluation rows are tagged with a correlation id and joined
//! back on that id, never on position alone.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{info, warn, Instrument};
use uuid::Uuid;
use crate::completion::{CompletionService, OpenAIChatCompletion};
use crate::config::RagConfig;
use crate::embedding::OpenAIEmbedding;
use crate::error::with_timeout;
use crate::evaluation::{EvalOutput, EvalRow, Evaluator, QaEvaluator, QaLabel};
use crate::retrieval::{Retriever, VectorRetriever};
use crate::storage;
use crate::{RagError, Result};

/// Stands in for the reference when retrieval finds nothing.
pub const NO_REFERENCE_FOUND: &str = "No reference found.";

pub const DEFAULT_QUESTIONS: [&str; 5] = [
    "Are late payments penalized?",
    "When are customers billed?",
    "What is required for admin account login?",
    "How long do I have to request a refund?",
    "Is user data encrypted?",
];

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Record {
    pub prompt: String,
    pub input: String,
    pub output: String,
    pub reference: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvaluatedRecord {
    pub prompt: String,
    pub input: String,
    pub output: String,
    pub reference: String,
    pub label: QaLabel,
    pub score: f64,
    pub explanation: String,
}

impl EvaluatedRecord {
    fn from_parts(record: Record, eval: EvalOutput) -> Self {
        Self {
            prompt: record.prompt,
            input: record.input,
            output: record.output,
            reference: record.reference,
            label: eval.label,
            score: eval.score,
            explanation: eval.explanation.unwrap_or_default(),
        }
    }
}

/// Result of one question in an isolated run.
#[derive(Debug)]
pub enum ItemOutcome {
    Evaluated(EvaluatedRecord),
    Failed { question: String, error: RagError },
}

impl ItemOutcome {
    pub fn evaluated(&self) -> Option<&EvaluatedRecord> {
        match self {
            ItemOutcome::Evaluated(record) => Some(record),
            ItemOutcome::Failed { .. } => None,
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct StageTimeouts {
    pub retrieval: Duration,
    pub generation: Duration,
    pub evaluation: Duration,
}

#[derive(Debug, Clone)]
pub struct PipelineSettings {
    pub top_k: usize,
    pub max_output_tokens: u32,
    pub provide_explanation: bool,
    pub timeouts: StageTimeouts,
}

impl PipelineSettings {
    pub fn from_config(config: &RagConfig) -> Self {
        Self {
            top_k: config.retrieval.top_k.max(1),
            max_output_tokens: config.generation.max_tokens,
            provide_explanation: config.evaluation.provide_explanation,
            timeouts: StageTimeouts {
                // Retrieval covers the query embedding plus the vector search.
                retrieval: Duration::from_millis(
                    config.retrieval.timeout_ms.saturating_add(config.embedding.timeout_ms),
                ),
                generation: Duration::from_millis(config.generation.timeout_ms),
                evaluation: Duration::from_millis(config.evaluation.timeout_ms),
            },
        }
    }
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self::from_config(&RagConfig::default())
    }
}

pub fn compose_prompt(context: &str, question: &str) -> String {
    format!(
        "Use the following context to answer the question:\n{}\n\nQuestion: {}",
        context, question
    )
}

pub struct RagPipeline {
    retriever: Arc<dyn Retriever>,
    completion: Arc<dyn CompletionService>,
    evaluator: Arc<dyn Evaluator>,
    settings: PipelineSettings,
}

impl RagPipeline {
    pub fn new(
        retriever: Arc<dyn Retriever>,
        completion: Arc<dyn CompletionService>,
        evaluator: Arc<dyn Evaluator>,
        settings: PipelineSettings,
    ) -> Self {
        Self {
            retriever,
            completion,
            evaluator,
            settings,
        }
    }

    /// Builds the hosted collaborators. Fails before any network call if the
    /// configuration is incomplete.
    pub async fn from_config(config: &RagConfig) -> Result<Self> {
        config.validate()?;
        let api_key = &config.credentials.openai_api_key;

        let embedding = Arc::new(OpenAIEmbedding::new(api_key, &config.embedding)?);
        let vector_storage = storage::connect(&config.retrieval).await?;
        let retriever = Arc::new(VectorRetriever::new(
            vector_storage,
            embedding,
            &config.retrieval.namespace,
        ));

        let completion = Arc::new(OpenAIChatCompletion::new(
            api_key,
            &config.generation.model,
            &config.generation.base_url,
            config.generation.timeout_ms,
        )?);

        let judge = Arc::new(OpenAIChatCompletion::new(
            api_key,
            &config.evaluation.model,
            &config.evaluation.base_url,
            config.evaluation.timeout_ms,
        )?);
        let evaluator = Arc::new(QaEvaluator::new(
            judge,
            config.evaluation.max_tokens,
            Duration::from_millis(config.evaluation.timeout_ms),
        )?);

        info!(
            backend = ?config.retrieval.backend,
            namespace = %config.retrieval.namespace,
            generation_model = %config.generation.model,
            evaluation_model = %config.evaluation.model,
            "Pipeline ready"
        );

        Ok(Self::new(
            retriever,
            completion,
            evaluator,
            PipelineSettings::from_config(config),
        ))
    }

    pub fn settings(&self) -> &PipelineSettings {
        &self.settings
    }

    pub async fn process_one(&self, question: &str) -> Result<Record> {
        let timeouts = self.settings.timeouts;

        let start = Instant::now();
        let passages = with_timeout(
            "retrieval",
            timeouts.retrieval,
            self.retriever.search(question, self.settings.top_k),
        )
        .await?;
        let retrieval_ms = start.elapsed().as_millis() as u64;

        let reference = match passages.into_iter().next() {
            Some(best) => best.text,
            None => {
                warn!(question, "No passage retrieved, using placeholder reference");
                NO_REFERENCE_FOUND.to_string()
            }
        };

        let input = compose_prompt(&reference, question);

        let start = Instant::now();
        let raw = with_timeout(
            "generation",
            timeouts.generation,
            self.completion.complete(&input, self.settings.max_output_tokens),
        )
        .await?;
        let output = raw.trim().to_string();
        if output.is_empty() {
            warn!(question, model = self.completion.model(), "Completion was empty after trimming");
        }

        info!(
            retrieval_ms,
            generation_ms = start.elapsed().as_millis() as u64,
            output_chars = output.chars().count(),
            "Question answered"
        );

        Ok(Record {
            prompt: question.to_string(),
            input,
            output,
            reference,
        })
    }

    /// Aborts on the first failing question; the output is index-aligned with `questions`.
    pub async fn run_batch<S: AsRef<str>>(&self, questions: &[S]) -> Result<Vec<EvaluatedRecord>> {
        info!(questions = questions.len(), "Starting batch");

        let mut records = Vec::with_capacity(questions.len());
        for (index, question) in questions.iter().enumerate() {
            let span = tracing::info_span!("question", index);
            records.push(self.process_one(question.as_ref()).instrument(span).await?);
        }

        let evaluated = self.evaluate_records(records).await?;
        info!(records = evaluated.len(), "Batch finished");
        Ok(evaluated)
    }

    /// Like [`run_batch`](Self::run_batch), but a failing question only marks
    /// its own slot as failed. Evaluation failure still fails the run.
    pub async fn run_batch_isolated<S: AsRef<str>>(&self, questions: &[S]) -> Result<Vec<ItemOutcome>> {
        info!(questions = questions.len(), "Starting isolated batch");

        let mut slots: Vec<std::result::Result<usize, (String, RagError)>> = Vec::with_capacity(questions.len());
        let mut records = Vec::new();

        for (index, question) in questions.iter().enumerate() {
            let question = question.as_ref();
            let span = tracing::info_span!("question", index);
            match self.process_one(question).instrument(span).await {
                Ok(record) => {
                    slots.push(Ok(records.len()));
                    records.push(record);
                }
                Err(error) => {
                    warn!(
                        index,
                        question,
                        error = %error,
                        category = %error.category(),
                        transient = error.is_transient(),
                        "Question failed"
                    );
                    slots.push(Err((question.to_string(), error)));
                }
            }
        }

        let mut evaluated: Vec<Option<EvaluatedRecord>> = self
            .evaluate_records(records)
            .await?
            .into_iter()
            .map(Some)
            .collect();

        let mut outcomes = Vec::with_capacity(slots.len());
        for slot in slots {
            let outcome = match slot {
                Ok(position) => {
                    let record = evaluated
                        .get_mut(position)
                        .and_then(Option::take)
                        .ok_or_else(|| RagError::Alignment(format!("no evaluated record at position {}", position)))?;
                    ItemOutcome::Evaluated(record)
                }
                Err((question, error)) => ItemOutcome::Failed { question, error },
            };
            outcomes.push(outcome);
        }

        let failed = outcomes.iter().filter(|o| o.evaluated().is_none()).count();
        info!(records = outcomes.len(), failed, "Isolated batch finished");
        Ok(outcomes)
    }

    async fn evaluate_records(&self, records: Vec<Record>) -> Result<Vec<EvaluatedRecord>> {
        if records.is_empty() {
            return Ok(Vec::new());
        }

        let rows: Vec<EvalRow> = records
            .iter()
            .map(|record| EvalRow {
                id: Uuid::new_v4(),
                input: record.input.clone(),
                output: record.output.clone(),
                reference: record.reference.clone(),
            })
            .collect();
        let ids: Vec<Uuid> = rows.iter().map(|row| row.id).collect();

        // The evaluation timeout is per judged row; the batch gets one slot per row.
        let rows_count = u32::try_from(rows.len()).unwrap_or(u32::MAX);
        let budget = self.settings.timeouts.evaluation.saturating_mul(rows_count);

        let start = Instant::now();
        let outputs = with_timeout(
            "evaluation",
            budget,
            self.evaluator.evaluate(&rows, self.settings.provide_explanation),
        )
        .await?;
        info!(rows = rows.len(), evaluation_ms = start.elapsed().as_millis() as u64, "Batch evaluated");

        merge_evaluations(records, &ids, outputs)
    }
}

/// Joins evaluator rows to records by correlation id. Any count mismatch,
/// duplicate, unknown or missing id is an error rather than a silent shift.
pub fn merge_evaluations(
    records: Vec<Record>,
    ids: &[Uuid],
    outputs: Vec<EvalOutput>,
) -> Result<Vec<EvaluatedRecord>> {
    if ids.len() != records.len() {
        return Err(RagError::Alignment(format!(
            "{} ids for {} records",
            ids.len(),
            records.len()
        )));
    }
    if outputs.len() != records.len() {
        return Err(RagError::Alignment(format!(
            "evaluator returned {} rows for {} submitted",
            outputs.len(),
            records.len()
        )));
    }

    let mut by_id: HashMap<Uuid, EvalOutput> = HashMap::with_capacity(outputs.len());
    for output in outputs {
        let id = output.id;
        if by_id.insert(id, output).is_some() {
            return Err(RagError::Alignment(format!("duplicate evaluation row {}", id)));
        }
    }

    let mut merged = Vec::with_capacity(records.len());
    for (record, id) in records.into_iter().zip(ids) {
        let output = by_id
            .remove(id)
            .ok_or_else(|| RagError::Alignment(format!("no evaluation row for {}", id)))?;
        if !output.score.is_finite() || !(0.0..=1.0).contains(&output.score) {
            return Err(RagError::Evaluation(format!(
                "score {} for row {} is outside [0, 1]",
                output.score, id
            )));
        }
        merged.push(EvaluatedRecord::from_parts(record, output));
    }

    Ok(merged)
}
