//! LLM-judged answer correctness.
//!
//! An [`Evaluator`] takes a table of `(input, output, reference)` rows and
//! returns one verdict per row. Each submitted row carries a correlation id
//! that the verdict echoes back, so callers can join on it instead of on
//! position.

use async_trait::async_trait;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;
use crate::completion::CompletionService;
use crate::error::{with_timeout, UNPARSABLE_VERDICT};
use crate::{RagError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QaLabel {
    Correct,
    PartiallyCorrect,
    Incorrect,
}

impl QaLabel {
    pub const ALL: [QaLabel; 3] = [QaLabel::Correct, QaLabel::PartiallyCorrect, QaLabel::Incorrect];

    pub fn as_str(self) -> &'static str {
        match self {
            QaLabel::Correct => "correct",
            QaLabel::PartiallyCorrect => "partially_correct",
            QaLabel::Incorrect => "incorrect",
        }
    }

    /// Score in [0, 1] attached to the label.
    pub fn score(self) -> f64 {
        match self {
            QaLabel::Correct => 1.0,
            QaLabel::PartiallyCorrect => 0.5,
            QaLabel::Incorrect => 0.0,
        }
    }

    /// Case-insensitive; accepts spaces or dashes in place of underscores.
    pub fn parse(raw: &str) -> Option<Self> {
        let normalized = raw
            .trim()
            .trim_matches(|c: char| c == '*' || c == '"' || c == '\'' || c == '.' || c == '`')
            .trim()
            .to_lowercase()
            .replace(['-', ' '], "_");

        match normalized.as_str() {
            "correct" => Some(QaLabel::Correct),
            "partially_correct" | "partial" => Some(QaLabel::PartiallyCorrect),
            "incorrect" => Some(QaLabel::Incorrect),
            _ => None,
        }
    }

    /// Like [`parse`](Self::parse) but tolerates trailing words after the label.
    pub fn parse_leading(raw: &str) -> Option<Self> {
        let words: Vec<&str> = raw.split_whitespace().collect();
        if words.len() >= 2 {
            if let Some(label) = QaLabel::parse(&format!("{} {}", words[0], words[1])) {
                return Some(label);
            }
        }
        words.first().and_then(|word| QaLabel::parse(word))
    }
}

impl fmt::Display for QaLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EvalRow {
    pub id: Uuid,
    pub input: String,
    pub output: String,
    pub reference: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EvalOutput {
    pub id: Uuid,
    pub label: QaLabel,
    pub score: f64,
    pub explanation: Option<String>,
}

#[async_trait]
pub trait Evaluator: Send + Sync {
    async fn evaluate(&self, rows: &[EvalRow], explain: bool) -> Result<Vec<EvalOutput>>;
}

/// Pulls the label (and optional explanation) out of a judge response.
pub struct VerdictParser {
    label: Regex,
    explanation: Regex,
}

impl VerdictParser {
    pub fn new() -> Result<Self> {
        let compile = |pattern: &str| {
            Regex::new(pattern).map_err(|e| RagError::Config(format!("Invalid verdict pattern: {}", e)))
        };
        Ok(Self {
            label: compile(r"(?i)label\s*:\s*\**\s*([a-z][a-z_\- ]*)")?,
            explanation: compile(r"(?is)explanation\s*:\s*(.*?)\s*label\s*:")?,
        })
    }

    pub fn parse(&self, response: &str, explain: bool) -> Result<(QaLabel, Option<String>)> {
        // The last LABEL line wins in case the explanation quotes the word.
        let marked = self.label
            .captures_iter(response)
            .last()
            .and_then(|caps| caps.get(1))
            .and_then(|m| QaLabel::parse(m.as_str()).or_else(|| QaLabel::parse_leading(m.as_str())));

        let label = match marked {
            Some(label) => label,
            None => QaLabel::parse(response).or_else(|| QaLabel::parse_leading(response)).ok_or_else(|| {
                RagError::Evaluation(format!("{}: {:?}", UNPARSABLE_VERDICT, truncate(response, 120)))
            })?,
        };

        if !explain {
            return Ok((label, None));
        }

        let explanation = self.explanation
            .captures(response)
            .and_then(|caps| caps.get(1))
            .map(|m| m.as_str().trim().to_string())
            .or_else(|| {
                // No EXPLANATION marker: everything before the label line.
                self.label
                    .find_iter(response)
                    .last()
                    .map(|m| response[..m.start()].trim().to_string())
            })
            .filter(|text| !text.is_empty());

        Ok((label, explanation))
    }
}

fn truncate(text: &str, max_chars: usize) -> String {
    text.chars().take(max_chars).collect()
}

pub fn render_judge_prompt(row: &EvalRow, explain: bool) -> String {
    let instructions = if explain {
        "First write EXPLANATION: followed by a short step-by-step justification. \
         Then, on the final line, write LABEL: followed by exactly one of \
         correct, partially_correct or incorrect."
    } else {
        "Respond with exactly one word: correct, partially_correct or incorrect."
    };

    format!(
        "You are grading an answer against a reference text that is treated as ground truth.\n\
         An answer is correct when it is fully supported by the reference and answers the query, \
         partially_correct when it is supported but incomplete, and incorrect otherwise.\n\n\
         [Query]\n{}\n\n[Reference]\n{}\n\n[Answer]\n{}\n\n{}",
        row.input, row.reference, row.output, instructions
    )
}

/// Judges each row with a chat model, one request per row in submission order.
/// `call_timeout` bounds each judge request on its own.
pub struct QaEvaluator {
    model: Arc<dyn CompletionService>,
    max_tokens: u32,
    call_timeout: Duration,
    parser: VerdictParser,
}

impl QaEvaluator {
    pub fn new(model: Arc<dyn CompletionService>, max_tokens: u32, call_timeout: Duration) -> Result<Self> {
        Ok(Self {
            model,
            max_tokens,
            call_timeout,
            parser: VerdictParser::new()?,
        })
    }
}

#[async_trait]
impl Evaluator for QaEvaluator {
    async fn evaluate(&self, rows: &[EvalRow], explain: bool) -> Result<Vec<EvalOutput>> {
        let mut outputs = Vec::with_capacity(rows.len());

        for row in rows {
            let prompt = render_judge_prompt(row, explain);
            let response = with_timeout(
                "evaluation",
                self.call_timeout,
                self.model.complete(&prompt, self.max_tokens),
            )
            .await?;
            let (label, explanation) = self.parser.parse(&response, explain)?;

            tracing::debug!(row_id = %row.id, model = self.model.model(), label = %label, "Row judged");

            outputs.push(EvalOutput {
                id: row.id,
                label,
                score: label.score(),
                explanation,
            });
        }

        Ok(outputs)
    }
}
