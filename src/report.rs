use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs::File;
use std::io::{self, Write};
use std::path::Path;
use crate::evaluation::QaLabel;
use crate::pipeline::{EvaluatedRecord, ItemOutcome};
use crate::Result;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchSummary {
    pub count: usize,
    pub mean_score: Option<f64>,
    pub labels: BTreeMap<QaLabel, usize>,
}

#[derive(Debug, Serialize)]
struct JsonReport<'a> {
    generated_at: DateTime<Utc>,
    summary: BatchSummary,
    records: &'a [EvaluatedRecord],
}

pub fn summarize(results: &[EvaluatedRecord]) -> BatchSummary {
    let mut labels = BTreeMap::new();
    for record in results {
        *labels.entry(record.label).or_insert(0) += 1;
    }

    let mean_score = if results.is_empty() {
        None
    } else {
        Some(results.iter().map(|r| r.score).sum::<f64>() / results.len() as f64)
    };

    BatchSummary {
        count: results.len(),
        mean_score,
        labels,
    }
}

fn write_record<W: Write>(w: &mut W, number: usize, record: &EvaluatedRecord) -> io::Result<()> {
    writeln!(w, "\n--- Prompt {} ---", number)?;
    writeln!(w, "Prompt: {}", record.prompt)?;
    writeln!(w, "Reference: {}", record.reference)?;
    writeln!(w, "Model Output: {}", record.output)?;
    writeln!(w, "Label: {}", record.label)?;
    writeln!(w, "Score: {:.2}", record.score)?;
    writeln!(w, "Explanation: {}", record.explanation)
}

/// One block per record, numbered from 1, in batch order.
pub fn write_report<W: Write>(w: &mut W, results: &[EvaluatedRecord]) -> Result<()> {
    for (i, record) in results.iter().enumerate() {
        write_record(w, i + 1, record)?;
    }
    Ok(())
}

pub fn print_report(results: &[EvaluatedRecord]) -> Result<()> {
    let stdout = io::stdout();
    let mut handle = stdout.lock();
    write_report(&mut handle, results)?;
    handle.flush()?;
    Ok(())
}

/// Report for an isolated run; failed questions keep their slot number.
pub fn write_outcomes<W: Write>(w: &mut W, outcomes: &[ItemOutcome]) -> Result<()> {
    for (i, outcome) in outcomes.iter().enumerate() {
        match outcome {
            ItemOutcome::Evaluated(record) => write_record(w, i + 1, record)?,
            ItemOutcome::Failed { question, error } => {
                writeln!(w, "\n--- Prompt {} (failed) ---", i + 1)?;
                writeln!(w, "Prompt: {}", question)?;
                writeln!(w, "Error: {}", error)?;
                writeln!(w, "Category: {}", error.category())?;
            }
        }
    }
    Ok(())
}

pub fn write_summary<W: Write>(w: &mut W, summary: &BatchSummary) -> Result<()> {
    writeln!(w, "\n=== Summary ===")?;
    writeln!(w, "Records: {}", summary.count)?;
    match summary.mean_score {
        Some(mean) => writeln!(w, "Mean score: {:.2}", mean)?,
        None => writeln!(w, "Mean score: n/a")?,
    }
    for (label, count) in &summary.labels {
        writeln!(w, "{}: {}", label, count)?;
    }
    Ok(())
}

pub fn write_csv(path: &Path, results: &[EvaluatedRecord]) -> Result<()> {
    let mut writer = csv::Writer::from_path(path)?;
    writer.write_record(["prompt", "input", "output", "reference", "label", "score", "explanation"])?;
    for record in results {
        let score = record.score.to_string();
        writer.write_record([
            record.prompt.as_str(),
            record.input.as_str(),
            record.output.as_str(),
            record.reference.as_str(),
            record.label.as_str(),
            score.as_str(),
            record.explanation.as_str(),
        ])?;
    }
    writer.flush()?;
    tracing::info!(path = %path.display(), rows = results.len(), "CSV report written");
    Ok(())
}

pub fn write_json(path: &Path, results: &[EvaluatedRecord]) -> Result<()> {
    let report = JsonReport {
        generated_at: Utc::now(),
        summary: summarize(results),
        records: results,
    };
    let file = File::create(path)?;
    serde_json::to_writer_pretty(file, &report)?;
    tracing::info!(path = %path.display(), rows = results.len(), "JSON report written");
    Ok(())
}
