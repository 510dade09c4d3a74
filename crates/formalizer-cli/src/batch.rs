//! Batch runner over a JSONL problem file.
//!
//! Each input line is `{"index": N, "question": "...", "category": "..."}`;
//! `index` may be any JSON scalar. Every problem gets `problem_<index>.lean`
//! and `problem_<index>_report.json` in the output directory, plus one line
//! in `summary.jsonl`. A line that does not parse, a run that breaks, or
//! outputs that cannot be written are recorded with status `error` and the
//! batch moves on.

use std::fs::File;
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::Path;

use formalizer_synth::{Formalizer, PipelineError};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use tracing::{error, info, warn};

const UNKNOWN_INDEX: &str = "unknown";

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Problem {
    #[serde(default = "unknown_index", deserialize_with = "scalar_index")]
    pub index: String,
    pub question: String,
    #[serde(default)]
    pub category: Option<String>,
}

fn unknown_index() -> String {
    UNKNOWN_INDEX.to_string()
}

fn scalar_index<'de, D: Deserializer<'de>>(deserializer: D) -> Result<String, D::Error> {
    Ok(index_text(&Value::deserialize(deserializer)?))
}

/// Strings as-is, other scalars in their JSON spelling.
fn index_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Number(n) => n.to_string(),
        Value::Bool(b) => b.to_string(),
        Value::Null | Value::Array(_) | Value::Object(_) => unknown_index(),
    }
}

/// One non-blank input line.
#[derive(Debug, Clone, PartialEq)]
pub enum BatchEntry {
    Problem(Problem),
    Malformed { index: String, reason: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProblemStatus {
    Synthesized,
    Failed,
    Error,
}

/// One line of `summary.jsonl`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SummaryLine {
    pub index: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
    pub status: ProblemStatus,
    #[serde(default)]
    pub concepts: usize,
    #[serde(default)]
    pub failed_concepts: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub aligned: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fingerprint: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Running totals for progress logging.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BatchTally {
    pub processed: usize,
    pub synthesized: usize,
    pub aligned: usize,
    pub alignment_checked: usize,
    pub errors: usize,
}

impl BatchTally {
    fn record(&mut self, line: &SummaryLine) {
        self.processed += 1;
        match line.status {
            ProblemStatus::Synthesized => self.synthesized += 1,
            ProblemStatus::Failed => {}
            ProblemStatus::Error => self.errors += 1,
        }
        if let Some(aligned) = line.aligned {
            self.alignment_checked += 1;
            if aligned {
                self.aligned += 1;
            }
        }
    }

    pub fn compile_pass_rate(&self) -> f64 {
        ratio(self.synthesized, self.processed)
    }

    pub fn alignment_pass_rate(&self) -> f64 {
        ratio(self.aligned, self.alignment_checked)
    }

    pub fn all_synthesized(&self) -> bool {
        self.synthesized == self.processed
    }
}

fn ratio(part: usize, whole: usize) -> f64 {
    if whole == 0 {
        0.0
    } else {
        part as f64 / whole as f64
    }
}

impl SummaryLine {
    fn new(index: &str, category: Option<String>) -> Self {
        SummaryLine {
            index: index.to_string(),
            category,
            status: ProblemStatus::Error,
            concepts: 0,
            failed_concepts: 0,
            aligned: None,
            fingerprint: None,
            error: None,
        }
    }
}

/// Reads the non-blank lines of `input`. Lines that do not parse as a
/// problem are kept as `Malformed`, indexed by their `index` field when
/// one can be read and by `line_<n>` otherwise.
pub fn read_problems(input: &Path) -> Result<Vec<BatchEntry>, PipelineError> {
    let reader = BufReader::new(File::open(input)?);
    let mut entries = Vec::new();
    for (number, line) in reader.lines().enumerate() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        match serde_json::from_str::<Problem>(&line) {
            Ok(problem) => entries.push(BatchEntry::Problem(problem)),
            Err(err) => {
                warn!(line = number + 1, error = %err, "malformed problem");
                let index = serde_json::from_str::<Value>(&line)
                    .ok()
                    .and_then(|value| value.get("index").map(index_text))
                    .unwrap_or_else(|| format!("line_{}", number + 1));
                entries.push(BatchEntry::Malformed {
                    index,
                    reason: format!("malformed problem: {}", err),
                });
            }
        }
    }
    Ok(entries)
}

/// Formalizes up to `limit` entries from `input` into `output_dir`.
pub async fn run_batch(
    formalizer: &Formalizer,
    input: &Path,
    output_dir: &Path,
    limit: Option<usize>,
) -> Result<BatchTally, PipelineError> {
    let mut entries = read_problems(input)?;
    if let Some(limit) = limit {
        entries.truncate(limit);
    }
    std::fs::create_dir_all(output_dir)?;
    let mut summary = BufWriter::new(File::create(output_dir.join("summary.jsonl"))?);
    info!(problems = entries.len(), output = %output_dir.display(), "batch started");

    let mut tally = BatchTally::default();
    for entry in &entries {
        let line = match entry {
            BatchEntry::Problem(problem) => run_one(formalizer, problem, output_dir).await,
            BatchEntry::Malformed { index, reason } => {
                let mut line = SummaryLine::new(index, None);
                line.error = Some(reason.clone());
                line
            }
        };
        writeln!(summary, "{}", serde_json::to_string(&line)?)?;
        summary.flush()?;
        tally.record(&line);

        info!(
            index = %line.index,
            status = ?line.status,
            done = tally.processed,
            total = entries.len(),
            compile_pass_rate = tally.compile_pass_rate(),
            alignment_pass_rate = tally.alignment_pass_rate(),
            "problem finished"
        );
    }

    info!(
        processed = tally.processed,
        synthesized = tally.synthesized,
        errors = tally.errors,
        "batch finished"
    );
    Ok(tally)
}

/// Runs one problem; anything that goes wrong becomes an `error` line.
async fn run_one(formalizer: &Formalizer, problem: &Problem, output_dir: &Path) -> SummaryLine {
    let mut line = SummaryLine::new(&problem.index, problem.category.clone());

    let run = match formalizer.formalize(&problem.question).await {
        Ok(run) => run,
        Err(err) => {
            error!(index = %problem.index, error = %err, "problem aborted");
            line.error = Some(err.to_string());
            return line;
        }
    };

    line.concepts = run.report.counts.total;
    line.failed_concepts = run.report.counts.failed;
    line.aligned = run.report.aligned();
    line.fingerprint = Some(run.report.artifact_fingerprint.clone());
    match run.write_to(output_dir, &output_stem(&problem.index)) {
        Ok(_) if run.report.all_synthesized() => line.status = ProblemStatus::Synthesized,
        Ok(_) => line.status = ProblemStatus::Failed,
        Err(err) => {
            error!(index = %problem.index, error = %err, "failed to write outputs");
            line.error = Some(format!("failed to write outputs: {}", err));
        }
    }
    line
}

/// `problem_<index>` with anything unsafe in a file name replaced by `_`.
fn output_stem(index: &str) -> String {
    let safe: String = index
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' || c == '.' { c } else { '_' })
        .collect();
    format!("problem_{}", safe.trim_start_matches('.'))
}
