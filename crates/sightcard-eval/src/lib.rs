//! Offline evaluation of the analysis API.
//!
//! Reads labeled samples from a JSONL file, submits each one to `/analyze`,
//! scores the reply against the sample's expectation block and keeps a
//! record of every exchange for the run log.

use std::fmt;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::{info, warn};

pub const DEFAULT_API_URL: &str = "http://127.0.0.1:8000/analyze";
pub const DEFAULT_EVAL_FILE: &str = "datasets/shoes/eval_samples.jsonl";
pub const DEFAULT_RESULTS_FILE: &str = "evaluation_results/latest_run.json";

/// Context ID samples list for the catalog itself. The service reads the
/// catalog on its own, so it is never submitted.
pub const CATALOG_CONTEXT_ID: &str = "spec_catalog";

#[derive(Debug, thiserror::Error)]
pub enum EvalError {
    #[error("evaluation file not found at {}", .0.display())]
    MissingEvalFile(PathBuf),
    #[error("read {}: {source}", path.display())]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("sample on line {line}: {source}")]
    Sample {
        line: usize,
        source: serde_json::Error,
    },
    #[error("write {}: {source}", path.display())]
    Write {
        path: PathBuf,
        source: std::io::Error,
    },
}

// --- Samples ---

#[derive(Debug, Clone, Deserialize)]
pub struct Sample {
    pub question: String,
    #[serde(default)]
    pub context_ids: Vec<String>,
    pub metadata: SampleMetadata,
    #[serde(default)]
    pub expect: Option<Value>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SampleMetadata {
    pub sku: String,
}

/// Body posted to `/analyze` for one sample.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Payload {
    pub sku: String,
    pub question: String,
    pub context_ids: Vec<String>,
}

impl Sample {
    pub fn payload(&self) -> Payload {
        Payload {
            sku: self.metadata.sku.clone(),
            question: self.question.clone(),
            context_ids: self
                .context_ids
                .iter()
                .filter(|id| id.as_str() != CATALOG_CONTEXT_ID)
                .cloned()
                .collect(),
        }
    }
}

/// Parse a JSONL sample file. Blank lines are ignored.
pub fn parse_samples(text: &str) -> Result<Vec<Sample>, EvalError> {
    text.lines()
        .enumerate()
        .filter(|(_, line)| !line.trim().is_empty())
        .map(|(i, line)| {
            serde_json::from_str(line).map_err(|source| EvalError::Sample { line: i + 1, source })
        })
        .collect()
}

pub async fn load_samples(path: &Path) -> Result<Vec<Sample>, EvalError> {
    let text = tokio::fs::read_to_string(path).await.map_err(|source| {
        if source.kind() == std::io::ErrorKind::NotFound {
            EvalError::MissingEvalFile(path.to_path_buf())
        } else {
            EvalError::Read {
                path: path.to_path_buf(),
                source,
            }
        }
    })?;
    parse_samples(&text)
}

// --- Transport ---

/// What came back from one submission.
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    Success(Value),
    ApiError { status: u16, body: String },
    RequestFailed(String),
}

impl Outcome {
    pub fn status_tag(&self) -> String {
        match self {
            Self::Success(_) => "SUCCESS".to_string(),
            Self::ApiError { status, .. } => format!("API_ERROR_{status}"),
            Self::RequestFailed(_) => "REQUEST_EXCEPTION".to_string(),
        }
    }

    fn api_output(&self) -> Value {
        match self {
            Self::Success(body) => body.clone(),
            Self::ApiError { body, .. } => Value::String(body.clone()),
            Self::RequestFailed(error) => Value::String(error.clone()),
        }
    }
}

#[async_trait]
pub trait Transport: Send + Sync {
    async fn submit(&self, payload: &Payload) -> Outcome;
}

/// Posts payloads to a running analysis service.
pub struct HttpTransport {
    client: reqwest::Client,
    url: String,
}

impl HttpTransport {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            url: url.into(),
        }
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn submit(&self, payload: &Payload) -> Outcome {
        let response = match self.client.post(&self.url).json(payload).send().await {
            Ok(r) => r,
            Err(e) => return Outcome::RequestFailed(e.to_string()),
        };
        let status = response.status();
        let body = match response.text().await {
            Ok(text) => text,
            Err(e) => return Outcome::RequestFailed(e.to_string()),
        };
        if status != reqwest::StatusCode::OK {
            return Outcome::ApiError {
                status: status.as_u16(),
                body,
            };
        }
        match serde_json::from_str(&body) {
            Ok(value) => Outcome::Success(value),
            Err(e) => Outcome::RequestFailed(format!("decode response body: {e}")),
        }
    }
}

// --- Scoring ---

/// Verdict for one sample. `pass` is `None` when no criterion applied.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Verdict {
    pub pass: Option<bool>,
    pub reason: String,
}

impl Verdict {
    fn new(pass: Option<bool>, reason: impl Into<String>) -> Self {
        Self {
            pass,
            reason: reason.into(),
        }
    }
}

/// Score one successful reply against a sample's `expect` block.
///
/// `forbid_claim_rule` wins over `allow_insufficient`.
pub fn evaluate_sample(api_output: &Value, expected: &Value) -> Verdict {
    if let Some(rule) = expected.get("forbid_claim_rule") {
        let rule_id = match rule {
            Value::String(s) => s.clone(),
            other => other.to_string(),
        };
        let failed = api_output
            .get("structured")
            .and_then(|s| s.get("compliance"))
            .and_then(|c| c.get(&rule_id))
            .and_then(|entry| entry.get("pass"))
            == Some(&Value::Bool(false));
        return if failed {
            Verdict::new(Some(true), format!("Correctly failed compliance rule {rule_id}."))
        } else {
            Verdict::new(
                Some(false),
                format!("Expected to fail compliance rule {rule_id}, but it passed or was not found."),
            )
        };
    }

    if expected.get("allow_insufficient").is_some_and(truthy) {
        return if api_output.get("answer").is_some() {
            Verdict::new(Some(true), "API returned a valid answer.")
        } else {
            Verdict::new(Some(false), "API failed to return an answer.")
        };
    }

    Verdict::new(None, "No evaluation criteria matched for this sample.")
}

/// Loose truth of a hand-written flag: `false`, `null`, zero, and empty
/// strings, arrays or objects are false; everything else is true.
fn truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().is_some_and(|f| f != 0.0),
        Value::String(s) => !s.is_empty(),
        Value::Array(a) => !a.is_empty(),
        Value::Object(o) => !o.is_empty(),
    }
}

// --- Run ---

/// One entry of the run log.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunRecord {
    pub sample_index: usize,
    pub payload: Payload,
    pub expected: Option<Value>,
    pub status: String,
    pub api_output: Value,
    pub evaluation: Option<Verdict>,
}

impl RunRecord {
    fn verdict(&self) -> Option<bool> {
        self.evaluation.as_ref().and_then(|v| v.pass)
    }
}

/// Submit every sample in order. Only successful replies are scored.
pub async fn run(samples: &[Sample], transport: &dyn Transport) -> Vec<RunRecord> {
    let total = samples.len();
    let mut records = Vec::with_capacity(total);

    for (index, sample) in samples.iter().enumerate() {
        let payload = sample.payload();
        info!(sku = %payload.sku, question = %payload.question, "[{}/{}] evaluating", index + 1, total);

        let outcome = transport.submit(&payload).await;
        let evaluation = match &outcome {
            Outcome::Success(body) => {
                let expected = sample.expect.clone().unwrap_or_else(|| json!({}));
                let verdict = evaluate_sample(body, &expected);
                match verdict.pass {
                    Some(true) => info!("  -> PASS"),
                    Some(false) => info!(reason = %verdict.reason, "  -> FAIL"),
                    None => info!("  -> SKIPPED (no evaluation criteria)"),
                }
                Some(verdict)
            }
            Outcome::ApiError { status, body } => {
                warn!(status, response = %body, "  -> API error");
                None
            }
            Outcome::RequestFailed(error) => {
                warn!(%error, "  -> request failed");
                None
            }
        };

        records.push(RunRecord {
            sample_index: index,
            payload,
            expected: sample.expect.clone(),
            status: outcome.status_tag(),
            api_output: outcome.api_output(),
            evaluation,
        });
    }
    records
}

/// Overwrite `path` with the run log as a pretty JSON array.
pub fn write_results(path: &Path, records: &[RunRecord]) -> Result<(), EvalError> {
    let write_err = |source: std::io::Error| EvalError::Write {
        path: path.to_path_buf(),
        source,
    };
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent).map_err(write_err)?;
    }
    let mut text = serde_json::to_string_pretty(records).map_err(|e| write_err(e.into()))?;
    text.push('\n');
    std::fs::write(path, text).map_err(write_err)
}

// --- Summary ---

#[derive(Debug, Clone, PartialEq)]
pub struct Summary {
    pub total: usize,
    pub passed: usize,
    pub failed: usize,
    /// Samples without a verdict: no criterion matched, or the call failed.
    pub skipped: usize,
    pub rows: Vec<SummaryRow>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SummaryRow {
    pub sku: String,
    pub pass: Option<bool>,
    pub reason: String,
}

impl Summary {
    pub fn from_records(records: &[RunRecord]) -> Self {
        let passed = records.iter().filter(|r| r.verdict() == Some(true)).count();
        let failed = records.iter().filter(|r| r.verdict() == Some(false)).count();
        let rows = records
            .iter()
            .map(|r| SummaryRow {
                sku: r.payload.sku.clone(),
                pass: r.verdict(),
                reason: r
                    .evaluation
                    .as_ref()
                    .map(|v| v.reason.clone())
                    .unwrap_or_else(|| r.status.clone()),
            })
            .collect();
        Self {
            total: records.len(),
            passed,
            failed,
            skipped: records.len() - passed - failed,
            rows,
        }
    }

    pub fn evaluated(&self) -> usize {
        self.passed + self.failed
    }

    /// Percentage of evaluated samples that passed.
    pub fn accuracy(&self) -> Option<f64> {
        match self.evaluated() {
            0 => None,
            n => Some(self.passed as f64 / n as f64 * 100.0),
        }
    }
}

impl fmt::Display for Summary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.total == 0 {
            return writeln!(f, "No samples were evaluated.");
        }
        match self.accuracy() {
            Some(accuracy) => {
                writeln!(f, "Total Samples: {}", self.total)?;
                writeln!(f, "Passed: {}", self.passed)?;
                writeln!(f, "Failed: {}", self.failed)?;
                writeln!(f, "Skipped: {}", self.skipped)?;
                writeln!(f, "Accuracy (on evaluated samples): {accuracy:.2}%")?;
            }
            None => writeln!(f, "No samples were evaluated (all were skipped).")?,
        }

        writeln!(f, "\nBrief Summary:")?;
        let sku_width = self.rows.iter().map(|r| r.sku.len()).max().unwrap_or(0).max(3);
        writeln!(f, "{:>4}  {:<sku_width$}  {:<5}  reason", "", "sku", "pass")?;
        for (i, row) in self.rows.iter().enumerate() {
            let pass = match row.pass {
                Some(true) => "True",
                Some(false) => "False",
                None => "None",
            };
            writeln!(f, "{i:>4}  {:<sku_width$}  {pass:<5}  {}", row.sku, row.reason)?;
        }
        Ok(())
    }
}
