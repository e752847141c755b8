use std::collections::VecDeque;
use std::sync::Mutex;

use async_trait::async_trait;
use serde_json::{json, Value};

use sightcard_eval::{
    load_samples, parse_samples, run, write_results, EvalError, Outcome, Payload, RunRecord,
    Summary, Transport,
};

/// Hands out canned outcomes in order and keeps the payloads it saw.
struct FakeTransport {
    outcomes: Mutex<VecDeque<Outcome>>,
    seen: Mutex<Vec<Payload>>,
}

impl FakeTransport {
    fn new(outcomes: Vec<Outcome>) -> Self {
        Self {
            outcomes: Mutex::new(outcomes.into()),
            seen: Mutex::new(Vec::new()),
        }
    }
}

#[async_trait]
impl Transport for FakeTransport {
    async fn submit(&self, payload: &Payload) -> Outcome {
        self.seen.lock().unwrap().push(payload.clone());
        self.outcomes
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Outcome::RequestFailed("no outcome scripted".into()))
    }
}

const SAMPLES: &str = r#"{"question": "Is it waterproof?", "context_ids": ["spec_catalog", "rules_v1"], "metadata": {"sku": "SKU1"}, "expect": {"forbid_claim_rule": "R-203"}}
{"question": "What color is the outsole?", "context_ids": ["rules_v1"], "metadata": {"sku": "SKU2"}, "expect": {"allow_insufficient": true}}
{"question": "Describe it.", "context_ids": [], "metadata": {"sku": "SKU3"}, "expect": {}}
{"question": "Any claims?", "context_ids": ["rules_v1"], "metadata": {"sku": "SKU4"}, "expect": {"forbid_claim_rule": "R-203"}}
"#;

fn outcomes() -> Vec<Outcome> {
    vec![
        Outcome::Success(json!({
            "answer": "Not certified.",
            "structured": {"compliance": {"R-203": {"pass": false, "reason": "no cert"}}}
        })),
        Outcome::Success(json!({"answer": "The outsole is not visible."})),
        Outcome::Success(json!({"answer": "A black runner."})),
        Outcome::ApiError {
            status: 502,
            body: r#"{"error":"schema_violation"}"#.into(),
        },
    ]
}

#[tokio::test]
async fn run_scores_successes_and_records_errors() {
    let samples = parse_samples(SAMPLES).unwrap();
    let transport = FakeTransport::new(outcomes());

    let records = run(&samples, &transport).await;

    let seen = transport.seen.lock().unwrap().clone();
    assert_eq!(seen[0].context_ids, vec!["rules_v1"]);
    assert_eq!(seen.len(), 4);

    let statuses: Vec<&str> = records.iter().map(|r| r.status.as_str()).collect();
    assert_eq!(statuses, ["SUCCESS", "SUCCESS", "SUCCESS", "API_ERROR_502"]);
    assert_eq!(records[0].evaluation.as_ref().unwrap().pass, Some(true));
    assert_eq!(records[1].evaluation.as_ref().unwrap().pass, Some(true));
    assert_eq!(records[2].evaluation.as_ref().unwrap().pass, None);
    assert!(records[3].evaluation.is_none());
    assert_eq!(records[3].api_output, json!(r#"{"error":"schema_violation"}"#));

    let summary = Summary::from_records(&records);
    assert_eq!((summary.total, summary.passed, summary.failed, summary.skipped), (4, 2, 0, 2));
    assert_eq!(summary.accuracy(), Some(100.0));
    assert_eq!(summary.rows[3].reason, "API_ERROR_502");

    let printed = summary.to_string();
    assert!(printed.contains("Accuracy (on evaluated samples): 100.00%"));
    assert!(printed.contains("SKU4"));
}

#[tokio::test]
async fn results_file_is_overwritten_with_a_json_array() {
    let dir = tempfile::tempdir().unwrap();
    let out = dir.path().join("evaluation_results/latest_run.json");

    let samples = parse_samples(SAMPLES).unwrap();
    let records = run(&samples, &FakeTransport::new(outcomes())).await;
    write_results(&out, &records).unwrap();
    write_results(&out, &records[..1]).unwrap();

    let written: Value = serde_json::from_str(&std::fs::read_to_string(&out).unwrap()).unwrap();
    let entries = written.as_array().unwrap();
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0]["sample_index"], 0);
    assert_eq!(entries[0]["payload"]["sku"], "SKU1");
    assert_eq!(entries[0]["expected"], json!({"forbid_claim_rule": "R-203"}));
    assert_eq!(entries[0]["evaluation"]["pass"], true);

    let back: Vec<RunRecord> = serde_json::from_value(written).unwrap();
    assert_eq!(back[0].status, "SUCCESS");
}

#[tokio::test]
async fn request_failures_are_not_scored() {
    let samples = parse_samples(SAMPLES).unwrap();
    let records = run(&samples[..1], &FakeTransport::new(vec![Outcome::RequestFailed("connection refused".into())])).await;
    assert_eq!(records[0].status, "REQUEST_EXCEPTION");
    assert_eq!(records[0].api_output, json!("connection refused"));

    let summary = Summary::from_records(&records);
    assert_eq!(summary.accuracy(), None);
    assert!(summary.to_string().contains("all were skipped"));
}

#[tokio::test]
async fn missing_eval_file_is_fatal() {
    let dir = tempfile::tempdir().unwrap();
    let err = load_samples(&dir.path().join("absent.jsonl")).await.unwrap_err();
    assert!(matches!(err, EvalError::MissingEvalFile(_)));
}
