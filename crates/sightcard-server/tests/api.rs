use std::fs;
use std::sync::Arc;

use async_trait::async_trait;
use axum::body::to_bytes;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use serde_json::{json, Value};
use tempfile::TempDir;

use sightcard_analyze::engine::{
    BackendError, Candidate, FinishReason, GenerateRequest, GenerateResponse, ModelBackend,
    SafetyRating,
};
use sightcard_analyze::{Analyzer, ModelGateway};
use sightcard_core::{AnalyzeRequest, FsStore};
use sightcard_server::api::{self, AppState};

struct FixedBackend(GenerateResponse);

#[async_trait]
impl ModelBackend for FixedBackend {
    async fn generate(&self, _request: &GenerateRequest<'_>) -> Result<GenerateResponse, BackendError> {
        Ok(self.0.clone())
    }
}

fn reply(text: &str, finish_reason: FinishReason) -> GenerateResponse {
    GenerateResponse {
        candidates: vec![Candidate {
            text: text.to_string(),
            finish_reason,
            safety_ratings: vec![SafetyRating {
                category: "HARM_CATEGORY_DANGEROUS_CONTENT".into(),
                probability: "NEGLIGIBLE".into(),
                blocked: false,
            }],
        }],
        total_tokens: Some(640),
    }
}

fn state(dir: &TempDir, backend: GenerateResponse) -> AppState {
    let gateway = ModelGateway::new(Arc::new(FixedBackend(backend)), "gemini-2.5-flash");
    AppState::new(Analyzer::new(Arc::new(FsStore::new(dir.path())), gateway))
}

fn data_dir() -> TempDir {
    let dir = tempfile::tempdir().unwrap();
    fs::write(
        dir.path().join("spec_catalog.csv"),
        "sku,color,image_gcs_uri\nSKU1,black,gs://bucket/sku1.jpg\nSKU2,white,\n",
    )
    .unwrap();
    fs::create_dir(dir.path().join("context")).unwrap();
    fs::write(
        dir.path().join("context/rules_v1.json"),
        json!({"rules": [{"id": "R-203", "text": "No waterproof claims.", "mandatory": true}]}).to_string(),
    )
    .unwrap();
    dir
}

fn request(sku: &str, context_ids: &[&str]) -> AnalyzeRequest {
    AnalyzeRequest {
        sku: sku.to_string(),
        question: Some("Is it waterproof?".to_string()),
        context_ids: context_ids.iter().map(|s| s.to_string()).collect(),
        metadata: None,
    }
}

const GOOD_REPLY: &str = r#"```json
{
  "answer": "It cannot be called waterproof.",
  "grounding": {"citations": ["R-203"], "visual_refs": ["Mesh upper."]},
  "structured": {
    "attributes": {"color": {"value": "black", "source": "image"}},
    "compliance": {"R-203": {"pass": false, "reason": "No certification."}}
  }
}
```"#;

async fn error_body(state: AppState, req: AnalyzeRequest) -> (StatusCode, Value) {
    let err = api::analyze(State(state), Ok(Json(req)))
        .await
        .err()
        .expect("request should fail");
    let response = err.into_response();
    let status = response.status();
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    (status, serde_json::from_slice(&bytes).unwrap())
}

#[tokio::test]
async fn root_reports_running() {
    let Json(body) = api::root().await;
    assert_eq!(body, json!({"message": "API running"}));
}

#[tokio::test]
async fn analyze_returns_validated_response() {
    let dir = data_dir();
    let state = state(&dir, reply(GOOD_REPLY, FinishReason::Stop));

    let Json(response) = api::analyze(State(state), Ok(Json(request("SKU1", &["rules_v1"]))))
        .await
        .unwrap();
    assert_eq!(response.diagnostics.model, "gemini-2.5-flash");
    assert_eq!(response.diagnostics.tokens, 640);
    assert_eq!(response.structured.compliance["R-203"].passed(), Some(false));
}

#[tokio::test]
async fn unknown_sku_is_not_found() {
    let dir = data_dir();
    let (status, body) = error_body(state(&dir, reply(GOOD_REPLY, FinishReason::Stop)), request("NOPE", &[])).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error"], "sku_not_found");
    assert!(body["detail"].as_str().unwrap().contains("NOPE"));
}

#[tokio::test]
async fn missing_image_is_unprocessable() {
    let dir = data_dir();
    let (status, body) = error_body(state(&dir, reply(GOOD_REPLY, FinishReason::Stop)), request("SKU2", &[])).await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(body["error"], "missing_image_reference");
}

#[tokio::test]
async fn missing_context_is_not_found() {
    let dir = data_dir();
    let (status, body) = error_body(
        state(&dir, reply(GOOD_REPLY, FinishReason::Stop)),
        request("SKU1", &["rules_v9"]),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error"], "context_not_found");
}

#[tokio::test]
async fn safety_stop_is_bad_gateway_with_ratings() {
    let dir = data_dir();
    let (status, body) = error_body(state(&dir, reply("", FinishReason::Safety)), request("SKU1", &[])).await;
    assert_eq!(status, StatusCode::BAD_GATEWAY);
    assert_eq!(body["error"], "premature_stop");
    assert_eq!(body["finish_reason"], "SAFETY");
    assert_eq!(body["safety_ratings"][0]["probability"], "NEGLIGIBLE");
}

#[tokio::test]
async fn schema_violation_reports_path() {
    let dir = data_dir();
    let (status, body) = error_body(
        state(&dir, reply(r#"{"answer": "ok"}"#, FinishReason::Stop)),
        request("SKU1", &[]),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_GATEWAY);
    assert_eq!(body["error"], "schema_violation");
    assert_eq!(body["path"], "grounding");
}

#[tokio::test]
async fn schema_endpoint_describes_response() {
    let Json(schema) = api::schema().await;
    let schema = serde_json::to_value(schema).unwrap();
    assert!(schema["properties"]["diagnostics"].is_object());
}
