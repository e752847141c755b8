use std::net::SocketAddr;
use std::sync::{Arc, Mutex};

use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode};
use axum::routing::post;
use axum::{Json, Router};
use serde_json::{json, Value};
use sightcard_analyze::engine::{FinishReason, GenerateRequest};
use sightcard_analyze::vertex::VertexBackend;
use sightcard_analyze::{BackendError, ModelBackend, SamplingConfig};

/// One recorded call: path parameters, Authorization header, request body.
#[derive(Debug, Clone)]
struct Call {
    path: (String, String, String),
    auth: Option<String>,
    body: Value,
}

#[derive(Clone, Default)]
struct Fake {
    calls: Arc<Mutex<Vec<Call>>>,
}

async fn generate(
    State(fake): State<Fake>,
    Path(path): Path<(String, String, String)>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> (StatusCode, Json<Value>) {
    let auth = headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);
    let project = path.0.clone();
    fake.calls.lock().unwrap().push(Call { path, auth, body });

    if project == "over-quota" {
        return (
            StatusCode::TOO_MANY_REQUESTS,
            Json(json!({"error": {"code": 429, "status": "RESOURCE_EXHAUSTED"}})),
        );
    }
    (
        StatusCode::OK,
        Json(json!({
            "candidates": [{
                "content": {"role": "model", "parts": [{"text": "```json\n{\"ok\": true}\n```"}]},
                "finishReason": "STOP",
                "safetyRatings": [{"category": "HARM_CATEGORY_HARASSMENT", "probability": "NEGLIGIBLE"}]
            }],
            "usageMetadata": {"totalTokenCount": 321}
        })),
    )
}

async fn serve_vertex() -> (String, Fake) {
    let fake = Fake::default();
    let app = Router::new()
        .route(
            "/v1/projects/{project}/locations/{location}/publishers/google/models/{model_call}",
            post(generate),
        )
        .with_state(fake.clone());
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr: SocketAddr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    (format!("http://{addr}"), fake)
}

fn request() -> GenerateRequest<'static> {
    GenerateRequest {
        image_ref: "gs://specs/sku1.jpg",
        mime_type: "image/jpeg",
        prompt: "Describe the product.",
        sampling: SamplingConfig::default(),
    }
}

#[tokio::test]
async fn posts_image_and_prompt_with_bearer_token() {
    let (endpoint, fake) = serve_vertex().await;
    let backend = VertexBackend::new("proj", "us-central1", "gemini-2.5-flash", "tok-abc")
        .with_endpoint(&endpoint);

    let response = backend.generate(&request()).await.unwrap();
    assert_eq!(response.total_tokens, Some(321));
    assert_eq!(response.candidates.len(), 1);
    assert_eq!(response.candidates[0].finish_reason, FinishReason::Stop);
    assert_eq!(response.candidates[0].text, "```json\n{\"ok\": true}\n```");

    let calls = fake.calls.lock().unwrap();
    assert_eq!(calls.len(), 1);
    let call = &calls[0];
    assert_eq!(
        call.path,
        (
            "proj".to_string(),
            "us-central1".to_string(),
            "gemini-2.5-flash:generateContent".to_string()
        )
    );
    assert_eq!(call.auth.as_deref(), Some("Bearer tok-abc"));
    assert_eq!(
        call.body["contents"][0]["parts"][0]["fileData"]["fileUri"],
        json!("gs://specs/sku1.jpg")
    );
    assert_eq!(
        call.body["contents"][0]["parts"][1]["text"],
        json!("Describe the product.")
    );
    assert_eq!(call.body["generationConfig"]["maxOutputTokens"], json!(8192));
}

#[tokio::test]
async fn empty_token_sends_no_authorization() {
    let (endpoint, fake) = serve_vertex().await;
    VertexBackend::new("proj", "us-central1", "gemini-2.5-flash", "")
        .with_endpoint(&endpoint)
        .generate(&request())
        .await
        .unwrap();
    assert_eq!(fake.calls.lock().unwrap()[0].auth, None);
}

#[tokio::test]
async fn non_success_status_keeps_code_and_body() {
    let (endpoint, _fake) = serve_vertex().await;
    let err = VertexBackend::new("over-quota", "us-central1", "gemini-2.5-flash", "tok")
        .with_endpoint(&endpoint)
        .generate(&request())
        .await
        .unwrap_err();
    match err {
        BackendError::Status { status, body } => {
            assert_eq!(status, 429);
            assert!(body.contains("RESOURCE_EXHAUSTED"), "{body}");
        }
        other => panic!("unexpected error: {other:?}"),
    }
}

#[tokio::test]
async fn unreachable_host_is_a_transport_error() {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let err = VertexBackend::new("proj", "us-central1", "gemini-2.5-flash", "tok")
        .with_endpoint(format!("http://{addr}"))
        .generate(&request())
        .await
        .unwrap_err();
    assert!(matches!(err, BackendError::Transport(_)), "{err:?}");
}
