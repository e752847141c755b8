use std::sync::Arc;

use axum::extract::rejection::JsonRejection;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::{json, Value};
use tower_http::trace::TraceLayer;
use tracing::warn;

use sightcard_analyze::{AnalyzeError, Analyzer, GatewayError};
use sightcard_core::{AnalyzeRequest, AnalyzeResponse, StoreError};

#[derive(Clone)]
pub struct AppState {
    pub analyzer: Arc<Analyzer>,
}

impl AppState {
    pub fn new(analyzer: Analyzer) -> Self {
        Self {
            analyzer: Arc::new(analyzer),
        }
    }
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/", get(root))
        .route("/analyze", post(analyze))
        .route("/schema", get(schema))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Liveness check.
pub async fn root() -> Json<Value> {
    Json(json!({"message": "API running"}))
}

/// JSON Schema of a successful `/analyze` response.
pub async fn schema() -> Json<schemars::Schema> {
    Json(schemars::schema_for!(AnalyzeResponse))
}

pub async fn analyze(
    State(state): State<AppState>,
    request: Result<Json<AnalyzeRequest>, JsonRejection>,
) -> Result<Json<AnalyzeResponse>, ApiError> {
    let Json(request) = request?;
    Ok(Json(state.analyzer.analyze(&request).await?))
}

/// A failed request as seen by HTTP callers.
#[derive(Debug)]
pub enum ApiError {
    /// The body was not an `AnalyzeRequest`.
    BadRequest(JsonRejection),
    Analyze(AnalyzeError),
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        Self::BadRequest(rejection)
    }
}

impl From<AnalyzeError> for ApiError {
    fn from(err: AnalyzeError) -> Self {
        Self::Analyze(err)
    }
}

pub fn status_for(err: &AnalyzeError) -> StatusCode {
    match err {
        AnalyzeError::SkuNotFound(_) => StatusCode::NOT_FOUND,
        AnalyzeError::MissingImageReference(_) => StatusCode::UNPROCESSABLE_ENTITY,
        AnalyzeError::Store(StoreError::ContextNotFound { .. }) => StatusCode::NOT_FOUND,
        AnalyzeError::Store(StoreError::MalformedContext { .. }) => StatusCode::UNPROCESSABLE_ENTITY,
        AnalyzeError::Store(StoreError::CatalogUnavailable { .. }) => StatusCode::SERVICE_UNAVAILABLE,
        AnalyzeError::Gateway(_) | AnalyzeError::Schema(_) => StatusCode::BAD_GATEWAY,
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let err = match self {
            ApiError::BadRequest(rejection) => {
                let status = rejection.status();
                warn!(status = status.as_u16(), "rejected request body: {rejection}");
                let body = json!({
                    "error": "invalid_request",
                    "detail": rejection.body_text(),
                });
                return (status, Json(body)).into_response();
            }
            ApiError::Analyze(err) => err,
        };
        let status = status_for(&err);
        warn!(kind = err.kind(), status = status.as_u16(), "analysis failed: {err}");

        let mut body = json!({
            "error": err.kind(),
            "detail": err.to_string(),
        });
        match &err {
            AnalyzeError::Gateway(GatewayError::PrematureStop {
                reason,
                safety_ratings,
            }) => {
                body["finish_reason"] = json!(reason);
                body["safety_ratings"] = json!(safety_ratings);
            }
            AnalyzeError::Schema(violation) => {
                body["path"] = json!(violation.path);
            }
            _ => {}
        }
        (status, Json(body)).into_response()
    }
}
