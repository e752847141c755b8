use std::sync::Arc;

use serde_json::{Map, Value};
use tracing::{debug, info, warn};

use crate::engine::{
    BackendError, FinishReason, GenerateRequest, ModelBackend, SafetyRating, SamplingConfig,
};
use crate::parse::{self, Extraction, JsonSource};

pub const IMAGE_MIME_TYPE: &str = "image/jpeg";

#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    #[error("no candidates returned from model")]
    EmptyResponse,

    #[error("model generation stopped prematurely (finish reason {reason})")]
    PrematureStop {
        reason: FinishReason,
        safety_ratings: Vec<SafetyRating>,
    },

    #[error("model returned an empty text response")]
    EmptyText,

    #[error("failed to parse model response from {via}: {error}")]
    MalformedJson {
        via: JsonSource,
        error: String,
        raw_text: String,
    },

    #[error(transparent)]
    Backend(#[from] BackendError),
}

/// Parsed model reply, not yet checked against the response schema.
#[derive(Debug, Clone)]
pub struct RawModelOutput {
    /// The reply object with `diagnostics` reset to `{model}`.
    pub document: Map<String, Value>,
    pub source: JsonSource,
    /// Token count reported by the backend, if any.
    pub total_tokens: Option<u64>,
}

/// Long-lived handle over one model backend and one model identifier.
#[derive(Clone)]
pub struct ModelGateway {
    backend: Arc<dyn ModelBackend>,
    model: String,
    sampling: SamplingConfig,
}

impl ModelGateway {
    pub fn new(backend: Arc<dyn ModelBackend>, model: impl Into<String>) -> Self {
        Self {
            backend,
            model: model.into(),
            sampling: SamplingConfig::default(),
        }
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    /// One non-streaming model call, then best-effort JSON extraction.
    pub async fn invoke(&self, image_ref: &str, prompt: &str) -> Result<RawModelOutput, GatewayError> {
        info!(model = %self.model, image = %image_ref, "querying model");

        let response = self
            .backend
            .generate(&GenerateRequest {
                image_ref,
                mime_type: IMAGE_MIME_TYPE,
                prompt,
                sampling: self.sampling,
            })
            .await?;
        let total_tokens = response.total_tokens;

        let candidate = response
            .candidates
            .into_iter()
            .next()
            .ok_or(GatewayError::EmptyResponse)?;

        if candidate.finish_reason != FinishReason::Stop {
            warn!(
                reason = %candidate.finish_reason,
                policy_block = candidate.finish_reason.is_policy_block(),
                "model generation stopped prematurely"
            );
            return Err(GatewayError::PrematureStop {
                reason: candidate.finish_reason,
                safety_ratings: candidate.safety_ratings,
            });
        }

        let raw_text = candidate.text;
        debug!("raw model output:\n{raw_text}");
        if raw_text.trim().is_empty() {
            return Err(GatewayError::EmptyText);
        }

        let (source, value) = match parse::extract_json(&raw_text) {
            Extraction::Fenced(value) => (JsonSource::Fence, value),
            Extraction::Raw(value) => (JsonSource::RawText, value),
            Extraction::NotFound { attempted, error } => {
                return Err(GatewayError::MalformedJson {
                    via: attempted,
                    error,
                    raw_text,
                })
            }
        };

        let Value::Object(mut document) = value else {
            return Err(GatewayError::MalformedJson {
                via: source,
                error: "expected a JSON object".to_string(),
                raw_text,
            });
        };

        set_model(&mut document, &self.model);

        Ok(RawModelOutput {
            document,
            source,
            total_tokens,
        })
    }
}

/// Replace whatever `diagnostics` the model wrote with `{model}`.
/// Token counts come only from the backend, never from the reply text.
fn set_model(document: &mut Map<String, Value>, model: &str) {
    let mut diagnostics = Map::new();
    diagnostics.insert("model".to_string(), Value::String(model.to_string()));
    document.insert("diagnostics".to_string(), Value::Object(diagnostics));
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn model_written_diagnostics_are_discarded() {
        let mut doc = json!({"answer": "ok", "diagnostics": {"tokens": 99999, "latency": 7}})
            .as_object()
            .cloned()
            .unwrap();
        set_model(&mut doc, "gemini-2.5-flash");
        assert_eq!(doc["diagnostics"], json!({"model": "gemini-2.5-flash"}));
        assert_eq!(doc["answer"], json!("ok"));
    }

    #[test]
    fn non_object_diagnostics_are_replaced() {
        let mut doc = json!({"diagnostics": "n/a"}).as_object().cloned().unwrap();
        set_model(&mut doc, "m");
        assert_eq!(doc["diagnostics"], json!({"model": "m"}));
    }
}
