use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::debug;

use sightcard_core::Settings;

use crate::engine::{
    BackendError, Candidate, FinishReason, GenerateRequest, GenerateResponse, ModelBackend,
    SafetyRating,
};

/// Vertex AI `generateContent`, called over REST with a bearer token.
#[derive(Debug, Clone)]
pub struct VertexBackend {
    client: reqwest::Client,
    endpoint: String,
    project_id: String,
    location: String,
    model: String,
    access_token: String,
}

impl VertexBackend {
    pub fn new(
        project_id: impl Into<String>,
        location: impl Into<String>,
        model: impl Into<String>,
        access_token: impl Into<String>,
    ) -> Self {
        let location = location.into();
        Self {
            client: reqwest::Client::new(),
            endpoint: format!("https://{location}-aiplatform.googleapis.com"),
            project_id: project_id.into(),
            location,
            model: model.into(),
            access_token: access_token.into(),
        }
    }

    pub fn from_settings(settings: &Settings) -> Self {
        Self::new(
            &settings.project_id,
            &settings.location,
            &settings.model,
            &settings.access_token,
        )
    }

    /// Point at a different API host (regional proxies, test servers).
    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into();
        self
    }

    pub fn url(&self) -> String {
        format!(
            "{}/v1/projects/{}/locations/{}/publishers/google/models/{}:generateContent",
            self.endpoint.trim_end_matches('/'),
            self.project_id,
            self.location,
            self.model
        )
    }
}

#[async_trait]
impl ModelBackend for VertexBackend {
    async fn generate(&self, request: &GenerateRequest<'_>) -> Result<GenerateResponse, BackendError> {
        let body = GenerateContentRequest::from(request);

        let mut call = self.client.post(self.url()).json(&body);
        if !self.access_token.is_empty() {
            call = call.bearer_auth(&self.access_token);
        }
        let response = call
            .send()
            .await
            .map_err(|e| BackendError::Transport(e.to_string()))?;

        let status = response.status();
        let text = response
            .text()
            .await
            .map_err(|e| BackendError::Transport(e.to_string()))?;
        if !status.is_success() {
            return Err(BackendError::Status {
                status: status.as_u16(),
                body: text,
            });
        }
        debug!(bytes = text.len(), "vertex response received");

        let decoded: GenerateContentResponse =
            serde_json::from_str(&text).map_err(|e| BackendError::Decode(e.to_string()))?;
        Ok(decoded.into())
    }
}

// --- Wire types ---

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerateContentRequest<'a> {
    contents: Vec<Content<'a>>,
    generation_config: GenerationConfig,
}

#[derive(Debug, Serialize)]
struct Content<'a> {
    role: &'a str,
    parts: Vec<Part<'a>>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
enum Part<'a> {
    FileData(FileData<'a>),
    Text(&'a str),
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct FileData<'a> {
    mime_type: &'a str,
    file_uri: &'a str,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerationConfig {
    temperature: f32,
    top_p: f32,
    top_k: u32,
    max_output_tokens: u32,
}

impl<'a> From<&GenerateRequest<'a>> for GenerateContentRequest<'a> {
    fn from(request: &GenerateRequest<'a>) -> Self {
        Self {
            contents: vec![Content {
                role: "user",
                parts: vec![
                    Part::FileData(FileData {
                        mime_type: request.mime_type,
                        file_uri: request.image_ref,
                    }),
                    Part::Text(request.prompt),
                ],
            }],
            generation_config: GenerationConfig {
                temperature: request.sampling.temperature,
                top_p: request.sampling.top_p,
                top_k: request.sampling.top_k,
                max_output_tokens: request.sampling.max_output_tokens,
            },
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GenerateContentResponse {
    #[serde(default)]
    candidates: Vec<WireCandidate>,
    #[serde(default)]
    usage_metadata: Option<UsageMetadata>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireCandidate {
    #[serde(default)]
    content: Option<WireContent>,
    #[serde(default)]
    finish_reason: Option<String>,
    #[serde(default)]
    safety_ratings: Vec<WireSafetyRating>,
}

#[derive(Debug, Deserialize)]
struct WireContent {
    #[serde(default)]
    parts: Vec<WirePart>,
}

#[derive(Debug, Deserialize)]
struct WirePart {
    #[serde(default)]
    text: Option<String>,
}

#[derive(Debug, Deserialize)]
struct WireSafetyRating {
    #[serde(default)]
    category: Option<String>,
    #[serde(default)]
    probability: Option<String>,
    #[serde(default)]
    blocked: bool,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct UsageMetadata {
    #[serde(default)]
    total_token_count: Option<u64>,
}

impl From<GenerateContentResponse> for GenerateResponse {
    fn from(wire: GenerateContentResponse) -> Self {
        let candidates = wire
            .candidates
            .into_iter()
            .map(|c| Candidate {
                // A candidate's text is all of its text parts, in order.
                text: c
                    .content
                    .map(|content| {
                        content
                            .parts
                            .into_iter()
                            .filter_map(|p| p.text)
                            .collect::<String>()
                    })
                    .unwrap_or_default(),
                finish_reason: FinishReason::parse(c.finish_reason.as_deref().unwrap_or_default()),
                safety_ratings: c
                    .safety_ratings
                    .into_iter()
                    .map(|r| SafetyRating {
                        category: r.category.unwrap_or_default(),
                        probability: r.probability.unwrap_or_default(),
                        blocked: r.blocked,
                    })
                    .collect(),
            })
            .collect();

        Self {
            candidates,
            total_tokens: wire.usage_metadata.and_then(|u| u.total_token_count),
        }
    }
}
