use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use llm::builder::{LLMBackend, LLMBuilder};
use llm::chat::ChatMessage;
use llm::LLMProvider;
use serde::{Serialize, Serializer};

use sightcard_core::Settings;

use crate::vertex::VertexBackend;

/// Fixed sampling for every analysis call.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SamplingConfig {
    pub temperature: f32,
    pub top_p: f32,
    pub top_k: u32,
    pub max_output_tokens: u32,
}

impl Default for SamplingConfig {
    fn default() -> Self {
        Self {
            temperature: 0.1,
            top_p: 0.95,
            top_k: 32,
            max_output_tokens: 8192,
        }
    }
}

#[derive(Debug, Clone)]
pub struct GenerateRequest<'a> {
    pub image_ref: &'a str,
    pub mime_type: &'a str,
    pub prompt: &'a str,
    pub sampling: SamplingConfig,
}

#[derive(Debug, Clone, Default)]
pub struct GenerateResponse {
    pub candidates: Vec<Candidate>,
    pub total_tokens: Option<u64>,
}

#[derive(Debug, Clone)]
pub struct Candidate {
    pub text: String,
    pub finish_reason: FinishReason,
    pub safety_ratings: Vec<SafetyRating>,
}

/// Why the model stopped producing a candidate. Only `Stop` is a normal end.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FinishReason {
    Stop,
    MaxTokens,
    Safety,
    Recitation,
    Blocklist,
    ProhibitedContent,
    Spii,
    Unspecified,
    Other(String),
}

impl FinishReason {
    pub fn parse(s: &str) -> Self {
        match s {
            "STOP" => Self::Stop,
            "MAX_TOKENS" => Self::MaxTokens,
            "SAFETY" => Self::Safety,
            "RECITATION" => Self::Recitation,
            "BLOCKLIST" => Self::Blocklist,
            "PROHIBITED_CONTENT" => Self::ProhibitedContent,
            "SPII" => Self::Spii,
            "" | "FINISH_REASON_UNSPECIFIED" => Self::Unspecified,
            other => Self::Other(other.to_string()),
        }
    }

    /// Stops caused by content policy rather than length or format.
    pub fn is_policy_block(&self) -> bool {
        matches!(
            self,
            Self::Safety | Self::Recitation | Self::Blocklist | Self::ProhibitedContent | Self::Spii
        )
    }
}

impl fmt::Display for FinishReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Stop => "STOP",
            Self::MaxTokens => "MAX_TOKENS",
            Self::Safety => "SAFETY",
            Self::Recitation => "RECITATION",
            Self::Blocklist => "BLOCKLIST",
            Self::ProhibitedContent => "PROHIBITED_CONTENT",
            Self::Spii => "SPII",
            Self::Unspecified => "FINISH_REASON_UNSPECIFIED",
            Self::Other(s) => s.as_str(),
        })
    }
}

impl Serialize for FinishReason {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SafetyRating {
    pub category: String,
    pub probability: String,
    pub blocked: bool,
}

#[derive(Debug, thiserror::Error)]
pub enum BackendError {
    #[error("unknown provider: {0}")]
    UnknownProvider(String),
    #[error("build LLM: {0}")]
    Build(String),
    #[error("request failed: {0}")]
    Transport(String),
    #[error("backend returned HTTP {status}: {body}")]
    Status { status: u16, body: String },
    #[error("decode backend response: {0}")]
    Decode(String),
}

/// A generative vision-language model: prompt plus image reference in,
/// candidates out. One handle serves all requests concurrently.
#[async_trait]
pub trait ModelBackend: Send + Sync {
    async fn generate(&self, request: &GenerateRequest<'_>) -> Result<GenerateResponse, BackendError>;
}

/// Pick the backend named by `settings.provider` and build its client.
///
/// Called once at startup; the returned handle is shared by every request.
pub fn backend_from_settings(settings: &Settings) -> Result<Arc<dyn ModelBackend>, BackendError> {
    if settings.provider == "vertex" {
        return Ok(Arc::new(VertexBackend::from_settings(settings)));
    }
    Ok(Arc::new(LlmBackend::build(settings, SamplingConfig::default())?))
}

fn map_backend(provider: &str) -> Result<LLMBackend, BackendError> {
    match provider {
        "openai" => Ok(LLMBackend::OpenAI),
        "anthropic" => Ok(LLMBackend::Anthropic),
        "google" => Ok(LLMBackend::Google),
        "ollama" => Ok(LLMBackend::Ollama),
        "groq" => Ok(LLMBackend::Groq),
        "mistral" => Ok(LLMBackend::Mistral),
        "deepseek" => Ok(LLMBackend::DeepSeek),
        other => Err(BackendError::UnknownProvider(other.to_string())),
    }
}

/// Chat providers reached through the `llm` crate.
///
/// Sampling is fixed when the client is built. The image goes over as a URL,
/// so it must be fetchable by the provider. These providers do not report a
/// finish reason here: any reply counts as a normal stop, and no reply means
/// no candidates.
pub struct LlmBackend {
    llm: Box<dyn LLMProvider>,
}

impl LlmBackend {
    pub fn build(settings: &Settings, sampling: SamplingConfig) -> Result<Self, BackendError> {
        let mut builder = LLMBuilder::new()
            .backend(map_backend(&settings.provider)?)
            .model(&settings.model)
            .temperature(sampling.temperature)
            .top_p(sampling.top_p)
            .top_k(sampling.top_k)
            .max_tokens(sampling.max_output_tokens);

        if !settings.api_key.is_empty() {
            builder = builder.api_key(&settings.api_key);
        }

        let llm = builder.build().map_err(|e| BackendError::Build(e.to_string()))?;
        Ok(Self { llm })
    }
}

#[async_trait]
impl ModelBackend for LlmBackend {
    async fn generate(&self, request: &GenerateRequest<'_>) -> Result<GenerateResponse, BackendError> {
        let messages = vec![
            ChatMessage::user().image_url(request.image_ref).build(),
            ChatMessage::user().content(request.prompt).build(),
        ];

        let response = self
            .llm
            .chat(&messages)
            .await
            .map_err(|e| BackendError::Transport(format!("chat: {e}")))?;

        let candidates = response
            .text()
            .map(|text| Candidate {
                text,
                finish_reason: FinishReason::Stop,
                safety_ratings: Vec::new(),
            })
            .into_iter()
            .collect();

        Ok(GenerateResponse {
            candidates,
            total_tokens: None,
        })
    }
}
