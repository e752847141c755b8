pub mod compose;
pub mod error;
pub mod rules;
pub mod store;

pub use compose::compose;
pub use error::{SettingsError, StoreError};
pub use store::{FsStore, GcsStore, SpecStore};

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

// --- Catalog and context documents ---

/// One catalog row: attribute name to scalar value for a single SKU.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ProductSpec(pub BTreeMap<String, Value>);

impl ProductSpec {
    pub fn get(&self, attribute: &str) -> Option<&Value> {
        self.0.get(attribute)
    }

    /// The product image pointer, if the row carries a usable one.
    pub fn image_ref(&self) -> Option<&str> {
        self.0
            .get(rules::IMAGE_REF_FIELD)
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|uri| !uri.is_empty())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &Value)> {
        self.0.iter()
    }
}

impl FromIterator<(String, Value)> for ProductSpec {
    fn from_iter<I: IntoIterator<Item = (String, Value)>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

/// SKU to spec row.
pub type Catalog = BTreeMap<String, ProductSpec>;

/// A rule exactly as written in a context document. Nothing is required and
/// no field is type-checked: values pass through to the card as written.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DocumentRule {
    #[serde(default)]
    pub id: Value,
    #[serde(default)]
    pub text: Value,
    /// `None` only when the key is absent.
    #[serde(
        default,
        deserialize_with = "present_field",
        skip_serializing_if = "Option::is_none"
    )]
    pub mandatory: Option<Value>,
}

/// A named source of rules and brand voice, fetched by context ID.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ContextDocument {
    /// `None` when the document has no `brand_voice` key at all,
    /// `Some(Value::Null)` when the key is present but null.
    #[serde(
        default,
        deserialize_with = "present_field",
        skip_serializing_if = "Option::is_none"
    )]
    pub brand_voice: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rules: Option<Vec<DocumentRule>>,
}

impl ContextDocument {
    pub fn rules(&self) -> &[DocumentRule] {
        self.rules.as_deref().unwrap_or_default()
    }
}

/// Keeps a present-but-null key distinguishable from a missing one.
fn present_field<'de, D>(deserializer: D) -> Result<Option<Value>, D::Error>
where
    D: Deserializer<'de>,
{
    Value::deserialize(deserializer).map(Some)
}

// --- Context card ---

/// A rule as carried on the context card. `id` and `text` pass through
/// unchanged from the document, including when they are missing or oddly typed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Rule {
    pub id: Value,
    pub text: Value,
    pub mandatory: Value,
}

/// The bounded grounding document handed to the model for one request.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ContextCard {
    pub product_attributes: BTreeMap<String, Value>,
    pub rules: Vec<Rule>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub brand_voice: Option<Value>,
}

impl ContextCard {
    /// Canonical text form embedded in prompts.
    pub fn to_canonical_json(&self) -> String {
        // A card is plain maps, strings and scalars; serialization cannot fail.
        serde_json::to_string_pretty(self).unwrap_or_default()
    }

    /// IDs of card rules whose `id` is a string.
    pub fn rule_ids(&self) -> impl Iterator<Item = &str> {
        self.rules.iter().filter_map(|r| r.id.as_str())
    }
}

// --- Request / response ---

#[derive(Debug, Clone, Serialize, Deserialize, schemars::JsonSchema)]
pub struct AnalyzeRequest {
    /// SKU of the product to analyze.
    pub sku: String,
    /// Optional user question about the image.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub question: Option<String>,
    /// Context document IDs, applied in order (e.g. "brand_rules_v1").
    pub context_ids: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Map<String, Value>>,
}

impl AnalyzeRequest {
    pub fn question(&self) -> &str {
        self.question
            .as_deref()
            .filter(|q| !q.is_empty())
            .unwrap_or(rules::DEFAULT_QUESTION)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, schemars::JsonSchema)]
pub struct AnalyzeResponse {
    pub answer: String,
    pub grounding: Grounding,
    pub structured: Structured,
    pub diagnostics: Diagnostics,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, schemars::JsonSchema)]
pub struct Grounding {
    /// Rule IDs or spec fields that support the answer.
    pub citations: Vec<String>,
    /// Descriptions of visual evidence from the image.
    pub visual_refs: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, schemars::JsonSchema)]
pub struct Structured {
    pub attributes: BTreeMap<String, Attribute>,
    pub compliance: BTreeMap<String, ComplianceEntry>,
}

impl Structured {
    /// Compliance entries that carry the usual `pass`/`reason` shape.
    pub fn compliance_results(&self) -> Vec<ComplianceResult> {
        self.compliance
            .iter()
            .filter_map(|(rule_id, entry)| entry.to_result(rule_id))
            .collect()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, schemars::JsonSchema)]
pub struct Attribute {
    pub value: String,
    pub source: AttributeSource,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, schemars::JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum AttributeSource {
    Image,
    Spec,
}

impl AttributeSource {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "image" => Some(Self::Image),
            "spec" => Some(Self::Spec),
            _ => None,
        }
    }
}

/// Open-ended compliance entry. Only its presence as a mapping is enforced.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, schemars::JsonSchema)]
#[serde(transparent)]
pub struct ComplianceEntry(pub Map<String, Value>);

impl ComplianceEntry {
    pub fn passed(&self) -> Option<bool> {
        self.0.get("pass").and_then(Value::as_bool)
    }

    pub fn reason(&self) -> Option<&str> {
        self.0.get("reason").and_then(Value::as_str)
    }

    pub fn to_result(&self, rule_id: &str) -> Option<ComplianceResult> {
        Some(ComplianceResult {
            rule_id: rule_id.to_string(),
            pass: self.passed()?,
            reason: self.reason().unwrap_or_default().to_string(),
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComplianceResult {
    pub rule_id: String,
    pub pass: bool,
    pub reason: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, schemars::JsonSchema)]
pub struct Diagnostics {
    /// Total processing time in seconds.
    pub latency: f64,
    /// Name of the model used for inference.
    pub model: String,
    pub tokens: u64,
}

// --- Settings ---

pub const DEFAULT_PROVIDER: &str = "vertex";
pub const DEFAULT_MODEL: &str = "gemini-2.5-flash";
pub const DEFAULT_PROJECT_ID: &str = "alara-case-study";
pub const DEFAULT_LOCATION: &str = "us-central1";
pub const DEFAULT_BUCKET: &str = "alara-case-study-bucket";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct Settings {
    pub provider: String,
    pub model: String,
    pub api_key: String,
    pub access_token: String,
    pub project_id: String,
    pub location: String,
    pub bucket: String,
    /// Read specs and contexts from this directory instead of the bucket.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data_dir: Option<PathBuf>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            provider: DEFAULT_PROVIDER.to_string(),
            model: DEFAULT_MODEL.to_string(),
            api_key: String::new(),
            access_token: String::new(),
            project_id: DEFAULT_PROJECT_ID.to_string(),
            location: DEFAULT_LOCATION.to_string(),
            bucket: DEFAULT_BUCKET.to_string(),
            data_dir: None,
        }
    }
}

impl Settings {
    /// Read settings from a JSON file. Missing keys take their defaults.
    pub fn read(path: &Path) -> Result<Self, SettingsError> {
        let raw = fs::read_to_string(path).map_err(|source| SettingsError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        serde_json::from_str(&raw).map_err(|source| SettingsError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    pub fn ai_configured(&self) -> bool {
        if self.provider.is_empty() || self.model.is_empty() {
            return false;
        }
        match self.provider.as_str() {
            // Vertex authenticates with a bearer token; ollama runs locally.
            "vertex" => !self.project_id.is_empty() && !self.access_token.is_empty(),
            "ollama" => true,
            _ => !self.api_key.is_empty(),
        }
    }
}
