use std::collections::BTreeMap;

use serde_json::{Map, Value};

use sightcard_core::rules::ATTRIBUTE_SOURCES;
use sightcard_core::{
    AnalyzeResponse, Attribute, AttributeSource, ComplianceEntry, Diagnostics, Grounding,
    Structured,
};

/// Model output that does not fit the response schema.
#[derive(Debug, Clone, thiserror::Error)]
#[error("model returned an invalid data format at `{path}`: {message}")]
pub struct SchemaViolation {
    pub path: String,
    pub message: String,
    /// The mapping as it stood when validation ran, diagnostics included.
    pub raw: Value,
}

type Check<T> = Result<T, (String, String)>;

/// Attach request diagnostics to a raw model reply and check it against the
/// response schema. Nothing is defaulted except `diagnostics.tokens`.
pub fn validate(mut raw: Map<String, Value>, latency_secs: f64) -> Result<AnalyzeResponse, SchemaViolation> {
    inject_diagnostics(&mut raw, latency_secs);
    let raw = Value::Object(raw);
    match response(&raw) {
        Ok(parsed) => Ok(parsed),
        Err((path, message)) => Err(SchemaViolation { path, message, raw }),
    }
}

fn inject_diagnostics(raw: &mut Map<String, Value>, latency_secs: f64) {
    let diagnostics = raw
        .entry("diagnostics")
        .or_insert_with(|| Value::Object(Map::new()));
    // A non-object here is left alone and reported by the schema check.
    if let Value::Object(d) = diagnostics {
        d.insert("latency".to_string(), Value::from(round2(latency_secs)));
        d.entry("tokens").or_insert(Value::from(0u64));
    }
}

fn round2(secs: f64) -> f64 {
    (secs * 100.0).round() / 100.0
}

fn response(raw: &Value) -> Check<AnalyzeResponse> {
    let root = object(raw, "")?;
    Ok(AnalyzeResponse {
        answer: string(field(root, "", "answer")?)?,
        grounding: grounding(field(root, "", "grounding")?)?,
        structured: structured(field(root, "", "structured")?)?,
        diagnostics: diagnostics(field(root, "", "diagnostics")?)?,
    })
}

fn grounding((value, path): (&Value, String)) -> Check<Grounding> {
    let obj = object(value, &path)?;
    Ok(Grounding {
        citations: string_list(field(obj, &path, "citations")?)?,
        visual_refs: string_list(field(obj, &path, "visual_refs")?)?,
    })
}

fn structured((value, path): (&Value, String)) -> Check<Structured> {
    let obj = object(value, &path)?;

    let (attrs_value, attrs_path) = field(obj, &path, "attributes")?;
    let mut attributes = BTreeMap::new();
    for (name, entry) in object(attrs_value, &attrs_path)? {
        let entry_path = join(&attrs_path, name);
        let entry_obj = object(entry, &entry_path)?;
        let value = string(field(entry_obj, &entry_path, "value")?)?;
        let (source_value, source_path) = field(entry_obj, &entry_path, "source")?;
        let source_text = string((source_value, source_path.clone()))?;
        let source = AttributeSource::parse(&source_text).ok_or_else(|| {
            (
                source_path,
                format!(
                    "expected one of {}, got {source_text:?}",
                    ATTRIBUTE_SOURCES.join(", ")
                ),
            )
        })?;
        attributes.insert(name.clone(), Attribute { value, source });
    }

    let (compliance_value, compliance_path) = field(obj, &path, "compliance")?;
    let mut compliance = BTreeMap::new();
    for (rule_id, entry) in object(compliance_value, &compliance_path)? {
        let entry_obj = object(entry, &join(&compliance_path, rule_id))?;
        compliance.insert(rule_id.clone(), ComplianceEntry(entry_obj.clone()));
    }

    Ok(Structured {
        attributes,
        compliance,
    })
}

fn diagnostics((value, path): (&Value, String)) -> Check<Diagnostics> {
    let obj = object(value, &path)?;
    Ok(Diagnostics {
        latency: float(field(obj, &path, "latency")?)?,
        model: string(field(obj, &path, "model")?)?,
        tokens: integer(field(obj, &path, "tokens")?)?,
    })
}

// --- Field access ---

fn join(parent: &str, key: &str) -> String {
    if parent.is_empty() {
        key.to_string()
    } else {
        format!("{parent}.{key}")
    }
}

fn field<'a>(obj: &'a Map<String, Value>, parent: &str, key: &str) -> Check<(&'a Value, String)> {
    let path = join(parent, key);
    match obj.get(key) {
        Some(value) => Ok((value, path)),
        None => Err((path, "field required".to_string())),
    }
}

fn object<'a>(value: &'a Value, path: &str) -> Check<&'a Map<String, Value>> {
    value.as_object().ok_or_else(|| {
        let path = if path.is_empty() { "<root>" } else { path };
        (path.to_string(), format!("expected an object, got {}", kind(value)))
    })
}

fn string((value, path): (&Value, String)) -> Check<String> {
    match value {
        Value::String(s) => Ok(s.clone()),
        other => Err((path, format!("expected a string, got {}", kind(other)))),
    }
}

fn string_list((value, path): (&Value, String)) -> Check<Vec<String>> {
    let Value::Array(items) = value else {
        return Err((path, format!("expected a list, got {}", kind(value))));
    };
    items
        .iter()
        .enumerate()
        .map(|(i, item)| string((item, format!("{path}.{i}"))))
        .collect()
}

fn float((value, path): (&Value, String)) -> Check<f64> {
    value
        .as_f64()
        .ok_or_else(|| (path, format!("expected a number, got {}", kind(value))))
}

/// Non-negative integer. Whole floats such as `12.0` are accepted.
fn integer((value, path): (&Value, String)) -> Check<u64> {
    if let Some(n) = value.as_u64() {
        return Ok(n);
    }
    match value.as_f64() {
        Some(f) if f.fract() == 0.0 && f >= 0.0 && f <= u64::MAX as f64 => Ok(f as u64),
        _ => Err((path, format!("expected a non-negative integer, got {}", kind(value)))),
    }
}

fn kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "a list",
        Value::Object(_) => "an object",
    }
}
