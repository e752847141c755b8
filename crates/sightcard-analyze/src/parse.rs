use std::fmt;

use serde::Serialize;
use serde_json::Value;

/// Where the JSON in a model reply was looked for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum JsonSource {
    /// Interior of a fenced block tagged `json`.
    Fence,
    /// The whole reply.
    RawText,
}

impl fmt::Display for JsonSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            JsonSource::Fence => "json fence",
            JsonSource::RawText => "raw text",
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Extraction {
    Fenced(Value),
    Raw(Value),
    NotFound { attempted: JsonSource, error: String },
}

/// Pull a single JSON value out of a model reply.
///
/// A block opened by ```` ```json ```` is parsed when present, and its
/// failure is final: there is no second attempt on the full text. Without a
/// fence the whole reply is parsed.
pub fn extract_json(raw: &str) -> Extraction {
    match fenced_block(raw) {
        Some(body) => match serde_json::from_str(body) {
            Ok(value) => Extraction::Fenced(value),
            Err(e) => Extraction::NotFound {
                attempted: JsonSource::Fence,
                error: e.to_string(),
            },
        },
        None => match serde_json::from_str(raw.trim()) {
            Ok(value) => Extraction::Raw(value),
            Err(e) => Extraction::NotFound {
                attempted: JsonSource::RawText,
                error: e.to_string(),
            },
        },
    }
}

/// Interior of the first ```` ```json ```` fence, up to the last closing fence.
fn fenced_block(raw: &str) -> Option<&str> {
    const OPEN: &str = "```json";
    const CLOSE: &str = "\n```";

    // The first tag that ends its line opens the block; trailing spaces and
    // a CR are tolerated. Tags mentioned mid-line are skipped.
    let start = raw.match_indices(OPEN).find_map(|(at, _)| {
        let after_tag = at + OPEN.len();
        let rest = &raw[after_tag..];
        let line_end = rest.find('\n')?;
        rest[..line_end]
            .trim()
            .is_empty()
            .then_some(after_tag + line_end + 1)
    })?;
    let end = start + raw[start..].rfind(CLOSE)?;
    Some(&raw[start..end])
}
