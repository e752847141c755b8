//! Prompt contract: single source of truth for what the model is told to do
//! and for the field names the validator and the stores rely on.

/// Catalog column holding the product image pointer.
pub const IMAGE_REF_FIELD: &str = "image_gcs_uri";

/// Catalog column used as the row key.
pub const SKU_FIELD: &str = "sku";

/// Question used when the request carries none.
pub const DEFAULT_QUESTION: &str = "Describe the product based on the image and context.";

/// Rule the model cites when the image cannot support an answer.
pub const INSUFFICIENT_EVIDENCE_RULE: &str = "R-102";

/// Attributes the model must extract, each tagged with `image` or `spec`.
pub const EXTRACTED_ATTRIBUTES: [&str; 4] = ["color", "closure", "style", "outsole_pattern"];

/// Allowed values of `structured.attributes.*.source`.
pub const ATTRIBUTE_SOURCES: [&str; 2] = ["image", "spec"];

pub const ROLE: &str = "You are an expert e-commerce analyst. Your task is to analyze a product \
image and its corresponding context card to answer a user's question, extract attributes, and \
check for policy compliance.";

/// The claim-escalation instruction. Compliance enforcement is entirely this
/// sentence: there is no independent claim detector behind it.
pub const ESCALATION: &str = "**Crucially, if the user's question probes a specific claim area \
that is governed by a rule (e.g., asking about \"orthopedic\" properties, \"water resistance\", \
etc.), you must find the corresponding policy rule (e.g., R-103, R-203) and explicitly fail that \
rule in your compliance check, explaining that the claim cannot be made.** This is a mandatory \
instruction.";

pub const OUTPUT_DIRECTIVE: &str = "You MUST respond with a single, valid JSON object. Do not \
include any text or formatting outside of this JSON object. The JSON object should follow this \
exact schema:";
