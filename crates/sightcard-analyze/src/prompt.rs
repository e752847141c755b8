use sightcard_core::rules::{
    ATTRIBUTE_SOURCES, ESCALATION, EXTRACTED_ATTRIBUTES, INSUFFICIENT_EVIDENCE_RULE,
    OUTPUT_DIRECTIVE, ROLE,
};
use sightcard_core::ContextCard;

/// Compliance keys shown in the schema example when the card has no rule IDs.
const PLACEHOLDER_RULES: [&str; 2] = ["R-201", "R-202"];

/// Render the model directive for one card and question.
///
/// Pure: the same card and question always produce the same string.
pub fn build_prompt(card: &ContextCard, question: &str) -> String {
    let attributes = EXTRACTED_ATTRIBUTES
        .iter()
        .map(|a| format!("`{a}`"))
        .collect::<Vec<_>>()
        .join(", ");

    format!(
        "{ROLE}\n\n\
**Context Card:**\n\
```json\n{card_json}\n```\n\n\
**User Question:** \"{question}\"\n\n\
**Your Tasks:**\n\
1.  **Answer the Question:** Based on both the image and the context card, answer the user's \
question. If the image provides insufficient evidence, state that clearly and cite rule \
{INSUFFICIENT_EVIDENCE_RULE} if applicable.\n\
2.  **Extract Attributes:** Identify the following attributes from the image and reconcile them \
with the specs in the context card: {attributes}. Tag each with the source it came from: \
{sources}.\n\
3.  **Check Compliance:** Evaluate all rules listed in the context card. For each rule, provide a \
\"pass\" or \"fail\" status and a brief justification. {ESCALATION}\n\n\
**Output Format:**\n\
{OUTPUT_DIRECTIVE}\n\
{schema}",
        card_json = card.to_canonical_json(),
        sources = ATTRIBUTE_SOURCES
            .iter()
            .map(|s| format!("\"{s}\""))
            .collect::<Vec<_>>()
            .join(" or "),
        schema = output_schema(card),
    )
}

/// The response shape the model must emit, written as an annotated example.
fn output_schema(card: &ContextCard) -> String {
    let mut out = String::with_capacity(1024);
    let source = ATTRIBUTE_SOURCES.join("|");

    out.push_str("{\n");
    out.push_str("    \"answer\": \"Your detailed answer to the user's question.\",\n");
    out.push_str("    \"grounding\": {\n");
    out.push_str(
        "        \"citations\": [\"List of rule IDs or spec fields supporting your answer, \
e.g., 'R-101', 'spec:material'\"],\n",
    );
    out.push_str(
        "        \"visual_refs\": [\"List of brief descriptions of visual evidence from the \
image, e.g., 'The image shows a lace-up closure.'\"]\n",
    );
    out.push_str("    },\n");
    out.push_str("    \"structured\": {\n");

    out.push_str("        \"attributes\": {\n");
    for (i, attribute) in EXTRACTED_ATTRIBUTES.iter().enumerate() {
        out.push_str(&format!(
            "            \"{attribute}\": {{\"value\": \"extracted_{attribute}\", \"source\": \"{source}\"}}"
        ));
        out.push_str(if i + 1 < EXTRACTED_ATTRIBUTES.len() { ",\n" } else { "\n" });
    }
    out.push_str("        },\n");

    out.push_str("        \"compliance\": {\n");
    let rule_ids = example_rule_ids(card);
    for (i, id) in rule_ids.iter().enumerate() {
        out.push_str(&format!(
            "            \"{id}\": {{\"pass\": true/false, \"reason\": \"Your justification here.\"}}"
        ));
        out.push_str(if i + 1 < rule_ids.len() { ",\n" } else { "\n" });
    }
    out.push_str("        }\n");

    out.push_str("    }\n");
    out.push('}');
    out
}

/// Card rule IDs in first-seen order, one per key.
fn example_rule_ids(card: &ContextCard) -> Vec<&str> {
    let mut ids: Vec<&str> = Vec::new();
    for id in card.rule_ids() {
        if !ids.contains(&id) {
            ids.push(id);
        }
    }
    if ids.is_empty() {
        ids.extend(PLACEHOLDER_RULES);
    }
    ids
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use sightcard_core::Rule;

    fn card() -> ContextCard {
        ContextCard {
            product_attributes: [("color".to_string(), json!("black"))].into_iter().collect(),
            rules: vec![
                Rule {
                    id: json!("R-203"),
                    text: json!("No water-resistance claims without certification."),
                    mandatory: json!(true),
                },
                Rule {
                    id: json!("R-203"),
                    text: json!("duplicate"),
                    mandatory: json!(false),
                },
                Rule {
                    id: json!(null),
                    text: json!("orphan"),
                    mandatory: json!(false),
                },
            ],
            brand_voice: Some(json!("Plain-spoken.")),
        }
    }

    #[test]
    fn prompt_is_deterministic() {
        let card = card();
        assert_eq!(
            build_prompt(&card, "Is this shoe waterproof?"),
            build_prompt(&card, "Is this shoe waterproof?")
        );
    }

    #[test]
    fn prompt_embeds_card_and_question() {
        let prompt = build_prompt(&card(), "Is this shoe waterproof?");
        assert!(prompt.contains(&card().to_canonical_json()));
        assert!(prompt.contains("**User Question:** \"Is this shoe waterproof?\""));
        assert!(prompt.contains("Plain-spoken."));
    }

    #[test]
    fn prompt_carries_every_instruction() {
        let prompt = build_prompt(&card(), "q");
        assert!(prompt.contains(INSUFFICIENT_EVIDENCE_RULE));
        assert!(prompt.contains(ESCALATION));
        assert!(prompt.contains(OUTPUT_DIRECTIVE));
        for attribute in EXTRACTED_ATTRIBUTES {
            assert!(prompt.contains(&format!("\"{attribute}\": {{\"value\"")), "{attribute}");
        }
        assert!(prompt.contains("\"source\": \"image|spec\""));
    }

    #[test]
    fn schema_lists_card_rules_once() {
        let schema = output_schema(&card());
        assert_eq!(schema.matches("\"R-203\": {").count(), 1);
        assert!(!schema.contains("R-201"));
    }

    #[test]
    fn schema_falls_back_to_placeholder_rules() {
        let schema = output_schema(&ContextCard::default());
        assert!(schema.contains("\"R-201\": {\"pass\": true/false"));
        assert!(schema.contains("\"R-202\": {\"pass\": true/false"));
    }
}
