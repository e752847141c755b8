use serde_json::Value;
use tracing::debug;

use crate::{ContextCard, ContextDocument, ProductSpec, Rule};

/// Merge one product's specs with context documents into a context card.
///
/// Documents are applied in the order given. A later `brand_voice` replaces an
/// earlier one, and rules are appended in document order, then in-document
/// order. Rule IDs are not deduplicated and rule shape is not checked: a rule
/// missing `id` or `text` lands on the card with that field null, and only an
/// absent `mandatory` defaults to false.
pub fn compose(product_specs: &ProductSpec, contexts: &[(String, ContextDocument)]) -> ContextCard {
    let mut card = ContextCard {
        product_attributes: product_specs
            .iter()
            .filter(|(_, v)| !v.is_null())
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect(),
        rules: Vec::new(),
        brand_voice: None,
    };

    for (context_id, doc) in contexts {
        if let Some(voice) = &doc.brand_voice {
            card.brand_voice = Some(voice.clone());
        }
        card.rules.extend(doc.rules().iter().map(|r| Rule {
            id: r.id.clone(),
            text: r.text.clone(),
            mandatory: r.mandatory.clone().unwrap_or(Value::Bool(false)),
        }));
        debug!(context_id = %context_id, rules = doc.rules().len(), "applied context document");
    }

    card
}
