pub mod engine;
pub mod gateway;
pub mod parse;
pub mod prompt;
pub mod validate;
pub mod vertex;

pub use engine::{backend_from_settings, BackendError, ModelBackend, SamplingConfig};
pub use gateway::{GatewayError, ModelGateway, RawModelOutput};
pub use prompt::build_prompt;
pub use validate::{validate, SchemaViolation};

use std::sync::Arc;
use std::time::Instant;

use serde_json::Value;
use tokio::task::JoinSet;
use tracing::{info, warn};

use sightcard_core::{
    compose, AnalyzeRequest, AnalyzeResponse, Catalog, ContextDocument, SpecStore, StoreError,
};

/// Why one analysis request failed. Every stage failure aborts the request.
#[derive(Debug, thiserror::Error)]
pub enum AnalyzeError {
    #[error("SKU '{0}' not found in the specification catalog")]
    SkuNotFound(String),

    #[error("image reference not found for SKU: {0}")]
    MissingImageReference(String),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("model query failed: {0}")]
    Gateway(#[from] GatewayError),

    #[error(transparent)]
    Schema(#[from] SchemaViolation),
}

impl AnalyzeError {
    /// Stable machine-readable name of the failure.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::SkuNotFound(_) => "sku_not_found",
            Self::MissingImageReference(_) => "missing_image_reference",
            Self::Store(StoreError::CatalogUnavailable { .. }) => "catalog_unavailable",
            Self::Store(StoreError::ContextNotFound { .. }) => "context_not_found",
            Self::Store(StoreError::MalformedContext { .. }) => "malformed_context",
            Self::Gateway(GatewayError::EmptyResponse) => "empty_response",
            Self::Gateway(GatewayError::PrematureStop { .. }) => "premature_stop",
            Self::Gateway(GatewayError::EmptyText) => "empty_text",
            Self::Gateway(GatewayError::MalformedJson { .. }) => "malformed_json",
            Self::Gateway(GatewayError::Backend(_)) => "backend_error",
            Self::Schema(_) => "schema_violation",
        }
    }
}

/// The analysis pipeline: fetch, compose, prompt, invoke, validate.
///
/// Built once at startup; holds no per-request state.
pub struct Analyzer {
    store: Arc<dyn SpecStore>,
    gateway: ModelGateway,
}

impl Analyzer {
    pub fn new(store: Arc<dyn SpecStore>, gateway: ModelGateway) -> Self {
        Self { store, gateway }
    }

    pub fn model(&self) -> &str {
        self.gateway.model()
    }

    pub async fn analyze(&self, request: &AnalyzeRequest) -> Result<AnalyzeResponse, AnalyzeError> {
        let started = Instant::now();

        // Context documents load in the background while the catalog is read
        // and the SKU checked; an early return drops (and aborts) the loads.
        let context_ids = dedup_ids(&request.context_ids);
        let mut loads = self.spawn_context_loads(&context_ids);

        let catalog: Catalog = self.store.get_catalog().await?;
        let product_specs = catalog
            .get(&request.sku)
            .ok_or_else(|| AnalyzeError::SkuNotFound(request.sku.clone()))?;
        let image_ref = product_specs
            .image_ref()
            .ok_or_else(|| AnalyzeError::MissingImageReference(request.sku.clone()))?;

        let contexts = collect_contexts(&mut loads, &context_ids).await?;

        let card = compose(product_specs, &contexts);
        let prompt = build_prompt(&card, request.question());

        let mut output = self.gateway.invoke(image_ref, &prompt).await?;
        if let (Some(tokens), Some(Value::Object(diagnostics))) =
            (output.total_tokens, output.document.get_mut("diagnostics"))
        {
            diagnostics.insert("tokens".to_string(), Value::from(tokens));
        }

        let latency = started.elapsed().as_secs_f64();
        let response = validate(output.document, latency).inspect_err(|v| {
            warn!(path = %v.path, message = %v.message, raw = %v.raw, "model output failed validation");
        })?;

        let failed_rules = response
            .structured
            .compliance_results()
            .iter()
            .filter(|r| !r.pass)
            .count();
        info!(
            sku = %request.sku,
            latency = response.diagnostics.latency,
            rules_failed = failed_rules,
            "analysis complete"
        );
        Ok(response)
    }

    fn spawn_context_loads(&self, ids: &[String]) -> JoinSet<(usize, Result<ContextDocument, StoreError>)> {
        let mut loads = JoinSet::new();
        for (index, id) in ids.iter().enumerate() {
            let store = Arc::clone(&self.store);
            let id = id.clone();
            loads.spawn(async move { (index, store.get_context_document(&id).await) });
        }
        loads
    }
}

/// Drop repeated context IDs, keeping each at its first position.
fn dedup_ids(ids: &[String]) -> Vec<String> {
    let mut unique: Vec<String> = Vec::with_capacity(ids.len());
    for id in ids {
        if !unique.contains(id) {
            unique.push(id.clone());
        }
    }
    unique
}

/// Wait for every context load and put the documents back in request order.
async fn collect_contexts(
    loads: &mut JoinSet<(usize, Result<ContextDocument, StoreError>)>,
    ids: &[String],
) -> Result<Vec<(String, ContextDocument)>, StoreError> {
    let mut slots: Vec<Option<ContextDocument>> = vec![None; ids.len()];
    // A load task that panicked or was cancelled leaves its slot empty; the
    // empty slot names the context it was loading.
    let mut aborted: Option<String> = None;
    while let Some(joined) = loads.join_next().await {
        match joined {
            Ok((index, result)) => slots[index] = Some(result?),
            Err(e) => {
                warn!(error = %e, "context load task failed");
                aborted.get_or_insert_with(|| e.to_string());
            }
        }
    }

    ids.iter()
        .zip(slots)
        .map(|(id, slot)| {
            slot.map(|doc| (id.clone(), doc))
                .ok_or_else(|| StoreError::ContextNotFound {
                    id: id.clone(),
                    location: "context loader".to_string(),
                    cause: aborted
                        .clone()
                        .unwrap_or_else(|| "load did not complete".to_string()),
                })
        })
        .collect()
}
