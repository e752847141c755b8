use std::path::{Path, PathBuf};

use async_trait::async_trait;
use reqwest::{StatusCode, Url};
use serde_json::{Number, Value};
use tracing::info;

use crate::rules::SKU_FIELD;
use crate::{Catalog, ContextDocument, ProductSpec, StoreError};

/// Object holding the product spec catalog.
pub const CATALOG_OBJECT: &str = "spec_catalog.csv";

/// Prefix under which context documents live, as `context/<id>.json`.
pub const CONTEXT_PREFIX: &str = "context";

pub const GCS_ENDPOINT: &str = "https://storage.googleapis.com";

/// Cells read as null, matching the usual dataframe NA markers.
const NA_MARKERS: &[&str] = &[
    "", "#N/A", "#N/A N/A", "#NA", "-1.#IND", "-1.#QNAN", "-NaN", "-nan", "1.#IND", "1.#QNAN",
    "<NA>", "N/A", "NA", "NULL", "NaN", "None", "n/a", "nan", "null",
];

/// Read-only source of the spec catalog and named context documents.
///
/// One store handle is built at startup and shared by every request.
#[async_trait]
pub trait SpecStore: Send + Sync {
    async fn get_catalog(&self) -> Result<Catalog, StoreError>;

    async fn get_context_document(&self, id: &str) -> Result<ContextDocument, StoreError>;
}

/// Object name of a context document. IDs are single path segments.
pub fn context_object(id: &str) -> Option<String> {
    let valid = !id.is_empty()
        && id != "."
        && id != ".."
        && !id.contains(['/', '\\'])
        && !id.chars().any(char::is_control);
    valid.then(|| format!("{CONTEXT_PREFIX}/{id}.json"))
}

/// Parse a CSV spec catalog keyed by its `sku` column.
///
/// The `sku` column is the row key and is not repeated inside the row.
/// Rows with an empty SKU are skipped; a repeated SKU keeps its last row.
pub fn parse_catalog(bytes: &[u8]) -> Result<Catalog, String> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .flexible(true)
        .from_reader(bytes);
    let headers = reader.headers().map_err(|e| e.to_string())?.clone();
    let sku_col = headers
        .iter()
        .position(|h| h.trim() == SKU_FIELD)
        .ok_or_else(|| format!("catalog has no '{SKU_FIELD}' column"))?;

    let mut catalog = Catalog::new();
    for record in reader.records() {
        let record = record.map_err(|e| e.to_string())?;
        let sku = record.get(sku_col).unwrap_or_default().trim();
        if sku.is_empty() {
            continue;
        }
        let spec: ProductSpec = headers
            .iter()
            .zip(record.iter())
            .enumerate()
            .filter(|(i, _)| *i != sku_col)
            .map(|(_, (header, cell))| (header.trim().to_string(), cell_value(cell)))
            .collect();
        catalog.insert(sku.to_string(), spec);
    }
    Ok(catalog)
}

fn cell_value(cell: &str) -> Value {
    if NA_MARKERS.contains(&cell) {
        return Value::Null;
    }
    if let Ok(i) = cell.parse::<i64>() {
        return Value::Number(i.into());
    }
    if let Some(n) = cell.parse::<f64>().ok().and_then(Number::from_f64) {
        return Value::Number(n);
    }
    if cell.eq_ignore_ascii_case("true") {
        return Value::Bool(true);
    }
    if cell.eq_ignore_ascii_case("false") {
        return Value::Bool(false);
    }
    Value::String(cell.to_string())
}

fn parse_context(id: &str, location: &str, bytes: &[u8]) -> Result<ContextDocument, StoreError> {
    serde_json::from_slice(bytes).map_err(|e| StoreError::MalformedContext {
        id: id.to_string(),
        location: location.to_string(),
        cause: e.to_string(),
    })
}

fn invalid_context_id(id: &str, location: &str) -> StoreError {
    StoreError::ContextNotFound {
        id: id.to_string(),
        location: location.to_string(),
        cause: "invalid context id".to_string(),
    }
}

// --- Local directory ---

/// Store backed by a local directory with the bucket's object layout.
#[derive(Debug, Clone)]
pub struct FsStore {
    root: PathBuf,
}

impl FsStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }
}

#[async_trait]
impl SpecStore for FsStore {
    async fn get_catalog(&self) -> Result<Catalog, StoreError> {
        let path = self.root.join(CATALOG_OBJECT);
        let location = path.display().to_string();
        info!("loading spec catalog from {location}");

        let unavailable = |cause: String| StoreError::CatalogUnavailable {
            location: location.clone(),
            cause,
        };
        let bytes = tokio::fs::read(&path)
            .await
            .map_err(|e| unavailable(e.to_string()))?;
        parse_catalog(&bytes).map_err(unavailable)
    }

    async fn get_context_document(&self, id: &str) -> Result<ContextDocument, StoreError> {
        let object = context_object(id)
            .ok_or_else(|| invalid_context_id(id, &self.root.display().to_string()))?;
        let path = self.root.join(object);
        let location = path.display().to_string();
        info!("loading context from {location}");

        let bytes = tokio::fs::read(&path)
            .await
            .map_err(|e| StoreError::ContextNotFound {
                id: id.to_string(),
                location: location.clone(),
                cause: e.to_string(),
            })?;
        parse_context(id, &location, &bytes)
    }
}

// --- Cloud Storage ---

/// Store backed by a Cloud Storage bucket, read through the JSON API.
#[derive(Debug, Clone)]
pub struct GcsStore {
    client: reqwest::Client,
    endpoint: String,
    bucket: String,
    access_token: Option<String>,
}

enum Download {
    NotFound,
    Failed(String),
}

impl GcsStore {
    pub fn new(bucket: impl Into<String>, access_token: Option<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            endpoint: GCS_ENDPOINT.to_string(),
            bucket: bucket.into(),
            access_token: access_token.filter(|t| !t.is_empty()),
        }
    }

    /// Point at a different API host (emulators, proxies).
    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into();
        self
    }

    pub fn object_uri(&self, object: &str) -> String {
        format!("gs://{}/{}", self.bucket, object)
    }

    pub fn object_url(&self, object: &str) -> Result<Url, String> {
        let mut url = Url::parse(&self.endpoint).map_err(|e| e.to_string())?;
        url.path_segments_mut()
            .map_err(|_| format!("endpoint {} cannot carry a path", self.endpoint))?
            .pop_if_empty()
            .extend(["storage", "v1", "b", self.bucket.as_str(), "o", object]);
        url.query_pairs_mut().append_pair("alt", "media");
        Ok(url)
    }

    async fn download(&self, object: &str) -> Result<Vec<u8>, Download> {
        let url = self.object_url(object).map_err(Download::Failed)?;
        let mut request = self.client.get(url);
        if let Some(token) = &self.access_token {
            request = request.bearer_auth(token);
        }
        let response = request
            .send()
            .await
            .map_err(|e| Download::Failed(e.to_string()))?;
        match response.status() {
            StatusCode::NOT_FOUND => Err(Download::NotFound),
            status if !status.is_success() => Err(Download::Failed(format!("HTTP {status}"))),
            _ => response
                .bytes()
                .await
                .map(|b| b.to_vec())
                .map_err(|e| Download::Failed(e.to_string())),
        }
    }
}

#[async_trait]
impl SpecStore for GcsStore {
    async fn get_catalog(&self) -> Result<Catalog, StoreError> {
        let location = self.object_uri(CATALOG_OBJECT);
        info!("loading spec catalog from GCS: {location}");

        let unavailable = |cause: String| StoreError::CatalogUnavailable {
            location: location.clone(),
            cause,
        };
        let bytes = self.download(CATALOG_OBJECT).await.map_err(|e| match e {
            Download::NotFound => unavailable("object not found".to_string()),
            Download::Failed(cause) => unavailable(cause),
        })?;
        parse_catalog(&bytes).map_err(unavailable)
    }

    async fn get_context_document(&self, id: &str) -> Result<ContextDocument, StoreError> {
        let object = context_object(id)
            .ok_or_else(|| invalid_context_id(id, &self.object_uri(CONTEXT_PREFIX)))?;
        let location = self.object_uri(&object);
        info!("loading context from GCS: {location}");

        let bytes = self.download(&object).await.map_err(|e| StoreError::ContextNotFound {
            id: id.to_string(),
            location: location.clone(),
            cause: match e {
                Download::NotFound => "object not found".to_string(),
                Download::Failed(cause) => cause,
            },
        })?;
        parse_context(id, &location, &bytes)
    }
}
