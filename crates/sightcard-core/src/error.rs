use std::path::PathBuf;

/// Spec/rule store failures. None of these are retried.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("spec catalog unavailable at {location}: {cause}")]
    CatalogUnavailable { location: String, cause: String },

    #[error("could not load context '{id}' from {location}: {cause}")]
    ContextNotFound {
        id: String,
        location: String,
        cause: String,
    },

    #[error("context '{id}' at {location} is malformed: {cause}")]
    MalformedContext {
        id: String,
        location: String,
        cause: String,
    },
}

#[derive(Debug, thiserror::Error)]
pub enum SettingsError {
    #[error("read settings {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("parse settings {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}
