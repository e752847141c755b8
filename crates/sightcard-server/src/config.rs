use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use tracing::info;

use sightcard_core::{FsStore, GcsStore, Settings, SettingsError, SpecStore};

#[derive(Debug, Clone, Parser)]
#[command(name = "sightcard-server", version, about = "Product image analysis API")]
pub struct Cli {
    /// Where the HTTP API will listen, e.g. 127.0.0.1:8000
    #[arg(long, env = "SIGHTCARD_LISTEN", default_value = "127.0.0.1:8000")]
    pub listen: String,

    /// JSON settings file. Flags and environment override its values.
    #[arg(long, env = "SIGHTCARD_CONFIG")]
    pub config: Option<PathBuf>,

    /// Model provider: vertex, openai, anthropic, google, ollama, groq, mistral, deepseek.
    #[arg(long, env = "SIGHTCARD_PROVIDER")]
    pub provider: Option<String>,

    #[arg(long, env = "SIGHTCARD_MODEL")]
    pub model: Option<String>,

    #[arg(long, env = "SIGHTCARD_API_KEY", hide_env_values = true)]
    pub api_key: Option<String>,

    /// OAuth bearer token for Vertex AI and Cloud Storage.
    #[arg(long, env = "GOOGLE_ACCESS_TOKEN", hide_env_values = true)]
    pub access_token: Option<String>,

    #[arg(long, env = "GCP_PROJECT_ID")]
    pub project_id: Option<String>,

    #[arg(long, env = "GCP_LOCATION")]
    pub location: Option<String>,

    /// Bucket holding spec_catalog.csv and context/<id>.json.
    #[arg(long, env = "GCS_BUCKET_NAME")]
    pub bucket: Option<String>,

    /// Serve specs and contexts from a local directory instead of the bucket.
    #[arg(long, env = "SIGHTCARD_DATA_DIR")]
    pub data_dir: Option<PathBuf>,
}

impl Cli {
    /// Settings from the config file (or defaults), overlaid with any flag given.
    pub fn settings(&self) -> Result<Settings, SettingsError> {
        let mut settings = match &self.config {
            Some(path) => Settings::read(path)?,
            None => Settings::default(),
        };

        overlay(&mut settings.provider, &self.provider);
        overlay(&mut settings.model, &self.model);
        overlay(&mut settings.api_key, &self.api_key);
        overlay(&mut settings.access_token, &self.access_token);
        overlay(&mut settings.project_id, &self.project_id);
        overlay(&mut settings.location, &self.location);
        overlay(&mut settings.bucket, &self.bucket);
        if let Some(dir) = &self.data_dir {
            settings.data_dir = Some(dir.clone());
        }
        Ok(settings)
    }
}

fn overlay(slot: &mut String, value: &Option<String>) {
    if let Some(v) = value {
        *slot = v.clone();
    }
}

/// The spec store named by the settings: a local directory when `data_dir`
/// is set, otherwise the configured bucket.
pub fn build_store(settings: &Settings) -> Arc<dyn SpecStore> {
    match &settings.data_dir {
        Some(dir) => {
            info!(dir = %dir.display(), "reading specs from local directory");
            Arc::new(FsStore::new(dir))
        }
        None => {
            info!(bucket = %settings.bucket, "reading specs from cloud storage");
            let token = Some(settings.access_token.clone()).filter(|t| !t.is_empty());
            Arc::new(GcsStore::new(&settings.bucket, token))
        }
    }
}
