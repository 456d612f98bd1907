use crate::catalog::ClassCatalog;
use crate::error::{ServingError, ServingResult};
use crate::model::ModelFormat;
use crate::preprocess::InputSpec;
use crate::provision::{ArtifactDescriptor, RemoteSource};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

/// Drive id of the published fabric classifier
pub const DEFAULT_MODEL_ID: &str = "1AB3tFMw6K8iL-RnGt0TUwQlvA53-ccvd";

/// Configuration for provisioning and loading the classifier
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServingConfig {
    /// Google Drive id of the artifact
    #[serde(default = "default_model_id")]
    pub model_id: String,
    /// Full download URL, overrides `model_id`
    #[serde(default)]
    pub model_url: Option<String>,
    /// Local cache path of the artifact
    #[serde(default = "default_model_path")]
    pub model_path: PathBuf,
    /// Artifact format, inferred from the path when unset
    #[serde(default)]
    pub model_format: Option<ModelFormat>,
    /// Expected BLAKE3 digest of the artifact
    #[serde(default)]
    pub model_blake3: Option<String>,
    /// Input layout, read from the artifact when unset
    #[serde(default)]
    pub model_input: Option<InputSpec>,
    /// JSON file replacing the bundled label and link tables
    #[serde(default)]
    pub class_catalog_path: Option<PathBuf>,
    /// Timeout for the artifact download (seconds)
    #[serde(default = "default_download_timeout_secs")]
    pub download_timeout_secs: u64,
}

fn default_model_id() -> String {
    DEFAULT_MODEL_ID.to_string()
}
fn default_model_path() -> PathBuf {
    PathBuf::from("mien_fabric_classifier_forapp.onnx")
}
fn default_download_timeout_secs() -> u64 {
    300
}

impl Default for ServingConfig {
    fn default() -> Self {
        Self {
            model_id: default_model_id(),
            model_url: None,
            model_path: default_model_path(),
            model_format: None,
            model_blake3: None,
            model_input: None,
            class_catalog_path: None,
            download_timeout_secs: default_download_timeout_secs(),
        }
    }
}

impl ServingConfig {
    pub fn from_env() -> ServingResult<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds the configuration from any key/value source.
    ///
    /// Blank values count as unset; unparsable values are config errors.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> ServingResult<Self> {
        let get = |key: &str| {
            lookup(key)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };

        Ok(Self {
            model_id: get("MODEL_ID").unwrap_or_else(default_model_id),
            model_url: get("MODEL_URL"),
            model_path: get("MODEL_PATH")
                .map(PathBuf::from)
                .unwrap_or_else(default_model_path),
            model_format: parse_var("MODEL_FORMAT", get("MODEL_FORMAT"))?,
            model_blake3: get("MODEL_BLAKE3").map(|v| v.to_ascii_lowercase()),
            model_input: parse_var("MODEL_INPUT", get("MODEL_INPUT"))?,
            class_catalog_path: get("CLASS_CATALOG_PATH").map(PathBuf::from),
            download_timeout_secs: parse_var(
                "DOWNLOAD_TIMEOUT_SECS",
                get("DOWNLOAD_TIMEOUT_SECS"),
            )?
            .unwrap_or_else(default_download_timeout_secs),
        })
    }

    /// Explicit format, else the path's extension, else full precision
    pub fn format(&self) -> ModelFormat {
        self.model_format
            .or_else(|| ModelFormat::from_path(&self.model_path))
            .unwrap_or(ModelFormat::Full)
    }

    pub fn source(&self) -> RemoteSource {
        match &self.model_url {
            Some(url) => RemoteSource::Url { url: url.clone() },
            None => RemoteSource::google_drive(self.model_id.clone()),
        }
    }

    pub fn descriptor(&self) -> ArtifactDescriptor {
        ArtifactDescriptor {
            source: self.source(),
            local_path: self.model_path.clone(),
            format: self.format(),
            blake3: self.model_blake3.clone(),
        }
    }

    pub fn download_timeout(&self) -> Duration {
        Duration::from_secs(self.download_timeout_secs)
    }

    /// The override catalog when configured, else the bundled one
    pub fn catalog(&self) -> ServingResult<ClassCatalog> {
        match &self.class_catalog_path {
            Some(path) => ClassCatalog::from_json_file(path),
            None => Ok(ClassCatalog::default()),
        }
    }
}

fn parse_var<T>(key: &str, value: Option<String>) -> ServingResult<Option<T>>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    value
        .map(|v| {
            v.parse::<T>()
                .map_err(|e| ServingError::config(format!("invalid value for {key} ('{v}'): {e}")))
        })
        .transpose()
}
