//! Fetches the model artifact into the local cache on first use

use crate::error::{ServingError, ServingResult};
use crate::model::ModelFormat;
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::fs::{self as async_fs, OpenOptions};
use tokio::io::{AsyncReadExt, AsyncWriteExt, BufWriter};

const HASH_CHUNK: usize = 1024 * 1024;

/// Where the artifact lives when it is not cached locally
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RemoteSource {
    /// A file shared through Google Drive, addressed by its content id
    GoogleDrive { file_id: String },
    /// Any plain HTTP(S) URL
    Url { url: String },
}

impl RemoteSource {
    pub fn google_drive(file_id: impl Into<String>) -> Self {
        RemoteSource::GoogleDrive {
            file_id: file_id.into(),
        }
    }

    pub fn url(&self) -> String {
        match self {
            RemoteSource::GoogleDrive { file_id } => {
                format!("https://drive.google.com/uc?export=download&id={file_id}")
            }
            RemoteSource::Url { url } => url.clone(),
        }
    }
}

/// Identity and locations of the model artifact
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArtifactDescriptor {
    pub source: RemoteSource,
    pub local_path: PathBuf,
    pub format: ModelFormat,
    /// Expected lowercase hex BLAKE3 digest
    #[serde(default)]
    pub blake3: Option<String>,
}

/// Makes sure the artifact described by an [`ArtifactDescriptor`] is on disk.
///
/// An existing file is never re-downloaded or modified.
#[derive(Clone)]
pub struct ArtifactProvisioner {
    client: reqwest::Client,
}

impl ArtifactProvisioner {
    pub fn new(timeout: Duration) -> ServingResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ServingError::provisioning_with_source("failed to build HTTP client", e))?;
        Ok(Self { client })
    }

    pub async fn ensure_local(&self, descriptor: &ArtifactDescriptor) -> ServingResult<PathBuf> {
        let path = &descriptor.local_path;

        let present = async_fs::try_exists(path).await.map_err(|e| {
            ServingError::provisioning_with_source(
                format!("failed to check for '{}'", path.display()),
                e,
            )
        })?;
        if present {
            tracing::info!(path = %path.display(), "model artifact already present");
            if let Some(expected) = &descriptor.blake3 {
                let actual = hash_file(path).await?;
                verify_digest(expected, &actual)?;
            }
            return Ok(path.clone());
        }

        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                async_fs::create_dir_all(parent).await.map_err(|e| {
                    ServingError::provisioning_with_source(
                        format!("failed to create '{}'", parent.display()),
                        e,
                    )
                })?;
            }
        }

        let temp_path = temp_path_for(path);
        let url = descriptor.source.url();
        tracing::info!(%url, path = %path.display(), "downloading model artifact");

        let outcome = self.download(&url, &temp_path).await.and_then(|(digest, size)| {
            if let Some(expected) = &descriptor.blake3 {
                verify_digest(expected, &digest)?;
            }
            Ok((digest, size))
        });

        let (digest, size) = match outcome {
            Ok(done) => done,
            Err(e) => {
                let _ = async_fs::remove_file(&temp_path).await;
                return Err(e);
            }
        };

        if let Err(e) = async_fs::rename(&temp_path, path).await {
            let _ = async_fs::remove_file(&temp_path).await;
            return Err(ServingError::provisioning_with_source(
                format!("failed to move artifact into '{}'", path.display()),
                e,
            ));
        }

        tracing::info!(size, blake3 = %digest, "model artifact downloaded");
        Ok(path.clone())
    }

    /// Streams `url` into `temp_path`, returning the body's digest and size
    async fn download(&self, url: &str, temp_path: &Path) -> ServingResult<(String, u64)> {
        let res = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| ServingError::provisioning_with_source(format!("failed to fetch {url}"), e))?;

        let status = res.status();
        if !status.is_success() {
            return Err(ServingError::provisioning(format!(
                "server responded with {status} for {url}"
            )));
        }

        let is_html = res
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .is_some_and(|v| v.to_ascii_lowercase().starts_with("text/html"));
        if is_html {
            return Err(html_response(url));
        }

        let file = OpenOptions::new()
            .write(true)
            .truncate(true)
            .create(true)
            .open(temp_path)
            .await
            .map_err(|e| {
                ServingError::provisioning_with_source(
                    format!("failed to open '{}'", temp_path.display()),
                    e,
                )
            })?;
        let mut file = BufWriter::with_capacity(1 << 20, file);

        let mut hasher = blake3::Hasher::new();
        let mut downloaded = 0u64;
        let mut stream = res.bytes_stream();

        while let Some(item) = stream.next().await {
            let chunk = item.map_err(|e| {
                ServingError::provisioning_with_source(format!("download of {url} interrupted"), e)
            })?;
            if downloaded == 0 && looks_like_html(&chunk) {
                return Err(html_response(url));
            }
            hasher.update(&chunk);
            file.write_all(&chunk).await.map_err(write_error)?;
            downloaded += chunk.len() as u64;
        }

        file.flush().await.map_err(write_error)?;
        file.get_mut().sync_all().await.map_err(write_error)?;

        if downloaded == 0 {
            return Err(ServingError::provisioning(format!(
                "{url} returned an empty body"
            )));
        }

        Ok((hasher.finalize().to_hex().to_string(), downloaded))
    }
}

/// Sibling `<name>.download` file the body is streamed into
fn temp_path_for(path: &Path) -> PathBuf {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "model".to_string());
    path.with_file_name(format!("{name}.download"))
}

fn looks_like_html(chunk: &[u8]) -> bool {
    let start = chunk
        .iter()
        .position(|b| !b.is_ascii_whitespace())
        .unwrap_or(chunk.len());
    let head: Vec<u8> = chunk[start..]
        .iter()
        .take(15)
        .map(u8::to_ascii_lowercase)
        .collect();
    head.starts_with(b"<!doctype html") || head.starts_with(b"<html")
}

fn html_response(url: &str) -> ServingError {
    ServingError::provisioning(format!(
        "{url} returned an HTML page instead of a model artifact"
    ))
}

fn write_error(e: std::io::Error) -> ServingError {
    ServingError::provisioning_with_source("failed to write downloaded artifact", e)
}

fn verify_digest(expected: &str, actual: &str) -> ServingResult<()> {
    if !expected.trim().eq_ignore_ascii_case(actual) {
        return Err(ServingError::provisioning(format!(
            "BLAKE3 mismatch: expected {}, got {actual}",
            expected.trim()
        )));
    }
    Ok(())
}

/// Hashes a file without loading it into memory at once
pub async fn hash_file(path: &Path) -> ServingResult<String> {
    let mut file = async_fs::File::open(path).await.map_err(|e| {
        ServingError::provisioning_with_source(format!("failed to open '{}'", path.display()), e)
    })?;
    let mut hasher = blake3::Hasher::new();
    let mut buf = vec![0u8; HASH_CHUNK];
    loop {
        let n = file.read(&mut buf).await.map_err(|e| {
            ServingError::provisioning_with_source(format!("failed to read '{}'", path.display()), e)
        })?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(hasher.finalize().to_hex().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn drive_source_builds_download_url() {
        let source = RemoteSource::google_drive("abc123");
        assert_eq!(
            source.url(),
            "https://drive.google.com/uc?export=download&id=abc123"
        );
        let source = RemoteSource::Url {
            url: "http://host/m.onnx".into(),
        };
        assert_eq!(source.url(), "http://host/m.onnx");
    }

    #[test]
    fn temp_file_sits_next_to_target() {
        assert_eq!(
            temp_path_for(Path::new("cache/model.onnx")),
            PathBuf::from("cache/model.onnx.download")
        );
    }

    #[test]
    fn detects_html_interstitials() {
        assert!(looks_like_html(b"\n  <!DOCTYPE html><html>"));
        assert!(looks_like_html(b"<html><body>virus scan</body>"));
        assert!(!looks_like_html(b"\x08\x07\x12\x04onnx"));
        assert!(!looks_like_html(b""));
    }

    #[test]
    fn digest_comparison_ignores_case() {
        assert!(verify_digest("ABCDEF", "abcdef").is_ok());
        let err = verify_digest("abcdef", "012345").unwrap_err();
        assert_eq!(err.kind(), crate::ErrorKind::Provisioning);
    }
}
