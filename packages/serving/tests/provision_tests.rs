use axum::Router;
use axum::http::{StatusCode, header};
use axum::response::Html;
use axum::routing::get;
use mien_serving::provision::hash_file;
use mien_serving::{ArtifactDescriptor, ArtifactProvisioner, ErrorKind, ModelFormat, RemoteSource};
use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;

const MODEL_BYTES: &[u8] = b"\x08\x07\x12\x04fake-onnx-graph-bytes";

async fn spawn_server() -> SocketAddr {
    let app = Router::new()
        .route("/model.onnx", get(|| async { MODEL_BYTES }))
        .route("/empty", get(|| async { "" }))
        .route(
            "/interstitial",
            get(|| async { Html("<html><body>Google Drive can't scan this file</body></html>") }),
        )
        .route(
            "/disguised",
            get(|| async {
                (
                    [(header::CONTENT_TYPE, "application/octet-stream")],
                    "<!DOCTYPE html><html></html>",
                )
            }),
        )
        .route("/missing", get(|| async { StatusCode::NOT_FOUND }));

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    addr
}

fn descriptor(url: String, local_path: &Path, blake3: Option<String>) -> ArtifactDescriptor {
    ArtifactDescriptor {
        source: RemoteSource::Url { url },
        local_path: local_path.to_path_buf(),
        format: ModelFormat::Full,
        blake3,
    }
}

fn provisioner() -> ArtifactProvisioner {
    ArtifactProvisioner::new(Duration::from_secs(10)).unwrap()
}

fn expected_digest() -> String {
    blake3::hash(MODEL_BYTES).to_hex().to_string()
}

#[tokio::test]
async fn downloads_missing_artifact_into_nested_path() {
    let addr = spawn_server().await;
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("cache/models/model.onnx");

    let desc = descriptor(format!("http://{addr}/model.onnx"), &path, None);
    let local = provisioner().ensure_local(&desc).await.unwrap();

    assert_eq!(local, path);
    assert_eq!(std::fs::read(&path).unwrap(), MODEL_BYTES);
    assert!(!dir.path().join("cache/models/model.onnx.download").exists());
}

#[tokio::test]
async fn verifies_digest_after_download() {
    let addr = spawn_server().await;
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("model.onnx");

    let desc = descriptor(
        format!("http://{addr}/model.onnx"),
        &path,
        Some(expected_digest()),
    );
    provisioner().ensure_local(&desc).await.unwrap();
    assert_eq!(hash_file(&path).await.unwrap(), expected_digest());
}

#[tokio::test]
async fn digest_mismatch_leaves_no_file_behind() {
    let addr = spawn_server().await;
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("model.onnx");

    let desc = descriptor(
        format!("http://{addr}/model.onnx"),
        &path,
        Some("00".repeat(32)),
    );
    let err = provisioner().ensure_local(&desc).await.unwrap_err();

    assert_eq!(err.kind(), ErrorKind::Provisioning);
    assert!(err.is_fatal());
    assert!(!path.exists());
    assert!(!dir.path().join("model.onnx.download").exists());
}

#[tokio::test]
async fn empty_body_is_provisioning_error() {
    let addr = spawn_server().await;
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("model.onnx");

    let desc = descriptor(format!("http://{addr}/empty"), &path, None);
    let err = provisioner().ensure_local(&desc).await.unwrap_err();

    assert_eq!(err.kind(), ErrorKind::Provisioning);
    assert!(err.to_string().contains("empty body"));
    assert!(!path.exists());
}

#[tokio::test]
async fn non_success_status_is_provisioning_error() {
    let addr = spawn_server().await;
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("model.onnx");

    let desc = descriptor(format!("http://{addr}/missing"), &path, None);
    let err = provisioner().ensure_local(&desc).await.unwrap_err();

    assert_eq!(err.kind(), ErrorKind::Provisioning);
    assert!(err.to_string().contains("404"));
}

#[tokio::test]
async fn html_pages_are_rejected() {
    let addr = spawn_server().await;
    let dir = tempfile::tempdir().unwrap();

    for route in ["interstitial", "disguised"] {
        let path = dir.path().join(format!("{route}.onnx"));
        let desc = descriptor(format!("http://{addr}/{route}"), &path, None);
        let err = provisioner().ensure_local(&desc).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Provisioning, "{route}");
        assert!(err.to_string().contains("HTML"), "{route}");
        assert!(!path.exists(), "{route}");
    }
}

#[tokio::test]
async fn unreachable_source_is_provisioning_error() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("model.onnx");

    let desc = descriptor("http://127.0.0.1:1/model.onnx".into(), &path, None);
    let err = provisioner().ensure_local(&desc).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Provisioning);
}

#[tokio::test]
async fn existing_file_is_used_without_network() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("model.onnx");
    std::fs::write(&path, b"cached artifact").unwrap();
    let before = std::fs::metadata(&path).unwrap().modified().unwrap();

    // Nothing listens on port 1, any fetch attempt would fail
    let desc = descriptor("http://127.0.0.1:1/model.onnx".into(), &path, None);
    for _ in 0..2 {
        let local = provisioner().ensure_local(&desc).await.unwrap();
        assert_eq!(local, path);
    }

    assert_eq!(std::fs::read(&path).unwrap(), b"cached artifact");
    assert_eq!(std::fs::metadata(&path).unwrap().modified().unwrap(), before);
}

#[tokio::test]
async fn existing_file_is_checked_against_digest() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("model.onnx");
    std::fs::write(&path, MODEL_BYTES).unwrap();

    let good = descriptor(
        "http://127.0.0.1:1/model.onnx".into(),
        &path,
        Some(expected_digest().to_uppercase()),
    );
    provisioner().ensure_local(&good).await.unwrap();

    let bad = descriptor(
        "http://127.0.0.1:1/model.onnx".into(),
        &path,
        Some("ff".repeat(32)),
    );
    let err = provisioner().ensure_local(&bad).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Provisioning);
    assert_eq!(std::fs::read(&path).unwrap(), MODEL_BYTES);
}

#[cfg(unix)]
#[tokio::test]
async fn unreadable_location_is_reported_before_download() {
    let addr = spawn_server().await;
    let dir = tempfile::tempdir().unwrap();
    let blocker = dir.path().join("not-a-dir");
    std::fs::write(&blocker, b"plain file").unwrap();
    let path = blocker.join("model.onnx");

    let desc = descriptor(format!("http://{addr}/model.onnx"), &path, None);
    let err = provisioner().ensure_local(&desc).await.unwrap_err();

    assert_eq!(err.kind(), ErrorKind::Provisioning);
    assert!(err.to_string().contains("failed to check"), "{err}");
}
