use evidence_core::config::StorageConfig;
use evidence_core::{AlarmReference, EvidencePublisher};
use evidence_stages::{HttpObjectStore, DIGEST_HEADER};
use tempfile::TempDir;
use wiremock::matchers::{body_bytes, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn store(server: &MockServer, token: Option<&str>) -> HttpObjectStore {
    HttpObjectStore::new(StorageConfig {
        endpoint: server.uri(),
        bucket: "alarm-evidence".to_string(),
        public_base_url: "https://cdn.example".to_string(),
        key_prefix: "videos".to_string(),
        token: token.map(str::to_string),
        ..StorageConfig::default()
    })
    .unwrap()
}

fn video(dir: &TempDir) -> std::path::PathBuf {
    let path = dir.path().join("ABC123.mp4");
    std::fs::write(&path, b"mp4-bytes").unwrap();
    path
}

#[tokio::test]
async fn test_publish_puts_object_and_returns_public_url() {
    let server = MockServer::start().await;
    let digest = format!("blake3:{}", blake3::hash(b"mp4-bytes"));
    Mock::given(method("PUT"))
        .and(path("/alarm-evidence/videos/2024-01-01/D1/ABC123.mp4"))
        .and(header("content-type", "video/mp4"))
        .and(header(DIGEST_HEADER, digest.as_str()))
        .and(header("authorization", "Bearer k"))
        .and(body_bytes(b"mp4-bytes".to_vec()))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&server)
        .await;

    let dir = TempDir::new().unwrap();
    let alarm = AlarmReference::parse("D1", "2024-01-01T10:00:00Z", "ABC123").unwrap();
    let published = store(&server, Some("k"))
        .publish(&video(&dir), &alarm)
        .await
        .unwrap();

    assert_eq!(published.key, "videos/2024-01-01/D1/ABC123.mp4");
    assert_eq!(
        published.url,
        "https://cdn.example/videos/2024-01-01/D1/ABC123.mp4"
    );
    assert_eq!(published.digest, digest);
}

#[tokio::test]
async fn test_republish_targets_the_same_key() {
    let server = MockServer::start().await;
    Mock::given(method("PUT"))
        .and(path("/alarm-evidence/videos/2024-01-01/D1/ABC123.mp4"))
        .respond_with(ResponseTemplate::new(200))
        .expect(2)
        .mount(&server)
        .await;

    let dir = TempDir::new().unwrap();
    let alarm = AlarmReference::parse("D1", "2024-01-01T10:00:00Z", "ABC123").unwrap();
    let s = store(&server, None);
    let first = s.publish(&video(&dir), &alarm).await.unwrap();
    let second = s.publish(&video(&dir), &alarm).await.unwrap();
    assert_eq!(first, second);
}

#[tokio::test]
async fn test_storage_error_is_upload_failure() {
    let server = MockServer::start().await;
    Mock::given(method("PUT"))
        .respond_with(ResponseTemplate::new(403).set_body_string("AccessDenied"))
        .mount(&server)
        .await;

    let dir = TempDir::new().unwrap();
    let alarm = AlarmReference::parse("D1", "2024-01-01T10:00:00Z", "ABC123").unwrap();
    let err = store(&server, None)
        .publish(&video(&dir), &alarm)
        .await
        .unwrap_err();

    assert_eq!(err.kind(), "upload_failed");
    assert!(err.to_string().contains("AccessDenied"));
}

#[tokio::test]
async fn test_missing_video_is_upload_failure() {
    let server = MockServer::start().await;
    let dir = TempDir::new().unwrap();
    let alarm = AlarmReference::parse("D1", "2024-01-01T10:00:00Z", "ABC123").unwrap();

    let err = store(&server, None)
        .publish(&dir.path().join("absent.mp4"), &alarm)
        .await
        .unwrap_err();
    assert_eq!(err.kind(), "upload_failed");
}
