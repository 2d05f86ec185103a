//! Evidence Publisher: uploads the final video to object storage over HTTP PUT
use async_trait::async_trait;
use evidence_core::config::StorageConfig;
use evidence_core::data_model::FINAL_EXTENSION;
use evidence_core::{
    AlarmReference, EvidenceError, EvidencePublisher, EvidenceResult, PublishedObject,
};
use std::path::Path;
use std::time::Duration;
use tracing::info;

pub const DIGEST_HEADER: &str = "x-amz-meta-content-digest";

pub struct HttpObjectStore {
    http: reqwest::Client,
    config: StorageConfig,
}

impl HttpObjectStore {
    pub fn new(config: StorageConfig) -> EvidenceResult<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()
            .map_err(|e| EvidenceError::Config(format!("http client: {e}")))?;
        Ok(Self { http, config })
    }

    /// `{prefix}/{YYYY-MM-DD}/{device}/{guid}.mp4`, date in UTC. Depends only on
    /// the alarm, so a re-run overwrites the same object.
    pub fn object_key(&self, alarm: &AlarmReference) -> String {
        let date = alarm.alarm_time.naive_utc().date().format("%Y-%m-%d");
        let prefix = self.config.key_prefix.trim_matches('/');
        let name = format!("{}/{}.{}", alarm.device_id, alarm.guid, FINAL_EXTENSION);
        if prefix.is_empty() {
            format!("{date}/{name}")
        } else {
            format!("{prefix}/{date}/{name}")
        }
    }

    pub fn public_url(&self, key: &str) -> String {
        format!("{}/{}", self.config.public_base_url.trim_end_matches('/'), key)
    }

    fn upload_url(&self, key: &str) -> String {
        format!(
            "{}/{}/{}",
            self.config.endpoint.trim_end_matches('/'),
            self.config.bucket.trim_matches('/'),
            key
        )
    }
}

#[async_trait]
impl EvidencePublisher for HttpObjectStore {
    async fn publish(
        &self,
        video: &Path,
        alarm: &AlarmReference,
    ) -> EvidenceResult<PublishedObject> {
        let body = tokio::fs::read(video)
            .await
            .map_err(|e| EvidenceError::upload(format!("{}: {e}", video.display())))?;
        let digest = format!("blake3:{}", blake3::hash(&body));
        let key = self.object_key(alarm);
        let size = body.len();

        let mut request = self
            .http
            .put(self.upload_url(&key))
            .header(reqwest::header::CONTENT_TYPE, "video/mp4")
            .header(DIGEST_HEADER, &digest)
            .body(body);
        if let Some(token) = &self.config.token {
            request = request.bearer_auth(token);
        }

        let response = request
            .send()
            .await
            .map_err(|e| EvidenceError::upload(format!("request: {e}")))?;
        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(EvidenceError::upload(format!(
                "storage answered {status}: {}",
                text.trim()
            )));
        }

        let url = self.public_url(&key);
        info!(guid = %alarm.guid, key = %key, bytes = size, "evidence uploaded");
        Ok(PublishedObject { url, key, digest })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store(prefix: &str) -> HttpObjectStore {
        HttpObjectStore::new(StorageConfig {
            key_prefix: prefix.to_string(),
            public_base_url: "https://cdn.example/evidence/".to_string(),
            ..StorageConfig::default()
        })
        .unwrap()
    }

    #[test]
    fn test_key_is_deterministic_and_utc_dated() {
        let alarm = AlarmReference::parse("D1", "2024-01-01T22:30:00-03:00", "ABC123").unwrap();
        let s = store("/videos/");
        assert_eq!(s.object_key(&alarm), "videos/2024-01-02/D1/ABC123.mp4");
        assert_eq!(s.object_key(&alarm), s.object_key(&alarm.clone()));
        assert_eq!(
            s.public_url(&s.object_key(&alarm)),
            "https://cdn.example/evidence/videos/2024-01-02/D1/ABC123.mp4"
        );
    }

    #[test]
    fn test_empty_prefix() {
        let alarm = AlarmReference::parse("D1", "2024-01-01T10:00:00Z", "ABC123").unwrap();
        assert_eq!(store("").object_key(&alarm), "2024-01-01/D1/ABC123.mp4");
    }
}
