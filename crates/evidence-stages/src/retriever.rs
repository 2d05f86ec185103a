//! Local Retriever: streams a completed task's artifact to the scratch directory
use async_trait::async_trait;
use evidence_core::{AlarmReference, ArtifactRetriever, EvidenceError, EvidenceResult, TaskReady};
use reqwest::StatusCode;
use std::path::Path;
use tokio::io::AsyncWriteExt;
use tracing::{debug, warn};

use crate::telematics::TelematicsClient;

/// Download type "to local file" of the artifact endpoint.
const DOWN_TYPE_FILE: u32 = 3;
const MEDIA_TYPE_VIDEO: u32 = 1;

#[async_trait]
impl ArtifactRetriever for TelematicsClient {
    async fn retrieve(
        &self,
        ready: &TaskReady,
        alarm: &AlarmReference,
        destination: &Path,
    ) -> EvidenceResult<u64> {
        let result = self.stream_to_file(ready, alarm, destination).await;
        if result.is_err() {
            if let Err(e) = tokio::fs::remove_file(destination).await {
                if e.kind() != std::io::ErrorKind::NotFound {
                    warn!(path = %destination.display(), error = %e, "could not remove partial download");
                }
            }
        }
        result
    }
}

impl TelematicsClient {
    async fn stream_to_file(
        &self,
        ready: &TaskReady,
        alarm: &AlarmReference,
        destination: &Path,
    ) -> EvidenceResult<u64> {
        let save_name = destination
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or(alarm.guid.as_str())
            .to_string();

        let mut query: Vec<(&str, String)> = vec![
            ("DownType", DOWN_TYPE_FILE.to_string()),
            ("DevIDNO", ready.data_id.clone()),
            ("FLENGTH", ready.length.to_string()),
            ("FOFFSET", "0".to_string()),
            ("MTYPE", MEDIA_TYPE_VIDEO.to_string()),
            ("FPATH", ready.data_path.clone()),
            ("SAVENAME", save_name),
        ];
        let token = self
            .session()
            .await
            .map_err(|e| EvidenceError::download(e.to_string()))?;
        if let Some(token) = &token {
            query.push(("jsession", token.clone()));
        }

        let url = Self::endpoint(&self.config.download_base_url, &self.config.download_path);
        debug!(guid = %alarm.guid, data_id = %ready.data_id, length = ready.length, "downloading artifact");

        let mut response = self
            .http
            .get(&url)
            .query(&query)
            .send()
            .await
            .map_err(|e| EvidenceError::download(format!("request: {e}")))?;

        let status = response.status();
        if status == StatusCode::UNAUTHORIZED {
            if let Some(stale) = &token {
                self.forget_session(stale).await;
            }
        }
        if !status.is_success() {
            return Err(EvidenceError::download(format!("server answered {status}")));
        }

        let mut file = tokio::fs::File::create(destination)
            .await
            .map_err(|e| EvidenceError::download(format!("{}: {e}", destination.display())))?;

        let mut written: u64 = 0;
        while let Some(chunk) = response
            .chunk()
            .await
            .map_err(|e| EvidenceError::download(format!("body: {e}")))?
        {
            written += chunk.len() as u64;
            if written > ready.length {
                return Err(EvidenceError::download(format!(
                    "length mismatch: expected {} bytes, server sent more",
                    ready.length
                )));
            }
            file.write_all(&chunk)
                .await
                .map_err(|e| EvidenceError::download(format!("write: {e}")))?;
        }
        file.flush()
            .await
            .map_err(|e| EvidenceError::download(format!("flush: {e}")))?;

        if written != ready.length {
            return Err(EvidenceError::download(format!(
                "length mismatch: expected {} bytes, received {written}",
                ready.length
            )));
        }
        Ok(written)
    }
}
