#![allow(dead_code)]

use async_trait::async_trait;
use chrono::{DateTime, Duration as ChronoDuration, SubsecRound, Utc};
use evidence_api::AppState;
use evidence_core::data_model::FINAL_EXTENSION;
use evidence_core::{
    AlarmRecord, AlarmReference, ArtifactRetriever, Collaborators, EvidenceError,
    EvidencePublisher, EvidenceResult, FileEntry, FileLocator, PipelineConfig, PipelineRunner,
    PublishedObject, TaskReady, TaskStatusResponse, TaskStatusSource, TransportError,
    VideoTranscoder, VideoWindow,
};
use evidence_stages::SqliteLedger;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;

/// Serves one recording per alarm, or none when `empty`.
pub struct Locator {
    pub empty: bool,
    pub calls: Mutex<Vec<String>>,
}

#[async_trait]
impl FileLocator for Locator {
    async fn locate(
        &self,
        alarm: &AlarmReference,
        _window: &VideoWindow,
    ) -> EvidenceResult<Vec<FileEntry>> {
        self.calls.lock().unwrap().push(alarm.guid.clone());
        if self.empty {
            return Ok(Vec::new());
        }
        Ok(vec![FileEntry::new(format!(
            "http://cms/StandardApiAction_addDownloadTask.action?did={}",
            alarm.device_id
        ))])
    }
}

pub struct ReadyStatus;

#[async_trait]
impl TaskStatusSource for ReadyStatus {
    async fn fetch_status(&self, _task_url: &str) -> Result<TaskStatusResponse, TransportError> {
        Ok(TaskStatusResponse::completed(0, "D1", 16, "/rec/a.grec"))
    }
}

pub struct Retriever;

#[async_trait]
impl ArtifactRetriever for Retriever {
    async fn retrieve(
        &self,
        ready: &TaskReady,
        _alarm: &AlarmReference,
        destination: &Path,
    ) -> EvidenceResult<u64> {
        tokio::fs::write(destination, vec![0u8; ready.length as usize])
            .await
            .map_err(|e| EvidenceError::download(e.to_string()))?;
        Ok(ready.length)
    }
}

pub struct Transcoder;

#[async_trait]
impl VideoTranscoder for Transcoder {
    async fn transcode(&self, raw: &Path) -> EvidenceResult<PathBuf> {
        let out = raw.with_extension(FINAL_EXTENSION);
        tokio::fs::rename(raw, &out)
            .await
            .map_err(|e| EvidenceError::TranscodeFailed {
                exit_status: None,
                reason: e.to_string(),
            })?;
        Ok(out)
    }
}

pub struct Publisher;

#[async_trait]
impl EvidencePublisher for Publisher {
    async fn publish(
        &self,
        _video: &Path,
        alarm: &AlarmReference,
    ) -> EvidenceResult<PublishedObject> {
        let key = format!("videos/{}.mp4", alarm.guid);
        Ok(PublishedObject {
            url: format!("https://cdn.example/{key}"),
            key,
            digest: "blake3:00".to_string(),
        })
    }
}

pub struct Harness {
    pub dir: TempDir,
    pub config: PipelineConfig,
    pub ledger: Arc<SqliteLedger>,
    pub locator: Arc<Locator>,
    pub state: AppState,
}

pub fn test_config(dir: &TempDir) -> PipelineConfig {
    let mut config = PipelineConfig::default();
    config.ledger.path = dir.path().join("alarms.db");
    config.retry.tracker_path = dir.path().join("tracker.json");
    config.retry.dispatch_pause_secs = 0;
    config.runtime.scratch_dir = dir.path().join("scratch");
    config.poll.not_ready_delay_ms = 1;
    config.poll.transient_delay_ms = 1;
    config
}

impl Harness {
    pub async fn new(empty_locator: bool) -> Self {
        Self::with_config(empty_locator, |_| {}).await
    }

    pub async fn with_config(empty_locator: bool, tweak: impl FnOnce(&mut PipelineConfig)) -> Self {
        let dir = TempDir::new().unwrap();
        let mut config = test_config(&dir);
        tweak(&mut config);

        let ledger = Arc::new(SqliteLedger::new(&config.ledger).unwrap());
        ledger.ensure_schema().await.unwrap();
        let locator = Arc::new(Locator {
            empty: empty_locator,
            calls: Mutex::new(Vec::new()),
        });
        let collaborators = Collaborators {
            locator: locator.clone(),
            status: Arc::new(ReadyStatus),
            retriever: Arc::new(Retriever),
            transcoder: Arc::new(Transcoder),
            publisher: Arc::new(Publisher),
            ledger: ledger.clone(),
        };
        let runner = PipelineRunner::new(&config, collaborators);
        let state = AppState::assemble(&config, runner, ledger.clone(), CancellationToken::new())
            .await
            .unwrap();

        Self {
            dir,
            config,
            ledger,
            locator,
            state,
        }
    }

    pub fn located(&self) -> Vec<String> {
        self.locator.calls.lock().unwrap().clone()
    }

    /// Wait until the ledger row for `guid` carries a video url.
    pub async fn wait_for_video(&self, guid: &str) -> Option<String> {
        for _ in 0..200 {
            if let Some(video) = self
                .ledger
                .get(guid)
                .await
                .unwrap()
                .and_then(|row| row.video)
                .filter(|v| !v.is_empty())
            {
                return Some(video);
            }
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        }
        None
    }
}

/// A suspect alarm without video raised `hours_ago` hours before now.
pub fn suspect(guid: &str, hours_ago: i64) -> AlarmRecord {
    AlarmRecord {
        guid: guid.to_string(),
        device_id: "D1".to_string(),
        alarm_time: hours_before_now(hours_ago),
        state: "Sospechosa".to_string(),
        video: None,
        interno: Some("17".to_string()),
    }
}

pub fn hours_before_now(hours: i64) -> DateTime<Utc> {
    (Utc::now() - ChronoDuration::hours(hours)).trunc_subsecs(0)
}
