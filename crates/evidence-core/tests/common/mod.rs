//! In-memory collaborators for pipeline tests.
#![allow(dead_code)]

use async_trait::async_trait;
use evidence_core::{
    AlarmReference, ArtifactRetriever, Collaborators, EvidenceError, EvidenceLedger,
    EvidencePublisher, EvidenceRecord, EvidenceResult, FileEntry, FileLocator, PublishedObject,
    TaskReady, TaskStatusResponse, TaskStatusSource, TransportError, VideoTranscoder, VideoWindow,
};
use std::collections::{HashMap, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

#[derive(Default)]
pub struct FakeLocator {
    pub files: Vec<FileEntry>,
    pub calls: AtomicUsize,
}

impl FakeLocator {
    pub fn with_one_file() -> Self {
        Self {
            files: vec![FileEntry::new(
                "http://cms:8088/StandardApiAction_addDownloadTask.action?did=D1&jsession=s",
            )],
            calls: AtomicUsize::new(0),
        }
    }

    pub fn empty() -> Self {
        Self::default()
    }
}

#[async_trait]
impl FileLocator for FakeLocator {
    async fn locate(
        &self,
        _alarm: &AlarmReference,
        _window: &VideoWindow,
    ) -> EvidenceResult<Vec<FileEntry>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.files.clone())
    }
}

/// Replays scripted responses, then repeats `fallback`.
pub struct ScriptedStatus {
    script: Mutex<VecDeque<Result<TaskStatusResponse, TransportError>>>,
    fallback: Result<TaskStatusResponse, TransportError>,
    pub calls: AtomicUsize,
    pub urls: Mutex<Vec<String>>,
}

impl ScriptedStatus {
    pub fn new(
        script: Vec<Result<TaskStatusResponse, TransportError>>,
        fallback: Result<TaskStatusResponse, TransportError>,
    ) -> Self {
        Self {
            script: Mutex::new(script.into()),
            fallback,
            calls: AtomicUsize::new(0),
            urls: Mutex::new(Vec::new()),
        }
    }

    pub fn ready_after(not_ready: usize, result: i64) -> Self {
        let mut script: Vec<_> = (0..not_ready)
            .map(|_| Ok(TaskStatusResponse::new(2, 1)))
            .collect();
        script.push(Ok(TaskStatusResponse::completed(result, "X", 1_000_000, "/path")));
        Self::new(script, Ok(TaskStatusResponse::new(2, 1)))
    }

    pub fn never_ready() -> Self {
        Self::new(Vec::new(), Ok(TaskStatusResponse::new(2, 1)))
    }

    pub fn always_unreachable() -> Self {
        Self::new(
            Vec::new(),
            Err(TransportError("connection refused".to_string())),
        )
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl TaskStatusSource for ScriptedStatus {
    async fn fetch_status(&self, task_url: &str) -> Result<TaskStatusResponse, TransportError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.urls.lock().unwrap().push(task_url.to_string());
        let next = self.script.lock().unwrap().pop_front();
        next.unwrap_or_else(|| self.fallback.clone())
    }
}

#[derive(Default)]
pub struct FakeRetriever {
    pub calls: AtomicUsize,
    pub seen: Mutex<Vec<TaskReady>>,
}

#[async_trait]
impl ArtifactRetriever for FakeRetriever {
    async fn retrieve(
        &self,
        ready: &TaskReady,
        _alarm: &AlarmReference,
        destination: &Path,
    ) -> EvidenceResult<u64> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.seen.lock().unwrap().push(ready.clone());
        let body = vec![0u8; 64];
        tokio::fs::write(destination, &body)
            .await
            .map_err(|e| EvidenceError::download(e.to_string()))?;
        Ok(body.len() as u64)
    }
}

/// Renames `.grec` to `.mp4`, or fails / hangs when asked to.
#[derive(Default)]
pub struct FakeTranscoder {
    pub calls: AtomicUsize,
    pub fail: bool,
    pub hang: bool,
}

#[async_trait]
impl VideoTranscoder for FakeTranscoder {
    async fn transcode(&self, raw: &Path) -> EvidenceResult<PathBuf> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.hang {
            tokio::time::sleep(Duration::from_secs(3_600)).await;
        }
        if self.fail {
            tokio::fs::remove_file(raw).await.ok();
            return Err(EvidenceError::TranscodeFailed {
                exit_status: Some(1),
                reason: "encoder crashed".to_string(),
            });
        }
        let out = raw.with_extension("mp4");
        tokio::fs::rename(raw, &out)
            .await
            .map_err(|e| EvidenceError::TranscodeFailed {
                exit_status: None,
                reason: e.to_string(),
            })?;
        Ok(out)
    }
}

#[derive(Default)]
pub struct FakePublisher {
    pub calls: AtomicUsize,
    pub fail: bool,
}

#[async_trait]
impl EvidencePublisher for FakePublisher {
    async fn publish(
        &self,
        _video: &Path,
        alarm: &AlarmReference,
    ) -> EvidenceResult<PublishedObject> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.fail {
            return Err(EvidenceError::upload("403 Forbidden"));
        }
        let key = format!("videos/{}.mp4", alarm.guid);
        Ok(PublishedObject {
            url: format!("https://cdn.example/{key}"),
            key,
            digest: "blake3:00".to_string(),
        })
    }
}

/// Rows keyed by guid; `update_video` only touches existing rows.
#[derive(Default)]
pub struct FakeLedger {
    pub rows: Mutex<HashMap<String, Option<String>>>,
    pub calls: AtomicUsize,
}

impl FakeLedger {
    pub fn with_alarm(guid: &str) -> Self {
        let ledger = Self::default();
        ledger.rows.lock().unwrap().insert(guid.to_string(), None);
        ledger
    }

    pub fn video(&self, guid: &str) -> Option<String> {
        self.rows.lock().unwrap().get(guid).cloned().flatten()
    }
}

#[async_trait]
impl EvidenceLedger for FakeLedger {
    async fn update_video(&self, record: &EvidenceRecord) -> EvidenceResult<u64> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let mut rows = self.rows.lock().unwrap();
        match rows.get_mut(&record.guid) {
            Some(slot) => {
                *slot = Some(record.video_url.clone());
                Ok(1)
            }
            None => Ok(0),
        }
    }
}

pub struct Harness {
    pub locator: Arc<FakeLocator>,
    pub status: Arc<ScriptedStatus>,
    pub retriever: Arc<FakeRetriever>,
    pub transcoder: Arc<FakeTranscoder>,
    pub publisher: Arc<FakePublisher>,
    pub ledger: Arc<FakeLedger>,
}

impl Harness {
    pub fn new(locator: FakeLocator, status: ScriptedStatus, ledger: FakeLedger) -> Self {
        Self {
            locator: Arc::new(locator),
            status: Arc::new(status),
            retriever: Arc::new(FakeRetriever::default()),
            transcoder: Arc::new(FakeTranscoder::default()),
            publisher: Arc::new(FakePublisher::default()),
            ledger: Arc::new(ledger),
        }
    }

    pub fn collaborators(&self) -> Collaborators {
        Collaborators {
            locator: self.locator.clone(),
            status: self.status.clone(),
            retriever: self.retriever.clone(),
            transcoder: self.transcoder.clone(),
            publisher: self.publisher.clone(),
            ledger: self.ledger.clone(),
        }
    }

    pub fn downloads(&self) -> usize {
        self.retriever.calls.load(Ordering::SeqCst)
    }

    pub fn transcodes(&self) -> usize {
        self.transcoder.calls.load(Ordering::SeqCst)
    }

    pub fn uploads(&self) -> usize {
        self.publisher.calls.load(Ordering::SeqCst)
    }

    pub fn ledger_writes(&self) -> usize {
        self.ledger.calls.load(Ordering::SeqCst)
    }
}

pub fn alarm() -> AlarmReference {
    AlarmReference::parse("D1", "2024-01-01T10:00:00Z", "ABC123").unwrap()
}
