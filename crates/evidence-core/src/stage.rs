//! Stage contracts: pipeline states and the collaborators each stage drives
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use thiserror::Error;

use crate::data_model::{
    AlarmReference, EvidenceRecord, FileEntry, PublishedObject, TaskReady, TaskStatusResponse,
    VideoWindow,
};
use crate::error::EvidenceResult;

/// States of one alarm's pipeline run, in execution order.
///
/// Transitions are strictly linear; any state may end in a failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Start,
    TaskRequested,
    Polling,
    Downloaded,
    Transcoded,
    Published,
    LedgerUpdated,
}

impl Stage {
    pub fn id(&self) -> &'static str {
        match self {
            Self::Start => "start",
            Self::TaskRequested => "task.requested",
            Self::Polling => "task.polling",
            Self::Downloaded => "artifact.downloaded",
            Self::Transcoded => "artifact.transcoded",
            Self::Published => "evidence.published",
            Self::LedgerUpdated => "ledger.updated",
        }
    }

    pub fn next(&self) -> Option<Stage> {
        match self {
            Self::Start => Some(Self::TaskRequested),
            Self::TaskRequested => Some(Self::Polling),
            Self::Polling => Some(Self::Downloaded),
            Self::Downloaded => Some(Self::Transcoded),
            Self::Transcoded => Some(Self::Published),
            Self::Published => Some(Self::LedgerUpdated),
            Self::LedgerUpdated => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.next().is_none()
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.id())
    }
}

/// Connection-level failure talking to the task server. Always retried by the poller.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("transport: {0}")]
pub struct TransportError(pub String);

/// Upstream query listing the device's recorded files for a window.
#[async_trait]
pub trait FileLocator: Send + Sync {
    async fn locate(
        &self,
        alarm: &AlarmReference,
        window: &VideoWindow,
    ) -> EvidenceResult<Vec<FileEntry>>;
}

/// One GET against a task URL. The first call for a URL creates the remote job.
#[async_trait]
pub trait TaskStatusSource: Send + Sync {
    async fn fetch_status(&self, task_url: &str) -> Result<TaskStatusResponse, TransportError>;
}

/// Streams a completed remote artifact to `destination`, returning bytes written.
#[async_trait]
pub trait ArtifactRetriever: Send + Sync {
    async fn retrieve(
        &self,
        ready: &TaskReady,
        alarm: &AlarmReference,
        destination: &Path,
    ) -> EvidenceResult<u64>;
}

/// Converts the raw container at `raw` into a playable file and returns its path.
#[async_trait]
pub trait VideoTranscoder: Send + Sync {
    async fn transcode(&self, raw: &Path) -> EvidenceResult<PathBuf>;
}

/// Uploads the final video under a key derived only from the alarm.
#[async_trait]
pub trait EvidencePublisher: Send + Sync {
    async fn publish(
        &self,
        video: &Path,
        alarm: &AlarmReference,
    ) -> EvidenceResult<PublishedObject>;
}

/// Keyed update of the alarm ledger. Returns the number of rows matched.
#[async_trait]
pub trait EvidenceLedger: Send + Sync {
    async fn update_video(&self, record: &EvidenceRecord) -> EvidenceResult<u64>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stages_form_a_single_chain() {
        let mut seen = vec![Stage::Start];
        let mut current = Stage::Start;
        while let Some(next) = current.next() {
            assert!(!seen.contains(&next));
            seen.push(next);
            current = next;
        }
        assert_eq!(current, Stage::LedgerUpdated);
        assert!(current.is_terminal());
        assert_eq!(seen.len(), 7);
    }
}
