//! Execution Context: per-run identity and scratch space
use std::path::{Path, PathBuf};
use std::time::Instant;
use tracing::warn;

use crate::data_model::{AlarmReference, LocalArtifact};

#[derive(Debug, Clone)]
pub struct ExecutionContext {
    pub trace_id: String,
    pub guid: String,
    /// `<scratch root>/<guid>`, owned by this run only.
    pub scratch_dir: PathBuf,
    pub artifact: LocalArtifact,
    pub started: Instant,
}

impl ExecutionContext {
    pub fn new(alarm: &AlarmReference, scratch_root: &Path) -> Self {
        let scratch_dir = scratch_root.join(&alarm.guid);
        Self {
            trace_id: uuid::Uuid::new_v4().to_string(),
            guid: alarm.guid.clone(),
            artifact: LocalArtifact::new(&scratch_dir, &alarm.guid),
            scratch_dir,
            started: Instant::now(),
        }
    }

    /// Remove the raw and intermediate forms; the final video is left in place.
    pub async fn discard_intermediates(&self) {
        for path in [self.artifact.raw_path(), self.artifact.intermediate_path()] {
            remove_if_present(&path).await;
        }
    }

    /// Remove the whole scratch directory, final video included.
    pub async fn discard_all(&self) {
        match tokio::fs::remove_dir_all(&self.scratch_dir).await {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => warn!(guid = %self.guid, dir = %self.scratch_dir.display(), error = %e, "scratch cleanup failed"),
        }
    }
}

async fn remove_if_present(path: &Path) {
    match tokio::fs::remove_file(path).await {
        Ok(()) => {}
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => warn!(path = %path.display(), error = %e, "could not remove scratch file"),
    }
}
