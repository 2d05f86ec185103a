//! Pipeline Runner: sequences the evidence stages for one alarm
//!
//! `START → TaskRequested → Polling → Downloaded → Transcoded → Published →
//! LedgerUpdated`. Only the polling stage retries; every other stage runs
//! once and a failure ends the run.
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::config::{PipelineConfig, TaskParams};
use crate::context::ExecutionContext;
use crate::data_model::{
    AlarmReference, EvidenceRecord, PipelineReport, RemoteTask, StageReport, VideoWindow,
};
use crate::error::{EvidenceError, EvidenceResult};
use crate::poller::TaskPoller;
use crate::requester::{build_task_url, select_file};
use crate::stage::{
    ArtifactRetriever, EvidenceLedger, EvidencePublisher, FileLocator, Stage, TaskStatusSource,
    VideoTranscoder,
};

/// External systems the pipeline drives.
#[derive(Clone)]
pub struct Collaborators {
    pub locator: Arc<dyn FileLocator>,
    pub status: Arc<dyn TaskStatusSource>,
    pub retriever: Arc<dyn ArtifactRetriever>,
    pub transcoder: Arc<dyn VideoTranscoder>,
    pub publisher: Arc<dyn EvidencePublisher>,
    pub ledger: Arc<dyn EvidenceLedger>,
}

pub struct PipelineRunner {
    collaborators: Collaborators,
    poller: TaskPoller,
    margin: chrono::Duration,
    task_params: TaskParams,
    scratch_root: PathBuf,
    budget: Duration,
}

impl PipelineRunner {
    pub fn new(config: &PipelineConfig, collaborators: Collaborators) -> Self {
        let poller = TaskPoller::new(Arc::clone(&collaborators.status), config.poll.clone());
        Self {
            collaborators,
            poller,
            margin: config.window.margin(),
            task_params: config.task.clone(),
            scratch_root: config.runtime.scratch_dir.clone(),
            budget: config.runtime.pipeline_budget(),
        }
    }

    pub fn window_for(&self, alarm: &AlarmReference) -> EvidenceResult<VideoWindow> {
        VideoWindow::around(alarm.alarm_time, self.margin)
    }

    pub async fn run(&self, alarm: &AlarmReference) -> EvidenceResult<PipelineReport> {
        self.run_until(alarm, &CancellationToken::new()).await
    }

    /// Run bounded by the configured wall-clock budget and by `cancel`.
    ///
    /// On cancellation the run's scratch directory is removed and the ledger
    /// is left untouched.
    pub async fn run_until(
        &self,
        alarm: &AlarmReference,
        cancel: &CancellationToken,
    ) -> EvidenceResult<PipelineReport> {
        let ctx = ExecutionContext::new(alarm, &self.scratch_root);
        info!(guid = %alarm.guid, device_id = %alarm.device_id, trace_id = %ctx.trace_id, alarm_time = %alarm.alarm_time, "pipeline started");

        let outcome = tokio::select! {
            res = tokio::time::timeout(self.budget, self.run_stages(alarm, &ctx)) => {
                res.unwrap_or(Err(EvidenceError::Cancelled { budget: self.budget }))
            }
            _ = cancel.cancelled() => Err(EvidenceError::Cancelled { budget: self.budget }),
        };

        match &outcome {
            Ok(report) => {
                info!(
                    guid = %alarm.guid,
                    video_url = %report.video_url,
                    rows_affected = report.rows_affected,
                    elapsed_ms = ctx.started.elapsed().as_millis() as u64,
                    "pipeline finished"
                );
            }
            Err(e @ EvidenceError::Cancelled { .. }) => {
                ctx.discard_all().await;
                error!(guid = %alarm.guid, kind = e.kind(), error = %e, "pipeline cancelled");
            }
            Err(e) => {
                ctx.discard_intermediates().await;
                error!(guid = %alarm.guid, kind = e.kind(), error = %e, "pipeline failed");
            }
        }

        outcome
    }

    async fn run_stages(
        &self,
        alarm: &AlarmReference,
        ctx: &ExecutionContext,
    ) -> EvidenceResult<PipelineReport> {
        let c = &self.collaborators;
        let guid = alarm.guid.as_str();
        let fail = move |stage: Stage| move |e: EvidenceError| self.failed(guid, stage, e);
        let mut stages = Vec::new();

        // START → TaskRequested
        let clock = Instant::now();
        let window = self.window_for(alarm).map_err(fail(Stage::TaskRequested))?;
        let files = c
            .locator
            .locate(alarm, &window)
            .await
            .map_err(fail(Stage::TaskRequested))?;
        let file = select_file(alarm, &files).map_err(fail(Stage::TaskRequested))?;
        let task_url = build_task_url(&file.down_task_url, &window, &self.task_params)
            .map_err(fail(Stage::TaskRequested))?;
        let mut task = RemoteTask::new(task_url);
        stages.push(self.reached(guid, Stage::TaskRequested, clock));

        // Polling
        let clock = Instant::now();
        let ready = self
            .poller
            .poll(&mut task, guid)
            .await
            .map_err(fail(Stage::Polling))?;
        stages.push(self.reached(guid, Stage::Polling, clock));

        // Downloaded
        let clock = Instant::now();
        tokio::fs::create_dir_all(&ctx.scratch_dir)
            .await
            .map_err(|e| {
                EvidenceError::download(format!("scratch dir {}: {e}", ctx.scratch_dir.display()))
            })
            .map_err(fail(Stage::Downloaded))?;
        let raw = ctx.artifact.raw_path();
        let bytes = c
            .retriever
            .retrieve(&ready, alarm, &raw)
            .await
            .map_err(fail(Stage::Downloaded))?;
        info!(guid, bytes, path = %raw.display(), "artifact stored locally");
        stages.push(self.reached(guid, Stage::Downloaded, clock));

        // Transcoded
        let clock = Instant::now();
        let video = c
            .transcoder
            .transcode(&raw)
            .await
            .map_err(fail(Stage::Transcoded))?;
        stages.push(self.reached(guid, Stage::Transcoded, clock));

        // Published
        let clock = Instant::now();
        let published = c
            .publisher
            .publish(&video, alarm)
            .await
            .map_err(fail(Stage::Published))?;
        stages.push(self.reached(guid, Stage::Published, clock));

        // LedgerUpdated
        let clock = Instant::now();
        let record = EvidenceRecord {
            guid: alarm.guid.clone(),
            video_url: published.url.clone(),
        };
        let rows_affected = c
            .ledger
            .update_video(&record)
            .await
            .map_err(fail(Stage::LedgerUpdated))?;
        if rows_affected == 0 {
            warn!(guid, "ledger has no alarm with this guid; video url not recorded");
        }
        stages.push(self.reached(guid, Stage::LedgerUpdated, clock));

        Ok(PipelineReport {
            trace_id: ctx.trace_id.clone(),
            guid: alarm.guid.clone(),
            video_url: published.url,
            object_key: published.key,
            content_digest: published.digest,
            rows_affected,
            stages,
        })
    }

    fn failed(&self, guid: &str, stage: Stage, e: EvidenceError) -> EvidenceError {
        warn!(guid, stage = stage.id(), kind = e.kind(), error = %e, "stage failed");
        e
    }

    fn reached(&self, guid: &str, stage: Stage, clock: Instant) -> StageReport {
        let latency_ms = clock.elapsed().as_millis() as u64;
        info!(guid, stage = stage.id(), latency_ms, "stage reached");
        StageReport { stage, latency_ms }
    }
}
