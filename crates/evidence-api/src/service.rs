//! Pipeline dispatch shared by the HTTP trigger and the retry sweep.
use evidence_core::{
    AlarmReference, DedupGuard, DedupKey, EvidenceResult, InFlight, PipelineReport, PipelineRunner,
};
use std::sync::Arc;
use std::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::metrics::PipelineMetrics;

pub const OUTCOME_SUCCESS: &str = "success";

pub struct PipelineService {
    runner: PipelineRunner,
    dedup: DedupGuard,
    metrics: Arc<PipelineMetrics>,
    shutdown: CancellationToken,
}

impl PipelineService {
    pub fn new(
        runner: PipelineRunner,
        metrics: Arc<PipelineMetrics>,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            runner,
            dedup: DedupGuard::new(),
            metrics,
            shutdown,
        }
    }

    /// Reserve the alarm's device/window. `None` when a run for it is already
    /// in flight in this process.
    pub fn claim(&self, alarm: &AlarmReference) -> EvidenceResult<Option<InFlight>> {
        let window = self.runner.window_for(alarm)?;
        Ok(self
            .dedup
            .try_acquire(DedupKey::new(&alarm.device_id, &window)))
    }

    /// Run a pipeline whose window was reserved with [`PipelineService::claim`].
    pub async fn run_claimed(
        &self,
        alarm: &AlarmReference,
        claim: InFlight,
    ) -> EvidenceResult<PipelineReport> {
        let started = Instant::now();
        let result = self.runner.run_until(alarm, &self.shutdown).await;
        drop(claim);

        let outcome = match &result {
            Ok(_) => OUTCOME_SUCCESS,
            Err(e) => e.kind(),
        };
        self.metrics.observe(outcome, started.elapsed());
        result
    }

    /// Claim and run. `Ok(None)` means the same window was already running.
    pub async fn dispatch(&self, alarm: &AlarmReference) -> EvidenceResult<Option<PipelineReport>> {
        match self.claim(alarm)? {
            Some(claim) => self.run_claimed(alarm, claim).await.map(Some),
            None => {
                info!(guid = %alarm.guid, device_id = %alarm.device_id, "window already in flight");
                Ok(None)
            }
        }
    }

    pub fn in_flight(&self) -> usize {
        self.dedup.len()
    }

    pub fn metrics(&self) -> &PipelineMetrics {
        &self.metrics
    }

    pub fn shutdown(&self) -> &CancellationToken {
        &self.shutdown
    }
}
