//! Retry sweep: re-runs the pipeline for suspect alarms that still have no video
//!
//! Attempts per alarm are counted in a JSON tracker file so the cap survives
//! restarts. A successful run removes the alarm from the tracker.
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use evidence_core::config::RetryConfig;
use evidence_core::EvidenceResult;
use evidence_stages::SqliteLedger;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, Semaphore};
use tokio::task::JoinSet;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::service::PipelineService;

// ============================================================================
// TRACKER
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryEntry {
    pub retry_count: u32,
    pub first_retry_at: DateTime<Utc>,
    pub last_retry_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
pub struct TrackedAlarm {
    pub guid: String,
    #[serde(flatten)]
    pub entry: RetryEntry,
}

#[derive(Debug, Clone, Serialize)]
pub struct RetryStats {
    pub total_tracked: usize,
    pub by_retry_count: BTreeMap<u32, usize>,
    pub alarms: Vec<TrackedAlarm>,
}

pub struct RetryTracker {
    path: PathBuf,
    entries: Mutex<BTreeMap<String, RetryEntry>>,
}

impl RetryTracker {
    /// Load the tracker file. A missing file starts empty; an unreadable one
    /// is logged and also starts empty.
    pub async fn load(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let entries = match tokio::fs::read(&path).await {
            Ok(raw) => match serde_json::from_slice(&raw) {
                Ok(entries) => entries,
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "retry tracker unreadable, starting empty");
                    BTreeMap::new()
                }
            },
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => BTreeMap::new(),
            Err(e) => {
                warn!(path = %path.display(), error = %e, "retry tracker unreadable, starting empty");
                BTreeMap::new()
            }
        };
        info!(path = %path.display(), tracked = entries.len(), "retry tracker loaded");
        Self {
            path,
            entries: Mutex::new(entries),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub async fn count(&self, guid: &str) -> u32 {
        self.entries
            .lock()
            .await
            .get(guid)
            .map(|e| e.retry_count)
            .unwrap_or(0)
    }

    /// Record one more attempt and return the new count.
    pub async fn increment(&self, guid: &str, now: DateTime<Utc>) -> u32 {
        let mut entries = self.entries.lock().await;
        let entry = entries.entry(guid.to_string()).or_insert(RetryEntry {
            retry_count: 0,
            first_retry_at: now,
            last_retry_at: now,
        });
        entry.retry_count += 1;
        entry.last_retry_at = now;
        let count = entry.retry_count;
        self.persist(&entries).await;
        count
    }

    /// Forget `guid`. Returns whether it was tracked.
    pub async fn clear(&self, guid: &str) -> bool {
        let mut entries = self.entries.lock().await;
        let removed = entries.remove(guid).is_some();
        if removed {
            self.persist(&entries).await;
        }
        removed
    }

    /// Drop entries whose last attempt is older than `cutoff`.
    pub async fn prune(&self, cutoff: DateTime<Utc>) -> usize {
        let mut entries = self.entries.lock().await;
        let before = entries.len();
        entries.retain(|_, e| e.last_retry_at >= cutoff);
        let pruned = before - entries.len();
        if pruned > 0 {
            info!(pruned, "stale retry tracker entries removed");
            self.persist(&entries).await;
        }
        pruned
    }

    pub async fn stats(&self) -> RetryStats {
        let entries = self.entries.lock().await;
        let mut by_retry_count = BTreeMap::new();
        for entry in entries.values() {
            *by_retry_count.entry(entry.retry_count).or_insert(0) += 1;
        }
        RetryStats {
            total_tracked: entries.len(),
            by_retry_count,
            alarms: entries
                .iter()
                .map(|(guid, entry)| TrackedAlarm {
                    guid: guid.clone(),
                    entry: entry.clone(),
                })
                .collect(),
        }
    }

    async fn persist(&self, entries: &BTreeMap<String, RetryEntry>) {
        let raw = match serde_json::to_vec_pretty(entries) {
            Ok(raw) => raw,
            Err(e) => {
                error!(error = %e, "retry tracker not serializable");
                return;
            }
        };
        let tmp = self.path.with_extension("json.tmp");
        let written = async {
            tokio::fs::write(&tmp, &raw).await?;
            tokio::fs::rename(&tmp, &self.path).await
        }
        .await;
        if let Err(e) = written {
            warn!(path = %self.path.display(), error = %e, "retry tracker not saved");
        }
    }
}

// ============================================================================
// SWEEP
// ============================================================================

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SweepSummary {
    pub pending: usize,
    pub exhausted: usize,
    pub dispatched: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub skipped_in_flight: usize,
    pub pruned: usize,
}

enum DispatchOutcome {
    Succeeded,
    Failed,
    InFlight,
}

pub struct RetrySweeper {
    config: RetryConfig,
    ledger: Arc<SqliteLedger>,
    tracker: Arc<RetryTracker>,
    service: Arc<PipelineService>,
    permits: Arc<Semaphore>,
    running: AtomicBool,
}

/// Clears the running flag when the sweep ends.
struct SweepGuard<'a>(&'a AtomicBool);

impl Drop for SweepGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

impl RetrySweeper {
    pub fn new(
        config: RetryConfig,
        ledger: Arc<SqliteLedger>,
        tracker: Arc<RetryTracker>,
        service: Arc<PipelineService>,
    ) -> Self {
        let permits = Arc::new(Semaphore::new(config.max_concurrent.max(1)));
        Self {
            config,
            ledger,
            tracker,
            service,
            permits,
            running: AtomicBool::new(false),
        }
    }

    pub fn tracker(&self) -> &Arc<RetryTracker> {
        &self.tracker
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// One sweep. `Ok(None)` when another sweep is still running.
    pub async fn sweep(&self) -> EvidenceResult<Option<SweepSummary>> {
        if self
            .running
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            info!("retry sweep already running");
            return Ok(None);
        }
        let _guard = SweepGuard(&self.running);
        self.sweep_at(Utc::now()).await.map(Some)
    }

    async fn sweep_at(&self, now: DateTime<Utc>) -> EvidenceResult<SweepSummary> {
        let mut summary = SweepSummary {
            pruned: self
                .tracker
                .prune(now - ChronoDuration::hours(self.config.tracker_ttl_hours))
                .await,
            ..SweepSummary::default()
        };

        let since = now - ChronoDuration::hours(self.config.lookback_hours);
        let pending = self
            .ledger
            .pending_videos(&self.config.suspect_state, since)
            .await?;
        summary.pending = pending.len();

        let mut candidates = Vec::new();
        for alarm in pending {
            if self.tracker.count(&alarm.guid).await >= self.config.max_retries {
                summary.exhausted += 1;
                continue;
            }
            match alarm.reference() {
                Ok(reference) => candidates.push(reference),
                Err(e) => {
                    warn!(guid = %alarm.guid, error = %e, "ledger row not usable for retry");
                    summary.exhausted += 1;
                }
            }
        }

        if candidates.is_empty() {
            info!(pending = summary.pending, exhausted = summary.exhausted, "nothing to retry");
            return Ok(summary);
        }
        info!(
            retrying = candidates.len(),
            exhausted = summary.exhausted,
            "retrying alarms without video"
        );

        let shutdown = self.service.shutdown().clone();
        let pause = Duration::from_secs(self.config.dispatch_pause_secs);
        let last = candidates.len() - 1;
        let mut runs = JoinSet::new();

        for (i, alarm) in candidates.into_iter().enumerate() {
            let permit = tokio::select! {
                permit = Arc::clone(&self.permits).acquire_owned() => match permit {
                    Ok(permit) => permit,
                    Err(_) => break,
                },
                _ = shutdown.cancelled() => break,
            };

            let attempt = self.tracker.increment(&alarm.guid, Utc::now()).await;
            info!(
                guid = %alarm.guid,
                attempt,
                max_attempts = self.config.max_retries,
                "dispatching video retry"
            );
            summary.dispatched += 1;

            let service = Arc::clone(&self.service);
            let tracker = Arc::clone(&self.tracker);
            runs.spawn(async move {
                let outcome = match service.dispatch(&alarm).await {
                    Ok(Some(_)) => {
                        tracker.clear(&alarm.guid).await;
                        DispatchOutcome::Succeeded
                    }
                    Ok(None) => DispatchOutcome::InFlight,
                    Err(_) => DispatchOutcome::Failed,
                };
                drop(permit);
                outcome
            });

            if i < last {
                tokio::select! {
                    _ = tokio::time::sleep(pause) => {}
                    _ = shutdown.cancelled() => break,
                }
            }
        }

        while let Some(joined) = runs.join_next().await {
            match joined {
                Ok(DispatchOutcome::Succeeded) => summary.succeeded += 1,
                Ok(DispatchOutcome::Failed) => summary.failed += 1,
                Ok(DispatchOutcome::InFlight) => summary.skipped_in_flight += 1,
                Err(e) => {
                    error!(error = %e, "retry task aborted");
                    summary.failed += 1;
                }
            }
        }

        info!(
            dispatched = summary.dispatched,
            succeeded = summary.succeeded,
            failed = summary.failed,
            "retry sweep finished"
        );
        Ok(summary)
    }

    /// Sweep once now, then every `sweep_interval_secs`, until `shutdown`.
    pub async fn run_schedule(self: Arc<Self>, shutdown: CancellationToken) {
        let mut ticker =
            tokio::time::interval(Duration::from_secs(self.config.sweep_interval_secs.max(1)));
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        info!(interval_secs = self.config.sweep_interval_secs, "retry schedule started");

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if let Err(e) = self.sweep().await {
                        error!(kind = e.kind(), error = %e, "retry sweep failed");
                    }
                }
                _ = shutdown.cancelled() => {
                    info!("retry schedule stopped");
                    return;
                }
            }
        }
    }
}
