//! Task Poller: turns the server's asynchronous extraction job into a bounded wait
//!
//! Explicit loop with an attempt counter and constant backoff. Every poll,
//! whether it answers "not ready" or fails at the transport level, consumes
//! one attempt from the same budget.
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::config::PollPolicy;
use crate::data_model::{
    RemoteTask, TaskReady, TaskStatusResponse, RESULT_ALREADY_COMPLETED, RESULT_OK,
    STU_COMPLETED,
};
use crate::error::{EvidenceError, EvidenceResult};
use crate::stage::TaskStatusSource;

/// Classification of a single poll.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PollOutcome {
    Ready(TaskReady),
    /// Not finished yet; wait the short interval.
    Retry,
    /// Reported complete but unusable, or not reachable; wait the long interval.
    Transient(String),
}

/// Result of the whole polling loop.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PollResult {
    Ready(TaskReady),
    GivenUp { attempts: u32 },
}

/// `(result, stu)` pairs that mean the artifact can be fetched.
pub fn is_terminal_success(result: Option<i64>, stu: Option<i64>) -> bool {
    matches!(
        (result, stu),
        (Some(RESULT_OK), Some(STU_COMPLETED)) | (Some(RESULT_ALREADY_COMPLETED), Some(STU_COMPLETED))
    )
}

/// Classify one status response, recording it on `task`.
pub fn classify(task: &mut RemoteTask, status: &TaskStatusResponse) -> PollOutcome {
    task.observe(status);
    if !is_terminal_success(task.status_code, task.status_detail_id) {
        return PollOutcome::Retry;
    }
    match task.ready() {
        Some(ready) => PollOutcome::Ready(ready),
        None => PollOutcome::Transient("completed task is missing did/len/dph".to_string()),
    }
}

pub struct TaskPoller {
    source: Arc<dyn TaskStatusSource>,
    policy: PollPolicy,
}

impl TaskPoller {
    pub fn new(source: Arc<dyn TaskStatusSource>, policy: PollPolicy) -> Self {
        Self { source, policy }
    }

    /// Poll until ready or `Timeout` after `max_attempts` requests.
    pub async fn poll(&self, task: &mut RemoteTask, guid: &str) -> EvidenceResult<TaskReady> {
        match self.run(task, guid).await {
            PollResult::Ready(ready) => Ok(ready),
            PollResult::GivenUp { attempts } => Err(EvidenceError::Timeout { attempts }),
        }
    }

    pub async fn run(&self, task: &mut RemoteTask, guid: &str) -> PollResult {
        let max_attempts = self.policy.max_attempts;

        for attempt in 1..=max_attempts {
            debug!(guid, attempt, max_attempts, url = %task.task_url, "polling task status");

            let outcome = match self.source.fetch_status(&task.task_url).await {
                Ok(status) => classify(task, &status),
                Err(e) => PollOutcome::Transient(e.to_string()),
            };

            let delay = match outcome {
                PollOutcome::Ready(ready) => {
                    info!(
                        guid,
                        attempt,
                        result = ?task.status_code,
                        data_id = %ready.data_id,
                        length = ready.length,
                        "remote task completed"
                    );
                    return PollResult::Ready(ready);
                }
                PollOutcome::Retry => {
                    warn!(
                        guid,
                        attempt,
                        max_attempts,
                        result = ?task.status_code,
                        stu = ?task.status_detail_id,
                        "remote task not ready"
                    );
                    self.policy.not_ready_delay()
                }
                PollOutcome::Transient(reason) => {
                    warn!(guid, attempt, max_attempts, error = %reason, "task status request failed");
                    self.policy.transient_delay()
                }
            };

            if attempt < max_attempts {
                tokio::time::sleep(delay).await;
            }
        }

        warn!(guid, attempts = max_attempts, "giving up on remote task");
        PollResult::GivenUp {
            attempts: max_attempts,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_only_two_pairs_are_success() {
        for result in -1..=20 {
            for stu in -1..=10 {
                let expected = stu == 4 && (result == 0 || result == 11);
                assert_eq!(
                    is_terminal_success(Some(result), Some(stu)),
                    expected,
                    "result={result} stu={stu}"
                );
            }
        }
        assert!(!is_terminal_success(None, Some(4)));
        assert!(!is_terminal_success(Some(0), None));
    }

    #[test]
    fn test_already_completed_yields_data() {
        let mut task = RemoteTask::new("http://cms/task");
        let status = TaskStatusResponse::completed(11, "X", 1_000_000, "/path");
        assert_eq!(
            classify(&mut task, &status),
            PollOutcome::Ready(TaskReady {
                data_id: "X".to_string(),
                length: 1_000_000,
                data_path: "/path".to_string(),
            })
        );
    }

    #[test]
    fn test_completed_without_payload_is_transient() {
        let mut task = RemoteTask::new("http://cms/task");
        let status = TaskStatusResponse::new(0, 4);
        assert!(matches!(
            classify(&mut task, &status),
            PollOutcome::Transient(_)
        ));
    }
}
