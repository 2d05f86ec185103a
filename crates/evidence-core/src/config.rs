//! Pipeline configuration
//!
//! Built once at process start and handed to each component's constructor.
//! Layering: defaults, then an optional YAML file, then environment overrides.
use chrono::Duration as ChronoDuration;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::data_model::MAX_WINDOW_MARGIN_SECS;
use crate::error::{EvidenceError, EvidenceResult};

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct PipelineConfig {
    pub remote: RemoteConfig,
    pub window: WindowConfig,
    pub task: TaskParams,
    pub poll: PollPolicy,
    pub transcode: TranscodeConfig,
    pub storage: StorageConfig,
    pub ledger: LedgerConfig,
    pub retry: RetryConfig,
    pub runtime: RuntimeConfig,
}

/// Telematics server access.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RemoteConfig {
    pub base_url: String,
    /// Host serving the extracted artifacts; usually the same server on another port.
    pub download_base_url: String,
    pub account: Option<String>,
    pub password: Option<String>,
    /// Preissued session token; skips login when set.
    pub session: Option<String>,
    pub request_timeout_secs: u64,
    pub login_path: String,
    pub locate_path: String,
    pub download_path: String,
}

impl Default for RemoteConfig {
    fn default() -> Self {
        Self {
            base_url: "http://127.0.0.1:8088".to_string(),
            download_base_url: "http://127.0.0.1:6611".to_string(),
            account: None,
            password: None,
            session: None,
            request_timeout_secs: 300,
            login_path: "/StandardApiAction_login.action".to_string(),
            locate_path: "/StandardApiAction_getVideoFileInfo.action".to_string(),
            download_path: "/3/5".to_string(),
        }
    }
}

impl RemoteConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WindowConfig {
    pub margin_secs: i64,
}

impl Default for WindowConfig {
    fn default() -> Self {
        Self { margin_secs: 10 }
    }
}

impl WindowConfig {
    /// Saturates just past the accepted range, so an unvalidated value is
    /// still rejected by
    /// [`crate::data_model::VideoWindow::around`] instead of overflowing.
    pub fn margin(&self) -> ChronoDuration {
        ChronoDuration::seconds(self.margin_secs.min(MAX_WINDOW_MARGIN_SECS + 1))
    }
}

/// Fixed selectors injected into every extraction request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TaskParams {
    pub max_length: u64,
    pub channel: u32,
    pub data_type: u32,
}

impl Default for TaskParams {
    fn default() -> Self {
        Self {
            max_length: 50_000_000,
            channel: 2,
            data_type: 2,
        }
    }
}

/// Constant-interval retry budget for the task poller.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PollPolicy {
    pub max_attempts: u32,
    pub not_ready_delay_ms: u64,
    pub transient_delay_ms: u64,
}

impl Default for PollPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 20,
            not_ready_delay_ms: 3_000,
            transient_delay_ms: 5_000,
        }
    }
}

impl PollPolicy {
    pub fn not_ready_delay(&self) -> Duration {
        Duration::from_millis(self.not_ready_delay_ms)
    }

    pub fn transient_delay(&self) -> Duration {
        Duration::from_millis(self.transient_delay_ms)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TranscodeConfig {
    pub program: String,
    pub codec: String,
    pub preset: String,
    pub crf: u32,
}

impl Default for TranscodeConfig {
    fn default() -> Self {
        Self {
            program: "ffmpeg".to_string(),
            codec: "libx264".to_string(),
            preset: "fast".to_string(),
            crf: 23,
        }
    }
}

/// Object storage reached over plain HTTP PUT.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub endpoint: String,
    pub bucket: String,
    /// Base of the addressable URL written to the ledger.
    pub public_base_url: String,
    pub key_prefix: String,
    pub token: Option<String>,
    pub request_timeout_secs: u64,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            endpoint: "http://127.0.0.1:9000".to_string(),
            bucket: "alarm-evidence".to_string(),
            public_base_url: "http://127.0.0.1:9000/alarm-evidence".to_string(),
            key_prefix: "videos".to_string(),
            token: None,
            request_timeout_secs: 120,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LedgerConfig {
    pub path: PathBuf,
    pub table: String,
    /// Delete every row before a bulk insert. Off unless explicitly enabled.
    pub clear_before_insert: bool,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("alarms.db"),
            table: "alarmasHistorico".to_string(),
            clear_before_insert: false,
        }
    }
}

/// Whole-pipeline re-run policy used by the retry sweep.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    pub sweep_interval_secs: u64,
    pub max_retries: u32,
    pub lookback_hours: i64,
    pub tracker_ttl_hours: i64,
    pub dispatch_pause_secs: u64,
    pub max_concurrent: usize,
    pub tracker_path: PathBuf,
    pub suspect_state: String,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            sweep_interval_secs: 3_600,
            max_retries: 10,
            lookback_hours: 48,
            tracker_ttl_hours: 72,
            dispatch_pause_secs: 60,
            max_concurrent: 1,
            tracker_path: PathBuf::from("video-retry-tracker.json"),
            suspect_state: "Sospechosa".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    pub scratch_dir: PathBuf,
    pub pipeline_budget_secs: u64,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            scratch_dir: PathBuf::from("./temp"),
            pipeline_budget_secs: 600,
        }
    }
}

impl RuntimeConfig {
    pub fn pipeline_budget(&self) -> Duration {
        Duration::from_secs(self.pipeline_budget_secs)
    }
}

impl PipelineConfig {
    /// Defaults, overlaid by `path` (YAML) when given, then by the process environment.
    pub fn load(path: Option<&Path>) -> EvidenceResult<Self> {
        let mut config = match path {
            Some(path) => Self::from_yaml_file(path)?,
            None => Self::default(),
        };
        config.apply_env(|key| std::env::var(key).ok());
        config.validate()?;
        Ok(config)
    }

    pub fn from_yaml_file(path: &Path) -> EvidenceResult<Self> {
        let raw = std::fs::read_to_string(path)
            .map_err(|e| EvidenceError::Config(format!("{}: {e}", path.display())))?;
        Self::from_yaml_str(&raw)
    }

    pub fn from_yaml_str(raw: &str) -> EvidenceResult<Self> {
        serde_yaml::from_str(raw).map_err(|e| EvidenceError::Config(e.to_string()))
    }

    /// Overlay values from an environment-like lookup.
    pub fn apply_env<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(v) = get("API_USER") {
            self.remote.account = Some(v);
        }
        if let Some(v) = get("API_PASSWORD") {
            self.remote.password = Some(v);
        }
        if let Some(v) = get("EVIDENCE_SESSION") {
            self.remote.session = Some(v);
        }
        if let Some(v) = get("EVIDENCE_BASE_URL") {
            self.remote.base_url = v;
        }
        if let Some(v) = get("EVIDENCE_DOWNLOAD_URL") {
            self.remote.download_base_url = v;
        }
        if let Some(v) = get("EVIDENCE_STORAGE_ENDPOINT") {
            self.storage.endpoint = v;
        }
        if let Some(v) = get("EVIDENCE_STORAGE_BUCKET") {
            self.storage.bucket = v;
        }
        if let Some(v) = get("EVIDENCE_STORAGE_PUBLIC_URL") {
            self.storage.public_base_url = v;
        }
        if let Some(v) = get("EVIDENCE_STORAGE_TOKEN") {
            self.storage.token = Some(v);
        }
        if let Some(v) = get("EVIDENCE_LEDGER_PATH") {
            self.ledger.path = PathBuf::from(v);
        }
        if let Some(v) = get("EVIDENCE_SCRATCH_DIR") {
            self.runtime.scratch_dir = PathBuf::from(v);
        }
    }

    pub fn validate(&self) -> EvidenceResult<()> {
        let problem = |msg: &str| Err(EvidenceError::Config(msg.to_string()));

        if self.poll.max_attempts == 0 {
            return problem("poll.max_attempts must be at least 1");
        }
        if self.window.margin_secs <= 0 || self.window.margin_secs > MAX_WINDOW_MARGIN_SECS {
            return Err(EvidenceError::Config(format!(
                "window.margin_secs must be within 1..={MAX_WINDOW_MARGIN_SECS}, got {}",
                self.window.margin_secs
            )));
        }
        if self.remote.base_url.trim().is_empty() {
            return problem("remote.base_url is empty");
        }
        if self.remote.download_base_url.trim().is_empty() {
            return problem("remote.download_base_url is empty");
        }
        if self.storage.endpoint.trim().is_empty() || self.storage.bucket.trim().is_empty() {
            return problem("storage.endpoint and storage.bucket are required");
        }
        if self.transcode.program.trim().is_empty() {
            return problem("transcode.program is empty");
        }
        if self.runtime.pipeline_budget_secs == 0 {
            return problem("runtime.pipeline_budget_secs must be positive");
        }
        if self.retry.max_concurrent == 0 {
            return problem("retry.max_concurrent must be at least 1");
        }
        Ok(())
    }
}
