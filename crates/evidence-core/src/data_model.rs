//! Data Model: AlarmReference, VideoWindow, RemoteTask, LocalArtifact, EvidenceRecord
use chrono::{DateTime, Duration, FixedOffset, NaiveDateTime, TimeZone, Timelike, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::path::{Path, PathBuf};

use crate::error::{EvidenceError, EvidenceResult};
use crate::stage::Stage;

/// Extension of the device-native container as delivered by the server.
pub const RAW_EXTENSION: &str = "grec";
/// Extension the transcoding utility recognises as its input.
pub const INTERMEDIATE_EXTENSION: &str = "h265";
/// Extension of the playable output.
pub const FINAL_EXTENSION: &str = "mp4";

/// Identifies exactly one alarm occurrence. Immutable for the whole run.
///
/// Every constructor goes through [`AlarmReference::checked`], including
/// deserialization, so `guid` is always a plain file name.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "UncheckedAlarm")]
pub struct AlarmReference {
    pub device_id: String,
    /// Kept in the offset it was reported in; the server expects wall-clock
    /// times in that same offset.
    pub alarm_time: DateTime<FixedOffset>,
    pub guid: String,
}

impl AlarmReference {
    /// Validate the three process arguments.
    ///
    /// `alarm_time` accepts RFC 3339 (`Z` or numeric offset, optional
    /// fraction) and bare `YYYY-MM-DDTHH:MM:SS`, which is read as UTC.
    pub fn parse(device_id: &str, alarm_time: &str, guid: &str) -> EvidenceResult<Self> {
        let alarm_time = parse_alarm_time(alarm_time.trim())?;
        Self::checked(device_id, alarm_time, guid)
    }

    /// Build from an already typed timestamp, applying the same checks as
    /// [`AlarmReference::parse`] to the identifiers.
    pub fn checked(
        device_id: &str,
        alarm_time: DateTime<FixedOffset>,
        guid: &str,
    ) -> EvidenceResult<Self> {
        let device_id = device_id.trim();
        if device_id.is_empty() {
            return Err(EvidenceError::InvalidInput("device id is empty".to_string()));
        }

        let guid = guid.trim();
        if guid.is_empty() {
            return Err(EvidenceError::InvalidInput("alarm guid is empty".to_string()));
        }
        // The guid names files in the scratch directory.
        if guid
            .chars()
            .any(|c| c == '/' || c == '\\' || c == '\0' || c.is_whitespace())
            || guid == "."
            || guid == ".."
        {
            return Err(EvidenceError::InvalidInput(format!(
                "alarm guid {guid:?} is not usable as a file name"
            )));
        }

        Ok(Self {
            device_id: device_id.to_string(),
            alarm_time,
            guid: guid.to_string(),
        })
    }
}

#[derive(Deserialize)]
struct UncheckedAlarm {
    device_id: String,
    alarm_time: DateTime<FixedOffset>,
    guid: String,
}

impl TryFrom<UncheckedAlarm> for AlarmReference {
    type Error = EvidenceError;

    fn try_from(raw: UncheckedAlarm) -> EvidenceResult<Self> {
        Self::checked(&raw.device_id, raw.alarm_time, &raw.guid)
    }
}

fn parse_alarm_time(raw: &str) -> EvidenceResult<DateTime<FixedOffset>> {
    if let Ok(parsed) = DateTime::parse_from_rfc3339(raw) {
        return Ok(parsed);
    }
    for fmt in ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(raw, fmt) {
            return Ok(Utc.from_utc_datetime(&naive).fixed_offset());
        }
    }
    Err(EvidenceError::InvalidInput(format!(
        "invalid alarm timestamp: {raw}"
    )))
}

/// Recording window around an alarm.
///
/// Offsets are seconds since local midnight of the alarm day, which is how
/// the file-locate query addresses a recording.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct VideoWindow {
    pub start_offset_seconds: i64,
    pub end_offset_seconds: i64,
    pub start: DateTime<FixedOffset>,
    pub end: DateTime<FixedOffset>,
}

/// Widest margin a window may use on either side of the alarm.
pub const MAX_WINDOW_MARGIN_SECS: i64 = 3600;

impl VideoWindow {
    pub fn around(alarm_time: DateTime<FixedOffset>, margin: Duration) -> EvidenceResult<Self> {
        if margin <= Duration::zero() || margin > Duration::seconds(MAX_WINDOW_MARGIN_SECS) {
            return Err(EvidenceError::Config(format!(
                "window margin must be within 1..={MAX_WINDOW_MARGIN_SECS}s, got {}s",
                margin.num_seconds()
            )));
        }

        let seconds_of_day = i64::from(alarm_time.num_seconds_from_midnight());
        let start_offset_seconds = seconds_of_day - margin.num_seconds();
        let end_offset_seconds = start_offset_seconds + 2 * margin.num_seconds();

        Ok(Self {
            start_offset_seconds,
            end_offset_seconds,
            start: alarm_time - margin,
            end: alarm_time + margin,
        })
    }

    pub fn len_seconds(&self) -> i64 {
        self.end_offset_seconds - self.start_offset_seconds
    }
}

/// Format used by the telematics server for time query parameters: the
/// date/time separator is a literal `%20`, not a space.
pub fn format_server_time(t: &DateTime<FixedOffset>) -> String {
    t.format("%Y-%m-%d%%20%H:%M:%S").to_string()
}

/// One recorded file returned by the file-locate query.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileEntry {
    /// Base task descriptor; the extraction request is derived from it.
    #[serde(rename = "DownTaskUrl")]
    pub down_task_url: String,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, Value>,
}

impl FileEntry {
    pub fn new(down_task_url: impl Into<String>) -> Self {
        Self {
            down_task_url: down_task_url.into(),
            extra: serde_json::Map::new(),
        }
    }
}

/// Body of the task status endpoint: `{result, oldTaskAll: {stu, did, len, dph}}`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TaskStatusResponse {
    pub result: Option<i64>,
    #[serde(rename = "oldTaskAll", default)]
    pub old_task_all: Option<TaskDetail>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TaskDetail {
    pub stu: Option<i64>,
    /// The server sends this as either a string or a number.
    pub did: Option<Value>,
    pub len: Option<u64>,
    pub dph: Option<String>,
}

impl TaskStatusResponse {
    pub fn new(result: i64, stu: i64) -> Self {
        Self {
            result: Some(result),
            old_task_all: Some(TaskDetail {
                stu: Some(stu),
                ..TaskDetail::default()
            }),
        }
    }

    pub fn completed(result: i64, did: &str, len: u64, dph: &str) -> Self {
        Self {
            result: Some(result),
            old_task_all: Some(TaskDetail {
                stu: Some(STU_COMPLETED),
                did: Some(Value::String(did.to_string())),
                len: Some(len),
                dph: Some(dph.to_string()),
            }),
        }
    }
}

/// Detail status meaning the server finished extracting the segment.
pub const STU_COMPLETED: i64 = 4;
/// Fresh completion.
pub const RESULT_OK: i64 = 0;
/// The same task had already completed earlier.
pub const RESULT_ALREADY_COMPLETED: i64 = 11;

/// Server-side extraction job, updated on every poll.
#[derive(Debug, Clone, PartialEq)]
pub struct RemoteTask {
    pub task_url: String,
    pub status_code: Option<i64>,
    pub status_detail_id: Option<i64>,
    pub data_id: Option<String>,
    pub length: Option<u64>,
    pub data_path_hint: Option<String>,
}

impl RemoteTask {
    pub fn new(task_url: impl Into<String>) -> Self {
        Self {
            task_url: task_url.into(),
            status_code: None,
            status_detail_id: None,
            data_id: None,
            length: None,
            data_path_hint: None,
        }
    }

    pub fn observe(&mut self, status: &TaskStatusResponse) {
        self.status_code = status.result;
        let detail = status.old_task_all.as_ref();
        self.status_detail_id = detail.and_then(|d| d.stu);
        self.data_id = detail.and_then(|d| d.did.as_ref()).and_then(value_to_string);
        self.length = detail.and_then(|d| d.len);
        self.data_path_hint = detail.and_then(|d| d.dph.clone());
    }

    /// Data needed by the retriever, once all three fields are known.
    pub fn ready(&self) -> Option<TaskReady> {
        Some(TaskReady {
            data_id: self.data_id.clone()?,
            length: self.length?,
            data_path: self.data_path_hint.clone()?,
        })
    }
}

fn value_to_string(v: &Value) -> Option<String> {
    match v {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// A completed remote artifact, ready to be streamed to disk.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskReady {
    pub data_id: String,
    pub length: u64,
    pub data_path: String,
}

/// File names for one alarm inside its scratch directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalArtifact {
    dir: PathBuf,
    stem: String,
}

impl LocalArtifact {
    pub fn new(dir: impl Into<PathBuf>, guid: &str) -> Self {
        Self {
            dir: dir.into(),
            stem: guid.to_string(),
        }
    }

    /// Derive names from an existing raw file path.
    pub fn from_raw(raw: &Path) -> Option<Self> {
        let stem = raw.file_stem()?.to_str()?.to_string();
        let dir = raw.parent().map(Path::to_path_buf).unwrap_or_default();
        Some(Self { dir, stem })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn raw_path(&self) -> PathBuf {
        self.with_extension(RAW_EXTENSION)
    }

    pub fn intermediate_path(&self) -> PathBuf {
        self.with_extension(INTERMEDIATE_EXTENSION)
    }

    pub fn final_path(&self) -> PathBuf {
        self.with_extension(FINAL_EXTENSION)
    }

    fn with_extension(&self, ext: &str) -> PathBuf {
        self.dir.join(format!("{}.{}", self.stem, ext))
    }
}

/// The only state this pipeline persists.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EvidenceRecord {
    pub guid: String,
    pub video_url: String,
}

/// Result of a successful upload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PublishedObject {
    pub url: String,
    pub key: String,
    /// `blake3:<hex>` of the uploaded bytes.
    pub digest: String,
}

/// One alarm row of the ledger, as written by the alarm collector.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AlarmRecord {
    pub guid: String,
    pub device_id: String,
    pub alarm_time: DateTime<Utc>,
    pub state: String,
    pub video: Option<String>,
    pub interno: Option<String>,
}

impl AlarmRecord {
    pub fn reference(&self) -> EvidenceResult<AlarmReference> {
        AlarmReference::checked(&self.device_id, self.alarm_time.fixed_offset(), &self.guid)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StageReport {
    pub stage: Stage,
    pub latency_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineReport {
    pub trace_id: String,
    pub guid: String,
    pub video_url: String,
    pub object_key: String,
    pub content_digest: String,
    pub rows_affected: u64,
    pub stages: Vec<StageReport>,
}
