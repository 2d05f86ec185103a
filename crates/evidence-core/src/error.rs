//! Unified Error Model
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EvidenceError {
    #[error("NOVIDEO/no recorded files for device {device_id} in the alarm window")]
    NoVideoFound { device_id: String },

    #[error("REMOTE/{0}")]
    RemoteUnavailable(String),

    #[error("POLL/task not completed after {attempts} attempts")]
    Timeout { attempts: u32 },

    #[error("DOWNLOAD/{reason}")]
    DownloadFailed { reason: String },

    #[error("TRANSCODE/exit status {exit_status:?}: {reason}")]
    TranscodeFailed {
        exit_status: Option<i32>,
        reason: String,
    },

    #[error("UPLOAD/{reason}")]
    UploadFailed { reason: String },

    #[error("LEDGER/{0}")]
    PersistenceError(String),

    #[error("INPUT/{0}")]
    InvalidInput(String),

    #[error("CANCEL/pipeline stopped after {budget:?}")]
    Cancelled { budget: Duration },

    #[error("CONFIG/{0}")]
    Config(String),
}

impl EvidenceError {
    /// Stable label for logs and metric labels.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::NoVideoFound { .. } => "no_video_found",
            Self::RemoteUnavailable(_) => "remote_unavailable",
            Self::Timeout { .. } => "timeout",
            Self::DownloadFailed { .. } => "download_failed",
            Self::TranscodeFailed { .. } => "transcode_failed",
            Self::UploadFailed { .. } => "upload_failed",
            Self::PersistenceError(_) => "persistence_error",
            Self::InvalidInput(_) => "invalid_input",
            Self::Cancelled { .. } => "cancelled",
            Self::Config(_) => "config",
        }
    }

    pub fn download(reason: impl Into<String>) -> Self {
        Self::DownloadFailed {
            reason: reason.into(),
        }
    }

    pub fn upload(reason: impl Into<String>) -> Self {
        Self::UploadFailed {
            reason: reason.into(),
        }
    }
}

pub type EvidenceResult<T> = Result<T, EvidenceError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_carries_category_prefix() {
        let err = EvidenceError::Timeout { attempts: 20 };
        assert_eq!(err.to_string(), "POLL/task not completed after 20 attempts");

        let err = EvidenceError::download("status 404");
        assert_eq!(err.to_string(), "DOWNLOAD/status 404");
        assert_eq!(err.kind(), "download_failed");
    }
}
