//! Transcoder Adapter: raw device container to H.264 MP4 via an external encoder
use async_trait::async_trait;
use evidence_core::config::TranscodeConfig;
use evidence_core::{EvidenceError, EvidenceResult, LocalArtifact, VideoTranscoder};
use std::path::{Path, PathBuf};
use std::process::Stdio;
use tokio::process::Command;
use tracing::{info, warn};

/// Removes the wrapped path when dropped, whichever way the scope ends.
struct RemoveOnDrop(PathBuf);

impl Drop for RemoveOnDrop {
    fn drop(&mut self) {
        match std::fs::remove_file(&self.0) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => warn!(path = %self.0.display(), error = %e, "could not remove intermediate file"),
        }
    }
}

pub struct FfmpegTranscoder {
    config: TranscodeConfig,
}

impl FfmpegTranscoder {
    pub fn new(config: TranscodeConfig) -> Self {
        Self { config }
    }

    /// Arguments after the program name.
    pub fn arguments(&self, input: &Path, output: &Path) -> Vec<String> {
        vec![
            "-i".to_string(),
            input.display().to_string(),
            "-c:v".to_string(),
            self.config.codec.clone(),
            "-preset".to_string(),
            self.config.preset.clone(),
            "-crf".to_string(),
            self.config.crf.to_string(),
            output.display().to_string(),
        ]
    }
}

fn failed(exit_status: Option<i32>, reason: impl Into<String>) -> EvidenceError {
    EvidenceError::TranscodeFailed {
        exit_status,
        reason: reason.into(),
    }
}

#[async_trait]
impl VideoTranscoder for FfmpegTranscoder {
    async fn transcode(&self, raw: &Path) -> EvidenceResult<PathBuf> {
        if !tokio::fs::try_exists(raw).await.unwrap_or(false) {
            return Err(failed(None, format!("{} does not exist", raw.display())));
        }
        let artifact = LocalArtifact::from_raw(raw)
            .ok_or_else(|| failed(None, format!("{} has no usable file name", raw.display())))?;
        let intermediate = artifact.intermediate_path();
        let output = artifact.final_path();

        tokio::fs::rename(raw, &intermediate)
            .await
            .map_err(|e| failed(None, format!("rename to {}: {e}", intermediate.display())))?;
        let _cleanup = RemoveOnDrop(intermediate.clone());

        // a leftover from an earlier run would make the encoder refuse to overwrite
        if let Err(e) = tokio::fs::remove_file(&output).await {
            if e.kind() != std::io::ErrorKind::NotFound {
                return Err(failed(None, format!("stale {}: {e}", output.display())));
            }
        }

        let args = self.arguments(&intermediate, &output);
        info!(program = %self.config.program, args = %args.join(" "), "running transcoder");

        let result = Command::new(&self.config.program)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| failed(None, format!("spawn {}: {e}", self.config.program)))?;

        if !result.status.success() {
            let stderr = String::from_utf8_lossy(&result.stderr);
            let tail = stderr.lines().last().unwrap_or("").trim().to_string();
            // the encoder may have written part of the output before failing
            if let Err(e) = tokio::fs::remove_file(&output).await {
                if e.kind() != std::io::ErrorKind::NotFound {
                    warn!(path = %output.display(), error = %e, "could not remove partial output");
                }
            }
            return Err(failed(result.status.code(), tail));
        }

        if !tokio::fs::try_exists(&output).await.unwrap_or(false) {
            return Err(failed(
                result.status.code(),
                format!("encoder succeeded but {} is missing", output.display()),
            ));
        }

        info!(output = %output.display(), "transcode finished");
        Ok(output)
    }
}
