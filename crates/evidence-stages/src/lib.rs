//! Evidence Stages: production adapters behind the pipeline traits.
//!
//! ```text
//! telematics server ──locate/status/download──▶ scratch dir ──ffmpeg──▶ mp4
//!                                                                  │
//!                         alarm ledger ◀──video url── object storage
//! ```

mod ledger;
mod publisher;
mod retriever;
mod telematics;
mod transcoder;

pub use ledger::SqliteLedger;
pub use publisher::{HttpObjectStore, DIGEST_HEADER};
pub use telematics::TelematicsClient;
pub use transcoder::FfmpegTranscoder;

use evidence_core::{Collaborators, EvidenceResult, PipelineConfig, PipelineRunner};
use std::sync::Arc;

// ============================================================================
// DEFAULT WIRING
// ============================================================================

/// The concrete adapters built from one configuration.
///
/// The ledger is kept as its concrete type because the retry sweep needs
/// queries beyond [`evidence_core::EvidenceLedger`].
#[derive(Clone)]
pub struct Adapters {
    pub telematics: Arc<TelematicsClient>,
    pub transcoder: Arc<FfmpegTranscoder>,
    pub store: Arc<HttpObjectStore>,
    pub ledger: Arc<SqliteLedger>,
}

impl Adapters {
    pub fn from_config(config: &PipelineConfig) -> EvidenceResult<Self> {
        Ok(Self {
            telematics: Arc::new(TelematicsClient::new(config.remote.clone())?),
            transcoder: Arc::new(FfmpegTranscoder::new(config.transcode.clone())),
            store: Arc::new(HttpObjectStore::new(config.storage.clone())?),
            ledger: Arc::new(SqliteLedger::new(&config.ledger)?),
        })
    }

    pub fn collaborators(&self) -> Collaborators {
        Collaborators {
            locator: self.telematics.clone(),
            status: self.telematics.clone(),
            retriever: self.telematics.clone(),
            transcoder: self.transcoder.clone(),
            publisher: self.store.clone(),
            ledger: self.ledger.clone(),
        }
    }
}

pub fn default_collaborators(config: &PipelineConfig) -> EvidenceResult<Collaborators> {
    Ok(Adapters::from_config(config)?.collaborators())
}

/// Runner wired to the telematics server, ffmpeg, object storage and SQLite.
pub fn default_runner(config: &PipelineConfig) -> EvidenceResult<PipelineRunner> {
    Ok(PipelineRunner::new(config, default_collaborators(config)?))
}
