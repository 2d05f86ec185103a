//! Evidence Core: data model, task polling and the per-alarm pipeline runner
//!
//! Retrieves the video behind a vehicle alarm from the telematics server,
//! hands it to the transcoder and publisher, and records the resulting URL in
//! the alarm ledger. I/O lives behind the traits in [`stage`].

pub mod config;
pub mod context;
pub mod data_model;
pub mod dedup;
pub mod error;
pub mod poller;
pub mod requester;
pub mod runner;
pub mod stage;

pub use config::{PipelineConfig, PollPolicy, TaskParams};
pub use context::ExecutionContext;
pub use data_model::{
    AlarmRecord, AlarmReference, EvidenceRecord, FileEntry, LocalArtifact, PipelineReport,
    PublishedObject, RemoteTask, StageReport, TaskReady, TaskStatusResponse, VideoWindow,
};
pub use dedup::{DedupGuard, DedupKey, InFlight};
pub use error::{EvidenceError, EvidenceResult};
pub use poller::{PollOutcome, PollResult, TaskPoller};
pub use runner::{Collaborators, PipelineRunner};
pub use stage::{
    ArtifactRetriever, EvidenceLedger, EvidencePublisher, FileLocator, Stage, TaskStatusSource,
    TransportError, VideoTranscoder,
};
