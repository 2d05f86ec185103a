//! Evidence API /v1: retry sweep, single-alarm trigger and metrics
pub mod handlers;
pub mod metrics;
pub mod retry;
pub mod service;

use axum::{
    routing::{delete, get, post},
    Router,
};
use evidence_core::{EvidenceError, EvidenceResult, PipelineConfig, PipelineRunner};
use evidence_stages::{Adapters, SqliteLedger};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tower_http::trace::TraceLayer;

use crate::metrics::PipelineMetrics;
use crate::retry::{RetrySweeper, RetryTracker};
use crate::service::PipelineService;

#[derive(Clone)]
pub struct AppState {
    pub service: Arc<PipelineService>,
    pub sweeper: Arc<RetrySweeper>,
}

impl AppState {
    /// Wire the service from explicit parts; the runner may use any collaborators.
    pub async fn assemble(
        config: &PipelineConfig,
        runner: PipelineRunner,
        ledger: Arc<SqliteLedger>,
        shutdown: CancellationToken,
    ) -> EvidenceResult<Self> {
        let metrics = PipelineMetrics::new()
            .map_err(|e| EvidenceError::Config(format!("metrics registry: {e}")))?;
        let service = Arc::new(PipelineService::new(runner, Arc::new(metrics), shutdown));
        let tracker = Arc::new(RetryTracker::load(&config.retry.tracker_path).await);
        let sweeper = Arc::new(RetrySweeper::new(
            config.retry.clone(),
            ledger,
            tracker,
            Arc::clone(&service),
        ));
        Ok(Self { service, sweeper })
    }

    /// Production wiring: telematics server, ffmpeg, object storage, SQLite.
    pub async fn from_config(
        config: &PipelineConfig,
        shutdown: CancellationToken,
    ) -> EvidenceResult<Self> {
        let adapters = Adapters::from_config(config)?;
        adapters.ledger.ensure_schema().await?;
        let runner = PipelineRunner::new(config, adapters.collaborators());
        Self::assemble(config, runner, adapters.ledger, shutdown).await
    }
}

pub fn create_app(state: AppState) -> Router {
    Router::new()
        .route("/v1/health", get(handlers::health))
        .route("/v1/retry/stats", get(handlers::retry_stats))
        .route("/v1/retry/run", post(handlers::retry_run))
        .route("/v1/retry/{guid}", delete(handlers::retry_reset))
        .route("/v1/alarms/{guid}/video", post(handlers::request_video))
        .route("/metrics", get(handlers::metrics))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Serve until ctrl-c, running the retry schedule alongside.
pub async fn run(addr: &str, config: PipelineConfig) -> anyhow::Result<()> {
    let shutdown = CancellationToken::new();
    let state = AppState::from_config(&config, shutdown.clone()).await?;

    let schedule = tokio::spawn(state.sweeper.clone().run_schedule(shutdown.clone()));

    let app = create_app(state);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!("evidence API listening on {}", addr);

    let signal = shutdown.clone();
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            let _ = tokio::signal::ctrl_c().await;
            tracing::info!("shutdown requested");
            signal.cancel();
        })
        .await?;

    shutdown.cancel();
    schedule.await?;
    Ok(())
}
