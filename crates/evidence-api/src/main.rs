//! Binary entrypoint for the evidence API server.
use evidence_api::run;
use evidence_core::PipelineConfig;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    // Listen address and config file can be overridden with EVIDENCE_ADDR / EVIDENCE_CONFIG
    let addr = std::env::var("EVIDENCE_ADDR").unwrap_or_else(|_| "0.0.0.0:8787".to_string());
    let config_path = std::env::var_os("EVIDENCE_CONFIG").map(PathBuf::from);
    let config = PipelineConfig::load(config_path.as_deref())?;

    run(&addr, config).await
}
