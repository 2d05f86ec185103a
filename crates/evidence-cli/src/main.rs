//! `alarm-video` entry point.
//!
//! Runs the evidence pipeline once for the alarm named on the command line.
//! Exit code 0 when the video url was recorded, 1 on any failure; the caller
//! re-invokes with the same arguments to retry.
//!
//! Usage:
//!   alarm-video <device_id> <alarm_time> <guid> [--config evidence.yaml]

use anyhow::{Context, Result};
use clap::Parser;
use evidence_core::{AlarmReference, PipelineConfig, PipelineReport};
use std::path::PathBuf;
use std::process::ExitCode;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "alarm-video", version, about = "Retrieve and publish the video of one alarm")]
struct Args {
    /// Device identifier on the telematics server
    device_id: String,

    /// Alarm timestamp, ISO-8601 (`Z` or numeric offset; bare times are UTC)
    alarm_time: String,

    /// Alarm GUID, the ledger row to update
    guid: String,

    /// YAML configuration file
    #[arg(short, long, env = "EVIDENCE_CONFIG", value_name = "FILE")]
    config: Option<PathBuf>,
}

async fn run(args: Args) -> Result<PipelineReport> {
    let alarm = AlarmReference::parse(&args.device_id, &args.alarm_time, &args.guid)?;
    let config = PipelineConfig::load(args.config.as_deref()).context("loading configuration")?;
    let runner = evidence_stages::default_runner(&config)?;
    Ok(runner.run(&alarm).await?)
}

/// Print the report or log the failure; returns the process exit code.
fn finish(result: Result<PipelineReport>) -> u8 {
    match result {
        Ok(report) => {
            match serde_json::to_string(&report) {
                Ok(line) => println!("{line}"),
                Err(e) => tracing::warn!(error = %e, "report not serializable"),
            }
            0
        }
        Err(e) => {
            tracing::error!(error = %format!("{e:#}"), "alarm video not recorded");
            1
        }
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let args = match Args::try_parse() {
        Ok(args) => args,
        Err(e) => {
            let _ = e.print();
            // --help and --version are not failures
            return if e.use_stderr() {
                ExitCode::FAILURE
            } else {
                ExitCode::SUCCESS
            };
        }
    };

    ExitCode::from(finish(run(args).await))
}
