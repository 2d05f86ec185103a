//! Prometheus registry for pipeline runs, served at `/metrics`.
use prometheus::{Encoder, Histogram, HistogramOpts, IntCounterVec, Opts, Registry, TextEncoder};
use std::time::Duration;

const DURATION_BUCKETS: &[f64] = &[1.0, 5.0, 15.0, 30.0, 60.0, 120.0, 300.0, 600.0];

pub struct PipelineMetrics {
    registry: Registry,
    runs: IntCounterVec,
    seconds: Histogram,
}

impl PipelineMetrics {
    pub fn new() -> Result<Self, prometheus::Error> {
        let registry = Registry::new();
        let runs = IntCounterVec::new(
            Opts::new(
                "evidence_pipeline_runs_total",
                "Pipeline runs by outcome (success or error kind)",
            ),
            &["outcome"],
        )?;
        let seconds = Histogram::with_opts(
            HistogramOpts::new("evidence_pipeline_seconds", "Wall-clock time of one pipeline run")
                .buckets(DURATION_BUCKETS.to_vec()),
        )?;
        registry.register(Box::new(runs.clone()))?;
        registry.register(Box::new(seconds.clone()))?;
        Ok(Self {
            registry,
            runs,
            seconds,
        })
    }

    pub fn observe(&self, outcome: &str, elapsed: Duration) {
        self.runs.with_label_values(&[outcome]).inc();
        self.seconds.observe(elapsed.as_secs_f64());
    }

    pub fn runs(&self, outcome: &str) -> u64 {
        self.runs.with_label_values(&[outcome]).get()
    }

    pub fn encode(&self) -> Result<String, prometheus::Error> {
        let encoder = TextEncoder::new();
        let mut buffer = Vec::new();
        encoder.encode(&self.registry.gather(), &mut buffer)?;
        Ok(String::from_utf8_lossy(&buffer).to_string())
    }
}
