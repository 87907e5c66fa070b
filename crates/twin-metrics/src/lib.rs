//! ---
//! twin_section: "06-observability"
//! twin_subsection: "module"
//! twin_type: "source"
//! twin_scope: "code"
//! twin_description: "Run metrics collection and textfile export."
//! twin_version: "v0.1.0"
//! twin_owner: "tbd"
//! ---
use std::fs;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use prometheus::{
    Gauge, Histogram, HistogramOpts, IntCounter, IntCounterVec, IntGauge, Opts, Registry,
    TextEncoder,
};
use tracing::info;

/// Shared registry type used across the driver.
pub type SharedRegistry = Arc<Registry>;

/// Produce a new shared registry.
pub fn new_registry() -> SharedRegistry {
    Arc::new(Registry::new())
}

/// Metrics recorded over one simulation run.
#[derive(Clone)]
pub struct RunMetrics {
    registry: SharedRegistry,
    steps_total: IntCounter,
    step_failures_total: IntCounter,
    telemetry_batches_total: IntCounter,
    telemetry_rejected_total: IntCounterVec,
    telemetry_round_trip_seconds: Histogram,
    step_seconds: Histogram,
    simulation_time: Gauge,
    run_id: IntGauge,
}

impl RunMetrics {
    pub fn new(registry: SharedRegistry) -> Result<Self> {
        let steps_total = IntCounter::with_opts(Opts::new(
            "twin_steps_total",
            "Completed fixed-size simulation steps",
        ))?;
        registry.register(Box::new(steps_total.clone()))?;

        let step_failures_total = IntCounter::with_opts(Opts::new(
            "twin_step_failures_total",
            "Steps the model refused to complete",
        ))?;
        registry.register(Box::new(step_failures_total.clone()))?;

        let telemetry_batches_total = IntCounter::with_opts(Opts::new(
            "twin_telemetry_batches_total",
            "Telemetry batches acknowledged by the sink",
        ))?;
        registry.register(Box::new(telemetry_batches_total.clone()))?;

        let telemetry_rejected_total = IntCounterVec::new(
            Opts::new(
                "twin_telemetry_rejected_total",
                "Telemetry batches the sink refused, by status",
            ),
            &["status"],
        )?;
        registry.register(Box::new(telemetry_rejected_total.clone()))?;

        let buckets = prometheus::exponential_buckets(0.0001, 2.0, 16)
            .context("failed to construct histogram buckets")?;
        let telemetry_round_trip_seconds = Histogram::with_opts(
            HistogramOpts::new(
                "twin_telemetry_round_trip_seconds",
                "Send-to-acknowledgement latency of telemetry batches",
            )
            .buckets(buckets.clone()),
        )?;
        registry.register(Box::new(telemetry_round_trip_seconds.clone()))?;

        let step_seconds = Histogram::with_opts(
            HistogramOpts::new(
                "twin_step_seconds",
                "Wall-clock time the model spent inside a single step",
            )
            .buckets(buckets),
        )?;
        registry.register(Box::new(step_seconds.clone()))?;

        let simulation_time = Gauge::with_opts(Opts::new(
            "twin_simulation_time_seconds",
            "Current simulation time of the run",
        ))?;
        registry.register(Box::new(simulation_time.clone()))?;

        let run_id = IntGauge::with_opts(Opts::new(
            "twin_run_id",
            "Run identifier assigned at instantiation",
        ))?;
        registry.register(Box::new(run_id.clone()))?;

        Ok(Self {
            registry,
            steps_total,
            step_failures_total,
            telemetry_batches_total,
            telemetry_rejected_total,
            telemetry_round_trip_seconds,
            step_seconds,
            simulation_time,
            run_id,
        })
    }

    /// Metrics on a private registry, for runs that never export.
    pub fn detached() -> Result<Self> {
        Self::new(new_registry())
    }

    pub fn registry(&self) -> SharedRegistry {
        self.registry.clone()
    }

    pub fn record_run_id(&self, run_id: u64) {
        self.run_id.set(i64::try_from(run_id).unwrap_or(i64::MAX));
    }

    pub fn record_step(&self, simulation_time: f64, wall: Duration) {
        self.steps_total.inc();
        self.step_seconds.observe(wall.as_secs_f64());
        self.simulation_time.set(simulation_time);
    }

    pub fn record_step_failure(&self) {
        self.step_failures_total.inc();
    }

    pub fn record_batch(&self, round_trip: Duration) {
        self.telemetry_batches_total.inc();
        self.telemetry_round_trip_seconds
            .observe(round_trip.as_secs_f64());
    }

    pub fn record_rejection(&self, status: &str) {
        self.telemetry_rejected_total
            .with_label_values(&[status])
            .inc();
    }

    pub fn steps(&self) -> u64 {
        self.steps_total.get()
    }

    pub fn batches(&self) -> u64 {
        self.telemetry_batches_total.get()
    }

    /// Text exposition of every registered family.
    pub fn render(&self) -> Result<String> {
        let families = self.registry.gather();
        TextEncoder::new()
            .encode_to_string(&families)
            .context("failed to encode metrics")
    }

    /// Write the exposition to `path` for a node-exporter textfile collector.
    pub fn export_textfile(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)
                .with_context(|| format!("failed to create {}", parent.display()))?;
        }
        let body = self.render()?;
        fs::write(path, body)
            .with_context(|| format!("failed to write metrics textfile {}", path.display()))?;
        info!(path = %path.display(), "metrics textfile written");
        Ok(())
    }
}
