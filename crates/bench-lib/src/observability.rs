//! Benchmark telemetry
//!
//! Every run constructs its own [`BenchMetrics`] over a private
//! `prometheus::Registry` and hands clones to the orchestrator and sampler.
//! Nothing here is process-global, so concurrent runs (and tests) cannot
//! interfere with each other's counters.

use crate::metrics::Sample;
use axum::{extract::State, http::StatusCode, response::IntoResponse, routing::get, Router};
use prometheus::{
    Encoder, Gauge, GaugeVec, IntCounterVec, IntGauge, Opts, Registry, TextEncoder,
};
use std::sync::Arc;
use tracing::info;

struct Inner {
    registry: Registry,
    run_info: GaugeVec,
    total_duration: GaugeVec,
    errors_total: IntCounterVec,
    phase_total: IntCounterVec,
    pods_stddev: Gauge,
    pods_max_min_ratio: Gauge,
    unschedulable_pods: IntGauge,
}

/// Cheap handle to one run's metric set.
#[derive(Clone)]
pub struct BenchMetrics {
    inner: Arc<Inner>,
}

impl BenchMetrics {
    pub fn new() -> Result<Self, prometheus::Error> {
        let registry = Registry::new();

        let run_info = GaugeVec::new(
            Opts::new("drainbench_run_info", "1 if a benchmark run is currently active"),
            &["scenario", "profile", "run_id"],
        )?;
        let total_duration = GaugeVec::new(
            Opts::new(
                "drainbench_total_duration_seconds",
                "Total duration of the last benchmark run",
            ),
            &["scenario", "profile", "run_id"],
        )?;
        let errors_total = IntCounterVec::new(
            Opts::new("drainbench_errors_total", "Total number of errors during benchmark"),
            &["type"],
        )?;
        let phase_total = IntCounterVec::new(
            Opts::new("drainbench_phase_total", "Count of phase markers emitted"),
            &["phase"],
        )?;
        let pods_stddev = Gauge::new(
            "drainbench_pods_stddev",
            "Pods per node standard deviation",
        )?;
        let pods_max_min_ratio = Gauge::new(
            "drainbench_pods_max_min_ratio",
            "Pods per node max/min ratio",
        )?;
        let unschedulable_pods = IntGauge::new(
            "drainbench_unschedulable_pods",
            "Count of unschedulable pods in the benchmark namespace",
        )?;

        registry.register(Box::new(run_info.clone()))?;
        registry.register(Box::new(total_duration.clone()))?;
        registry.register(Box::new(errors_total.clone()))?;
        registry.register(Box::new(phase_total.clone()))?;
        registry.register(Box::new(pods_stddev.clone()))?;
        registry.register(Box::new(pods_max_min_ratio.clone()))?;
        registry.register(Box::new(unschedulable_pods.clone()))?;

        Ok(Self {
            inner: Arc::new(Inner {
                registry,
                run_info,
                total_duration,
                errors_total,
                phase_total,
                pods_stddev,
                pods_max_min_ratio,
                unschedulable_pods,
            }),
        })
    }

    pub fn set_run_active(&self, scenario: &str, profile: &str, run_id: &str, active: bool) {
        self.inner
            .run_info
            .with_label_values(&[scenario, profile, run_id])
            .set(if active { 1.0 } else { 0.0 });
    }

    pub fn set_total_duration(&self, scenario: &str, profile: &str, run_id: &str, seconds: f64) {
        self.inner
            .total_duration
            .with_label_values(&[scenario, profile, run_id])
            .set(seconds);
    }

    pub fn inc_error(&self, category: &str) {
        self.inner.errors_total.with_label_values(&[category]).inc();
    }

    /// Fire-and-forget phase counter; never fails the caller.
    pub fn inc_phase(&self, name: &str) {
        self.inner.phase_total.with_label_values(&[name]).inc();
    }

    /// Mirror the latest balance sample into the gauges.
    pub fn record_sample(&self, sample: &Sample) {
        self.inner.pods_stddev.set(sample.pods_stddev);
        self.inner.pods_max_min_ratio.set(sample.pods_max_min_ratio);
        self.inner
            .unschedulable_pods
            .set(sample.unschedulable_pods as i64);
    }

    pub fn gather(&self) -> Vec<prometheus::proto::MetricFamily> {
        self.inner.registry.gather()
    }
}

async fn metrics_handler(State(metrics): State<BenchMetrics>) -> impl IntoResponse {
    let encoder = TextEncoder::new();
    let mut buffer = Vec::new();
    if let Err(e) = encoder.encode(&metrics.gather(), &mut buffer) {
        return (StatusCode::INTERNAL_SERVER_ERROR, Vec::from(e.to_string())).into_response();
    }
    (
        StatusCode::OK,
        [("content-type", "text/plain; charset=utf-8")],
        buffer,
    )
        .into_response()
}

/// Serve this run's `/metrics` endpoint until the process exits.
pub async fn serve_metrics(port: u16, metrics: BenchMetrics) -> anyhow::Result<()> {
    let app = Router::new()
        .route("/metrics", get(metrics_handler))
        .with_state(metrics);

    let addr = format!("0.0.0.0:{port}");
    info!(addr = %addr, "Starting metrics server");
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app).await?;
    Ok(())
}
