//! Run orchestration
//!
//! Ties everything together for one benchmark run: preflight, plan, signal
//! handling, the metrics endpoint, the background sampler, the maintenance
//! scenario, and finally report assembly. Namespace cleanup runs exactly
//! once whether the run succeeds, fails, or is interrupted.

use crate::cleanup::{CleanupService, Scope};
use crate::cluster::{ClusterOps, RebalancerSpec};
use crate::error::{BenchError, Result};
use crate::metrics::{Sampler, SnapshotOptions};
use crate::observability::{serve_metrics, BenchMetrics};
use crate::phases::PhaseRecorder;
use crate::plan::{PlanBuilder, RunRequest};
use crate::rebalance::rebalance_time;
use crate::rebalancer::{REBALANCER_CADENCE, REBALANCER_IMAGE};
use crate::report::{self, format_node_pods, RunConfig, RunReport, Summary};
use crate::scenario::{run_maintenance, ScenarioConfig};
use crate::shutdown::{self, ShutdownHandle};
use chrono::Utc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info};

const SCENARIO_NAME: &str = "maintenance";
const WORKLOAD_IMAGE: &str = "registry.k8s.io/pause:3.9";
const DEFAULT_SAMPLE_INTERVAL: Duration = Duration::from_secs(5);
const DEFAULT_POST_UNCORDON_WAIT: Duration = Duration::from_secs(60);
const DEFAULT_WAIT_TIMEOUT: Duration = Duration::from_secs(600);
const DEFAULT_DRAIN_ITERATIONS: u32 = 2;
/// Pods-per-node stddev at or below which the cluster counts as balanced.
const BALANCE_STDDEV_GOAL: f64 = 1.0;

/// Flips exactly once; the loser of the race does nothing.
struct OnceGuard(AtomicBool);

impl OnceGuard {
    fn new() -> Self {
        Self(AtomicBool::new(false))
    }

    fn first(&self) -> bool {
        !self.0.swap(true, Ordering::SeqCst)
    }
}

pub struct Runner {
    ops: Arc<dyn ClusterOps>,
    pub context: String,
    pub server: String,
    /// Port for the `/metrics` endpoint; 0 disables it.
    pub metrics_port: u16,
    pub sample_interval: Duration,
    pub wait_timeout: Duration,
    pub post_uncordon_wait: Duration,
    pub drain_iterations: u32,
}

impl Runner {
    pub fn new(ops: Arc<dyn ClusterOps>) -> Self {
        Self {
            ops,
            context: String::new(),
            server: String::new(),
            metrics_port: 0,
            sample_interval: DEFAULT_SAMPLE_INTERVAL,
            wait_timeout: DEFAULT_WAIT_TIMEOUT,
            post_uncordon_wait: DEFAULT_POST_UNCORDON_WAIT,
            drain_iterations: DEFAULT_DRAIN_ITERATIONS,
        }
    }

    pub async fn run(&self, request: RunRequest) -> Result<()> {
        let metrics = BenchMetrics::new()
            .map_err(|e| BenchError::Other(format!("metrics registry: {e}")))?;

        let cleanup = CleanupService::new(self.ops.clone());
        cleanup.preflight().await?;

        let plan = PlanBuilder::new().build(&request)?;
        info!(namespace = %plan.namespace, "Benchmark namespace");
        info!(path = %plan.output_path.display(), "Results file path");
        info!(run_id = %plan.run_id, "Run id");

        let (handle, shutdown) = shutdown::channel();
        let handle = Arc::new(handle);
        let signal_task = tokio::spawn(watch_for_interrupt(handle.clone()));

        if self.metrics_port != 0 {
            let metrics_clone = metrics.clone();
            let port = self.metrics_port;
            tokio::spawn(async move {
                if let Err(e) = serve_metrics(port, metrics_clone).await {
                    error!(error = %e, "Metrics server failed");
                }
            });
        }

        let profile = request.profile.as_str().to_string();
        metrics.set_run_active(SCENARIO_NAME, &profile, &plan.run_id, true);

        let snapshot_opts = SnapshotOptions {
            namespace: plan.namespace.clone(),
            namespace_only: true,
        };
        let sampler = Arc::new(Sampler::new(
            self.ops.clone(),
            self.sample_interval,
            snapshot_opts.clone(),
            metrics.clone(),
        ));
        let sampler_task = {
            let sampler = sampler.clone();
            let shutdown = shutdown.clone();
            tokio::spawn(async move { sampler.run(shutdown).await })
        };

        let recorder = Arc::new(PhaseRecorder::new(
            self.ops.clone(),
            snapshot_opts,
            metrics.clone(),
        ));

        let guard = OnceGuard::new();
        let run_cleanup = |reason: &'static str| {
            let first = guard.first();
            let cleanup = &cleanup;
            let namespace = plan.namespace.clone();
            async move {
                if !first {
                    return;
                }
                info!(reason = %reason, namespace = %namespace, "Namespace cleanup start");
                let scope = Scope {
                    namespace: Some(namespace.clone()),
                    wait: true,
                    ..Scope::default()
                };
                match cleanup.run(scope).await {
                    Ok(()) => info!(namespace = %namespace, "Namespace cleanup done"),
                    Err(e) => error!(error = %e, "Cleanup failed"),
                }
            }
        };

        info!("Starting maintenance scenario");
        let scenario_result = run_maintenance(
            self.ops.clone(),
            ScenarioConfig {
                run_id: plan.run_id.clone(),
                namespace: plan.namespace.clone(),
                workload_image: WORKLOAD_IMAGE.into(),
                mix: plan.mix.clone(),
                size_classes: plan.size_classes.clone(),
                labels: plan.labels.clone(),
                label_selector: plan.label_selector.clone(),
                wait_timeout: self.wait_timeout,
                post_uncordon_wait: self.post_uncordon_wait,
                drain_iterations: self.drain_iterations,
                rebalancer: RebalancerSpec {
                    namespace: plan.namespace.clone(),
                    image: REBALANCER_IMAGE.into(),
                    policy_yaml: plan.policy_yaml.clone(),
                    schedule: REBALANCER_CADENCE.into(),
                    job_name: None,
                },
            },
            recorder.clone(),
            shutdown.clone(),
        )
        .await;

        let result = match scenario_result {
            Ok(result) => result,
            Err(err) => {
                metrics.inc_error(err.category());
                let reason = if matches!(err, BenchError::Cancelled) {
                    "cancel"
                } else {
                    "error"
                };
                run_cleanup(reason).await;
                metrics.set_run_active(SCENARIO_NAME, &profile, &plan.run_id, false);
                signal_task.abort();
                return Err(err);
            }
        };

        // Scenario done; stop the sampler before reading its buffers.
        handle.cancel();
        let _ = sampler_task.await;

        let samples = sampler.samples();
        let phases = recorder.phases();
        let (before_snapshot, before_sample) = recorder.before();
        let (after_snapshot, after_sample) = recorder.after();

        let summary = Summary {
            run_id: plan.run_id.clone(),
            scenario: SCENARIO_NAME.into(),
            profile: profile.clone(),
            duration_seconds: result.duration.as_secs_f64(),
            rebalance_time_seconds: rebalance_time(&samples, &phases, BALANCE_STDDEV_GOAL),
            before: before_sample,
            after: after_sample,
        };

        let report = RunReport {
            config: RunConfig {
                run_id: plan.run_id.clone(),
                scenario: SCENARIO_NAME.into(),
                profile: profile.clone(),
                namespace: plan.namespace.clone(),
                start_time: Utc::now(),
                context: self.context.clone(),
                server: self.server.clone(),
                pods_total: request.pods_total,
                pod_cpu: request.pod_cpu.clone(),
                pod_memory: request.pod_memory.clone(),
                rebalancer_image: REBALANCER_IMAGE.into(),
                rebalancer_namespace: plan.namespace.clone(),
                rebalancer_cron: REBALANCER_CADENCE.into(),
                sample_interval: format!("{:?}", self.sample_interval),
            },
            phases,
            summary: summary.clone(),
            samples,
            before_snapshot: before_snapshot.clone(),
            after_snapshot: after_snapshot.clone(),
            evictions: result.evictions,
        };

        if let Err(err) = report::write_json(&plan.output_path, &report) {
            metrics.inc_error(err.category());
            run_cleanup("error").await;
            metrics.set_run_active(SCENARIO_NAME, &profile, &plan.run_id, false);
            signal_task.abort();
            return Err(err);
        }

        metrics.set_total_duration(
            SCENARIO_NAME,
            &profile,
            &plan.run_id,
            summary.duration_seconds,
        );
        info!(
            duration = format!("{:.1}s", summary.duration_seconds),
            rebalance_time = format!("{:.1}s", summary.rebalance_time_seconds),
            before_pods_stddev = format!("{:.3}", summary.before.pods_stddev),
            after_pods_stddev = format!("{:.3}", summary.after.pods_stddev),
            before_pods = %format_node_pods(&before_snapshot),
            after_pods = %format_node_pods(&after_snapshot),
            "Run summary"
        );
        info!("Benchmark completed");

        run_cleanup("success").await;
        metrics.set_run_active(SCENARIO_NAME, &profile, &plan.run_id, false);
        info!(path = %plan.output_path.display(), "Results output");
        signal_task.abort();
        Ok(())
    }
}

async fn watch_for_interrupt(handle: Arc<ShutdownHandle>) {
    if tokio::signal::ctrl_c().await.is_ok() {
        info!("Interrupt received, shutting down");
        handle.cancel();
    }
}
