//! Maintenance scenario
//!
//! The benchmark's single scenario: schedule the workload, then repeatedly
//! take a worker node through cordon, drain, reschedule, and uncordon,
//! optionally letting the rebalancer run after each uncordon. Every state
//! transition is recorded through the phase recorder; a failed record
//! aborts the run.

use crate::cluster::{
    cordon_node, drain_node, summarize_scheduling, uncordon_node, wait_for_pods_ready, ClusterOps,
    DrainOptions, NodeInfo, RebalancerSpec,
};
use crate::error::{BenchError, Result};
use crate::evictions::{correlate, pod_name_to_app_label, EvictionRecord};
use crate::phases::{PhaseRecorder, SNAPSHOT_AFTER, SNAPSHOT_BEFORE};
use crate::rebalancer;
use crate::report::format_schedule_messages;
use crate::shutdown::Shutdown;
use crate::workloads::{self, mix_total, Mix, SizeClass, WorkloadConfig};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

/// Name prefix for the benchmark's own deployments.
const WORKLOAD_NAME: &str = "drainbench";

#[derive(Debug, Clone)]
pub struct ScenarioConfig {
    pub run_id: String,
    pub namespace: String,
    pub workload_image: String,
    pub mix: Mix,
    pub size_classes: BTreeMap<String, SizeClass>,
    pub labels: BTreeMap<String, String>,
    pub label_selector: String,
    pub wait_timeout: Duration,
    pub post_uncordon_wait: Duration,
    pub drain_iterations: u32,
    pub rebalancer: RebalancerSpec,
}

#[derive(Debug, Clone, Default)]
pub struct ScenarioResult {
    pub evictions: Vec<EvictionRecord>,
    pub duration: Duration,
    /// Node drained in the last iteration.
    pub drain_node: String,
}

/// Run the full maintenance scenario to completion or first error.
pub async fn run_maintenance(
    ops: Arc<dyn ClusterOps>,
    cfg: ScenarioConfig,
    recorder: Arc<PhaseRecorder>,
    shutdown: Shutdown,
) -> Result<ScenarioResult> {
    let start = std::time::Instant::now();
    let mut runner = MaintenanceRunner::new(ops, cfg, recorder, shutdown);

    runner.prepare_workloads().await?;
    runner.recorder.record(SNAPSHOT_BEFORE).await?;
    runner.ensure_rebalancer().await?;
    runner.capture_pre_disruption_identities().await;

    let iterations = runner.cfg.drain_iterations.max(1);
    runner.validate_iterations(iterations).await?;

    for i in 0..iterations {
        runner.iteration = i + 1;
        runner.recorder.record("maintenance:iteration").await?;
        runner.select_drain_node().await?;
        runner.cordon_and_drain().await?;
        runner.wait_for_reschedule().await?;
        runner.uncordon().await?;
        runner.run_rebalancer().await?;
        runner.wait_post_uncordon().await?;
    }

    runner.recorder.record(SNAPSHOT_AFTER).await?;
    let evictions = runner.collect_evictions().await;

    Ok(ScenarioResult {
        evictions,
        duration: start.elapsed(),
        drain_node: runner.drain_node,
    })
}

struct MaintenanceRunner {
    ops: Arc<dyn ClusterOps>,
    cfg: ScenarioConfig,
    recorder: Arc<PhaseRecorder>,
    shutdown: Shutdown,
    total_pods: i32,
    drain_node: String,
    drained: BTreeSet<String>,
    pre_evict_labels: BTreeMap<String, String>,
    iteration: u32,
}

impl MaintenanceRunner {
    fn new(
        ops: Arc<dyn ClusterOps>,
        cfg: ScenarioConfig,
        recorder: Arc<PhaseRecorder>,
        shutdown: Shutdown,
    ) -> Self {
        let total_pods = mix_total(&cfg.mix);
        Self {
            ops,
            cfg,
            recorder,
            shutdown,
            total_pods,
            drain_node: String::new(),
            drained: BTreeSet::new(),
            pre_evict_labels: BTreeMap::new(),
            iteration: 0,
        }
    }

    async fn prepare_workloads(&self) -> Result<()> {
        self.ops.ensure_namespace(&self.cfg.namespace).await?;
        self.recorder.record("workload:create").await?;
        workloads::ensure_workloads(
            self.ops.as_ref(),
            &WorkloadConfig {
                namespace: self.cfg.namespace.clone(),
                name_prefix: WORKLOAD_NAME.into(),
                labels: self.cfg.labels.clone(),
                pod_labels: self.cfg.labels.clone(),
                mix: self.cfg.mix.clone(),
                size_classes: self.cfg.size_classes.clone(),
                pod_image: self.cfg.workload_image.clone(),
            },
        )
        .await?;
        info!(pods = self.total_pods, "Workloads applied, waiting for ready");

        if let Err(err) = workloads::wait_for_workloads_ready(
            self.ops.as_ref(),
            &self.cfg.namespace,
            WORKLOAD_NAME,
            &self.cfg.mix,
            self.cfg.wait_timeout,
            &self.shutdown,
        )
        .await
        {
            self.log_scheduling_summary().await;
            return Err(err);
        }
        self.recorder.record("workload:ready").await
    }

    async fn ensure_rebalancer(&self) -> Result<()> {
        if self.cfg.rebalancer.policy_yaml.is_empty() {
            return Ok(());
        }
        self.recorder.record("rebalancer:install").await?;
        rebalancer::ensure_installed(self.ops.as_ref(), &self.cfg.rebalancer).await
    }

    /// Snapshot pod-name-to-workload identities before any disruption.
    /// Best effort: correlation is degraded, not fatal, without it.
    async fn capture_pre_disruption_identities(&mut self) {
        if let Ok(pods) = self
            .ops
            .list_pods(&self.cfg.namespace, Some(&self.cfg.label_selector))
            .await
        {
            self.pre_evict_labels = pod_name_to_app_label(&pods);
        }
    }

    async fn validate_iterations(&self, iterations: u32) -> Result<()> {
        if iterations <= 1 {
            return Ok(());
        }
        let nodes = self.ops.list_nodes(None).await?;
        let workers = schedulable_workers(&nodes);
        if workers < 3 {
            return Err(BenchError::Precondition(format!(
                "need at least 3 worker nodes for {iterations} maintenance iterations (found {workers})"
            )));
        }
        Ok(())
    }

    async fn select_drain_node(&mut self) -> Result<()> {
        let nodes = self.ops.list_nodes(None).await?;
        let node = if self.drained.is_empty() {
            pick_drain_node(&nodes)?
        } else {
            pick_drain_node_excluding(&nodes, &self.drained)?
        };
        self.drained.insert(node.clone());
        info!(node = %node, iteration = self.iteration, "Selected drain node");
        self.drain_node = node;
        Ok(())
    }

    async fn cordon_and_drain(&self) -> Result<()> {
        self.recorder.record("cordon:start").await?;
        cordon_node(self.ops.as_ref(), &self.drain_node).await?;
        self.recorder.record("cordon:done").await?;

        match self
            .ops
            .pods_on_node(
                &self.cfg.namespace,
                Some(&self.cfg.label_selector),
                &self.drain_node,
            )
            .await
        {
            Ok(pods) => info!(
                node = %self.drain_node,
                pods = pods.len(),
                iteration = self.iteration,
                "Drain start"
            ),
            Err(_) => info!(
                node = %self.drain_node,
                iteration = self.iteration,
                "Drain start"
            ),
        }
        self.recorder.record("drain:start").await?;
        drain_node(
            self.ops.as_ref(),
            &self.drain_node,
            &DrainOptions {
                namespace: self.cfg.namespace.clone(),
                label_selector: Some(self.cfg.label_selector.clone()),
                timeout: self.cfg.wait_timeout,
            },
            &self.shutdown,
        )
        .await?;
        self.recorder.record("drain:done").await
    }

    async fn wait_for_reschedule(&self) -> Result<()> {
        let result = wait_for_pods_ready(
            self.ops.as_ref(),
            &self.cfg.namespace,
            Some(&self.cfg.label_selector),
            self.total_pods,
            self.cfg.wait_timeout,
            &self.shutdown,
        )
        .await;

        if let Err(err) = result {
            if matches!(err, BenchError::Timeout { .. }) {
                if let Ok(summary) = summarize_scheduling(
                    self.ops.as_ref(),
                    &self.cfg.namespace,
                    Some(&self.cfg.label_selector),
                )
                .await
                {
                    // Still a timeout for the errors-by-type counter, just
                    // carrying scheduling diagnostics in its message.
                    return Err(BenchError::Timeout {
                        what: format!(
                            "pod reschedule: ready {}/{}, pending {}, reasons: {}",
                            summary.ready,
                            self.total_pods,
                            summary.pending,
                            format_schedule_messages(&summary.messages),
                        ),
                        timeout: self.cfg.wait_timeout,
                    });
                }
            }
            self.log_scheduling_summary().await;
            return Err(err);
        }
        info!(pods = self.total_pods, "Pods ready after drain");
        self.recorder.record("reschedule:ready").await
    }

    async fn uncordon(&self) -> Result<()> {
        self.recorder.record("uncordon:start").await?;
        uncordon_node(self.ops.as_ref(), &self.drain_node).await?;
        self.recorder.record("uncordon:done").await
    }

    async fn run_rebalancer(&self) -> Result<()> {
        if self.cfg.rebalancer.policy_yaml.is_empty() {
            return Ok(());
        }
        self.recorder.record("rebalancer:run").await?;
        let job_name = format!("drainbench-rebalancer-{}-{}", self.cfg.run_id, self.iteration);
        rebalancer::run_once(self.ops.as_ref(), &self.cfg.rebalancer, &job_name).await?;
        self.recorder.record("rebalancer:done").await
    }

    async fn wait_post_uncordon(&self) -> Result<()> {
        if self.cfg.post_uncordon_wait.is_zero() {
            return Ok(());
        }
        info!(
            seconds = self.cfg.post_uncordon_wait.as_secs(),
            iteration = self.iteration,
            "Waiting after uncordon"
        );
        let mut shutdown = self.shutdown.clone();
        tokio::select! {
            _ = shutdown.cancelled() => Err(BenchError::Cancelled),
            _ = tokio::time::sleep(self.cfg.post_uncordon_wait) => Ok(()),
        }
    }

    /// Best-effort eviction correlation; read failures yield an empty list.
    async fn collect_evictions(&self) -> Vec<EvictionRecord> {
        let post_pods = match self
            .ops
            .list_pods(&self.cfg.namespace, Some(&self.cfg.label_selector))
            .await
        {
            Ok(pods) => pods,
            Err(err) => {
                warn!(error = %err, "Skipping eviction correlation");
                return Vec::new();
            }
        };
        match self.ops.list_pod_events(&self.cfg.namespace).await {
            Ok(events) => correlate(&events, &self.pre_evict_labels, &post_pods),
            Err(err) => {
                warn!(error = %err, "Skipping eviction correlation");
                Vec::new()
            }
        }
    }

    async fn log_scheduling_summary(&self) {
        let Ok(summary) = summarize_scheduling(
            self.ops.as_ref(),
            &self.cfg.namespace,
            Some(&self.cfg.label_selector),
        )
        .await
        else {
            return;
        };
        info!(
            ready = summary.ready,
            pending = summary.pending,
            reasons = %format_schedule_messages(&summary.messages),
            "Scheduling summary"
        );
        if let Ok(nodes) = self.ops.list_nodes(None).await {
            let unsched: Vec<&str> = nodes
                .iter()
                .filter(|n| n.unschedulable)
                .map(|n| n.name.as_str())
                .collect();
            if !unsched.is_empty() {
                info!(nodes = %unsched.join(","), "Unschedulable nodes");
            }
        }
    }
}

fn schedulable_workers(nodes: &[NodeInfo]) -> usize {
    nodes
        .iter()
        .filter(|n| !n.unschedulable && !n.is_control_plane())
        .count()
}

/// First schedulable non-control-plane node, falling back to the first node
/// of the list when none is eligible. Errors only on an empty list.
fn pick_drain_node(nodes: &[NodeInfo]) -> Result<String> {
    let first = nodes
        .first()
        .ok_or_else(|| BenchError::Precondition("no nodes found".into()))?;
    Ok(nodes
        .iter()
        .find(|n| !n.unschedulable && !n.is_control_plane())
        .unwrap_or(first)
        .name
        .clone())
}

/// Like [`pick_drain_node`] minus already-drained nodes, but with no
/// fallback: zero candidates is a hard error.
fn pick_drain_node_excluding(nodes: &[NodeInfo], excluded: &BTreeSet<String>) -> Result<String> {
    nodes
        .iter()
        .find(|n| !n.unschedulable && !n.is_control_plane() && !excluded.contains(&n.name))
        .map(|n| n.name.clone())
        .ok_or_else(|| BenchError::Precondition("no available drain nodes found".into()))
}
