//! Cluster access boundary
//!
//! Every cluster read and write goes through the [`ClusterOps`] trait so the
//! orchestrator, sampler, and correlator can be exercised against a mock
//! cluster. [`KubeCluster`] is the real implementation backed by `kube`.
//!
//! The data types here are deliberately plain: the rest of the library never
//! touches `k8s-openapi` objects directly.

mod actions;
mod kube_impl;
mod poll;
mod quantity;

#[cfg(test)]
pub(crate) mod mock;

pub use actions::{
    cordon_node, drain_node, summarize_scheduling, uncordon_node, unschedulable_node_names,
    wait_for_pods_ready, DrainOptions,
};
pub use kube_impl::{ClusterInfo, KubeCluster};
pub use poll::poll_until;

use crate::error::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::BTreeMap;

/// Node labels that mark control-plane membership.
const CONTROL_PLANE_LABELS: [&str; 2] = [
    "node-role.kubernetes.io/control-plane",
    "node-role.kubernetes.io/master",
];

/// Point-in-time view of a node.
#[derive(Debug, Clone, Default)]
pub struct NodeInfo {
    pub name: String,
    pub unschedulable: bool,
    pub labels: BTreeMap<String, String>,
    pub taints: Vec<NodeTaint>,
    pub cpu_allocatable_milli: i64,
    pub mem_allocatable_bytes: i64,
}

#[derive(Debug, Clone)]
pub struct NodeTaint {
    pub key: String,
    pub effect: String,
}

impl NodeInfo {
    pub fn is_control_plane(&self) -> bool {
        CONTROL_PLANE_LABELS
            .iter()
            .any(|l| self.labels.contains_key(*l))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PodPhase {
    #[default]
    Pending,
    Running,
    Succeeded,
    Failed,
    Unknown,
}

/// Point-in-time view of a pod, reduced to the fields the benchmark needs.
#[derive(Debug, Clone, Default)]
pub struct PodInfo {
    pub name: String,
    pub namespace: String,
    pub node_name: Option<String>,
    pub labels: BTreeMap<String, String>,
    pub phase: PodPhase,
    /// PodReady=True transition time; `Some` means the pod is ready.
    pub ready_at: Option<DateTime<Utc>>,
    /// PodScheduled=False with reason Unschedulable.
    pub unschedulable: bool,
    /// Reason and message of a PodScheduled=False condition.
    pub scheduling_failure: Option<(String, String)>,
    pub mirror: bool,
    pub daemonset_owned: bool,
    pub cpu_request_milli: i64,
    pub mem_request_bytes: i64,
}

impl PodInfo {
    pub fn is_ready(&self) -> bool {
        self.phase == PodPhase::Running && self.ready_at.is_some()
    }
}

/// A pod-scoped cluster event.
#[derive(Debug, Clone, Default)]
pub struct PodEvent {
    pub pod_name: String,
    pub reason: String,
    pub message: String,
    pub node_name: String,
    pub event_time: Option<DateTime<Utc>>,
    pub last_timestamp: Option<DateTime<Utc>>,
    pub first_timestamp: Option<DateTime<Utc>>,
}

impl PodEvent {
    /// Best available timestamp: occurrence time, then last observed, then
    /// first observed, then the caller's wall clock.
    pub fn timestamp(&self) -> DateTime<Utc> {
        self.event_time
            .or(self.last_timestamp)
            .or(self.first_timestamp)
            .unwrap_or_else(Utc::now)
    }
}

/// Desired state of a deployment-style workload.
#[derive(Debug, Clone)]
pub struct WorkloadSpec {
    pub namespace: String,
    pub name: String,
    pub labels: BTreeMap<String, String>,
    pub pod_labels: BTreeMap<String, String>,
    pub replicas: i32,
    pub image: String,
    pub cpu_request: String,
    pub mem_request: String,
}

/// Configuration for the external rebalancer, treated as opaque.
#[derive(Debug, Clone, Default)]
pub struct RebalancerSpec {
    pub namespace: String,
    pub image: String,
    pub policy_yaml: String,
    pub schedule: String,
    pub job_name: Option<String>,
}

/// Abstract cluster contract consumed by the benchmark.
///
/// Write operations are idempotent where noted; implementations map their
/// native errors into [`crate::BenchError`].
#[async_trait]
pub trait ClusterOps: Send + Sync {
    async fn list_nodes(&self, label_selector: Option<&str>) -> Result<Vec<NodeInfo>>;
    async fn get_node(&self, name: &str) -> Result<NodeInfo>;
    async fn set_node_unschedulable(&self, name: &str, unschedulable: bool) -> Result<()>;

    async fn list_pods(&self, namespace: &str, label_selector: Option<&str>)
        -> Result<Vec<PodInfo>>;
    /// All pods across all namespaces, for snapshot collection.
    async fn list_all_pods(&self) -> Result<Vec<PodInfo>>;
    async fn pods_on_node(
        &self,
        namespace: &str,
        label_selector: Option<&str>,
        node: &str,
    ) -> Result<Vec<PodInfo>>;

    async fn list_pod_events(&self, namespace: &str) -> Result<Vec<PodEvent>>;

    /// Policy-respecting eviction. A pod that is already gone is a success.
    async fn evict_pod(&self, namespace: &str, name: &str) -> Result<()>;

    async fn ensure_namespace(&self, name: &str) -> Result<()>;
    /// Deleting an absent namespace is a success.
    async fn delete_namespace(&self, name: &str) -> Result<()>;
    async fn namespace_exists(&self, name: &str) -> Result<bool>;
    async fn list_namespace_names(&self) -> Result<Vec<String>>;

    /// Create or update a deployment-style workload.
    async fn apply_workload(&self, spec: &WorkloadSpec) -> Result<()>;
    async fn deployment_ready_replicas(&self, namespace: &str, name: &str) -> Result<i32>;

    async fn install_rebalancer(&self, spec: &RebalancerSpec) -> Result<()>;
    async fn run_rebalancer_job(&self, spec: &RebalancerSpec) -> Result<()>;
}
