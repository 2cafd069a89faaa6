//! Point-in-time cluster snapshot

use crate::cluster::{ClusterOps, PodPhase};
use crate::error::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Per-node occupancy and capacity at snapshot time.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NodeStats {
    pub pods: usize,
    pub cpu_requested_milli: i64,
    pub mem_requested_bytes: i64,
    pub cpu_allocatable_milli: i64,
    pub mem_allocatable_bytes: i64,
}

/// Point-in-time cluster read. Immutable once produced.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    pub time: DateTime<Utc>,
    pub nodes: BTreeMap<String, NodeStats>,
    pub unschedulable_pods: usize,
    pub total_pods_counted: usize,
    pub namespace: String,
    pub namespace_only: bool,
}

impl Default for Snapshot {
    fn default() -> Self {
        Self {
            time: DateTime::<Utc>::UNIX_EPOCH,
            nodes: BTreeMap::new(),
            unschedulable_pods: 0,
            total_pods_counted: 0,
            namespace: String::new(),
            namespace_only: false,
        }
    }
}

/// Scoping for snapshot collection.
#[derive(Debug, Clone, Default)]
pub struct SnapshotOptions {
    pub namespace: String,
    /// Count only pods in `namespace` toward per-node stats.
    pub namespace_only: bool,
}

/// Read every node and pod and fold them into a [`Snapshot`].
///
/// Succeeded and Failed pods are skipped. Unschedulable pods are counted for
/// the benchmark namespace regardless of the `namespace_only` scoping.
pub async fn collect_snapshot(
    ops: &dyn ClusterOps,
    opts: &SnapshotOptions,
) -> Result<Snapshot> {
    let mut snapshot = Snapshot {
        time: Utc::now(),
        namespace: opts.namespace.clone(),
        namespace_only: opts.namespace_only,
        ..Snapshot::default()
    };

    for node in ops.list_nodes(None).await? {
        snapshot.nodes.insert(
            node.name.clone(),
            NodeStats {
                cpu_allocatable_milli: node.cpu_allocatable_milli,
                mem_allocatable_bytes: node.mem_allocatable_bytes,
                ..NodeStats::default()
            },
        );
    }

    for pod in ops.list_all_pods().await? {
        if matches!(pod.phase, PodPhase::Succeeded | PodPhase::Failed) {
            continue;
        }
        if pod.namespace == opts.namespace && pod.unschedulable {
            snapshot.unschedulable_pods += 1;
        }
        if opts.namespace_only && !opts.namespace.is_empty() && pod.namespace != opts.namespace {
            continue;
        }
        if let Some(node_name) = &pod.node_name {
            let stats = snapshot.nodes.entry(node_name.clone()).or_default();
            stats.pods += 1;
            stats.cpu_requested_milli += pod.cpu_request_milli;
            stats.mem_requested_bytes += pod.mem_request_bytes;
            snapshot.total_pods_counted += 1;
        }
    }

    Ok(snapshot)
}
