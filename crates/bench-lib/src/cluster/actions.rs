//! Higher-level cluster maneuvers built on [`ClusterOps`]
//!
//! Cordon and uncordon are idempotent: a node already in the desired state
//! is left untouched. Drain honors the standard eviction exclusions (mirror
//! pods, DaemonSet-owned pods).

use super::poll::poll_until;
use super::{ClusterOps, NodeInfo, PodInfo, PodPhase};
use crate::error::Result;
use crate::shutdown::Shutdown;
use std::collections::BTreeMap;
use std::time::Duration;

const DRAIN_POLL_INTERVAL: Duration = Duration::from_secs(2);
const DEFAULT_WAIT_TIMEOUT: Duration = Duration::from_secs(600);

/// Mark a node unschedulable. No-op if already cordoned.
pub async fn cordon_node(ops: &dyn ClusterOps, name: &str) -> Result<()> {
    update_node_schedulable(ops, name, true).await
}

/// Mark a node schedulable again. No-op if already uncordoned.
pub async fn uncordon_node(ops: &dyn ClusterOps, name: &str) -> Result<()> {
    update_node_schedulable(ops, name, false).await
}

async fn update_node_schedulable(
    ops: &dyn ClusterOps,
    name: &str,
    unschedulable: bool,
) -> Result<()> {
    let node = ops.get_node(name).await?;
    if node.unschedulable == unschedulable {
        return Ok(());
    }
    ops.set_node_unschedulable(name, unschedulable).await
}

#[derive(Debug, Clone)]
pub struct DrainOptions {
    pub namespace: String,
    pub label_selector: Option<String>,
    pub timeout: Duration,
}

/// Evict matching pods off `node` and wait until it is empty of them.
pub async fn drain_node(
    ops: &dyn ClusterOps,
    node: &str,
    opts: &DrainOptions,
    shutdown: &Shutdown,
) -> Result<()> {
    let timeout = if opts.timeout.is_zero() {
        DEFAULT_WAIT_TIMEOUT
    } else {
        opts.timeout
    };
    let selector = opts.label_selector.as_deref();

    let pods = ops.pods_on_node(&opts.namespace, selector, node).await?;
    for pod in &pods {
        if pod.mirror || pod.daemonset_owned {
            continue;
        }
        ops.evict_pod(&pod.namespace, &pod.name).await?;
    }

    poll_until(DRAIN_POLL_INTERVAL, timeout, shutdown, "node drain", || async {
        let remaining = ops.pods_on_node(&opts.namespace, selector, node).await?;
        Ok(remaining.iter().all(|p| p.mirror || p.daemonset_owned))
    })
    .await
}

/// Wait until exactly `expected` matching pods are Running and Ready.
pub async fn wait_for_pods_ready(
    ops: &dyn ClusterOps,
    namespace: &str,
    label_selector: Option<&str>,
    expected: i32,
    timeout: Duration,
    shutdown: &Shutdown,
) -> Result<()> {
    let timeout = if timeout.is_zero() {
        DEFAULT_WAIT_TIMEOUT
    } else {
        timeout
    };
    poll_until(
        DRAIN_POLL_INTERVAL,
        timeout,
        shutdown,
        "pods ready",
        || async {
            let pods = ops.list_pods(namespace, label_selector).await?;
            let ready = pods.iter().filter(|p| p.is_ready()).count() as i32;
            Ok(ready == expected)
        },
    )
    .await
}

/// Scheduling state of a set of pods, used for timeout diagnostics.
#[derive(Debug, Clone, Default)]
pub struct ScheduleSummary {
    pub ready: i32,
    pub pending: i32,
    /// "reason: message" -> occurrence count.
    pub messages: BTreeMap<String, usize>,
}

impl ScheduleSummary {
    pub fn from_pods(pods: &[PodInfo]) -> Self {
        let mut summary = ScheduleSummary::default();
        for pod in pods {
            if pod.is_ready() {
                summary.ready += 1;
                continue;
            }
            if pod.phase == PodPhase::Pending || pod.node_name.is_none() {
                summary.pending += 1;
                if let Some((reason, message)) = &pod.scheduling_failure {
                    if !message.is_empty() {
                        let key = if reason.is_empty() {
                            "unspecified"
                        } else {
                            reason.as_str()
                        };
                        *summary
                            .messages
                            .entry(format!("{key}: {message}"))
                            .or_insert(0) += 1;
                    }
                }
            }
        }
        summary
    }
}

/// Summarize why matching pods are not yet scheduled or ready.
pub async fn summarize_scheduling(
    ops: &dyn ClusterOps,
    namespace: &str,
    label_selector: Option<&str>,
) -> Result<ScheduleSummary> {
    let pods = ops.list_pods(namespace, label_selector).await?;
    Ok(ScheduleSummary::from_pods(&pods))
}

/// Names of unschedulable nodes, including taint-based cordons, sorted.
pub fn unschedulable_node_names(nodes: &[NodeInfo]) -> Vec<String> {
    let mut names: Vec<String> = nodes
        .iter()
        .filter(|node| {
            node.unschedulable
                || node.taints.iter().any(|t| {
                    t.key == "node.kubernetes.io/unschedulable" && t.effect == "NoSchedule"
                })
        })
        .map(|node| node.name.clone())
        .collect();
    names.sort();
    names
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cluster::mock::MockCluster;
    use crate::cluster::NodeTaint;
    use chrono::Utc;

    fn worker(name: &str) -> NodeInfo {
        NodeInfo {
            name: name.to_string(),
            ..NodeInfo::default()
        }
    }

    #[tokio::test]
    async fn cordon_is_idempotent() {
        let mock = MockCluster::new();
        mock.add_node(worker("n1"));

        cordon_node(&mock, "n1").await.unwrap();
        assert_eq!(mock.node_update_calls(), 1);
        assert!(mock.node("n1").unschedulable);

        // Already cordoned: read-only.
        cordon_node(&mock, "n1").await.unwrap();
        assert_eq!(mock.node_update_calls(), 1);

        uncordon_node(&mock, "n1").await.unwrap();
        uncordon_node(&mock, "n1").await.unwrap();
        assert_eq!(mock.node_update_calls(), 2);
        assert!(!mock.node("n1").unschedulable);
    }

    #[tokio::test]
    async fn drain_skips_mirror_and_daemonset_pods() {
        let mock = MockCluster::new();
        mock.add_node(worker("n1"));
        mock.add_node(worker("n2"));
        mock.add_pod(PodInfo {
            name: "app-1".into(),
            namespace: "bench".into(),
            node_name: Some("n1".into()),
            phase: PodPhase::Running,
            ready_at: Some(Utc::now()),
            ..PodInfo::default()
        });
        mock.add_pod(PodInfo {
            name: "mirror-1".into(),
            namespace: "bench".into(),
            node_name: Some("n1".into()),
            mirror: true,
            ..PodInfo::default()
        });
        mock.add_pod(PodInfo {
            name: "ds-1".into(),
            namespace: "bench".into(),
            node_name: Some("n1".into()),
            daemonset_owned: true,
            ..PodInfo::default()
        });

        let opts = DrainOptions {
            namespace: "bench".into(),
            label_selector: None,
            timeout: Duration::from_secs(10),
        };
        drain_node(&mock, "n1", &opts, &Shutdown::never())
            .await
            .unwrap();

        assert_eq!(mock.evicted_pods(), vec!["app-1".to_string()]);
    }

    #[test]
    fn schedule_summary_counts_ready_and_pending() {
        let pods = vec![
            PodInfo {
                name: "ready".into(),
                phase: PodPhase::Running,
                ready_at: Some(Utc::now()),
                node_name: Some("n1".into()),
                ..PodInfo::default()
            },
            PodInfo {
                name: "stuck".into(),
                phase: PodPhase::Pending,
                scheduling_failure: Some((
                    "Unschedulable".into(),
                    "0/3 nodes are available".into(),
                )),
                ..PodInfo::default()
            },
            PodInfo {
                name: "stuck-2".into(),
                phase: PodPhase::Pending,
                scheduling_failure: Some((
                    "Unschedulable".into(),
                    "0/3 nodes are available".into(),
                )),
                ..PodInfo::default()
            },
        ];
        let summary = ScheduleSummary::from_pods(&pods);
        assert_eq!(summary.ready, 1);
        assert_eq!(summary.pending, 2);
        assert_eq!(
            summary.messages.get("Unschedulable: 0/3 nodes are available"),
            Some(&2)
        );
    }

    #[test]
    fn unschedulable_names_include_taint_cordons() {
        let mut tainted = worker("b-tainted");
        tainted.taints.push(NodeTaint {
            key: "node.kubernetes.io/unschedulable".into(),
            effect: "NoSchedule".into(),
        });
        let mut cordoned = worker("a-cordoned");
        cordoned.unschedulable = true;

        let names = unschedulable_node_names(&[worker("ok"), tainted, cordoned]);
        assert_eq!(names, vec!["a-cordoned".to_string(), "b-tainted".to_string()]);
    }
}
