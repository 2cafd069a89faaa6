//! In-memory [`ClusterOps`] implementation for tests
//!
//! Scheduling is instantaneous: applied workloads materialize as ready pods
//! spread round-robin over schedulable worker nodes, and an evicted pod is
//! immediately re-created on another schedulable node. That is enough to
//! drive the orchestrator through a complete scenario.

use super::{
    ClusterOps, NodeInfo, PodEvent, PodInfo, PodPhase, RebalancerSpec, WorkloadSpec,
};
use crate::error::{BenchError, Result};
use async_trait::async_trait;
use chrono::Utc;
use std::collections::BTreeSet;
use std::sync::Mutex;

#[derive(Default)]
struct State {
    nodes: Vec<NodeInfo>,
    pods: Vec<PodInfo>,
    events: Vec<PodEvent>,
    namespaces: BTreeSet<String>,
    evicted: Vec<String>,
    node_update_calls: usize,
    fail_all_pod_reads: usize,
    rebalancer_installs: usize,
    rebalancer_runs: usize,
}

pub struct MockCluster {
    state: Mutex<State>,
}

impl MockCluster {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(State::default()),
        }
    }

    pub fn add_node(&self, node: NodeInfo) {
        self.state.lock().unwrap().nodes.push(node);
    }

    pub fn add_pod(&self, pod: PodInfo) {
        self.state.lock().unwrap().pods.push(pod);
    }

    pub fn add_event(&self, event: PodEvent) {
        self.state.lock().unwrap().events.push(event);
    }

    pub fn node(&self, name: &str) -> NodeInfo {
        self.state
            .lock()
            .unwrap()
            .nodes
            .iter()
            .find(|n| n.name == name)
            .cloned()
            .expect("unknown node")
    }

    pub fn pods(&self) -> Vec<PodInfo> {
        self.state.lock().unwrap().pods.clone()
    }

    pub fn evicted_pods(&self) -> Vec<String> {
        self.state.lock().unwrap().evicted.clone()
    }

    pub fn node_update_calls(&self) -> usize {
        self.state.lock().unwrap().node_update_calls
    }

    pub fn rebalancer_installs(&self) -> usize {
        self.state.lock().unwrap().rebalancer_installs
    }

    pub fn rebalancer_runs(&self) -> usize {
        self.state.lock().unwrap().rebalancer_runs
    }

    pub fn namespaces(&self) -> Vec<String> {
        self.state.lock().unwrap().namespaces.iter().cloned().collect()
    }

    /// Make the next `n` calls to `list_all_pods` fail.
    pub fn fail_next_pod_reads(&self, n: usize) {
        self.state.lock().unwrap().fail_all_pod_reads = n;
    }

    fn schedulable_workers(state: &State) -> Vec<String> {
        state
            .nodes
            .iter()
            .filter(|n| !n.unschedulable && !n.is_control_plane())
            .map(|n| n.name.clone())
            .collect()
    }
}

fn selector_matches(selector: Option<&str>, pod: &PodInfo) -> bool {
    let Some(selector) = selector else {
        return true;
    };
    selector.split(',').all(|pair| {
        match pair.split_once('=') {
            Some((k, v)) => pod.labels.get(k.trim()).map(String::as_str) == Some(v.trim()),
            None => false,
        }
    })
}

#[async_trait]
impl ClusterOps for MockCluster {
    async fn list_nodes(&self, _label_selector: Option<&str>) -> Result<Vec<NodeInfo>> {
        Ok(self.state.lock().unwrap().nodes.clone())
    }

    async fn get_node(&self, name: &str) -> Result<NodeInfo> {
        self.state
            .lock()
            .unwrap()
            .nodes
            .iter()
            .find(|n| n.name == name)
            .cloned()
            .ok_or_else(|| BenchError::Other(format!("node {name} not found")))
    }

    async fn set_node_unschedulable(&self, name: &str, unschedulable: bool) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        state.node_update_calls += 1;
        match state.nodes.iter_mut().find(|n| n.name == name) {
            Some(node) => {
                node.unschedulable = unschedulable;
                Ok(())
            }
            None => Err(BenchError::Other(format!("node {name} not found"))),
        }
    }

    async fn list_pods(
        &self,
        namespace: &str,
        label_selector: Option<&str>,
    ) -> Result<Vec<PodInfo>> {
        Ok(self
            .state
            .lock()
            .unwrap()
            .pods
            .iter()
            .filter(|p| p.namespace == namespace && selector_matches(label_selector, p))
            .cloned()
            .collect())
    }

    async fn list_all_pods(&self) -> Result<Vec<PodInfo>> {
        let mut state = self.state.lock().unwrap();
        if state.fail_all_pod_reads > 0 {
            state.fail_all_pod_reads -= 1;
            return Err(BenchError::Other("injected pod read failure".into()));
        }
        Ok(state.pods.clone())
    }

    async fn pods_on_node(
        &self,
        namespace: &str,
        label_selector: Option<&str>,
        node: &str,
    ) -> Result<Vec<PodInfo>> {
        Ok(self
            .state
            .lock()
            .unwrap()
            .pods
            .iter()
            .filter(|p| {
                p.namespace == namespace
                    && p.node_name.as_deref() == Some(node)
                    && selector_matches(label_selector, p)
            })
            .cloned()
            .collect())
    }

    async fn list_pod_events(&self, _namespace: &str) -> Result<Vec<PodEvent>> {
        Ok(self.state.lock().unwrap().events.clone())
    }

    async fn evict_pod(&self, namespace: &str, name: &str) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        state.evicted.push(name.to_string());
        let workers = Self::schedulable_workers(&state);
        if let Some(pod) = state
            .pods
            .iter_mut()
            .find(|p| p.namespace == namespace && p.name == name)
        {
            let current = pod.node_name.clone();
            let target = workers.iter().find(|w| Some(w.as_str()) != current.as_deref());
            match target {
                Some(node) => {
                    pod.node_name = Some(node.clone());
                    pod.ready_at = Some(Utc::now());
                    pod.phase = PodPhase::Running;
                }
                // Nowhere to go: the replacement pod stays pending.
                None => {
                    pod.node_name = None;
                    pod.ready_at = None;
                    pod.phase = PodPhase::Pending;
                    pod.scheduling_failure = Some((
                        "Unschedulable".to_string(),
                        "no schedulable nodes".to_string(),
                    ));
                }
            }
        }
        Ok(())
    }

    async fn ensure_namespace(&self, name: &str) -> Result<()> {
        self.state.lock().unwrap().namespaces.insert(name.to_string());
        Ok(())
    }

    async fn delete_namespace(&self, name: &str) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        state.namespaces.remove(name);
        state.pods.retain(|p| p.namespace != name);
        Ok(())
    }

    async fn namespace_exists(&self, name: &str) -> Result<bool> {
        Ok(self.state.lock().unwrap().namespaces.contains(name))
    }

    async fn list_namespace_names(&self) -> Result<Vec<String>> {
        Ok(self.state.lock().unwrap().namespaces.iter().cloned().collect())
    }

    async fn apply_workload(&self, spec: &WorkloadSpec) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        let workers = Self::schedulable_workers(&state);
        if workers.is_empty() {
            return Err(BenchError::Other("no schedulable nodes".into()));
        }
        state.pods.retain(|p| {
            !(p.namespace == spec.namespace && p.name.starts_with(&format!("{}-", spec.name)))
        });
        for i in 0..spec.replicas {
            let node = &workers[i as usize % workers.len()];
            state.pods.push(PodInfo {
                name: format!("{}-{}", spec.name, i),
                namespace: spec.namespace.clone(),
                node_name: Some(node.clone()),
                labels: spec.pod_labels.clone(),
                phase: PodPhase::Running,
                ready_at: Some(Utc::now()),
                ..PodInfo::default()
            });
        }
        Ok(())
    }

    async fn deployment_ready_replicas(&self, namespace: &str, name: &str) -> Result<i32> {
        Ok(self
            .state
            .lock()
            .unwrap()
            .pods
            .iter()
            .filter(|p| {
                p.namespace == namespace
                    && p.name.starts_with(&format!("{name}-"))
                    && p.is_ready()
            })
            .count() as i32)
    }

    async fn install_rebalancer(&self, _spec: &RebalancerSpec) -> Result<()> {
        self.state.lock().unwrap().rebalancer_installs += 1;
        Ok(())
    }

    async fn run_rebalancer_job(&self, _spec: &RebalancerSpec) -> Result<()> {
        self.state.lock().unwrap().rebalancer_runs += 1;
        Ok(())
    }
}
