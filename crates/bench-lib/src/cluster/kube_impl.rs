//! `kube`-backed [`ClusterOps`] implementation

use super::quantity;
use super::{
    ClusterOps, NodeInfo, NodeTaint, PodEvent, PodInfo, PodPhase, RebalancerSpec, WorkloadSpec,
};
use crate::error::{BenchError, Result};
use async_trait::async_trait;
use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::batch::v1::Job;
use k8s_openapi::api::core::v1::{ConfigMap, Event, Namespace, Node, Pod, ServiceAccount};
use k8s_openapi::api::rbac::v1::{ClusterRole, ClusterRoleBinding};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use kube::api::{Api, DeleteParams, EvictParams, ListParams, Patch, PatchParams, PostParams};
use kube::config::{KubeConfigOptions, Kubeconfig};
use kube::{Client, Config};
use serde_json::json;

const REBALANCER_SERVICE_ACCOUNT: &str = "rebalancer";
const REBALANCER_POLICY_CONFIGMAP: &str = "rebalancer-policy";
const REBALANCER_CLUSTER_ROLE: &str = "drainbench-rebalancer";

/// Identity of the cluster a run targets, recorded into the report.
#[derive(Debug, Clone)]
pub struct ClusterInfo {
    pub context: String,
    pub server: String,
}

/// Real cluster access via the Kubernetes API.
#[derive(Clone)]
pub struct KubeCluster {
    client: Client,
}

impl KubeCluster {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    /// Build a client from the local kubeconfig, refusing to proceed unless
    /// the current context matches `expected_context`. A benchmark cordons
    /// and drains nodes; pointing it at the wrong cluster must be hard.
    pub async fn connect(expected_context: &str) -> Result<(Self, ClusterInfo)> {
        let kubeconfig = Kubeconfig::read()
            .map_err(|e| BenchError::Precondition(format!("failed to read kubeconfig: {e}")))?;
        let current = kubeconfig.current_context.clone().unwrap_or_default();
        if current != expected_context {
            return Err(BenchError::Precondition(format!(
                "refusing to run: kubeconfig context is {current:?}, expected {expected_context:?}"
            )));
        }
        let server = server_for_context(&kubeconfig, &current);

        let config = Config::from_custom_kubeconfig(kubeconfig, &KubeConfigOptions::default())
            .await
            .map_err(|e| BenchError::Precondition(format!("invalid kubeconfig: {e}")))?;
        let client = Client::try_from(config)?;

        Ok((
            Self { client },
            ClusterInfo {
                context: current,
                server,
            },
        ))
    }

    fn nodes(&self) -> Api<Node> {
        Api::all(self.client.clone())
    }

    fn pods(&self, namespace: &str) -> Api<Pod> {
        Api::namespaced(self.client.clone(), namespace)
    }
}

fn server_for_context(kubeconfig: &Kubeconfig, context: &str) -> String {
    let cluster_name = kubeconfig
        .contexts
        .iter()
        .find(|c| c.name == context)
        .and_then(|c| c.context.as_ref())
        .map(|c| c.cluster.clone());
    cluster_name
        .and_then(|name| {
            kubeconfig
                .clusters
                .iter()
                .find(|c| c.name == name)
                .and_then(|c| c.cluster.as_ref())
                .and_then(|c| c.server.clone())
        })
        .unwrap_or_default()
}

fn is_not_found(err: &kube::Error) -> bool {
    matches!(err, kube::Error::Api(resp) if resp.code == 404)
}

fn list_params(label_selector: Option<&str>) -> ListParams {
    match label_selector {
        Some(selector) => ListParams::default().labels(selector),
        None => ListParams::default(),
    }
}

fn node_info(node: &Node) -> NodeInfo {
    let spec = node.spec.clone().unwrap_or_default();
    let allocatable = node
        .status
        .as_ref()
        .and_then(|s| s.allocatable.clone())
        .unwrap_or_default();
    NodeInfo {
        name: node.metadata.name.clone().unwrap_or_default(),
        unschedulable: spec.unschedulable.unwrap_or(false),
        labels: node.metadata.labels.clone().unwrap_or_default(),
        taints: spec
            .taints
            .unwrap_or_default()
            .into_iter()
            .map(|t| NodeTaint {
                key: t.key,
                effect: t.effect,
            })
            .collect(),
        cpu_allocatable_milli: allocatable
            .get("cpu")
            .map(|q| quantity::cpu_milli(&q.0))
            .unwrap_or(0),
        mem_allocatable_bytes: allocatable
            .get("memory")
            .map(|q| quantity::mem_bytes(&q.0))
            .unwrap_or(0),
    }
}

fn pod_info(pod: &Pod) -> PodInfo {
    let spec = pod.spec.clone().unwrap_or_default();
    let status = pod.status.clone().unwrap_or_default();

    let phase = match status.phase.as_deref() {
        Some("Running") => PodPhase::Running,
        Some("Succeeded") => PodPhase::Succeeded,
        Some("Failed") => PodPhase::Failed,
        Some("Pending") | None => PodPhase::Pending,
        Some(_) => PodPhase::Unknown,
    };

    let mut ready_at = None;
    let mut unschedulable = false;
    let mut scheduling_failure = None;
    for cond in status.conditions.unwrap_or_default() {
        match (cond.type_.as_str(), cond.status.as_str()) {
            ("Ready", "True") => ready_at = cond.last_transition_time.map(|t| t.0),
            ("PodScheduled", "False") => {
                let reason = cond.reason.unwrap_or_default();
                unschedulable = reason == "Unschedulable";
                scheduling_failure = Some((reason, cond.message.unwrap_or_default()));
            }
            _ => {}
        }
    }

    let mut cpu_request_milli = 0;
    let mut mem_request_bytes = 0;
    for container in &spec.containers {
        if let Some(requests) = container.resources.as_ref().and_then(|r| r.requests.as_ref()) {
            cpu_request_milli += requests.get("cpu").map(|q| quantity::cpu_milli(&q.0)).unwrap_or(0);
            mem_request_bytes += requests
                .get("memory")
                .map(|q| quantity::mem_bytes(&q.0))
                .unwrap_or(0);
        }
    }

    PodInfo {
        name: pod.metadata.name.clone().unwrap_or_default(),
        namespace: pod.metadata.namespace.clone().unwrap_or_default(),
        node_name: spec.node_name,
        labels: pod.metadata.labels.clone().unwrap_or_default(),
        phase,
        ready_at,
        unschedulable,
        scheduling_failure,
        mirror: pod
            .metadata
            .annotations
            .as_ref()
            .map(|a| a.contains_key("kubernetes.io/config.mirror"))
            .unwrap_or(false),
        daemonset_owned: pod
            .metadata
            .owner_references
            .as_ref()
            .map(|refs| refs.iter().any(|r| r.kind == "DaemonSet"))
            .unwrap_or(false),
        cpu_request_milli,
        mem_request_bytes,
    }
}

fn pod_event(event: &Event) -> PodEvent {
    PodEvent {
        pod_name: event.involved_object.name.clone().unwrap_or_default(),
        reason: event.reason.clone().unwrap_or_default(),
        message: event.message.clone().unwrap_or_default(),
        node_name: event
            .source
            .as_ref()
            .and_then(|s| s.host.clone())
            .unwrap_or_default(),
        event_time: event.event_time.as_ref().map(|t| t.0),
        last_timestamp: event.last_timestamp.as_ref().map(|t| t.0),
        first_timestamp: event.first_timestamp.as_ref().map(|t| t.0),
    }
}

fn deployment_for(spec: &WorkloadSpec) -> Deployment {
    let mut labels = spec.labels.clone();
    labels.insert(
        crate::evictions::WORKLOAD_LABEL.to_string(),
        spec.name.clone(),
    );
    let mut pod_labels = labels.clone();
    pod_labels.extend(spec.pod_labels.clone());

    serde_json::from_value(json!({
        "apiVersion": "apps/v1",
        "kind": "Deployment",
        "metadata": {
            "name": spec.name,
            "namespace": spec.namespace,
            "labels": labels,
        },
        "spec": {
            "replicas": spec.replicas,
            "selector": { "matchLabels": labels },
            "template": {
                "metadata": { "labels": pod_labels },
                "spec": {
                    "containers": [{
                        "name": "pause",
                        "image": spec.image,
                        "resources": {
                            "requests": {
                                "cpu": spec.cpu_request,
                                "memory": spec.mem_request,
                            }
                        }
                    }]
                }
            }
        }
    }))
    .expect("static deployment manifest is valid")
}

fn rebalancer_job(spec: &RebalancerSpec, job_name: &str) -> Job {
    serde_json::from_value(json!({
        "apiVersion": "batch/v1",
        "kind": "Job",
        "metadata": {
            "name": job_name,
            "namespace": spec.namespace,
        },
        "spec": {
            "backoffLimit": 0,
            "ttlSecondsAfterFinished": 600,
            "template": {
                "spec": {
                    "serviceAccountName": REBALANCER_SERVICE_ACCOUNT,
                    "restartPolicy": "Never",
                    "containers": [{
                        "name": "rebalancer",
                        "image": spec.image,
                        "command": ["/bin/descheduler"],
                        "args": ["--policy-config-file", "/policy/policy.yaml", "--v", "3"],
                        "volumeMounts": [{ "name": "policy", "mountPath": "/policy" }]
                    }],
                    "volumes": [{
                        "name": "policy",
                        "configMap": { "name": REBALANCER_POLICY_CONFIGMAP }
                    }]
                }
            }
        }
    }))
    .expect("static job manifest is valid")
}

/// Cluster-wide permissions the rebalancer job needs: read nodes and pods,
/// create evictions, and emit events.
fn rebalancer_cluster_role() -> serde_json::Value {
    json!({
        "apiVersion": "rbac.authorization.k8s.io/v1",
        "kind": "ClusterRole",
        "metadata": { "name": REBALANCER_CLUSTER_ROLE },
        "rules": [
            { "apiGroups": [""], "resources": ["events"], "verbs": ["create", "update"] },
            { "apiGroups": [""], "resources": ["nodes"], "verbs": ["get", "watch", "list"] },
            { "apiGroups": [""], "resources": ["namespaces"], "verbs": ["get", "watch", "list"] },
            { "apiGroups": [""], "resources": ["pods"], "verbs": ["get", "watch", "list", "delete"] },
            { "apiGroups": [""], "resources": ["pods/eviction"], "verbs": ["create"] },
            {
                "apiGroups": ["scheduling.k8s.io"],
                "resources": ["priorityclasses"],
                "verbs": ["get", "watch", "list"]
            },
        ]
    })
}

fn rebalancer_cluster_role_binding(namespace: &str) -> serde_json::Value {
    json!({
        "apiVersion": "rbac.authorization.k8s.io/v1",
        "kind": "ClusterRoleBinding",
        "metadata": { "name": REBALANCER_CLUSTER_ROLE },
        "roleRef": {
            "apiGroup": "rbac.authorization.k8s.io",
            "kind": "ClusterRole",
            "name": REBALANCER_CLUSTER_ROLE,
        },
        "subjects": [{
            "kind": "ServiceAccount",
            "name": REBALANCER_SERVICE_ACCOUNT,
            "namespace": namespace,
        }]
    })
}

#[async_trait]
impl ClusterOps for KubeCluster {
    async fn list_nodes(&self, label_selector: Option<&str>) -> Result<Vec<NodeInfo>> {
        let nodes = self.nodes().list(&list_params(label_selector)).await?;
        Ok(nodes.items.iter().map(node_info).collect())
    }

    async fn get_node(&self, name: &str) -> Result<NodeInfo> {
        Ok(node_info(&self.nodes().get(name).await?))
    }

    async fn set_node_unschedulable(&self, name: &str, unschedulable: bool) -> Result<()> {
        let patch = json!({ "spec": { "unschedulable": unschedulable } });
        self.nodes()
            .patch(name, &PatchParams::default(), &Patch::Merge(&patch))
            .await?;
        Ok(())
    }

    async fn list_pods(
        &self,
        namespace: &str,
        label_selector: Option<&str>,
    ) -> Result<Vec<PodInfo>> {
        let pods = self.pods(namespace).list(&list_params(label_selector)).await?;
        Ok(pods.items.iter().map(pod_info).collect())
    }

    async fn list_all_pods(&self) -> Result<Vec<PodInfo>> {
        let api: Api<Pod> = Api::all(self.client.clone());
        let pods = api.list(&ListParams::default()).await?;
        Ok(pods.items.iter().map(pod_info).collect())
    }

    async fn pods_on_node(
        &self,
        namespace: &str,
        label_selector: Option<&str>,
        node: &str,
    ) -> Result<Vec<PodInfo>> {
        let params = list_params(label_selector).fields(&format!("spec.nodeName={node}"));
        let pods = self.pods(namespace).list(&params).await?;
        Ok(pods.items.iter().map(pod_info).collect())
    }

    async fn list_pod_events(&self, namespace: &str) -> Result<Vec<PodEvent>> {
        let api: Api<Event> = Api::namespaced(self.client.clone(), namespace);
        let params = ListParams::default().fields("involvedObject.kind=Pod");
        let events = api.list(&params).await?;
        Ok(events.items.iter().map(pod_event).collect())
    }

    async fn evict_pod(&self, namespace: &str, name: &str) -> Result<()> {
        match self
            .pods(namespace)
            .evict(name, &EvictParams::default())
            .await
        {
            Ok(_) => Ok(()),
            Err(e) if is_not_found(&e) => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    async fn ensure_namespace(&self, name: &str) -> Result<()> {
        let api: Api<Namespace> = Api::all(self.client.clone());
        match api.get(name).await {
            Ok(_) => Ok(()),
            Err(e) if is_not_found(&e) => {
                let ns = Namespace {
                    metadata: ObjectMeta {
                        name: Some(name.to_string()),
                        ..ObjectMeta::default()
                    },
                    ..Namespace::default()
                };
                api.create(&PostParams::default(), &ns).await?;
                Ok(())
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn delete_namespace(&self, name: &str) -> Result<()> {
        let api: Api<Namespace> = Api::all(self.client.clone());
        match api.delete(name, &DeleteParams::default()).await {
            Ok(_) => Ok(()),
            Err(e) if is_not_found(&e) => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    async fn namespace_exists(&self, name: &str) -> Result<bool> {
        let api: Api<Namespace> = Api::all(self.client.clone());
        match api.get(name).await {
            Ok(_) => Ok(true),
            Err(e) if is_not_found(&e) => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    async fn list_namespace_names(&self) -> Result<Vec<String>> {
        let api: Api<Namespace> = Api::all(self.client.clone());
        let namespaces = api.list(&ListParams::default()).await?;
        Ok(namespaces
            .items
            .into_iter()
            .filter_map(|ns| ns.metadata.name)
            .collect())
    }

    async fn apply_workload(&self, spec: &WorkloadSpec) -> Result<()> {
        let api: Api<Deployment> = Api::namespaced(self.client.clone(), &spec.namespace);
        let mut deployment = deployment_for(spec);
        match api.get(&spec.name).await {
            Ok(existing) => {
                deployment.metadata.resource_version = existing.metadata.resource_version;
                api.replace(&spec.name, &PostParams::default(), &deployment)
                    .await?;
            }
            Err(e) if is_not_found(&e) => {
                api.create(&PostParams::default(), &deployment).await?;
            }
            Err(e) => return Err(e.into()),
        }
        Ok(())
    }

    async fn deployment_ready_replicas(&self, namespace: &str, name: &str) -> Result<i32> {
        let api: Api<Deployment> = Api::namespaced(self.client.clone(), namespace);
        let deployment = api.get(name).await?;
        Ok(deployment
            .status
            .and_then(|s| s.ready_replicas)
            .unwrap_or(0))
    }

    async fn install_rebalancer(&self, spec: &RebalancerSpec) -> Result<()> {
        if spec.namespace.is_empty() {
            return Err(BenchError::Precondition(
                "rebalancer namespace is required".into(),
            ));
        }
        if spec.policy_yaml.is_empty() {
            return Err(BenchError::Precondition(
                "rebalancer policy is required".into(),
            ));
        }

        let accounts: Api<ServiceAccount> = Api::namespaced(self.client.clone(), &spec.namespace);
        let account: ServiceAccount = serde_json::from_value(json!({
            "apiVersion": "v1",
            "kind": "ServiceAccount",
            "metadata": { "name": REBALANCER_SERVICE_ACCOUNT, "namespace": spec.namespace }
        }))
        .expect("static serviceaccount manifest is valid");
        match accounts.create(&PostParams::default(), &account).await {
            Ok(_) => {}
            Err(kube::Error::Api(resp)) if resp.code == 409 => {}
            Err(e) => return Err(e.into()),
        }

        // The binding's subject namespace is run-scoped, so both RBAC
        // objects are re-applied on every install rather than created once:
        // a binding left over from an earlier run points at a deleted
        // namespace and grants the service account nothing.
        let roles: Api<ClusterRole> = Api::all(self.client.clone());
        roles
            .patch(
                REBALANCER_CLUSTER_ROLE,
                &PatchParams::apply("drainbench").force(),
                &Patch::Apply(&rebalancer_cluster_role()),
            )
            .await?;
        let bindings: Api<ClusterRoleBinding> = Api::all(self.client.clone());
        bindings
            .patch(
                REBALANCER_CLUSTER_ROLE,
                &PatchParams::apply("drainbench").force(),
                &Patch::Apply(&rebalancer_cluster_role_binding(&spec.namespace)),
            )
            .await?;

        let configmaps: Api<ConfigMap> = Api::namespaced(self.client.clone(), &spec.namespace);
        // Server-side apply needs apiVersion/kind in the payload.
        let configmap = json!({
            "apiVersion": "v1",
            "kind": "ConfigMap",
            "metadata": {
                "name": REBALANCER_POLICY_CONFIGMAP,
                "namespace": spec.namespace,
            },
            "data": { "policy.yaml": spec.policy_yaml },
        });
        configmaps
            .patch(
                REBALANCER_POLICY_CONFIGMAP,
                &PatchParams::apply("drainbench").force(),
                &Patch::Apply(&configmap),
            )
            .await?;
        Ok(())
    }

    async fn run_rebalancer_job(&self, spec: &RebalancerSpec) -> Result<()> {
        let job_name = spec
            .job_name
            .clone()
            .ok_or_else(|| BenchError::Precondition("rebalancer job name is required".into()))?;
        let api: Api<Job> = Api::namespaced(self.client.clone(), &spec.namespace);
        api.create(&PostParams::default(), &rebalancer_job(spec, &job_name))
            .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cluster_role_grants_node_reads_and_evictions() {
        let role = rebalancer_cluster_role();
        let rules = role["rules"].as_array().unwrap();
        let grants = |resource: &str, verb: &str| {
            rules.iter().any(|rule| {
                rule["resources"].as_array().unwrap().iter().any(|r| r == resource)
                    && rule["verbs"].as_array().unwrap().iter().any(|v| v == verb)
            })
        };
        assert!(grants("nodes", "list"));
        assert!(grants("pods", "list"));
        assert!(grants("pods/eviction", "create"));
        assert!(grants("events", "create"));
    }

    #[test]
    fn cluster_role_binding_follows_the_run_namespace() {
        let binding = rebalancer_cluster_role_binding("drainbench-20260314-092653");
        assert_eq!(binding["roleRef"]["kind"], "ClusterRole");
        assert_eq!(binding["roleRef"]["name"], REBALANCER_CLUSTER_ROLE);

        let subject = &binding["subjects"][0];
        assert_eq!(subject["kind"], "ServiceAccount");
        assert_eq!(subject["name"], REBALANCER_SERVICE_ACCOUNT);
        assert_eq!(subject["namespace"], "drainbench-20260314-092653");
    }

    #[test]
    fn job_runs_as_the_bound_service_account() {
        let spec = RebalancerSpec {
            namespace: "drainbench-test".into(),
            image: "registry.k8s.io/descheduler/descheduler:v0.32.2".into(),
            policy_yaml: "apiVersion: descheduler/v1alpha2".into(),
            schedule: "job".into(),
            job_name: None,
        };
        let job = rebalancer_job(&spec, "drainbench-rebalancer-x-1");
        let pod_spec = job.spec.unwrap().template.spec.unwrap();
        assert_eq!(
            pod_spec.service_account_name.as_deref(),
            Some(REBALANCER_SERVICE_ACCOUNT)
        );
    }
}
