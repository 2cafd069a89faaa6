//! Benchmark workloads
//!
//! A run schedules one deployment per size class, all pause pods whose only
//! job is to carry resource requests. The mix maps size-class names to
//! replica counts; today the plan only produces a `small` class but the mix
//! syntax accepts all three.

use crate::cluster::{poll_until, ClusterOps, WorkloadSpec};
use crate::error::{BenchError, Result};
use crate::evictions::WORKLOAD_LABEL;
use crate::shutdown::Shutdown;
use std::collections::BTreeMap;
use std::time::Duration;
use tracing::info;

const READY_POLL_INTERVAL: Duration = Duration::from_secs(2);
const DEFAULT_READY_TIMEOUT: Duration = Duration::from_secs(600);

/// Size-class name to replica count.
pub type Mix = BTreeMap<String, i32>;

/// Resource requests attached to each pod of a size class.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SizeClass {
    pub name: String,
    pub cpu: String,
    pub memory: String,
}

/// Everything needed to materialize a mix as deployments.
#[derive(Debug, Clone)]
pub struct WorkloadConfig {
    pub namespace: String,
    pub name_prefix: String,
    pub labels: BTreeMap<String, String>,
    pub pod_labels: BTreeMap<String, String>,
    pub mix: Mix,
    pub size_classes: BTreeMap<String, SizeClass>,
    pub pod_image: String,
}

/// Parse `small=40,medium=15,large=5` style mix strings.
///
/// Keys are case-insensitive and accept the short forms `s`, `med`/`m`, and
/// `l`. An empty input is an empty mix.
pub fn parse_mix(input: &str) -> Result<Mix> {
    let mut mix = Mix::new();
    let input = input.trim();
    if input.is_empty() {
        return Ok(mix);
    }
    for part in input.split(',') {
        let Some((raw_key, raw_count)) = part.trim().split_once('=') else {
            return Err(BenchError::Workload(format!("invalid mix entry {part:?}")));
        };
        let key = normalize_mix_key(raw_key).ok_or_else(|| {
            BenchError::Workload(format!("unknown size class {raw_key:?}"))
        })?;
        let count: i32 = raw_count
            .trim()
            .parse()
            .ok()
            .filter(|c| *c >= 0)
            .ok_or_else(|| BenchError::Workload(format!("invalid mix count for {raw_key:?}")))?;
        mix.insert(key.to_string(), count);
    }
    Ok(mix)
}

fn normalize_mix_key(key: &str) -> Option<&'static str> {
    match key.trim().to_ascii_lowercase().as_str() {
        "small" | "s" => Some("small"),
        "medium" | "med" | "m" => Some("medium"),
        "large" | "l" => Some("large"),
        _ => None,
    }
}

pub fn mix_total(mix: &Mix) -> i32 {
    mix.values().sum()
}

/// Create or update one deployment per non-empty mix entry.
///
/// Each deployment is named `{prefix}-{class}` and carries the workload
/// identity label so evictions can be correlated back to it.
pub async fn ensure_workloads(ops: &dyn ClusterOps, cfg: &WorkloadConfig) -> Result<()> {
    for (class_name, count) in &cfg.mix {
        if *count == 0 {
            continue;
        }
        let size = cfg.size_classes.get(class_name).ok_or_else(|| {
            BenchError::Workload(format!("size class {class_name:?} not defined"))
        })?;
        let name = format!("{}-{}", cfg.name_prefix, class_name);

        let mut labels = cfg.labels.clone();
        labels.insert(WORKLOAD_LABEL.to_string(), name.clone());
        let mut pod_labels = labels.clone();
        pod_labels.extend(cfg.pod_labels.clone());

        info!(deployment = %name, replicas = count, "Applying workload");
        ops.apply_workload(&WorkloadSpec {
            namespace: cfg.namespace.clone(),
            name,
            labels,
            pod_labels,
            replicas: *count,
            image: cfg.pod_image.clone(),
            cpu_request: size.cpu.clone(),
            mem_request: size.memory.clone(),
        })
        .await?;
    }
    Ok(())
}

/// Poll until every mix deployment reports its desired ready replicas.
pub async fn wait_for_workloads_ready(
    ops: &dyn ClusterOps,
    namespace: &str,
    name_prefix: &str,
    mix: &Mix,
    timeout: Duration,
    shutdown: &Shutdown,
) -> Result<()> {
    let timeout = if timeout.is_zero() {
        DEFAULT_READY_TIMEOUT
    } else {
        timeout
    };
    let desired = mix_total(mix);
    poll_until(
        READY_POLL_INTERVAL,
        timeout,
        shutdown,
        "workloads ready",
        || async {
            let mut ready = 0;
            for (class_name, count) in mix {
                if *count == 0 {
                    continue;
                }
                let name = format!("{name_prefix}-{class_name}");
                ready += ops.deployment_ready_replicas(namespace, &name).await?;
            }
            Ok(ready == desired)
        },
    )
    .await
}
