//! Run planning
//!
//! Turns the CLI request into a concrete plan: run id, namespace, labels,
//! workload mix, output path, and the rebalancer policy for non-baseline
//! profiles. The clock is injectable so run-id derivation is testable.

use crate::error::{BenchError, Result};
use crate::rebalancer::{load_policy, Profile};
use crate::workloads::{Mix, SizeClass};
use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use std::path::PathBuf;

const RESULTS_DIR: &str = "results";
/// Label present on every object a run creates.
pub const RUN_LABEL: &str = "drainbench";
/// Label carrying the run id, for per-run cleanup and selection.
pub const RUN_ID_LABEL: &str = "drainbench-run";
/// Namespace prefix shared by all runs.
pub const NAMESPACE_PREFIX: &str = "drainbench-";

/// What the user asked for on the command line.
#[derive(Debug, Clone, Default)]
pub struct RunRequest {
    pub pods_total: i32,
    pub pod_cpu: String,
    pub pod_memory: String,
    pub profile: Profile,
    pub output_path: Option<PathBuf>,
}

/// Fully resolved inputs for one run.
#[derive(Debug, Clone)]
pub struct Plan {
    pub run_id: String,
    pub namespace: String,
    pub output_path: PathBuf,
    pub labels: BTreeMap<String, String>,
    pub label_selector: String,
    pub mix: Mix,
    pub size_classes: BTreeMap<String, SizeClass>,
    pub policy_yaml: String,
}

pub struct PlanBuilder {
    now: fn() -> DateTime<Utc>,
}

impl Default for PlanBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl PlanBuilder {
    pub fn new() -> Self {
        Self { now: Utc::now }
    }

    #[cfg(test)]
    fn with_clock(now: fn() -> DateTime<Utc>) -> Self {
        Self { now }
    }

    pub fn build(&self, request: &RunRequest) -> Result<Plan> {
        if request.pods_total <= 0 {
            return Err(BenchError::Precondition("--pods must be > 0".into()));
        }

        let run_id = (self.now)().format("%Y%m%d-%H%M%S").to_string();
        let namespace = format!("{NAMESPACE_PREFIX}{run_id}");

        let output_path = request
            .output_path
            .clone()
            .unwrap_or_else(|| default_output_path(request.profile));

        let mix = Mix::from([("small".to_string(), request.pods_total)]);
        let size_classes = BTreeMap::from([(
            "small".to_string(),
            SizeClass {
                name: "small".into(),
                cpu: request.pod_cpu.clone(),
                memory: request.pod_memory.clone(),
            },
        )]);

        let labels = BTreeMap::from([
            (RUN_LABEL.to_string(), "true".to_string()),
            (RUN_ID_LABEL.to_string(), run_id.clone()),
        ]);

        let policy_yaml = if request.profile.uses_rebalancer() {
            load_policy(request.profile, &namespace)?
        } else {
            String::new()
        };

        Ok(Plan {
            run_id,
            namespace,
            output_path,
            label_selector: labels_to_selector(&labels),
            labels,
            mix,
            size_classes,
            policy_yaml,
        })
    }
}

fn labels_to_selector(labels: &BTreeMap<String, String>) -> String {
    labels
        .iter()
        .map(|(k, v)| format!("{k}={v}"))
        .collect::<Vec<_>>()
        .join(",")
}

fn default_output_path(profile: Profile) -> PathBuf {
    let file = if profile.uses_rebalancer() {
        "rebalancer.json"
    } else {
        "baseline.json"
    };
    PathBuf::from(RESULTS_DIR).join(file)
}
