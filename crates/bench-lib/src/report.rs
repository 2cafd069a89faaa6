//! Structured run report

use crate::error::Result;
use crate::evictions::EvictionRecord;
use crate::metrics::{Sample, Snapshot};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;

/// A named timeline event. Append-only; insertion order is temporal order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PhaseMarker {
    pub name: String,
    pub time: DateTime<Utc>,
}

/// Run configuration as recorded into the report.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunConfig {
    pub run_id: String,
    pub scenario: String,
    pub profile: String,
    pub namespace: String,
    pub start_time: DateTime<Utc>,
    pub context: String,
    pub server: String,
    pub pods_total: i32,
    pub pod_cpu: String,
    pub pod_memory: String,
    pub rebalancer_image: String,
    pub rebalancer_namespace: String,
    pub rebalancer_cron: String,
    pub sample_interval: String,
}

/// Computed run summary.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Summary {
    pub run_id: String,
    pub scenario: String,
    pub profile: String,
    pub duration_seconds: f64,
    pub rebalance_time_seconds: f64,
    pub before: Sample,
    pub after: Sample,
}

/// The complete, JSON-serializable run report.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RunReport {
    pub config: RunConfig,
    pub phases: Vec<PhaseMarker>,
    pub summary: Summary,
    pub samples: Vec<Sample>,
    pub before_snapshot: Snapshot,
    pub after_snapshot: Snapshot,
    pub evictions: Vec<EvictionRecord>,
}

impl Default for PhaseMarker {
    fn default() -> Self {
        Self {
            name: String::new(),
            time: DateTime::<Utc>::UNIX_EPOCH,
        }
    }
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            run_id: String::new(),
            scenario: String::new(),
            profile: String::new(),
            namespace: String::new(),
            start_time: DateTime::<Utc>::UNIX_EPOCH,
            context: String::new(),
            server: String::new(),
            pods_total: 0,
            pod_cpu: String::new(),
            pod_memory: String::new(),
            rebalancer_image: String::new(),
            rebalancer_namespace: String::new(),
            rebalancer_cron: String::new(),
            sample_interval: String::new(),
        }
    }
}

/// Write the report as pretty JSON, creating parent directories as needed.
pub fn write_json(path: &Path, report: &RunReport) -> Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }
    let data = serde_json::to_vec_pretty(report)?;
    std::fs::write(path, data)?;
    Ok(())
}

/// Human-readable per-node pod counts, sorted by node name: `"a=3 b=4"`.
pub fn format_node_pods(snapshot: &Snapshot) -> String {
    if snapshot.nodes.is_empty() {
        return "-".to_string();
    }
    snapshot
        .nodes
        .iter()
        .map(|(name, stats)| format!("{name}={}", stats.pods))
        .collect::<Vec<_>>()
        .join(" ")
}

/// Top scheduling-failure messages by occurrence count (ties broken
/// lexicographically), at most three, `"msg (xN)"` each.
pub fn format_schedule_messages(messages: &BTreeMap<String, usize>) -> String {
    if messages.is_empty() {
        return "none".to_string();
    }
    let mut entries: Vec<(&String, &usize)> = messages.iter().collect();
    entries.sort_by(|a, b| b.1.cmp(a.1).then_with(|| a.0.cmp(b.0)));
    entries
        .iter()
        .take(3)
        .map(|(msg, count)| format!("{msg} (x{count})"))
        .collect::<Vec<_>>()
        .join("; ")
}
