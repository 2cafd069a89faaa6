//! Eviction-to-reschedule correlation
//!
//! A rescheduled pod comes back under a new name, so disruption events are
//! joined to readiness events by workload identity (the
//! `app.kubernetes.io/name` label) rather than pod name. The join is
//! monotonic: readiness timestamps are scanned ascending and matched to the
//! first one not earlier than the eviction, which guards against matching a
//! readiness event that predates the disruption.

use crate::cluster::{PodEvent, PodInfo};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Label whose value groups pods belonging to one logical workload.
pub const WORKLOAD_LABEL: &str = "app.kubernetes.io/name";

const EVICTED_REASON: &str = "Evicted";

/// One correlated disruption. `reschedule_seconds == -1` is a sentinel for
/// "no matching readiness event found", distinct from an instant reschedule.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvictionRecord {
    pub pod_name: String,
    pub app_label: String,
    pub node_name: String,
    pub reason: String,
    pub message: String,
    pub evicted_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rescheduled_at: Option<DateTime<Utc>>,
    pub reschedule_seconds: f64,
}

/// Map pod name to workload identity. Pods without the workload label are
/// omitted; they cannot be correlated.
pub fn pod_name_to_app_label(pods: &[PodInfo]) -> BTreeMap<String, String> {
    pods.iter()
        .filter_map(|pod| {
            pod.labels
                .get(WORKLOAD_LABEL)
                .filter(|l| !l.is_empty())
                .map(|l| (pod.name.clone(), l.clone()))
        })
        .collect()
}

/// Join eviction events to post-disruption readiness, ordered by eviction
/// time ascending.
pub fn correlate(
    events: &[PodEvent],
    pre_pod_labels: &BTreeMap<String, String>,
    post_pods: &[PodInfo],
) -> Vec<EvictionRecord> {
    let ready_times = ready_times_by_app_label(post_pods);

    let mut records: Vec<EvictionRecord> = events
        .iter()
        .filter(|event| event.reason == EVICTED_REASON)
        .filter_map(|event| {
            let app_label = pre_pod_labels.get(&event.pod_name)?;
            let evicted_at = event.timestamp();
            let rescheduled_at = ready_times
                .get(app_label)
                .and_then(|times| find_reschedule_time(times, evicted_at));
            let reschedule_seconds = match rescheduled_at {
                Some(at) => (at - evicted_at).num_milliseconds() as f64 / 1000.0,
                None => -1.0,
            };
            Some(EvictionRecord {
                pod_name: event.pod_name.clone(),
                app_label: app_label.clone(),
                node_name: event.node_name.clone(),
                reason: event.reason.clone(),
                message: event.message.clone(),
                evicted_at,
                rescheduled_at,
                reschedule_seconds,
            })
        })
        .collect();

    records.sort_by_key(|r| r.evicted_at);
    records
}

fn ready_times_by_app_label(pods: &[PodInfo]) -> BTreeMap<String, Vec<DateTime<Utc>>> {
    let mut out: BTreeMap<String, Vec<DateTime<Utc>>> = BTreeMap::new();
    for pod in pods {
        let Some(app_label) = pod.labels.get(WORKLOAD_LABEL).filter(|l| !l.is_empty()) else {
            continue;
        };
        let Some(ready_at) = pod.ready_at else {
            continue;
        };
        out.entry(app_label.clone()).or_default().push(ready_at);
    }
    for times in out.values_mut() {
        times.sort();
    }
    out
}

fn find_reschedule_time(
    times: &[DateTime<Utc>],
    evicted_at: DateTime<Utc>,
) -> Option<DateTime<Utc>> {
    times.iter().find(|t| **t >= evicted_at).copied()
}
