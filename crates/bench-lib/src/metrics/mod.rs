//! Balance metrics pipeline
//!
//! A [`Snapshot`] is a point-in-time cluster read, a [`Sample`] the balance
//! statistics derived from exactly one snapshot, and the [`Sampler`] the
//! background task that collects both on a fixed interval.

mod compute;
mod sampler;
mod snapshot;

pub use compute::derive_sample;
pub use sampler::Sampler;
pub use snapshot::{collect_snapshot, NodeStats, Snapshot, SnapshotOptions};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Balance statistics derived from one snapshot. Immutable.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Sample {
    pub time: DateTime<Utc>,
    pub pods_stddev: f64,
    /// Max/min per-node pod ratio; 0 for an idle cluster, -1 when a node has
    /// zero pods while another does not (ratio undefined, deliberately not
    /// infinity).
    pub pods_max_min_ratio: f64,
    pub unschedulable_pods: usize,
    pub nodes_count: usize,
    pub pods_counted: usize,
}

impl Default for Sample {
    fn default() -> Self {
        Self {
            time: DateTime::<Utc>::UNIX_EPOCH,
            pods_stddev: 0.0,
            pods_max_min_ratio: 0.0,
            unschedulable_pods: 0,
            nodes_count: 0,
            pods_counted: 0,
        }
    }
}
