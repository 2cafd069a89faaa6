//! Phase recording
//!
//! The orchestrator's single thread records every state transition here.
//! Two reserved names additionally capture the run's frozen before/after
//! baselines. The recorder is written by one thread only, but its accessors
//! are called from report assembly after cancellation, so state stays
//! behind a lock regardless.

use crate::cluster::ClusterOps;
use crate::error::Result;
use crate::metrics::{collect_snapshot, derive_sample, Sample, Snapshot, SnapshotOptions};
use crate::observability::BenchMetrics;
use crate::report::{format_node_pods, PhaseMarker};
use chrono::Utc;
use std::sync::{Arc, Mutex};
use tracing::info;

/// Reserved marker that freezes the run's "before" baseline.
pub const SNAPSHOT_BEFORE: &str = "snapshot:before";
/// Reserved marker that freezes the run's "after" baseline.
pub const SNAPSHOT_AFTER: &str = "snapshot:after";
/// Reference marker for the rebalance-time computation.
pub const UNCORDON_DONE: &str = "uncordon:done";

#[derive(Default)]
struct RecorderState {
    phases: Vec<PhaseMarker>,
    before_snapshot: Snapshot,
    after_snapshot: Snapshot,
    before_sample: Sample,
    after_sample: Sample,
}

pub struct PhaseRecorder {
    ops: Arc<dyn ClusterOps>,
    opts: SnapshotOptions,
    metrics: BenchMetrics,
    state: Mutex<RecorderState>,
}

impl PhaseRecorder {
    pub fn new(ops: Arc<dyn ClusterOps>, opts: SnapshotOptions, metrics: BenchMetrics) -> Self {
        Self {
            ops,
            opts,
            metrics,
            state: Mutex::new(RecorderState::default()),
        }
    }

    /// Record a named marker at the current time.
    ///
    /// For the two reserved names this also captures the baseline
    /// synchronously; if that read fails the error propagates but the
    /// marker stays appended. Callers treat a failed record as fatal.
    pub async fn record(&self, name: &str) -> Result<()> {
        let now = Utc::now();
        {
            let mut state = self.state.lock().unwrap();
            state.phases.push(PhaseMarker {
                name: name.to_string(),
                time: now,
            });
        }
        self.metrics.inc_phase(name);

        if name != SNAPSHOT_BEFORE && name != SNAPSHOT_AFTER {
            return Ok(());
        }

        let snapshot = collect_snapshot(self.ops.as_ref(), &self.opts).await?;
        let sample = derive_sample(&snapshot);
        info!(
            phase = %name,
            pods_per_node = %format_node_pods(&snapshot),
            "Captured balance baseline"
        );

        let mut state = self.state.lock().unwrap();
        if name == SNAPSHOT_BEFORE {
            state.before_snapshot = snapshot;
            state.before_sample = sample;
        } else {
            state.after_snapshot = snapshot;
            state.after_sample = sample;
        }
        Ok(())
    }

    /// Defensive copy of the full marker sequence.
    pub fn phases(&self) -> Vec<PhaseMarker> {
        self.state.lock().unwrap().phases.clone()
    }

    /// The frozen "before" baseline; zero-valued until recorded.
    pub fn before(&self) -> (Snapshot, Sample) {
        let state = self.state.lock().unwrap();
        (state.before_snapshot.clone(), state.before_sample.clone())
    }

    /// The frozen "after" baseline; zero-valued until recorded.
    pub fn after(&self) -> (Snapshot, Sample) {
        let state = self.state.lock().unwrap();
        (state.after_snapshot.clone(), state.after_sample.clone())
    }
}
