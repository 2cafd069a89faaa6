//! Background balance sampler
//!
//! Collects a snapshot + derived sample pair on a fixed interval until
//! cancelled. The buffers live behind a single lock; readers always get
//! defensive copies, so they can hold results across the sampler's
//! continued writes.

use super::{collect_snapshot, derive_sample, Sample, Snapshot, SnapshotOptions};
use crate::cluster::ClusterOps;
use crate::observability::BenchMetrics;
use crate::shutdown::Shutdown;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::{debug, info};

const DEFAULT_INTERVAL: Duration = Duration::from_secs(5);

#[derive(Default)]
struct Buffers {
    snapshots: Vec<Snapshot>,
    samples: Vec<Sample>,
}

pub struct Sampler {
    ops: Arc<dyn ClusterOps>,
    interval: Duration,
    opts: SnapshotOptions,
    metrics: BenchMetrics,
    buffers: Mutex<Buffers>,
}

impl Sampler {
    /// A zero interval falls back to the 5s default.
    pub fn new(
        ops: Arc<dyn ClusterOps>,
        interval: Duration,
        opts: SnapshotOptions,
        metrics: BenchMetrics,
    ) -> Self {
        let interval = if interval.is_zero() {
            DEFAULT_INTERVAL
        } else {
            interval
        };
        Self {
            ops,
            interval,
            opts,
            metrics,
            buffers: Mutex::new(Buffers::default()),
        }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Run until cancelled. The first tick happens immediately; a failed
    /// snapshot read skips that tick and waits for the next one.
    /// Cancellation lands between ticks, never mid-append.
    pub async fn run(&self, mut shutdown: Shutdown) {
        info!(
            interval_secs = self.interval.as_secs(),
            namespace = %self.opts.namespace,
            "Starting balance sampler"
        );
        let mut ticker = tokio::time::interval(self.interval);
        // tokio's first tick completes immediately; consume it so the loop
        // body controls the immediate first collection.
        ticker.tick().await;

        loop {
            match collect_snapshot(self.ops.as_ref(), &self.opts).await {
                Ok(snapshot) => {
                    let sample = derive_sample(&snapshot);
                    {
                        let mut buffers = self.buffers.lock().unwrap();
                        buffers.snapshots.push(snapshot);
                        buffers.samples.push(sample.clone());
                    }
                    self.metrics.record_sample(&sample);
                }
                Err(e) => {
                    debug!(error = %e, "Snapshot collection failed, skipping tick");
                }
            }

            tokio::select! {
                _ = shutdown.cancelled() => {
                    info!("Stopping balance sampler");
                    return;
                }
                _ = ticker.tick() => {}
            }
        }
    }

    /// Defensive copy of all samples collected so far. Safe mid-run.
    pub fn samples(&self) -> Vec<Sample> {
        self.buffers.lock().unwrap().samples.clone()
    }

    /// Defensive copy of all snapshots collected so far. Safe mid-run.
    pub fn snapshots(&self) -> Vec<Snapshot> {
        self.buffers.lock().unwrap().snapshots.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cluster::mock::MockCluster;
    use crate::cluster::{NodeInfo, PodInfo, PodPhase};
    use chrono::Utc;

    fn sampler_over(mock: Arc<MockCluster>, interval: Duration) -> Arc<Sampler> {
        Arc::new(Sampler::new(
            mock,
            interval,
            SnapshotOptions {
                namespace: "bench".into(),
                namespace_only: true,
            },
            BenchMetrics::new().unwrap(),
        ))
    }

    fn seeded_mock() -> Arc<MockCluster> {
        let mock = Arc::new(MockCluster::new());
        mock.add_node(NodeInfo {
            name: "n1".into(),
            ..NodeInfo::default()
        });
        mock.add_pod(PodInfo {
            name: "p1".into(),
            namespace: "bench".into(),
            node_name: Some("n1".into()),
            phase: PodPhase::Running,
            ready_at: Some(Utc::now()),
            ..PodInfo::default()
        });
        mock
    }

    #[test]
    fn zero_interval_falls_back_to_default() {
        let sampler = sampler_over(seeded_mock(), Duration::ZERO);
        assert_eq!(sampler.interval(), Duration::from_secs(5));
    }

    #[tokio::test(start_paused = true)]
    async fn collects_immediately_and_stops_cleanly() {
        let sampler = sampler_over(seeded_mock(), Duration::from_secs(5));
        let (handle, shutdown) = crate::shutdown::channel();

        let task = {
            let sampler = sampler.clone();
            tokio::spawn(async move { sampler.run(shutdown).await })
        };

        // First tick is immediate, no interval needs to elapse.
        while sampler.samples().is_empty() {
            tokio::task::yield_now().await;
        }

        handle.cancel();
        task.await.unwrap();

        let samples = sampler.samples();
        let snapshots = sampler.snapshots();
        assert_eq!(samples.len(), snapshots.len());
        // Every buffered entry is complete, never a zero-valued partial.
        for (sample, snapshot) in samples.iter().zip(&snapshots) {
            assert_eq!(sample.time, snapshot.time);
            assert_eq!(sample.nodes_count, 1);
            assert_eq!(sample.pods_counted, 1);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn failed_reads_are_skipped_without_partial_entries() {
        let mock = seeded_mock();
        mock.fail_next_pod_reads(1);
        let sampler = sampler_over(mock, Duration::from_secs(5));
        let (handle, shutdown) = crate::shutdown::channel();

        let task = {
            let sampler = sampler.clone();
            tokio::spawn(async move { sampler.run(shutdown).await })
        };

        // The first tick fails; the next tick (after one interval) succeeds.
        while sampler.samples().is_empty() {
            tokio::time::advance(Duration::from_secs(5)).await;
            tokio::task::yield_now().await;
        }

        handle.cancel();
        task.await.unwrap();

        assert_eq!(sampler.samples().len(), sampler.snapshots().len());
        assert!(sampler.samples().iter().all(|s| s.nodes_count == 1));
    }
}
