//! Pure balance statistics

use super::{Sample, Snapshot};

/// Derive balance statistics from a snapshot. Total, no error path.
pub fn derive_sample(snapshot: &Snapshot) -> Sample {
    let pods_per_node: Vec<f64> = snapshot.nodes.values().map(|n| n.pods as f64).collect();

    Sample {
        time: snapshot.time,
        pods_stddev: stddev(&pods_per_node),
        pods_max_min_ratio: max_min_ratio(&pods_per_node),
        unschedulable_pods: snapshot.unschedulable_pods,
        nodes_count: snapshot.nodes.len(),
        pods_counted: snapshot.total_pods_counted,
    }
}

/// Population standard deviation (divide by N). Empty input reads as 0.
pub fn stddev(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    let n = values.len() as f64;
    let mean = values.iter().sum::<f64>() / n;
    let variance = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n;
    variance.sqrt()
}

/// Max/min ratio with two deliberate sentinels: an all-zero input is a
/// perfectly idle, balanced cluster (0); a zero-pod node next to a loaded
/// one makes the ratio undefined (-1), distinguishable from both balance
/// and infinity.
pub fn max_min_ratio(values: &[f64]) -> f64 {
    let Some(&first) = values.first() else {
        return 0.0;
    };
    let mut min = first;
    let mut max = first;
    for &v in &values[1..] {
        if v < min {
            min = v;
        }
        if v > max {
            max = v;
        }
    }
    if min == 0.0 {
        if max == 0.0 {
            return 0.0;
        }
        return -1.0;
    }
    max / min
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metrics::NodeStats;
    use chrono::Utc;

    #[test]
    fn stddev_of_empty_is_zero() {
        assert_eq!(stddev(&[]), 0.0);
    }

    #[test]
    fn stddev_is_population_and_order_invariant() {
        let forward = stddev(&[2.0, 4.0, 4.0, 4.0, 5.0, 5.0, 7.0, 9.0]);
        let shuffled = stddev(&[9.0, 4.0, 5.0, 2.0, 7.0, 4.0, 5.0, 4.0]);
        assert!((forward - 2.0).abs() < 1e-12);
        assert_eq!(forward, shuffled);
    }

    #[test]
    fn ratio_sentinels() {
        assert_eq!(max_min_ratio(&[]), 0.0);
        assert_eq!(max_min_ratio(&[0.0, 0.0]), 0.0);
        assert_eq!(max_min_ratio(&[0.0, 3.0]), -1.0);
        assert_eq!(max_min_ratio(&[2.0, 6.0]), 3.0);
        assert_eq!(max_min_ratio(&[6.0, 2.0]), 3.0);
    }

    #[test]
    fn derive_sample_copies_scalars_from_snapshot() {
        let mut snapshot = Snapshot {
            time: Utc::now(),
            unschedulable_pods: 2,
            total_pods_counted: 9,
            ..Snapshot::default()
        };
        for (name, pods) in [("a", 3), ("b", 3), ("c", 3)] {
            snapshot.nodes.insert(
                name.into(),
                NodeStats {
                    pods,
                    ..NodeStats::default()
                },
            );
        }

        let sample = derive_sample(&snapshot);
        assert_eq!(sample.time, snapshot.time);
        assert_eq!(sample.pods_stddev, 0.0);
        assert_eq!(sample.pods_max_min_ratio, 1.0);
        assert_eq!(sample.unschedulable_pods, 2);
        assert_eq!(sample.nodes_count, 3);
        assert_eq!(sample.pods_counted, 9);
    }
}
