//! Rebalance-time computation
//!
//! The headline metric: elapsed seconds from the last uncordon until the
//! pod distribution first settled back under the stddev threshold.

use crate::metrics::Sample;
use crate::phases;
use crate::report::PhaseMarker;
use chrono::{DateTime, Utc};

/// Seconds from the first `uncordon:done` marker to the first in-order
/// sample at or below `threshold`, or -1 when the threshold is non-positive,
/// the marker is missing, or the cluster never re-balanced in the observed
/// window.
pub fn rebalance_time(samples: &[Sample], markers: &[PhaseMarker], threshold: f64) -> f64 {
    if threshold <= 0.0 {
        return -1.0;
    }
    let Some(start) = find_phase_time(markers, phases::UNCORDON_DONE) else {
        return -1.0;
    };
    for sample in samples {
        if sample.time < start {
            continue;
        }
        if sample.pods_stddev <= threshold {
            return (sample.time - start).num_milliseconds() as f64 / 1000.0;
        }
    }
    -1.0
}

fn find_phase_time(markers: &[PhaseMarker], name: &str) -> Option<DateTime<Utc>> {
    markers.iter().find(|m| m.name == name).map(|m| m.time)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn sample_at(time: DateTime<Utc>, stddev: f64) -> Sample {
        Sample {
            time,
            pods_stddev: stddev,
            ..Sample::default()
        }
    }

    fn marker(name: &str, time: DateTime<Utc>) -> PhaseMarker {
        PhaseMarker {
            name: name.into(),
            time,
        }
    }

    #[test]
    fn first_sample_under_threshold_after_uncordon() {
        let start = Utc::now();
        let markers = vec![marker(phases::UNCORDON_DONE, start)];
        let samples = vec![
            sample_at(start + Duration::seconds(10), 5.0),
            sample_at(start + Duration::seconds(20), 0.5),
        ];
        let seconds = rebalance_time(&samples, &markers, 1.0);
        assert!((19.0..=21.0).contains(&seconds), "got {seconds}");
    }

    #[test]
    fn samples_before_the_reference_are_ignored() {
        let start = Utc::now();
        let markers = vec![marker(phases::UNCORDON_DONE, start)];
        let samples = vec![
            sample_at(start - Duration::seconds(30), 0.1),
            sample_at(start + Duration::seconds(15), 0.1),
        ];
        let seconds = rebalance_time(&samples, &markers, 1.0);
        assert!((14.0..=16.0).contains(&seconds), "got {seconds}");
    }

    #[test]
    fn first_uncordon_marker_wins() {
        let start = Utc::now();
        let markers = vec![
            marker(phases::UNCORDON_DONE, start),
            marker(phases::UNCORDON_DONE, start + Duration::seconds(100)),
        ];
        let samples = vec![sample_at(start + Duration::seconds(5), 0.0)];
        let seconds = rebalance_time(&samples, &markers, 1.0);
        assert!((4.0..=6.0).contains(&seconds), "got {seconds}");
    }

    #[test]
    fn sentinel_cases() {
        let start = Utc::now();
        let markers = vec![marker(phases::UNCORDON_DONE, start)];
        let settled = vec![sample_at(start + Duration::seconds(5), 0.1)];

        assert_eq!(rebalance_time(&settled, &markers, 0.0), -1.0);
        assert_eq!(rebalance_time(&settled, &markers, -2.0), -1.0);
        assert_eq!(rebalance_time(&settled, &[], 1.0), -1.0);
        // Never settled within the window.
        let noisy = vec![sample_at(start + Duration::seconds(5), 9.0)];
        assert_eq!(rebalance_time(&noisy, &markers, 1.0), -1.0);
    }
}
