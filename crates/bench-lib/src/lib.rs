//! Benchmark library for node-maintenance rebalancing
//!
//! This crate provides the core functionality for:
//! - The cordon/drain/uncordon maintenance scenario
//! - Pod-balance sampling and before/after snapshots
//! - Eviction-to-reschedule correlation
//! - Rebalancer install and one-shot runs
//! - Report assembly and Prometheus telemetry

pub mod cleanup;
pub mod cluster;
pub mod error;
pub mod evictions;
pub mod metrics;
pub mod observability;
pub mod phases;
pub mod plan;
pub mod rebalance;
pub mod rebalancer;
pub mod report;
pub mod runner;
pub mod scenario;
pub mod shutdown;
pub mod workloads;

pub use cluster::{ClusterInfo, ClusterOps, KubeCluster};
pub use error::{BenchError, Result};
pub use observability::BenchMetrics;
pub use rebalancer::Profile;
pub use runner::Runner;
