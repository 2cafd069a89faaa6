//! Error taxonomy for benchmark runs

use std::time::Duration;
use thiserror::Error;

/// Errors surfaced by the benchmark library.
///
/// The variants matter operationally: `Timeout` is eligible for diagnostic
/// enrichment before propagation, `Cancelled` is distinguished from failure
/// only for logging and telemetry, and both trigger the same one-shot
/// cleanup.
#[derive(Debug, Error)]
pub enum BenchError {
    /// A check failed before the cluster was mutated.
    #[error("precondition failed: {0}")]
    Precondition(String),

    /// A polling loop exhausted its deadline.
    #[error("timed out after {timeout:?} waiting for {what}")]
    Timeout { what: String, timeout: Duration },

    /// The run was cancelled by a signal or shutdown request.
    #[error("run cancelled")]
    Cancelled,

    /// A cluster read or write failed.
    #[error("cluster api error: {0}")]
    Cluster(#[from] kube::Error),

    /// Workload or plan configuration is invalid.
    #[error("workload error: {0}")]
    Workload(String),

    /// Report or policy file I/O failed.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// Report serialization failed.
    #[error("serialization error: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("{0}")]
    Other(String),
}

impl BenchError {
    /// Telemetry category for the errors-by-type counter.
    pub fn category(&self) -> &'static str {
        match self {
            BenchError::Precondition(_) => "precondition",
            BenchError::Timeout { .. } => "timeout",
            BenchError::Cancelled => "cancel",
            BenchError::Cluster(_) => "cluster",
            BenchError::Workload(_) => "workload",
            BenchError::Io(_) | BenchError::Serialize(_) => "report",
            BenchError::Other(_) => "other",
        }
    }
}

pub type Result<T, E = BenchError> = std::result::Result<T, E>;
