//! External rebalancer integration
//!
//! The rebalancer is an off-the-shelf image driven entirely through
//! [`ClusterOps`]: install drops a service account and policy ConfigMap,
//! run creates a one-shot job. The baseline profile carries no policy and
//! skips both. Policy manifests live under `deploy/policies/` and get the
//! run namespace substituted in before install.

use crate::cluster::{ClusterOps, RebalancerSpec};
use crate::error::{BenchError, Result};
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use tracing::info;

/// Image used for every non-baseline run.
pub const REBALANCER_IMAGE: &str = "registry.k8s.io/descheduler/descheduler:v0.32.2";
/// Cadence marker recorded in reports; runs are one-shot jobs, never cron.
pub const REBALANCER_CADENCE: &str = "job";

const POLICY_DIR: &str = "deploy/policies";
const NAMESPACE_PLACEHOLDER: &str = "{{NAMESPACE}}";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Profile {
    #[default]
    Baseline,
    LowNodeUtilization,
    LowNodeUtilizationDuplicates,
    Taints,
    TopologySpread,
}

impl Profile {
    pub fn as_str(&self) -> &'static str {
        match self {
            Profile::Baseline => "baseline",
            Profile::LowNodeUtilization => "low-node-utilization",
            Profile::LowNodeUtilizationDuplicates => "low-node-utilization+duplicates",
            Profile::Taints => "taints",
            Profile::TopologySpread => "topology-spread",
        }
    }

    /// Baseline measures the scheduler alone; no rebalancer is installed.
    pub fn uses_rebalancer(&self) -> bool {
        *self != Profile::Baseline
    }

    fn policy_path(&self) -> Result<PathBuf> {
        let file = match self {
            Profile::Baseline => {
                return Err(BenchError::Precondition(
                    "baseline does not use a policy".into(),
                ))
            }
            Profile::LowNodeUtilization => "low-node-utilization.yaml",
            Profile::LowNodeUtilizationDuplicates => "low-node-utilization+duplicates.yaml",
            Profile::Taints => "taints.yaml",
            Profile::TopologySpread => "topology-spread.yaml",
        };
        Ok(PathBuf::from(POLICY_DIR).join(file))
    }
}

impl fmt::Display for Profile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Profile {
    type Err = BenchError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "baseline" => Ok(Profile::Baseline),
            "low-node-utilization" => Ok(Profile::LowNodeUtilization),
            "low-node-utilization+duplicates" => Ok(Profile::LowNodeUtilizationDuplicates),
            "taints" => Ok(Profile::Taints),
            "topology-spread" => Ok(Profile::TopologySpread),
            other => Err(BenchError::Precondition(format!(
                "unknown profile {other:?}"
            ))),
        }
    }
}

/// Load the profile's policy manifest with the run namespace substituted.
pub fn load_policy(profile: Profile, namespace: &str) -> Result<String> {
    let path = profile.policy_path()?;
    let data = std::fs::read_to_string(&path)?;
    Ok(data.replace(NAMESPACE_PLACEHOLDER, namespace))
}

pub async fn ensure_installed(ops: &dyn ClusterOps, spec: &RebalancerSpec) -> Result<()> {
    if spec.policy_yaml.is_empty() {
        return Ok(());
    }
    ops.install_rebalancer(spec).await?;
    info!(namespace = %spec.namespace, image = %spec.image, "Rebalancer installed");
    Ok(())
}

/// Create a one-shot rebalancer job named `job_name`.
pub async fn run_once(ops: &dyn ClusterOps, spec: &RebalancerSpec, job_name: &str) -> Result<()> {
    if spec.policy_yaml.is_empty() {
        return Ok(());
    }
    let mut spec = spec.clone();
    spec.job_name = Some(job_name.to_string());
    ops.run_rebalancer_job(&spec).await?;
    info!(job = %job_name, "Rebalancer job created");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cluster::mock::MockCluster;

    #[test]
    fn profile_round_trips_through_strings() {
        for profile in [
            Profile::Baseline,
            Profile::LowNodeUtilization,
            Profile::LowNodeUtilizationDuplicates,
            Profile::Taints,
            Profile::TopologySpread,
        ] {
            assert_eq!(profile.as_str().parse::<Profile>().unwrap(), profile);
        }
        assert!("best-effort".parse::<Profile>().is_err());
    }

    #[test]
    fn baseline_has_no_policy() {
        assert!(!Profile::Baseline.uses_rebalancer());
        assert!(load_policy(Profile::Baseline, "ns").is_err());
    }

    #[tokio::test]
    async fn empty_policy_skips_install_and_run() {
        let mock = MockCluster::new();
        let spec = RebalancerSpec::default();
        ensure_installed(&mock, &spec).await.unwrap();
        run_once(&mock, &spec, "job-1").await.unwrap();
        assert_eq!(mock.rebalancer_installs(), 0);
        assert_eq!(mock.rebalancer_runs(), 0);
    }

    #[tokio::test]
    async fn policy_drives_install_and_run() {
        let mock = MockCluster::new();
        let spec = RebalancerSpec {
            namespace: "bench".into(),
            image: REBALANCER_IMAGE.into(),
            policy_yaml: "apiVersion: descheduler/v1alpha2".into(),
            schedule: REBALANCER_CADENCE.into(),
            job_name: None,
        };
        ensure_installed(&mock, &spec).await.unwrap();
        run_once(&mock, &spec, "job-1").await.unwrap();
        assert_eq!(mock.rebalancer_installs(), 1);
        assert_eq!(mock.rebalancer_runs(), 1);
    }
}
