//! Cluster cleanup
//!
//! Removes everything a run leaves behind: benchmark namespaces (exact name
//! or prefix sweep) and any cordoned nodes. Also provides the preflight
//! check the runner and the `preflight` subcommand share.

use crate::cluster::{uncordon_node, unschedulable_node_names, ClusterOps};
use crate::error::{BenchError, Result};
use crate::plan::NAMESPACE_PREFIX;
use crate::shutdown::Shutdown;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

const DELETE_POLL_INTERVAL: Duration = Duration::from_secs(1);
const DELETE_WAIT_TIMEOUT: Duration = Duration::from_secs(600);

/// What to delete. An exact namespace takes precedence over the prefix;
/// with neither set, the default prefix sweep applies.
#[derive(Debug, Clone, Default)]
pub struct Scope {
    pub namespace: Option<String>,
    pub namespace_prefix: Option<String>,
    pub wait: bool,
}

pub struct CleanupService {
    ops: Arc<dyn ClusterOps>,
}

impl CleanupService {
    pub fn new(ops: Arc<dyn ClusterOps>) -> Self {
        Self { ops }
    }

    /// Refuse to start a benchmark on a cluster with leftover cordons.
    /// Control-plane nodes are allowed to be unschedulable.
    pub async fn preflight(&self) -> Result<()> {
        let nodes = self.ops.list_nodes(None).await?;
        let cordoned: Vec<&str> = nodes
            .iter()
            .filter(|n| n.unschedulable && !n.is_control_plane())
            .map(|n| n.name.as_str())
            .collect();
        if !cordoned.is_empty() {
            return Err(BenchError::Precondition(format!(
                "refusing to run: nodes unschedulable before benchmark: {}. Run `drainbench cleanup`",
                cordoned.join(", ")
            )));
        }
        Ok(())
    }

    pub async fn run(&self, scope: Scope) -> Result<()> {
        self.cleanup_namespaces(&scope).await?;
        self.uncordon_nodes().await
    }

    async fn cleanup_namespaces(&self, scope: &Scope) -> Result<()> {
        if let Some(namespace) = &scope.namespace {
            return self.delete_one(namespace, scope.wait).await;
        }
        let prefix = scope
            .namespace_prefix
            .as_deref()
            .unwrap_or(NAMESPACE_PREFIX);
        for name in self.ops.list_namespace_names().await? {
            if name.starts_with(prefix) {
                self.delete_one(&name, scope.wait).await?;
            }
        }
        Ok(())
    }

    async fn delete_one(&self, namespace: &str, wait: bool) -> Result<()> {
        info!(namespace = %namespace, "Deleting namespace");
        self.ops.delete_namespace(namespace).await?;
        if wait {
            self.wait_for_namespace_deleted(namespace).await?;
        }
        Ok(())
    }

    async fn wait_for_namespace_deleted(&self, namespace: &str) -> Result<()> {
        // Cleanup is not cancellable; an interrupted run still gets swept.
        let shutdown = Shutdown::never();
        crate::cluster::poll_until(
            DELETE_POLL_INTERVAL,
            DELETE_WAIT_TIMEOUT,
            &shutdown,
            "namespace deleted",
            || async { Ok(!self.ops.namespace_exists(namespace).await?) },
        )
        .await
    }

    async fn uncordon_nodes(&self) -> Result<()> {
        let nodes = self.ops.list_nodes(None).await?;
        for name in unschedulable_node_names(&nodes) {
            info!(node = %name, "Uncordoning node");
            uncordon_node(self.ops.as_ref(), &name).await?;
        }
        Ok(())
    }
}
