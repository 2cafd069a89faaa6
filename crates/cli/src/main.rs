//! Node-maintenance rebalance benchmark CLI
//!
//! Runs the maintenance scenario against the cluster named `drainbench` in
//! the local kubeconfig, sweeps leftovers, or checks preconditions.

use anyhow::Result;
use clap::{Parser, Subcommand};
use drainbench_lib::cleanup::{CleanupService, Scope};
use drainbench_lib::plan::RunRequest;
use drainbench_lib::{KubeCluster, Profile, Runner};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Kubeconfig context the benchmark insists on. It cordons and drains
/// nodes, so it refuses to run against anything else.
const EXPECTED_CONTEXT: &str = "drainbench";

#[derive(Parser)]
#[command(name = "drainbench")]
#[command(author, version, about = "Node-maintenance rebalance benchmark", long_about = None)]
struct Cli {
    /// Port for the Prometheus /metrics endpoint
    #[arg(long, env = "DRAINBENCH_METRICS_PORT", default_value_t = 8080)]
    metrics_port: u16,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a single benchmark scenario
    Benchmark {
        /// Number of pods to schedule
        #[arg(long, default_value_t = 60)]
        pods: i32,

        /// CPU request per pod
        #[arg(long, default_value = "100m")]
        cpu: String,

        /// Memory request per pod
        #[arg(long, default_value = "128Mi")]
        mem: String,

        /// Rebalancer profile (baseline, low-node-utilization,
        /// low-node-utilization+duplicates, taints, topology-spread)
        #[arg(long, default_value = "baseline")]
        profile: String,

        /// Write JSON output to a file (default: results/baseline.json or
        /// results/rebalancer.json)
        #[arg(long)]
        out: Option<PathBuf>,
    },

    /// Delete namespaces created by drainbench and uncordon nodes
    Cleanup {
        /// Skip waiting for namespace deletion
        #[arg(long)]
        force: bool,
    },

    /// Verify the cluster is ready for a benchmark run
    Preflight,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(fmt::layer().json())
        .init();

    let cli = Cli::parse();
    let (cluster, info) = KubeCluster::connect(EXPECTED_CONTEXT).await?;
    let ops = Arc::new(cluster);

    match cli.command {
        Commands::Benchmark {
            pods,
            cpu,
            mem,
            profile,
            out,
        } => {
            let profile: Profile = profile.parse()?;
            let mut runner = Runner::new(ops);
            runner.context = info.context;
            runner.server = info.server;
            runner.metrics_port = cli.metrics_port;
            runner
                .run(RunRequest {
                    pods_total: pods,
                    pod_cpu: cpu,
                    pod_memory: mem,
                    profile,
                    output_path: out,
                })
                .await?;
        }
        Commands::Cleanup { force } => {
            CleanupService::new(ops)
                .run(Scope {
                    wait: !force,
                    ..Scope::default()
                })
                .await?;
            info!("Cleanup done");
        }
        Commands::Preflight => {
            CleanupService::new(ops).preflight().await?;
            info!("Preflight ok");
        }
    }
    Ok(())
}
