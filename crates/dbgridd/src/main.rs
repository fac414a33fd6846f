//! dbgridd: the dbgrid autoscaling daemon.
//!
//! Opens the state store, then either runs the reconciliation loop over
//! every stored cluster, loads a cluster specification into the store,
//! removes one, or performs a single dry-run pass for one cluster.
//!
//! # Usage
//!
//! ```text
//! dbgridd run --config /etc/dbgrid/dbgridd.toml
//! dbgridd apply --file cluster.toml
//! dbgridd evaluate --cluster prod/graph
//! dbgridd delete --cluster prod/graph
//! ```

mod config;

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use anyhow::Context;
use clap::{Parser, Subcommand, ValueEnum};
use tokio::sync::watch;
use tracing::{info, warn};

use dbgrid_autoscale::{AutoScaler, ReconcileError};
use dbgrid_metrics::OfflineDatabase;
use dbgrid_state::{RawClusterSpec, RoleGroupResource, StateStore};

use config::OperatorConfig;

const DEFAULT_LOG_FILTER: &str = "info,dbgridd=debug,dbgrid=debug";

#[derive(Parser)]
#[command(name = "dbgridd", about = "dbgrid autoscaling daemon")]
struct Cli {
    /// Log output format.
    #[arg(long, value_enum, default_value_t = LogFormat::Text, global = true)]
    log_format: LogFormat,

    #[command(subcommand)]
    command: Command,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

#[derive(Subcommand)]
enum Command {
    /// Run the reconciliation loop until interrupted.
    Run {
        /// Configuration file.
        #[arg(long)]
        config: Option<PathBuf>,

        /// Data directory (overrides the configuration file).
        #[arg(long)]
        data_dir: Option<PathBuf>,

        /// Reconciliation interval in seconds (overrides the configuration file).
        #[arg(long)]
        interval: Option<u64>,
    },

    /// Store a cluster specification, creating missing role group resources.
    Apply {
        /// Cluster specification (TOML).
        #[arg(long)]
        file: PathBuf,

        #[arg(long)]
        config: Option<PathBuf>,

        #[arg(long)]
        data_dir: Option<PathBuf>,
    },

    /// Stop autoscaling a cluster. Role group resources are left as they are.
    Delete {
        /// Cluster key, `namespace/name`.
        #[arg(long)]
        cluster: String,

        #[arg(long)]
        config: Option<PathBuf>,

        #[arg(long)]
        data_dir: Option<PathBuf>,
    },

    /// Run one reconciliation pass for a cluster without writing.
    Evaluate {
        /// Cluster key, `namespace/name`.
        #[arg(long)]
        cluster: String,

        #[arg(long)]
        config: Option<PathBuf>,

        #[arg(long)]
        data_dir: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.log_format);

    match cli.command {
        Command::Run {
            config,
            data_dir,
            interval,
        } => {
            let mut config = load_config(config.as_deref(), data_dir)?;
            if let Some(secs) = interval {
                config.reconcile_interval = Duration::from_secs(secs);
            }
            run(config).await
        }
        Command::Apply {
            file,
            config,
            data_dir,
        } => apply(&load_config(config.as_deref(), data_dir)?, &file),
        Command::Delete {
            cluster,
            config,
            data_dir,
        } => delete(&load_config(config.as_deref(), data_dir)?, &cluster),
        Command::Evaluate {
            cluster,
            config,
            data_dir,
        } => evaluate(&load_config(config.as_deref(), data_dir)?, &cluster).await,
    }
}

fn init_tracing(format: LogFormat) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(DEFAULT_LOG_FILTER));
    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    match format {
        LogFormat::Text => builder.init(),
        LogFormat::Json => builder.json().init(),
    }
}

fn load_config(path: Option<&Path>, data_dir: Option<PathBuf>) -> anyhow::Result<OperatorConfig> {
    let mut config = OperatorConfig::load(path)?;
    if let Some(dir) = data_dir {
        config.data_dir = dir;
    }
    Ok(config)
}

fn open_state(config: &OperatorConfig) -> anyhow::Result<StateStore> {
    std::fs::create_dir_all(&config.data_dir)
        .with_context(|| format!("creating {}", config.data_dir.display()))?;
    let db_path = config.db_path();
    let state = StateStore::open(&db_path)?;
    info!(path = ?db_path, "state store opened");
    Ok(state)
}

fn build_autoscaler(config: &OperatorConfig, state: StateStore) -> AutoScaler {
    // No database endpoint is wired yet; the collector runs on fallbacks.
    AutoScaler::new(
        state,
        Arc::new(OfflineDatabase),
        Arc::new(config.metrics.metric_source()),
    )
    .with_collector_config(config.metrics.collector_config())
    .with_config(config.autoscale.clone())
}

async fn run(config: OperatorConfig) -> anyhow::Result<()> {
    info!("dbgrid daemon starting");

    let state = open_state(&config)?;
    let autoscaler = build_autoscaler(&config, state);
    let interval = config.reconcile_interval;

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let handle = tokio::spawn(async move {
        autoscaler.run(interval, shutdown_rx).await;
    });

    tokio::signal::ctrl_c()
        .await
        .context("installing CTRL+C handler")?;
    info!("shutdown signal received");
    let _ = shutdown_tx.send(true);

    let _ = handle.await;
    info!("dbgrid daemon stopped");
    Ok(())
}

fn apply(config: &OperatorConfig, file: &Path) -> anyhow::Result<()> {
    let content =
        std::fs::read_to_string(file).with_context(|| format!("reading {}", file.display()))?;
    let raw: RawClusterSpec =
        toml::from_str(&content).with_context(|| format!("parsing {}", file.display()))?;
    let mut spec = raw.into_spec(epoch_secs())?;

    let state = open_state(config)?;
    if let Some(existing) = state.get_cluster(&spec.table_key())? {
        spec.created_at = existing.created_at;
    }
    state.put_cluster(&spec)?;

    for group in &spec.autoscaling.role_groups {
        if state.get_role_group(&spec.id, &group.name)?.is_none() {
            let resource = RoleGroupResource::new(&spec.id, &group.name, group.min_replicas);
            state.put_role_group(&resource)?;
            info!(
                cluster = %spec.id,
                role_group = %group.name,
                replicas = group.min_replicas,
                "role group resource created"
            );
        }
    }

    info!(cluster = %spec.id, role_groups = spec.autoscaling.role_groups.len(), "cluster applied");
    Ok(())
}

fn delete(config: &OperatorConfig, cluster: &str) -> anyhow::Result<()> {
    let state = open_state(config)?;
    if !state.delete_cluster(cluster)? {
        anyhow::bail!("cluster {cluster} not found");
    }
    info!(%cluster, "cluster removed");
    Ok(())
}

async fn evaluate(config: &OperatorConfig, cluster: &str) -> anyhow::Result<()> {
    let state = open_state(config)?;
    let spec = state
        .get_cluster(cluster)?
        .with_context(|| format!("cluster {cluster} not found"))?;
    let autoscaler = build_autoscaler(config, state);

    match autoscaler.evaluate(&spec).await {
        Ok(report) => {
            println!("{}", serde_json::to_string_pretty(&report)?);
            Ok(())
        }
        Err(ReconcileError::RoleGroups {
            cluster_id,
            failures,
            report,
        }) => {
            println!("{}", serde_json::to_string_pretty(&report)?);
            for failure in &failures {
                warn!(cluster = %cluster_id, role_group = %failure.role_group, error = %failure.error, "role group failed");
            }
            anyhow::bail!("{} role group(s) failed in {cluster_id}", failures.len())
        }
        Err(e) => Err(e.into()),
    }
}

fn epoch_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

#[cfg(test)]
mod tests {
    use super::*;

    const CLUSTER_TOML: &str = r#"
namespace = "prod"
name = "graph"

[autoscaling]
enabled = true

[[autoscaling.roleGroups]]
name = "primary"
minReplicas = 3
maxReplicas = 5

[[autoscaling.roleGroups.metrics]]
type = "cpu"
target = "70%"

[[autoscaling.roleGroups]]
name = "secondary"
minReplicas = 1
maxReplicas = 4
"#;

    fn test_config(dir: &Path) -> OperatorConfig {
        OperatorConfig {
            data_dir: dir.to_path_buf(),
            ..OperatorConfig::default()
        }
    }

    #[test]
    fn cli_parses_commands() {
        let cli = Cli::parse_from(["dbgridd", "run", "--interval", "5", "--log-format", "json"]);
        assert_eq!(cli.log_format, LogFormat::Json);
        assert!(matches!(cli.command, Command::Run { interval: Some(5), .. }));

        let cli = Cli::parse_from(["dbgridd", "evaluate", "--cluster", "prod/graph"]);
        assert!(matches!(cli.command, Command::Evaluate { ref cluster, .. } if cluster == "prod/graph"));

        let cli = Cli::parse_from(["dbgridd", "delete", "--cluster", "prod/graph"]);
        assert!(matches!(cli.command, Command::Delete { ref cluster, .. } if cluster == "prod/graph"));
    }

    #[test]
    fn apply_stores_cluster_and_resources() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("cluster.toml");
        std::fs::write(&file, CLUSTER_TOML).unwrap();
        let config = test_config(dir.path());

        apply(&config, &file).unwrap();
        // Re-applying keeps existing resources.
        apply(&config, &file).unwrap();

        let state = StateStore::open(&config.db_path()).unwrap();
        let spec = state.get_cluster("prod/graph").unwrap().unwrap();
        assert_eq!(spec.autoscaling.role_groups.len(), 2);
        let primary = state.require_role_group("prod/graph", "primary").unwrap();
        assert_eq!(primary.desired_replicas, 3);
        assert_eq!(primary.resource_version, 1);
    }

    #[test]
    fn apply_rejects_invalid_bounds() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("cluster.toml");
        std::fs::write(&file, CLUSTER_TOML.replace("maxReplicas = 4", "maxReplicas = 0")).unwrap();

        assert!(apply(&test_config(dir.path()), &file).is_err());
    }

    #[test]
    fn delete_removes_cluster_and_keeps_resources() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("cluster.toml");
        std::fs::write(&file, CLUSTER_TOML).unwrap();
        let config = test_config(dir.path());
        apply(&config, &file).unwrap();

        delete(&config, "prod/graph").unwrap();
        let err = delete(&config, "prod/graph").unwrap_err();
        assert!(err.to_string().contains("not found"));

        let state = StateStore::open(&config.db_path()).unwrap();
        assert!(state.get_cluster("prod/graph").unwrap().is_none());
        assert!(state.get_role_group("prod/graph", "primary").unwrap().is_some());
    }

    #[tokio::test]
    async fn evaluate_unknown_cluster_fails() {
        let dir = tempfile::tempdir().unwrap();
        let err = evaluate(&test_config(dir.path()), "prod/missing").await.unwrap_err();
        assert!(err.to_string().contains("not found"));
    }

    #[tokio::test]
    async fn evaluate_applied_cluster() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("cluster.toml");
        std::fs::write(&file, CLUSTER_TOML).unwrap();
        let config = test_config(dir.path());
        apply(&config, &file).unwrap();

        evaluate(&config, "prod/graph").await.unwrap();
    }
}
