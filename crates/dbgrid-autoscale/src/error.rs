//! Error types for the autoscaler.

use thiserror::Error;

use dbgrid_metrics::MetricsError;
use dbgrid_state::StateError;

use crate::scaler::ReconcileReport;

/// Result type alias for autoscaler operations.
pub type ScaleResult<T> = Result<T, ScaleError>;

/// Why a single role group could not be scaled this tick.
#[derive(Debug, Error)]
pub enum ScaleError {
    #[error("state error: {0}")]
    State(#[from] StateError),

    #[error("metrics error: {0}")]
    Metrics(#[from] MetricsError),

    #[error("no metrics collected for role group {0}")]
    MissingMetrics(String),
}

/// A role group whose scaling was aborted this tick.
#[derive(Debug)]
pub struct RoleGroupFailure {
    pub role_group: String,
    pub error: ScaleError,
}

/// Failure of one reconciliation pass.
#[derive(Debug, Error)]
pub enum ReconcileError {
    /// The cluster's own resources could not be enumerated; nothing was decided.
    #[error("collecting metrics for {cluster_id}: {source}")]
    Collect {
        cluster_id: String,
        #[source]
        source: MetricsError,
    },

    /// Some role groups failed. Changes applied to the others stand.
    #[error("reconcile of {cluster_id} failed for {} role group(s): {}", .failures.len(), describe(.failures))]
    RoleGroups {
        cluster_id: String,
        failures: Vec<RoleGroupFailure>,
        report: ReconcileReport,
    },
}

impl ReconcileError {
    /// Failed role groups, empty when collection itself failed.
    pub fn failures(&self) -> &[RoleGroupFailure] {
        match self {
            ReconcileError::Collect { .. } => &[],
            ReconcileError::RoleGroups { failures, .. } => failures,
        }
    }
}

fn describe(failures: &[RoleGroupFailure]) -> String {
    failures
        .iter()
        .map(|f| format!("{}: {}", f.role_group, f.error))
        .collect::<Vec<_>>()
        .join("; ")
}
