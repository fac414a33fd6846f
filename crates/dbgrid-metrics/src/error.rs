//! Collector error types.

use thiserror::Error;

/// Errors that abort a collection pass.
///
/// Only failures to enumerate the cluster's own managed resources end up
/// here; telemetry gaps are absorbed by fallback values.
#[derive(Debug, Error)]
pub enum MetricsError {
    #[error("role group resource missing: {0}")]
    RoleGroupMissing(String),

    #[error("state store error: {0}")]
    State(#[from] dbgrid_state::StateError),
}

pub type MetricsResult<T> = Result<T, MetricsError>;
