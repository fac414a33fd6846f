//! Error types for the dbgrid state store.

use thiserror::Error;

/// Result type alias for state store operations.
pub type StateResult<T> = Result<T, StateError>;

/// Errors that can occur during state store operations.
#[derive(Debug, Error)]
pub enum StateError {
    #[error("failed to open database: {0}")]
    Open(String),

    #[error("transaction error: {0}")]
    Transaction(String),

    #[error("table error: {0}")]
    Table(String),

    #[error("read error: {0}")]
    Read(String),

    #[error("write error: {0}")]
    Write(String),

    #[error("serialization error: {0}")]
    Serialize(String),

    #[error("deserialization error: {0}")]
    Deserialize(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("conflict on {key}: expected version {expected}, found {actual}")]
    Conflict {
        key: String,
        expected: u64,
        actual: u64,
    },
}

impl StateError {
    /// Whether this error is a stale-version rejection.
    pub fn is_conflict(&self) -> bool {
        matches!(self, StateError::Conflict { .. })
    }
}

/// Errors raised while converting a raw cluster spec into typed form.
#[derive(Debug, Error, PartialEq)]
pub enum SpecError {
    #[error("role group {role_group}: unknown metric type {kind:?} without a source")]
    UnknownMetricType { role_group: String, kind: String },

    #[error("role group {role_group}: custom metric requires a source")]
    MissingSource { role_group: String },

    #[error("role group {role_group}: unknown metric source type {kind:?}")]
    UnknownSourceKind { role_group: String, kind: String },

    #[error("role group {role_group}: min replicas {min} exceeds max replicas {max}")]
    InvalidBounds {
        role_group: String,
        min: u32,
        max: u32,
    },

    #[error("role group {role_group}: unknown role {role:?}")]
    UnknownRole { role_group: String, role: String },

    #[error("duplicate role group: {0}")]
    DuplicateRoleGroup(String),

    #[error("cluster name must not be empty")]
    EmptyName,
}
