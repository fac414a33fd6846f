//! dbgrid-state: embedded platform state for dbgrid.
//!
//! Backed by [redb](https://docs.rs/redb), holds the cluster specifications,
//! the per-role scalable resources (desired replica counts) and the live
//! replica records the autoscaler reads every tick.
//!
//! # Architecture
//!
//! All domain types are JSON-serialized into redb's `&[u8]` value columns.
//! Composite keys (`{namespace}/{name}`, `{cluster_id}:{role_group}`,
//! `{cluster_id}:{role_group}:{replica}`) enable prefix scans for related
//! records.
//!
//! Role-group resources carry a `resource_version`. Writes name the version
//! they were computed against and are rejected with
//! [`StateError::Conflict`] when it is stale.
//!
//! The `StateStore` is `Clone` + `Send` + `Sync` (backed by `Arc<Database>`)
//! and can be shared across async tasks.

pub mod error;
pub mod spec;
pub mod store;
pub mod tables;
pub mod types;

pub use error::{SpecError, StateError, StateResult};
pub use spec::{RawClusterSpec, RawMetricConfig, RawMetricSource, RawRoleGroup};
pub use store::StateStore;
pub use types::*;
