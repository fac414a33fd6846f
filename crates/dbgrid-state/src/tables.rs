//! redb table definitions for the dbgrid state store.
//!
//! Each table uses `&str` keys and `&[u8]` values (JSON-serialized domain types).

use redb::TableDefinition;

/// Cluster specs keyed by `{namespace}/{name}`.
pub const CLUSTERS: TableDefinition<&str, &[u8]> = TableDefinition::new("clusters");

/// Scalable role-group resources keyed by `{cluster_id}:{role_group}`.
pub const ROLE_GROUPS: TableDefinition<&str, &[u8]> = TableDefinition::new("role_groups");

/// Replica state keyed by `{cluster_id}:{role_group}:{replica_id}`.
pub const REPLICAS: TableDefinition<&str, &[u8]> = TableDefinition::new("replicas");
