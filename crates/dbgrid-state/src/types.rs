//! Domain types for the dbgrid state store.
//!
//! These types represent the cluster specification (read-only input to the
//! autoscaler), the per-role scalable resources it resizes, and the replica
//! records it observes. All types are serializable to/from JSON for storage
//! in redb tables.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Unique identifier for a cluster (`{namespace}/{name}`).
pub type ClusterId = String;

/// Unique identifier for a replica within a role group.
pub type ReplicaId = String;

/// Replica count per zone, keyed by zone name.
pub type ZoneDistribution = BTreeMap<String, u32>;

// ── Cluster ────────────────────────────────────────────────────────

/// Specification of a managed database cluster.
///
/// Owned by the cluster's control-plane object; the autoscaler never
/// mutates it.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ClusterSpec {
    pub id: ClusterId,
    pub namespace: String,
    pub name: String,
    pub autoscaling: AutoscalingSpec,
    /// Unix timestamp (seconds) when this spec was created.
    pub created_at: u64,
    /// Unix timestamp (seconds) when this spec was last updated.
    pub updated_at: u64,
}

/// Cluster-wide autoscaling settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct AutoscalingSpec {
    pub enabled: bool,
    pub role_groups: Vec<RoleGroupSpec>,
}

/// Responsibility of a role group within the cluster.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    /// Voting members; subject to quorum rules.
    Primary,
    /// Read replicas.
    Secondary,
}

/// Autoscaling configuration for one role group.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RoleGroupSpec {
    pub name: String,
    pub role: Role,
    pub enabled: bool,
    pub min_replicas: u32,
    pub max_replicas: u32,
    /// Weighted signals fused into one decision, in evaluation order.
    pub metrics: Vec<MetricConfig>,
    pub quorum_protection: Option<QuorumProtection>,
    pub zone_aware: Option<ZoneAwareConfig>,
}

/// Kind of signal a metric configuration evaluates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MetricType {
    /// CPU utilization ratio (0.0–1.0 of requests).
    Cpu,
    /// Memory utilization ratio (0.0–1.0 of requests).
    Memory,
    /// Average query latency, target in milliseconds.
    QueryLatency,
    /// Open client connections.
    Connections,
    /// Transactions per sample.
    Throughput,
    /// Operator-defined query against a remote metrics backend.
    Custom,
}

impl MetricType {
    /// Stable lowercase name, used in reason strings.
    pub fn as_str(&self) -> &'static str {
        match self {
            MetricType::Cpu => "cpu",
            MetricType::Memory => "memory",
            MetricType::QueryLatency => "query_latency",
            MetricType::Connections => "connections",
            MetricType::Throughput => "throughput",
            MetricType::Custom => "custom",
        }
    }
}

impl std::fmt::Display for MetricType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A metric target, parsed once at the spec boundary.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MetricTarget {
    Value(f64),
    /// The raw text could not be parsed; the metric scores neutral.
    Invalid(String),
}

impl MetricTarget {
    pub fn value(&self) -> Option<f64> {
        match self {
            MetricTarget::Value(v) => Some(*v),
            MetricTarget::Invalid(_) => None,
        }
    }
}

/// One weighted metric configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricConfig {
    pub kind: MetricType,
    pub target: MetricTarget,
    pub weight: f64,
    /// Remote source for custom metrics.
    pub source: Option<CustomSource>,
}

/// Backend protocol of a custom metric source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceKind {
    Prometheus,
}

/// Where and how to fetch a custom metric.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CustomSource {
    pub kind: SourceKind,
    /// Instant-query expression.
    pub query: String,
    /// Base URL of the metrics backend (e.g. `http://prometheus:9090`).
    /// Only plain `http` is queried; an `https` backend is treated as
    /// unreachable and answered from the fallback.
    pub server_url: String,
    /// Value to use when the backend is unreachable. Overrides the
    /// substring fallback table.
    pub fallback: Option<f64>,
}

/// Quorum safety settings for a primary role group.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QuorumProtection {
    pub enabled: bool,
    /// Scaling is suspended while fewer primaries than this are healthy.
    pub min_healthy_primaries: u32,
    /// Disables odd-count rounding of primary targets.
    #[serde(default)]
    pub allow_quorum_break: bool,
}

/// Zone spreading settings for a role group.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ZoneAwareConfig {
    pub enabled: bool,
    pub min_replicas_per_zone: u32,
}

impl ClusterSpec {
    /// Build the composite key for the clusters table.
    pub fn table_key(&self) -> String {
        format!("{}/{}", self.namespace, self.name)
    }

    /// Look up a role group by name.
    pub fn role_group(&self, name: &str) -> Option<&RoleGroupSpec> {
        self.autoscaling.role_groups.iter().find(|g| g.name == name)
    }
}

impl RoleGroupSpec {
    pub fn is_primary(&self) -> bool {
        self.role == Role::Primary
    }

    /// Quorum protection, if present and switched on.
    pub fn active_quorum_protection(&self) -> Option<&QuorumProtection> {
        self.quorum_protection.as_ref().filter(|q| q.enabled)
    }

    /// Zone awareness, if present and switched on.
    pub fn active_zone_aware(&self) -> Option<&ZoneAwareConfig> {
        self.zone_aware.as_ref().filter(|z| z.enabled)
    }

    /// Configured target for the first metric of the given type.
    pub fn target_for(&self, kind: MetricType) -> Option<f64> {
        self.metrics
            .iter()
            .find(|m| m.kind == kind)
            .and_then(|m| m.target.value())
    }
}

// ── Role-group resource ────────────────────────────────────────────

/// The scalable object backing one role group.
///
/// `desired_replicas` is the only field the autoscaler writes.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RoleGroupResource {
    pub cluster_id: ClusterId,
    pub role_group: String,
    pub desired_replicas: u32,
    /// Per-zone targets for zone-aware role groups; empty otherwise.
    #[serde(default)]
    pub zone_replicas: ZoneDistribution,
    /// Bumped on every effective write.
    pub resource_version: u64,
    pub updated_at: u64,
}

impl RoleGroupResource {
    pub fn new(cluster_id: &str, role_group: &str, desired_replicas: u32) -> Self {
        Self {
            cluster_id: cluster_id.to_string(),
            role_group: role_group.to_string(),
            desired_replicas,
            zone_replicas: ZoneDistribution::new(),
            resource_version: 1,
            updated_at: 0,
        }
    }

    /// Build the composite key for the role groups table.
    pub fn table_key(&self) -> String {
        role_group_key(&self.cluster_id, &self.role_group)
    }
}

/// Composite key of a role-group resource.
pub fn role_group_key(cluster_id: &str, role_group: &str) -> String {
    format!("{cluster_id}:{role_group}")
}

// ── Replica ────────────────────────────────────────────────────────

/// Observed state of one database replica.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ReplicaState {
    pub id: ReplicaId,
    pub cluster_id: ClusterId,
    pub role_group: String,
    pub node_id: String,
    /// Failure domain hosting this replica.
    pub zone: Option<String>,
    pub phase: ReplicaPhase,
    /// Readiness probe result.
    pub ready: bool,
    pub requests: ResourceRequests,
    /// Last reported usage, if the platform has one.
    pub usage: Option<ResourceUsage>,
    pub started_at: u64,
    pub updated_at: u64,
}

impl ReplicaState {
    /// Build the composite key for the replicas table.
    pub fn table_key(&self) -> String {
        format!("{}:{}:{}", self.cluster_id, self.role_group, self.id)
    }

    /// Running and passing readiness.
    pub fn is_healthy(&self) -> bool {
        self.phase == ReplicaPhase::Running && self.ready
    }
}

/// Lifecycle phase of a replica.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReplicaPhase {
    Pending,
    Running,
    Failed,
    Terminating,
}

/// Resource requests of a replica.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ResourceRequests {
    pub cpu_millis: u64,
    pub memory_bytes: u64,
}

/// Reported resource usage of a replica.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct ResourceUsage {
    pub cpu_millis: u64,
    pub memory_bytes: u64,
    /// Fraction of the data volume in use (0.0–1.0).
    pub disk_usage_ratio: Option<f64>,
}
