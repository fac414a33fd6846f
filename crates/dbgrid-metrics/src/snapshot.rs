//! Per-tick metric snapshot types.
//!
//! A [`ClusterMetrics`] is built fresh on every reconciliation pass and
//! dropped afterwards.

use std::collections::BTreeMap;
use std::time::Duration;

use serde::Serialize;

use dbgrid_state::{ClusterId, Role, ZoneDistribution};

/// Direction a signal is moving in.
///
/// Advisory only: shown in reason strings, never used for scoring.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Trend {
    #[default]
    Unknown,
    Decreasing,
    Stable,
    Increasing,
}

impl Trend {
    /// Classify `current` against an earlier reading (±10% band).
    pub fn between(current: f64, previous: f64) -> Trend {
        if current > previous * 1.1 {
            Trend::Increasing
        } else if current < previous * 0.9 {
            Trend::Decreasing
        } else {
            Trend::Stable
        }
    }

    /// Classify a 0–1 utilization by where it sits on the scale.
    pub fn of_utilization(current: f64) -> Trend {
        if current > 0.75 {
            Trend::Increasing
        } else if current < 0.25 {
            Trend::Decreasing
        } else {
            Trend::Stable
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Trend::Unknown => "unknown",
            Trend::Decreasing => "decreasing",
            Trend::Stable => "stable",
            Trend::Increasing => "increasing",
        }
    }
}

impl std::fmt::Display for Trend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Ratio of the implied previous reading to the current one.
///
/// There is no history store; the previous value is synthesized so that a
/// trend can be displayed. It carries no statistical meaning.
pub const IMPLIED_PREVIOUS_RATIO: f64 = 0.9;

/// A single observed signal.
///
/// Readings are clamped to be non-negative and the trend is always derived
/// from them, never set on its own.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize)]
pub struct MetricValue {
    current: f64,
    previous: f64,
    trend: Trend,
    threshold: f64,
}

impl MetricValue {
    /// A reading with an explicit previous value.
    pub fn new(current: f64, previous: f64, threshold: f64) -> Self {
        let current = non_negative(current);
        let previous = non_negative(previous);
        Self {
            current,
            previous,
            trend: Trend::between(current, previous),
            threshold,
        }
    }

    /// A count or rate with an implied previous reading.
    pub fn estimated(current: f64, threshold: f64) -> Self {
        let current = non_negative(current);
        Self::new(current, current * IMPLIED_PREVIOUS_RATIO, threshold)
    }

    /// A 0–1 utilization with an implied previous reading; the trend comes
    /// from the position on the utilization scale.
    pub fn utilization(current: f64, threshold: f64) -> Self {
        let current = non_negative(current);
        Self {
            current,
            previous: current * IMPLIED_PREVIOUS_RATIO,
            trend: Trend::of_utilization(current),
            threshold,
        }
    }

    pub fn current(&self) -> f64 {
        self.current
    }

    pub fn previous(&self) -> f64 {
        self.previous
    }

    pub fn trend(&self) -> Trend {
        self.trend
    }

    pub fn threshold(&self) -> f64 {
        self.threshold
    }
}

fn non_negative(v: f64) -> f64 {
    if v.is_finite() && v > 0.0 { v } else { 0.0 }
}

/// Observations for one role group.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RoleGroupMetrics {
    pub role_group: String,
    pub role: Role,
    /// Configured replica count (source of truth for current state).
    pub total: u32,
    /// Replicas running and ready; never exceeds `total`.
    pub healthy: u32,
    pub cpu: MetricValue,
    pub memory: MetricValue,
    pub connections: MetricValue,
    pub throughput: MetricValue,
    /// Replicas per zone, for zones currently hosting at least one.
    pub zones: ZoneDistribution,
}

/// Cluster-wide query performance.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize)]
pub struct QueryMetrics {
    pub average_latency: Duration,
    pub p95_latency: Duration,
    pub queries_per_second: f64,
    pub slow_queries: u64,
}

/// Coarse system indicators.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize)]
pub struct SystemMetrics {
    pub load_average: f64,
    pub disk_usage: f64,
    pub network_latency: Duration,
}

/// Immutable snapshot of everything the decision engine looks at.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ClusterMetrics {
    pub cluster_id: ClusterId,
    /// Unix timestamp (seconds) of collection.
    pub collected_at: u64,
    pub role_groups: BTreeMap<String, RoleGroupMetrics>,
    pub query: QueryMetrics,
    pub system: SystemMetrics,
    /// Signals that were answered from fallback values this pass.
    pub degraded: Vec<String>,
}

impl ClusterMetrics {
    pub fn role_group(&self, name: &str) -> Option<&RoleGroupMetrics> {
        self.role_groups.get(name)
    }

    /// Sum of healthy replicas across role groups with the given role.
    pub fn healthy_with_role(&self, role: Role) -> u32 {
        self.role_groups
            .values()
            .filter(|g| g.role == role)
            .map(|g| g.healthy)
            .sum()
    }

    /// Whether any signal fell back this pass.
    pub fn is_degraded(&self) -> bool {
        !self.degraded.is_empty()
    }
}
