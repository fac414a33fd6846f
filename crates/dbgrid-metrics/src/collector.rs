//! Metrics collector: builds one [`ClusterMetrics`] snapshot per tick.
//!
//! Reads replica counts, readiness and resource figures from the state
//! store, and connection/transaction/query listings from the database.
//! Only a missing or unreadable role-group resource fails the pass; any
//! database failure is replaced by the configured fallback values.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use tracing::{debug, warn};

use dbgrid_state::{ClusterSpec, MetricType, ReplicaPhase, ReplicaState, RoleGroupSpec, StateStore, ZoneDistribution};

use crate::database::{statements, DatabaseClient, QueryTarget};
use crate::error::{MetricsError, MetricsResult};
use crate::fallback::FallbackValues;
use crate::snapshot::*;

/// Share of requests assumed in use by a replica that reports no usage.
const ESTIMATED_USAGE_RATIO: f64 = 0.5;

/// Threshold recorded on utilization values when the role group has no
/// target of that type.
const DEFAULT_UTILIZATION_THRESHOLD: f64 = 0.8;

/// Collector tuning.
#[derive(Debug, Clone, PartialEq)]
pub struct CollectorConfig {
    /// Running queries older than this count as slow.
    pub slow_query_threshold: Duration,
    pub fallbacks: FallbackValues,
}

impl Default for CollectorConfig {
    fn default() -> Self {
        Self {
            slow_query_threshold: Duration::from_secs(1),
            fallbacks: FallbackValues::default(),
        }
    }
}

/// Gathers per-role-group and cluster-wide telemetry.
pub struct MetricsCollector {
    state: StateStore,
    database: Arc<dyn DatabaseClient>,
    config: CollectorConfig,
}

/// Side results of one role group's collection used for cluster-wide figures.
struct RoleGroupSample {
    metrics: RoleGroupMetrics,
    round_trip: Option<Duration>,
    disk_ratios: Vec<f64>,
}

impl MetricsCollector {
    /// Create a collector with default tuning.
    pub fn new(state: StateStore, database: Arc<dyn DatabaseClient>) -> Self {
        Self {
            state,
            database,
            config: CollectorConfig::default(),
        }
    }

    /// Replace the collector tuning.
    pub fn with_config(mut self, config: CollectorConfig) -> Self {
        self.config = config;
        self
    }

    /// Collect a fresh snapshot for every role group of the cluster.
    pub async fn collect(&self, cluster: &ClusterSpec) -> MetricsResult<ClusterMetrics> {
        let mut degraded = Vec::new();
        let mut role_groups = BTreeMap::new();
        let mut round_trips = Vec::new();
        let mut disk_ratios = Vec::new();

        for group in &cluster.autoscaling.role_groups {
            let sample = self.collect_role_group(cluster, group, &mut degraded).await?;
            round_trips.extend(sample.round_trip);
            disk_ratios.extend(sample.disk_ratios);
            role_groups.insert(group.name.clone(), sample.metrics);
        }

        let queries_per_second: f64 = role_groups.values().map(|g| g.throughput.current()).sum();
        let query = self
            .query_metrics(cluster, queries_per_second, &mut degraded)
            .await;
        let system = self.system_metrics(&role_groups, &round_trips, &disk_ratios, &mut degraded);

        if !degraded.is_empty() {
            debug!(cluster = %cluster.id, degraded = ?degraded, "collected with fallback values");
        }

        Ok(ClusterMetrics {
            cluster_id: cluster.id.clone(),
            collected_at: epoch_secs(),
            role_groups,
            query,
            system,
            degraded,
        })
    }

    async fn collect_role_group(
        &self,
        cluster: &ClusterSpec,
        group: &RoleGroupSpec,
        degraded: &mut Vec<String>,
    ) -> MetricsResult<RoleGroupSample> {
        let resource = self
            .state
            .get_role_group(&cluster.id, &group.name)?
            .ok_or_else(|| MetricsError::RoleGroupMissing(format!("{}:{}", cluster.id, group.name)))?;
        let replicas = self.state.list_replicas(&cluster.id, &group.name)?;

        let total = resource.desired_replicas;
        let healthy_replicas: Vec<&ReplicaState> =
            replicas.iter().filter(|r| r.is_healthy()).collect();
        let healthy = (healthy_replicas.len() as u32).min(total);

        let (cpu, memory) = estimated_utilization(&healthy_replicas);
        let cpu = MetricValue::utilization(
            cpu,
            group.target_for(MetricType::Cpu).unwrap_or(DEFAULT_UTILIZATION_THRESHOLD),
        );
        let memory = MetricValue::utilization(
            memory,
            group.target_for(MetricType::Memory).unwrap_or(DEFAULT_UTILIZATION_THRESHOLD),
        );

        let target = QueryTarget {
            cluster_id: &cluster.id,
            role_group: Some(&group.name),
        };
        let fallbacks = &self.config.fallbacks;

        let started = Instant::now();
        let (connections, round_trip) = match self
            .database
            .query(target, statements::CONNECTION_COUNT)
            .await
            .ok()
            .and_then(|r| r.scalar())
        {
            Some(count) => (
                MetricValue::estimated(count, threshold(group, MetricType::Connections)),
                Some(started.elapsed()),
            ),
            None => {
                degraded.push(format!("{}/connections", group.name));
                (
                    MetricValue::new(
                        fallbacks.connections_current,
                        fallbacks.connections_previous,
                        threshold(group, MetricType::Connections),
                    ),
                    None,
                )
            }
        };

        let throughput = match self
            .database
            .query(target, statements::ACTIVE_TRANSACTIONS)
            .await
            .ok()
            .and_then(|r| r.scalar())
        {
            Some(count) => MetricValue::estimated(count, threshold(group, MetricType::Throughput)),
            None => {
                degraded.push(format!("{}/throughput", group.name));
                MetricValue::new(
                    fallbacks.throughput_current,
                    fallbacks.throughput_previous,
                    threshold(group, MetricType::Throughput),
                )
            }
        };

        let disk_ratios = healthy_replicas
            .iter()
            .filter_map(|r| r.usage.and_then(|u| u.disk_usage_ratio))
            .filter(|ratio| ratio.is_finite())
            .collect();

        debug!(
            cluster = %cluster.id,
            role_group = %group.name,
            total,
            healthy,
            cpu = cpu.current(),
            memory = memory.current(),
            connections = connections.current(),
            throughput = throughput.current(),
            "role group metrics collected"
        );

        Ok(RoleGroupSample {
            metrics: RoleGroupMetrics {
                role_group: group.name.clone(),
                role: group.role,
                total,
                healthy,
                cpu,
                memory,
                connections,
                throughput,
                zones: zone_counts(&replicas),
            },
            round_trip,
            disk_ratios,
        })
    }

    async fn query_metrics(
        &self,
        cluster: &ClusterSpec,
        queries_per_second: f64,
        degraded: &mut Vec<String>,
    ) -> QueryMetrics {
        let target = QueryTarget {
            cluster_id: &cluster.id,
            role_group: None,
        };
        match self.database.query(target, statements::RUNNING_QUERIES).await {
            Ok(result) => {
                let elapsed_ms = result.column_f64(0);
                let slow_ms = self.config.slow_query_threshold.as_secs_f64() * 1000.0;
                let (average, p95) = latency_summary(&elapsed_ms);
                QueryMetrics {
                    average_latency: average,
                    p95_latency: p95,
                    queries_per_second,
                    slow_queries: elapsed_ms.iter().filter(|ms| **ms > slow_ms).count() as u64,
                }
            }
            Err(e) => {
                warn!(cluster = %cluster.id, error = %e, "query listing unavailable, using fallback");
                degraded.push("query_latency".to_string());
                QueryMetrics {
                    average_latency: Duration::from_millis(self.config.fallbacks.average_latency_ms),
                    p95_latency: Duration::from_millis(self.config.fallbacks.p95_latency_ms),
                    queries_per_second,
                    slow_queries: 0,
                }
            }
        }
    }

    fn system_metrics(
        &self,
        role_groups: &BTreeMap<String, RoleGroupMetrics>,
        round_trips: &[Duration],
        disk_ratios: &[f64],
        degraded: &mut Vec<String>,
    ) -> SystemMetrics {
        let fallbacks = &self.config.fallbacks;

        let load_average = if role_groups.is_empty() {
            fallbacks.load_average
        } else {
            role_groups.values().map(|g| g.cpu.current()).sum::<f64>() / role_groups.len() as f64
        };

        let disk_usage = if disk_ratios.is_empty() {
            degraded.push("disk_usage".to_string());
            fallbacks.disk_usage
        } else {
            disk_ratios.iter().sum::<f64>() / disk_ratios.len() as f64
        };

        let network_latency = if round_trips.is_empty() {
            degraded.push("network_latency".to_string());
            Duration::from_millis(fallbacks.network_latency_ms)
        } else {
            round_trips.iter().sum::<Duration>() / round_trips.len() as u32
        };

        SystemMetrics {
            load_average,
            disk_usage,
            network_latency,
        }
    }
}

/// CPU and memory utilization of the healthy replicas, as a share of
/// their requests. Zero when nothing is requested.
fn estimated_utilization(healthy: &[&ReplicaState]) -> (f64, f64) {
    let requested_cpu: u64 = healthy.iter().map(|r| r.requests.cpu_millis).sum();
    let requested_mem: u64 = healthy.iter().map(|r| r.requests.memory_bytes).sum();

    let used_cpu: f64 = healthy
        .iter()
        .map(|r| match r.usage {
            Some(u) => u.cpu_millis as f64,
            None => r.requests.cpu_millis as f64 * ESTIMATED_USAGE_RATIO,
        })
        .sum();
    let used_mem: f64 = healthy
        .iter()
        .map(|r| match r.usage {
            Some(u) => u.memory_bytes as f64,
            None => r.requests.memory_bytes as f64 * ESTIMATED_USAGE_RATIO,
        })
        .sum();

    (ratio(used_cpu, requested_cpu), ratio(used_mem, requested_mem))
}

fn ratio(used: f64, requested: u64) -> f64 {
    if requested == 0 {
        0.0
    } else {
        (used / requested as f64).max(0.0)
    }
}

fn threshold(group: &RoleGroupSpec, kind: MetricType) -> f64 {
    group.target_for(kind).unwrap_or(0.0)
}

/// Replicas per zone, ignoring replicas on their way out.
fn zone_counts(replicas: &[ReplicaState]) -> ZoneDistribution {
    let mut zones = ZoneDistribution::new();
    for replica in replicas {
        if replica.phase == ReplicaPhase::Terminating {
            continue;
        }
        if let Some(zone) = &replica.zone {
            *zones.entry(zone.clone()).or_insert(0) += 1;
        }
    }
    zones
}

/// Average and P95 of elapsed times in milliseconds.
///
/// Returns zero durations for an empty listing.
fn latency_summary(elapsed_ms: &[f64]) -> (Duration, Duration) {
    if elapsed_ms.is_empty() {
        return (Duration::ZERO, Duration::ZERO);
    }

    let mut sorted: Vec<f64> = elapsed_ms.iter().map(|ms| ms.max(0.0)).collect();
    sorted.sort_by(|a, b| a.total_cmp(b));

    let average = sorted.iter().sum::<f64>() / sorted.len() as f64;
    let p95_idx = (sorted.len() as f64 * 0.95) as usize;
    let p95 = sorted[p95_idx.min(sorted.len() - 1)];

    (millis_to_duration(average), millis_to_duration(p95))
}

/// Saturates at `Duration::MAX` for sums that overflow.
fn millis_to_duration(ms: f64) -> Duration {
    Duration::try_from_secs_f64(ms / 1000.0).unwrap_or(Duration::MAX)
}

fn epoch_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}
