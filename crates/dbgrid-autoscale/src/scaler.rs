//! AutoScaler: one reconciliation pass per cluster per tick.
//!
//! Collects metrics, asks the decision engine for each role group, applies
//! the safety constraints and writes changed replica counts through the
//! [`ScaleTarget`] seam. Primaries are handled before secondaries so the
//! topology check for secondaries sees the primary count decided this tick.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, warn};

use dbgrid_metrics::{
    ClusterMetrics, CollectorConfig, DatabaseClient, MetricSource, MetricsCollector,
};
use dbgrid_state::{
    ClusterSpec, Role, RoleGroupResource, RoleGroupSpec, StateStore, ZoneDistribution,
};

use crate::constraints::{clamp_replicas, distribute_zones, quorum_round, topology_valid};
use crate::engine::ScaleDecisionEngine;
use crate::error::{ReconcileError, RoleGroupFailure, ScaleError, ScaleResult};
use crate::target::ScaleTarget;

/// Orchestrator tuning.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AutoscaleConfig {
    /// Extra attempts for a role-group write rejected as stale.
    pub write_retries: u32,
}

impl Default for AutoscaleConfig {
    fn default() -> Self {
        Self { write_retries: 2 }
    }
}

/// What happened to one role group during a pass.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum RoleGroupOutcome {
    /// Autoscaling is switched off for the group.
    Disabled,
    /// Too few healthy primaries to risk any change.
    QuorumFloor { healthy: u32, required: u32 },
    /// The engine saw no reason to scale.
    Hold { reason: String },
    /// The target would leave an unviable cluster shape.
    TopologyRejected { primaries: u32, secondaries: u32 },
    /// The constrained target equals what is already stored.
    Unchanged { replicas: u32 },
    /// The replica count was (or, in a dry run, would be) changed.
    Scaled {
        from: u32,
        to: u32,
        reason: String,
        confidence: f64,
        #[serde(skip_serializing_if = "BTreeMap::is_empty")]
        zones: ZoneDistribution,
    },
}

/// Result of one reconciliation pass over a cluster.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ReconcileReport {
    pub cluster_id: String,
    /// Autoscaling enabled for the cluster; when false nothing was looked at.
    pub enabled: bool,
    /// Nothing was written.
    pub dry_run: bool,
    /// Signals answered from fallback values.
    pub degraded: Vec<String>,
    /// Outcomes in processing order (primaries first).
    pub outcomes: Vec<(String, RoleGroupOutcome)>,
}

impl ReconcileReport {
    fn new(cluster_id: &str, enabled: bool, dry_run: bool) -> Self {
        Self {
            cluster_id: cluster_id.to_string(),
            enabled,
            dry_run,
            degraded: Vec::new(),
            outcomes: Vec::new(),
        }
    }

    pub fn outcome(&self, role_group: &str) -> Option<&RoleGroupOutcome> {
        self.outcomes
            .iter()
            .find(|(name, _)| name == role_group)
            .map(|(_, outcome)| outcome)
    }

    /// Number of role groups whose replica count changed.
    pub fn scaled(&self) -> usize {
        self.outcomes
            .iter()
            .filter(|(_, o)| matches!(o, RoleGroupOutcome::Scaled { .. }))
            .count()
    }
}

/// Replica counts per role group as decided so far in this pass.
struct Plan {
    roles: BTreeMap<String, Role>,
    replicas: BTreeMap<String, u32>,
}

impl Plan {
    fn from_metrics(metrics: &ClusterMetrics) -> Self {
        Self {
            roles: metrics
                .role_groups
                .iter()
                .map(|(name, m)| (name.clone(), m.role))
                .collect(),
            replicas: metrics
                .role_groups
                .iter()
                .map(|(name, m)| (name.clone(), m.total))
                .collect(),
        }
    }

    /// `(primaries, secondaries)` if `role_group` were set to `replicas`.
    fn topology_with(&self, role_group: &str, replicas: u32) -> (u32, u32) {
        let mut primaries = 0;
        let mut secondaries = 0;
        for (name, role) in &self.roles {
            let count = if name == role_group {
                replicas
            } else {
                self.replicas.get(name).copied().unwrap_or(0)
            };
            match role {
                Role::Primary => primaries += count,
                Role::Secondary => secondaries += count,
            }
        }
        (primaries, secondaries)
    }

    fn decide(&mut self, role_group: &str, replicas: u32) {
        self.replicas.insert(role_group.to_string(), replicas);
    }
}

/// The autoscaling orchestrator.
///
/// All collaborators are injected; nothing is cached between passes.
pub struct AutoScaler {
    state: StateStore,
    collector: MetricsCollector,
    engine: ScaleDecisionEngine,
    target: Arc<dyn ScaleTarget>,
    config: AutoscaleConfig,
}

impl AutoScaler {
    /// Create an autoscaler that resizes role groups in `state`.
    pub fn new(
        state: StateStore,
        database: Arc<dyn DatabaseClient>,
        source: Arc<dyn MetricSource>,
    ) -> Self {
        Self {
            collector: MetricsCollector::new(state.clone(), database),
            engine: ScaleDecisionEngine::new(source),
            target: Arc::new(state.clone()),
            state,
            config: AutoscaleConfig::default(),
        }
    }

    /// Write replica counts somewhere other than the state store.
    pub fn with_target(mut self, target: Arc<dyn ScaleTarget>) -> Self {
        self.target = target;
        self
    }

    pub fn with_config(mut self, config: AutoscaleConfig) -> Self {
        self.config = config;
        self
    }

    pub fn with_collector_config(mut self, config: CollectorConfig) -> Self {
        self.collector = self.collector.with_config(config);
        self
    }

    /// Run one reconciliation pass and apply the results.
    pub async fn reconcile(&self, cluster: &ClusterSpec) -> Result<ReconcileReport, ReconcileError> {
        self.pass(cluster, false).await
    }

    /// Run one reconciliation pass without writing anything.
    pub async fn evaluate(&self, cluster: &ClusterSpec) -> Result<ReconcileReport, ReconcileError> {
        self.pass(cluster, true).await
    }

    async fn pass(&self, cluster: &ClusterSpec, dry_run: bool) -> Result<ReconcileReport, ReconcileError> {
        if !cluster.autoscaling.enabled {
            debug!(cluster = %cluster.id, "autoscaling disabled");
            return Ok(ReconcileReport::new(&cluster.id, false, dry_run));
        }

        let metrics = self
            .collector
            .collect(cluster)
            .await
            .map_err(|source| ReconcileError::Collect {
                cluster_id: cluster.id.clone(),
                source,
            })?;

        let mut report = ReconcileReport::new(&cluster.id, true, dry_run);
        report.degraded = metrics.degraded.clone();
        if metrics.is_degraded() {
            warn!(cluster = %cluster.id, degraded = ?metrics.degraded, "telemetry degraded, using fallbacks");
        }

        let mut groups: Vec<&RoleGroupSpec> = cluster.autoscaling.role_groups.iter().collect();
        groups.sort_by_key(|g| g.role);

        let mut plan = Plan::from_metrics(&metrics);
        let mut failures = Vec::new();

        for group in groups {
            match self
                .reconcile_role_group(cluster, group, &metrics, &mut plan, dry_run)
                .await
            {
                Ok(outcome) => report.outcomes.push((group.name.clone(), outcome)),
                Err(e) => {
                    warn!(cluster = %cluster.id, role_group = %group.name, error = %e, "role group scaling failed");
                    failures.push(RoleGroupFailure {
                        role_group: group.name.clone(),
                        error: e,
                    });
                }
            }
        }

        if failures.is_empty() {
            Ok(report)
        } else {
            Err(ReconcileError::RoleGroups {
                cluster_id: cluster.id.clone(),
                failures,
                report,
            })
        }
    }

    async fn reconcile_role_group(
        &self,
        cluster: &ClusterSpec,
        group: &RoleGroupSpec,
        metrics: &ClusterMetrics,
        plan: &mut Plan,
        dry_run: bool,
    ) -> ScaleResult<RoleGroupOutcome> {
        if !group.enabled {
            return Ok(RoleGroupOutcome::Disabled);
        }

        let role_metrics = metrics
            .role_group(&group.name)
            .ok_or_else(|| ScaleError::MissingMetrics(group.name.clone()))?;

        if group.is_primary()
            && let Some(quorum) = group.active_quorum_protection()
        {
            let healthy = metrics.healthy_with_role(Role::Primary);
            if healthy < quorum.min_healthy_primaries {
                warn!(
                    cluster = %cluster.id,
                    role_group = %group.name,
                    healthy,
                    required = quorum.min_healthy_primaries,
                    "healthy primaries below floor, not scaling"
                );
                return Ok(RoleGroupOutcome::QuorumFloor {
                    healthy,
                    required: quorum.min_healthy_primaries,
                });
            }
        }

        let decision = self
            .engine
            .calculate_scaling(group, role_metrics, metrics)
            .await;
        if decision.is_none() {
            return Ok(RoleGroupOutcome::Hold {
                reason: decision.reason,
            });
        }

        let mut target = clamp_replicas(
            decision.target_replicas,
            group.min_replicas,
            group.max_replicas,
        );
        if group.is_primary() && !allows_quorum_break(group) {
            target = quorum_round(target, group.min_replicas, group.max_replicas);
        }

        let (primaries, secondaries) = plan.topology_with(&group.name, target);
        if !topology_valid(primaries, secondaries) {
            warn!(
                cluster = %cluster.id,
                role_group = %group.name,
                target,
                primaries,
                secondaries,
                "target would leave an invalid topology, not scaling"
            );
            return Ok(RoleGroupOutcome::TopologyRejected {
                primaries,
                secondaries,
            });
        }

        let zones = match group.active_zone_aware() {
            Some(zone_aware) => {
                let hosting: Vec<String> = role_metrics.zones.keys().cloned().collect();
                distribute_zones(target, &hosting, zone_aware.min_replicas_per_zone)
            }
            None => ZoneDistribution::new(),
        };

        let mut resource = self.target.read(&cluster.id, &group.name).await?;
        if is_noop(&resource, target, &zones) {
            plan.decide(&group.name, target);
            return Ok(RoleGroupOutcome::Unchanged { replicas: target });
        }

        let from = resource.desired_replicas;
        if !dry_run {
            let mut attempt = 0;
            loop {
                match self.target.write(&resource, target, &zones).await {
                    Ok(_) => break,
                    Err(e) if e.is_conflict() && attempt < self.config.write_retries => {
                        attempt += 1;
                        debug!(
                            cluster = %cluster.id,
                            role_group = %group.name,
                            attempt,
                            "stale role group write, retrying"
                        );
                        resource = self.target.read(&cluster.id, &group.name).await?;
                        if is_noop(&resource, target, &zones) {
                            plan.decide(&group.name, target);
                            return Ok(RoleGroupOutcome::Unchanged { replicas: target });
                        }
                    }
                    Err(e) => return Err(e.into()),
                }
            }
            info!(
                cluster = %cluster.id,
                role_group = %group.name,
                from,
                to = target,
                action = %decision.action,
                confidence = decision.confidence,
                reason = %decision.reason,
                "role group scaled"
            );
        }

        plan.decide(&group.name, target);
        Ok(RoleGroupOutcome::Scaled {
            from,
            to: target,
            reason: decision.reason,
            confidence: decision.confidence,
            zones,
        })
    }

    /// Reconcile every cluster in the state store.
    ///
    /// A failing cluster is logged and skipped; only failing to list the
    /// clusters is an error.
    pub async fn reconcile_all(&self) -> ScaleResult<Vec<ReconcileReport>> {
        let clusters = self.state.list_clusters()?;
        let mut reports = Vec::with_capacity(clusters.len());

        for cluster in &clusters {
            match self.reconcile(cluster).await {
                Ok(report) => reports.push(report),
                Err(e) => {
                    error!(cluster = %cluster.id, error = %e, "reconciliation failed");
                    if let ReconcileError::RoleGroups { report, .. } = e {
                        reports.push(report);
                    }
                }
            }
        }

        Ok(reports)
    }

    /// Run the reconciliation loop until `shutdown` changes.
    pub async fn run(&self, interval: Duration, mut shutdown: tokio::sync::watch::Receiver<bool>) {
        info!(interval_secs = interval.as_secs(), "autoscaler started");

        loop {
            tokio::select! {
                _ = tokio::time::sleep(interval) => {
                    match self.reconcile_all().await {
                        Ok(reports) => {
                            let scaled: usize = reports.iter().map(|r| r.scaled()).sum();
                            debug!(clusters = reports.len(), scaled, "reconciliation pass complete");
                        }
                        Err(e) => error!(error = %e, "reconciliation pass failed"),
                    }
                }
                _ = shutdown.changed() => {
                    info!("autoscaler shutting down");
                    break;
                }
            }
        }
    }
}

fn allows_quorum_break(group: &RoleGroupSpec) -> bool {
    group
        .active_quorum_protection()
        .is_some_and(|q| q.allow_quorum_break)
}

fn is_noop(resource: &RoleGroupResource, target: u32, zones: &ZoneDistribution) -> bool {
    resource.desired_replicas == target && &resource.zone_replicas == zones
}
