//! Scale decision engine: weighted fusion of per-metric scores.
//!
//! Every configured metric is scored in `[0, 1]`, where high means
//! pressure to add replicas and low means room to remove them:
//!
//! ```text
//! current > target                  → min(current / target, 1.0)
//! current < target × under_ratio    → current / target       (< under_ratio)
//! otherwise                         → 0.5
//! ```
//!
//! `under_ratio` is 0.5 for built-in metrics and 0.7 for custom ones.
//! The fused score is the weight-averaged score; above 0.8 the group grows
//! by one replica, below 0.2 it shrinks by one.

use std::sync::Arc;
use std::time::Duration;

use tracing::debug;

use dbgrid_metrics::{ClusterMetrics, MetricSource, MetricValue, RoleGroupMetrics};
use dbgrid_state::{MetricConfig, MetricTarget, MetricType, RoleGroupSpec};

use crate::decision::{ScaleAction, ScalingDecision};

/// Fused score above which a role group scales up.
pub const SCALE_UP_THRESHOLD: f64 = 0.8;
/// Fused score below which a role group scales down.
pub const SCALE_DOWN_THRESHOLD: f64 = 0.2;
/// Score of a metric that is within its band or could not be evaluated.
pub const NEUTRAL_SCORE: f64 = 0.5;

const UNDER_RATIO: f64 = 0.5;
const CUSTOM_UNDER_RATIO: f64 = 0.7;

/// One evaluated metric.
#[derive(Debug, Clone, PartialEq)]
pub struct MetricScore {
    pub kind: MetricType,
    pub score: f64,
    pub weight: f64,
    pub reason: String,
}

/// Produces one [`ScalingDecision`] per role group.
///
/// Holds no state between calls; the metric source is only used for
/// custom metrics.
pub struct ScaleDecisionEngine {
    source: Arc<dyn MetricSource>,
}

impl ScaleDecisionEngine {
    pub fn new(source: Arc<dyn MetricSource>) -> Self {
        Self { source }
    }

    /// Decide how a role group should change, one replica at a time.
    pub async fn calculate_scaling(
        &self,
        group: &RoleGroupSpec,
        role_metrics: &RoleGroupMetrics,
        cluster_metrics: &ClusterMetrics,
    ) -> ScalingDecision {
        let current = role_metrics.total;
        if group.metrics.is_empty() {
            return ScalingDecision::none(current, "no metrics configured");
        }

        let mut scores = Vec::with_capacity(group.metrics.len());
        for config in &group.metrics {
            scores.push(self.evaluate(config, role_metrics, cluster_metrics).await);
        }

        let decision = fuse(current, &scores);
        debug!(
            role_group = %group.name,
            score = decision.score,
            action = %decision.action,
            current,
            target = decision.target_replicas,
            "scaling decision"
        );
        decision
    }

    /// Score a single metric configuration.
    pub async fn evaluate(
        &self,
        config: &MetricConfig,
        role_metrics: &RoleGroupMetrics,
        cluster_metrics: &ClusterMetrics,
    ) -> MetricScore {
        let kind = config.kind;
        let (score, reason) = match &config.target {
            MetricTarget::Invalid(raw) => (
                NEUTRAL_SCORE,
                format!("{kind} target {raw:?} is not a valid number"),
            ),
            MetricTarget::Value(target) if !target.is_finite() || *target <= 0.0 => (
                NEUTRAL_SCORE,
                format!("{kind} target {target} must be positive"),
            ),
            &MetricTarget::Value(target) => match kind {
                MetricType::Cpu => observed(kind, &role_metrics.cpu, target),
                MetricType::Memory => observed(kind, &role_metrics.memory, target),
                MetricType::Connections => observed(kind, &role_metrics.connections, target),
                MetricType::Throughput => observed(kind, &role_metrics.throughput, target),
                MetricType::QueryLatency => {
                    latency(cluster_metrics.query.average_latency, target)
                }
                MetricType::Custom => self.custom(config, target).await,
            },
        };

        debug!(metric = %kind, score, weight = config.weight, %reason, "metric evaluated");
        MetricScore {
            kind,
            score,
            weight: config.weight,
            reason,
        }
    }

    async fn custom(&self, config: &MetricConfig, target: f64) -> (f64, String) {
        let Some(source) = &config.source else {
            return (NEUTRAL_SCORE, "custom metric has no source".to_string());
        };

        match self.source.query(source).await {
            Ok(value) => {
                let (score, band) = score_against(value, target, CUSTOM_UNDER_RATIO);
                (
                    score,
                    format!("custom {:?} {value:.2} {band} target {target:.2}", source.query),
                )
            }
            Err(e) => (NEUTRAL_SCORE, format!("custom {:?} unavailable: {e}", source.query)),
        }
    }
}

/// Where a reading sits relative to its target.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Band {
    Over,
    Under,
    Within,
}

impl std::fmt::Display for Band {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Band::Over => "above",
            Band::Under => "well below",
            Band::Within => "near",
        })
    }
}

fn score_against(current: f64, target: f64, under_ratio: f64) -> (f64, Band) {
    let current = if current.is_finite() { current.max(0.0) } else { 0.0 };
    if current > target {
        ((current / target).min(1.0), Band::Over)
    } else if current < target * under_ratio {
        ((current / target).max(0.0), Band::Under)
    } else {
        (NEUTRAL_SCORE, Band::Within)
    }
}

fn observed(kind: MetricType, value: &MetricValue, target: f64) -> (f64, String) {
    let (score, band) = score_against(value.current(), target, UNDER_RATIO);
    (
        score,
        format!(
            "{kind} {:.2} {band} target {target:.2} ({})",
            value.current(),
            value.trend()
        ),
    )
}

fn latency(average: Duration, target_ms: f64) -> (f64, String) {
    let current_ms = average.as_secs_f64() * 1000.0;
    let (score, band) = score_against(current_ms, target_ms, UNDER_RATIO);
    (
        score,
        format!("query latency {current_ms:.1}ms {band} target {target_ms:.1}ms"),
    )
}

/// Combine metric scores into a decision for a group at `current` replicas.
pub fn fuse(current: u32, scores: &[MetricScore]) -> ScalingDecision {
    let total_weight: f64 = scores.iter().map(|s| s.weight).sum();
    if total_weight <= 0.0 {
        return ScalingDecision::none(current, "all metric weights are zero");
    }

    let weighted: f64 = scores.iter().map(|s| s.score * s.weight).sum();
    let fused = (weighted / total_weight).clamp(0.0, 1.0);
    let reason = scores
        .iter()
        .map(|s| s.reason.as_str())
        .collect::<Vec<_>>()
        .join("; ");

    if fused > SCALE_UP_THRESHOLD {
        ScalingDecision {
            action: ScaleAction::Up,
            target_replicas: current.saturating_add(1),
            reason,
            confidence: fused,
            score: fused,
        }
    } else if fused < SCALE_DOWN_THRESHOLD && current > 0 {
        ScalingDecision {
            action: ScaleAction::Down,
            target_replicas: current - 1,
            reason,
            confidence: 1.0 - fused,
            score: fused,
        }
    } else {
        ScalingDecision {
            score: fused,
            ..ScalingDecision::none(current, reason)
        }
    }
}
