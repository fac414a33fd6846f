//! Boundary parsing of the externally authored cluster spec.
//!
//! The control-plane object carries metric targets and weights as strings.
//! They are parsed exactly once here so everything downstream works with
//! numbers. Unparseable weights fall back to `1.0`; unparseable targets are
//! kept as [`MetricTarget::Invalid`] and score neutral at evaluation time.

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::SpecError;
use crate::types::*;

/// Cluster spec as authored (string-typed numeric fields).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct RawClusterSpec {
    #[serde(default = "default_namespace")]
    pub namespace: String,
    pub name: String,
    #[serde(default)]
    pub autoscaling: RawAutoscaling,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(rename_all = "camelCase")]
pub struct RawAutoscaling {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub role_groups: Vec<RawRoleGroup>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct RawRoleGroup {
    pub name: String,
    /// `primary` or `secondary`; inferred from the name when absent.
    pub role: Option<String>,
    #[serde(default = "default_true")]
    pub enabled: bool,
    pub min_replicas: u32,
    pub max_replicas: u32,
    #[serde(default)]
    pub metrics: Vec<RawMetricConfig>,
    pub quorum_protection: Option<RawQuorumProtection>,
    pub zone_aware: Option<RawZoneAware>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct RawMetricConfig {
    #[serde(rename = "type")]
    pub kind: String,
    pub target: String,
    #[serde(default = "default_weight")]
    pub weight: String,
    pub source: Option<RawMetricSource>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct RawMetricSource {
    #[serde(rename = "type", default = "default_source_kind")]
    pub kind: String,
    pub query: String,
    #[serde(alias = "serverURL")]
    pub server_url: String,
    pub fallback: Option<f64>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct RawQuorumProtection {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub min_healthy_primaries: u32,
    #[serde(default)]
    pub allow_quorum_break: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct RawZoneAware {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub min_replicas_per_zone: u32,
}

fn default_namespace() -> String {
    "default".to_string()
}

fn default_true() -> bool {
    true
}

fn default_weight() -> String {
    "1".to_string()
}

fn default_source_kind() -> String {
    "prometheus".to_string()
}

impl RawClusterSpec {
    /// Convert into the typed spec, stamping `created_at`/`updated_at`.
    pub fn into_spec(self, now: u64) -> Result<ClusterSpec, SpecError> {
        if self.name.trim().is_empty() {
            return Err(SpecError::EmptyName);
        }

        let mut role_groups: Vec<RoleGroupSpec> = Vec::new();
        for raw in self.autoscaling.role_groups {
            if role_groups.iter().any(|g| g.name == raw.name) {
                return Err(SpecError::DuplicateRoleGroup(raw.name));
            }
            role_groups.push(raw.into_spec()?);
        }

        Ok(ClusterSpec {
            id: format!("{}/{}", self.namespace, self.name),
            namespace: self.namespace,
            name: self.name,
            autoscaling: AutoscalingSpec {
                enabled: self.autoscaling.enabled,
                role_groups,
            },
            created_at: now,
            updated_at: now,
        })
    }
}

impl RawRoleGroup {
    fn into_spec(self) -> Result<RoleGroupSpec, SpecError> {
        if self.min_replicas > self.max_replicas {
            return Err(SpecError::InvalidBounds {
                role_group: self.name,
                min: self.min_replicas,
                max: self.max_replicas,
            });
        }

        let role = match self.role.as_deref().map(str::trim) {
            Some(r) if r.eq_ignore_ascii_case("primary") => Role::Primary,
            Some(r) if r.eq_ignore_ascii_case("secondary") => Role::Secondary,
            Some(other) => {
                return Err(SpecError::UnknownRole {
                    role_group: self.name,
                    role: other.to_string(),
                });
            }
            None => infer_role(&self.name),
        };

        let metrics = self
            .metrics
            .into_iter()
            .map(|m| parse_metric(&self.name, m))
            .collect::<Result<Vec<_>, _>>()?;

        Ok(RoleGroupSpec {
            role,
            enabled: self.enabled,
            min_replicas: self.min_replicas,
            max_replicas: self.max_replicas,
            metrics,
            quorum_protection: self.quorum_protection.map(|q| QuorumProtection {
                enabled: q.enabled,
                min_healthy_primaries: q.min_healthy_primaries,
                allow_quorum_break: q.allow_quorum_break,
            }),
            zone_aware: self.zone_aware.map(|z| ZoneAwareConfig {
                enabled: z.enabled,
                min_replicas_per_zone: z.min_replicas_per_zone,
            }),
            name: self.name,
        })
    }
}

fn infer_role(name: &str) -> Role {
    if name.to_ascii_lowercase().starts_with("primar") {
        Role::Primary
    } else {
        Role::Secondary
    }
}

fn parse_metric(role_group: &str, raw: RawMetricConfig) -> Result<MetricConfig, SpecError> {
    let kind = match raw.kind.trim().to_ascii_lowercase().as_str() {
        "cpu" => MetricType::Cpu,
        "memory" => MetricType::Memory,
        "query_latency" | "latency" => MetricType::QueryLatency,
        "connections" | "connection_count" => MetricType::Connections,
        "throughput" | "transactions" => MetricType::Throughput,
        "custom" => MetricType::Custom,
        _ if raw.source.is_some() => MetricType::Custom,
        other => {
            return Err(SpecError::UnknownMetricType {
                role_group: role_group.to_string(),
                kind: other.to_string(),
            });
        }
    };

    let source = match raw.source {
        Some(src) => Some(parse_source(role_group, src)?),
        None if kind == MetricType::Custom => {
            return Err(SpecError::MissingSource {
                role_group: role_group.to_string(),
            });
        }
        None => None,
    };

    Ok(MetricConfig {
        kind,
        target: parse_target(kind, &raw.target),
        weight: parse_weight(role_group, &raw.weight),
        source,
    })
}

fn parse_source(role_group: &str, raw: RawMetricSource) -> Result<CustomSource, SpecError> {
    let kind = match raw.kind.trim().to_ascii_lowercase().as_str() {
        "prometheus" => SourceKind::Prometheus,
        other => {
            return Err(SpecError::UnknownSourceKind {
                role_group: role_group.to_string(),
                kind: other.to_string(),
            });
        }
    };
    Ok(CustomSource {
        kind,
        query: raw.query,
        server_url: raw.server_url.trim_end_matches('/').to_string(),
        fallback: raw.fallback,
    })
}

/// Parse a metric weight; anything unusable becomes `1.0`.
pub fn parse_weight(role_group: &str, raw: &str) -> f64 {
    match raw.trim().parse::<f64>() {
        Ok(w) if w.is_finite() && w >= 0.0 => w,
        _ => {
            warn!(%role_group, weight = %raw, "unparseable metric weight, using 1.0");
            1.0
        }
    }
}

/// Parse a metric target according to the metric's unit.
///
/// Ratios accept `0.7`, `70%` or `70` (values above 1 read as percent).
/// Latency accepts `250ms`, `2s`, `1m` or a bare number of milliseconds.
pub fn parse_target(kind: MetricType, raw: &str) -> MetricTarget {
    let s = raw.trim();
    let parsed = match kind {
        MetricType::Cpu | MetricType::Memory => parse_ratio(s),
        MetricType::QueryLatency => parse_millis(s),
        _ => s.parse::<f64>().ok(),
    };
    match parsed {
        Some(v) if v.is_finite() && v > 0.0 => MetricTarget::Value(v),
        _ => MetricTarget::Invalid(raw.to_string()),
    }
}

fn parse_ratio(s: &str) -> Option<f64> {
    if let Some(pct) = s.strip_suffix('%') {
        return pct.trim().parse::<f64>().ok().map(|p| p / 100.0);
    }
    let v = s.parse::<f64>().ok()?;
    Some(if v > 1.0 { v / 100.0 } else { v })
}

fn parse_millis(s: &str) -> Option<f64> {
    if let Some(ms) = s.strip_suffix("ms") {
        ms.trim().parse::<f64>().ok()
    } else if let Some(secs) = s.strip_suffix('s') {
        secs.trim().parse::<f64>().ok().map(|v| v * 1000.0)
    } else if let Some(mins) = s.strip_suffix('m') {
        mins.trim().parse::<f64>().ok().map(|v| v * 60_000.0)
    } else {
        s.parse::<f64>().ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"
namespace = "prod"
name = "graph"

[autoscaling]
enabled = true

[[autoscaling.roleGroups]]
name = "primary"
minReplicas = 3
maxReplicas = 7
quorumProtection = { enabled = true, minHealthyPrimaries = 2 }

[[autoscaling.roleGroups.metrics]]
type = "cpu"
target = "70%"
weight = "2"

[[autoscaling.roleGroups.metrics]]
type = "query_latency"
target = "250ms"

[[autoscaling.roleGroups]]
name = "secondary"
minReplicas = 1
maxReplicas = 9
zoneAware = { enabled = true, minReplicasPerZone = 1 }

[[autoscaling.roleGroups.metrics]]
type = "page_faults"
target = "0.8"
weight = "heavy"
source = { query = "rate(page_faults[5m])", serverUrl = "http://prom:9090/" }
"#;

    #[test]
    fn parses_sample_spec() {
        let raw: RawClusterSpec = toml::from_str(SAMPLE).unwrap();
        let spec = raw.into_spec(1000).unwrap();

        assert_eq!(spec.id, "prod/graph");
        assert!(spec.autoscaling.enabled);
        assert_eq!(spec.autoscaling.role_groups.len(), 2);

        let primary = spec.role_group("primary").unwrap();
        assert_eq!(primary.role, Role::Primary);
        assert_eq!(primary.metrics[0].target, MetricTarget::Value(0.7));
        assert_eq!(primary.metrics[0].weight, 2.0);
        assert_eq!(primary.metrics[1].target, MetricTarget::Value(250.0));
        assert_eq!(primary.metrics[1].weight, 1.0);
        assert_eq!(
            primary.active_quorum_protection().unwrap().min_healthy_primaries,
            2
        );

        let secondary = spec.role_group("secondary").unwrap();
        assert_eq!(secondary.role, Role::Secondary);
        assert_eq!(secondary.metrics[0].kind, MetricType::Custom);
        // "heavy" is not a number.
        assert_eq!(secondary.metrics[0].weight, 1.0);
        let source = secondary.metrics[0].source.as_ref().unwrap();
        assert_eq!(source.server_url, "http://prom:9090");
        assert_eq!(secondary.active_zone_aware().unwrap().min_replicas_per_zone, 1);
    }

    #[test]
    fn ratio_targets() {
        assert_eq!(parse_target(MetricType::Cpu, "0.7"), MetricTarget::Value(0.7));
        assert_eq!(parse_target(MetricType::Cpu, "70%"), MetricTarget::Value(0.7));
        assert_eq!(parse_target(MetricType::Memory, "80"), MetricTarget::Value(0.8));
    }

    #[test]
    fn latency_targets() {
        assert_eq!(
            parse_target(MetricType::QueryLatency, "250ms"),
            MetricTarget::Value(250.0)
        );
        assert_eq!(
            parse_target(MetricType::QueryLatency, "2s"),
            MetricTarget::Value(2000.0)
        );
        assert_eq!(
            parse_target(MetricType::QueryLatency, "100"),
            MetricTarget::Value(100.0)
        );
    }

    #[test]
    fn bad_targets_are_kept_invalid() {
        assert_eq!(
            parse_target(MetricType::Connections, "lots"),
            MetricTarget::Invalid("lots".to_string())
        );
        assert_eq!(
            parse_target(MetricType::Throughput, "-5"),
            MetricTarget::Invalid("-5".to_string())
        );
        assert_eq!(
            parse_target(MetricType::Connections, "0"),
            MetricTarget::Invalid("0".to_string())
        );
    }

    #[test]
    fn weight_defaults_to_one() {
        assert_eq!(parse_weight("g", "2.5"), 2.5);
        assert_eq!(parse_weight("g", ""), 1.0);
        assert_eq!(parse_weight("g", "-1"), 1.0);
        assert_eq!(parse_weight("g", "NaN"), 1.0);
    }

    fn group(name: &str, min: u32, max: u32) -> RawRoleGroup {
        RawRoleGroup {
            name: name.to_string(),
            role: None,
            enabled: true,
            min_replicas: min,
            max_replicas: max,
            metrics: Vec::new(),
            quorum_protection: None,
            zone_aware: None,
        }
    }

    fn cluster(groups: Vec<RawRoleGroup>) -> RawClusterSpec {
        RawClusterSpec {
            namespace: "default".to_string(),
            name: "c".to_string(),
            autoscaling: RawAutoscaling {
                enabled: true,
                role_groups: groups,
            },
        }
    }

    #[test]
    fn rejects_inverted_bounds() {
        let err = cluster(vec![group("primary", 5, 3)]).into_spec(0).unwrap_err();
        assert_eq!(
            err,
            SpecError::InvalidBounds {
                role_group: "primary".to_string(),
                min: 5,
                max: 3
            }
        );
    }

    #[test]
    fn rejects_duplicate_role_groups() {
        let err = cluster(vec![group("primary", 1, 3), group("primary", 1, 3)])
            .into_spec(0)
            .unwrap_err();
        assert_eq!(err, SpecError::DuplicateRoleGroup("primary".to_string()));
    }

    #[test]
    fn rejects_unknown_metric_without_source() {
        let mut g = group("secondary", 1, 3);
        g.metrics.push(RawMetricConfig {
            kind: "gc_pauses".to_string(),
            target: "1".to_string(),
            weight: "1".to_string(),
            source: None,
        });
        let err = cluster(vec![g]).into_spec(0).unwrap_err();
        assert!(matches!(err, SpecError::UnknownMetricType { .. }));
    }

    #[test]
    fn rejects_custom_without_source() {
        let mut g = group("secondary", 1, 3);
        g.metrics.push(RawMetricConfig {
            kind: "custom".to_string(),
            target: "1".to_string(),
            weight: "1".to_string(),
            source: None,
        });
        let err = cluster(vec![g]).into_spec(0).unwrap_err();
        assert!(matches!(err, SpecError::MissingSource { .. }));
    }

    #[test]
    fn explicit_role_overrides_name() {
        let mut g = group("voters", 3, 5);
        g.role = Some("Primary".to_string());
        let spec = cluster(vec![g, group("readers", 0, 4)]).into_spec(0).unwrap();
        assert_eq!(spec.autoscaling.role_groups[0].role, Role::Primary);
        assert_eq!(spec.autoscaling.role_groups[1].role, Role::Secondary);
    }

    #[test]
    fn rejects_empty_name() {
        let mut raw = cluster(Vec::new());
        raw.name = "  ".to_string();
        assert_eq!(raw.into_spec(0).unwrap_err(), SpecError::EmptyName);
    }
}
