//! End-to-end reconciliation passes against an in-memory state store.
//!
//! Covers the control-loop invariants (idempotence, odd primaries, viable
//! topology, bounds, single steps, zone sums) and the reference scenarios.

use std::sync::Arc;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;

use dbgrid_autoscale::{AutoScaler, RoleGroupOutcome, ScaleAction, ScaleDecisionEngine};
use dbgrid_metrics::{
    MetricFuture, MetricSource, MetricsCollector, OfflineDatabase, PrometheusSource,
    RemoteMetricError,
};
use dbgrid_state::*;

const CLUSTER: &str = "default/graph";

struct NoSource;

impl MetricSource for NoSource {
    fn query<'a>(&'a self, source: &'a CustomSource) -> MetricFuture<'a> {
        let query = source.query.clone();
        Box::pin(async move { Err(RemoteMetricError::NoData(query)) })
    }
}

// ── Fixtures ────────────────────────────────────────────────────────

fn metric(kind: MetricType, target: f64, weight: f64) -> MetricConfig {
    MetricConfig {
        kind,
        target: MetricTarget::Value(target),
        weight,
        source: None,
    }
}

fn group(name: &str, role: Role, min: u32, max: u32, metrics: Vec<MetricConfig>) -> RoleGroupSpec {
    RoleGroupSpec {
        name: name.to_string(),
        role,
        enabled: true,
        min_replicas: min,
        max_replicas: max,
        metrics,
        quorum_protection: None,
        zone_aware: None,
    }
}

fn cpu_group(name: &str, role: Role, min: u32, max: u32) -> RoleGroupSpec {
    group(name, role, min, max, vec![metric(MetricType::Cpu, 0.7, 1.0)])
}

fn cluster(groups: Vec<RoleGroupSpec>) -> ClusterSpec {
    ClusterSpec {
        id: CLUSTER.to_string(),
        namespace: "default".to_string(),
        name: "graph".to_string(),
        autoscaling: AutoscalingSpec {
            enabled: true,
            role_groups: groups,
        },
        created_at: 0,
        updated_at: 0,
    }
}

fn replica(role_group: &str, index: usize, zone: Option<&str>, cpu_millis: u64) -> ReplicaState {
    ReplicaState {
        id: format!("{role_group}-{index}"),
        cluster_id: CLUSTER.to_string(),
        role_group: role_group.to_string(),
        node_id: format!("node-{index}"),
        zone: zone.map(str::to_string),
        phase: ReplicaPhase::Running,
        ready: true,
        requests: ResourceRequests {
            cpu_millis: 1000,
            memory_bytes: 1 << 30,
        },
        usage: Some(ResourceUsage {
            cpu_millis,
            memory_bytes: 1 << 29,
            disk_usage_ratio: Some(0.3),
        }),
        started_at: 0,
        updated_at: 0,
    }
}

/// Seed a role group resource at `desired` with `replicas` ready replicas.
fn seed(state: &StateStore, role_group: &str, desired: u32, replicas: u32, cpu_millis: u64) {
    state
        .put_role_group(&RoleGroupResource::new(CLUSTER, role_group, desired))
        .unwrap();
    for i in 0..replicas as usize {
        state.put_replica(&replica(role_group, i, None, cpu_millis)).unwrap();
    }
}

fn autoscaler(state: &StateStore) -> AutoScaler {
    AutoScaler::new(state.clone(), Arc::new(OfflineDatabase), Arc::new(NoSource))
}

fn stored(state: &StateStore, role_group: &str) -> RoleGroupResource {
    state.require_role_group(CLUSTER, role_group).unwrap()
}

const HOT: u64 = 950;
const IDLE: u64 = 50;

// ── Invariants ──────────────────────────────────────────────────────

#[tokio::test]
async fn repeated_pass_is_idempotent() {
    let state = StateStore::open_in_memory().unwrap();
    seed(&state, "primary", 3, 3, 500);
    seed(&state, "secondary", 5, 5, HOT);
    let spec = cluster(vec![
        cpu_group("primary", Role::Primary, 1, 5),
        cpu_group("secondary", Role::Secondary, 1, 5),
    ]);

    // Same snapshot twice gives the same decision.
    let collector = MetricsCollector::new(state.clone(), Arc::new(OfflineDatabase));
    let snapshot = collector.collect(&spec).await.unwrap();
    let engine = ScaleDecisionEngine::new(Arc::new(NoSource));
    let secondary = spec.role_group("secondary").unwrap();
    let role_metrics = snapshot.role_group("secondary").unwrap();
    let first = engine.calculate_scaling(secondary, role_metrics, &snapshot).await;
    let second = engine.calculate_scaling(secondary, role_metrics, &snapshot).await;
    assert_eq!(first, second);
    assert_eq!(first.action, ScaleAction::Up);

    // Already at max: both passes are no-op writes.
    let scaler = autoscaler(&state);
    for _ in 0..2 {
        let report = scaler.reconcile(&spec).await.unwrap();
        assert_eq!(
            report.outcome("secondary"),
            Some(&RoleGroupOutcome::Unchanged { replicas: 5 })
        );
        assert_eq!(stored(&state, "secondary").resource_version, 1);
    }
}

#[tokio::test]
async fn primaries_stay_odd_within_bounds() {
    for min in 1..4u32 {
        for max in min..8u32 {
            for current in min..=max {
                for cpu in [HOT, IDLE] {
                    let state = StateStore::open_in_memory().unwrap();
                    seed(&state, "primary", current, current, cpu);
                    seed(&state, "secondary", 2, 2, 500);
                    let spec = cluster(vec![
                        cpu_group("primary", Role::Primary, min, max),
                        cpu_group("secondary", Role::Secondary, 1, 5),
                    ]);

                    let report = autoscaler(&state).reconcile(&spec).await.unwrap();
                    let applied = stored(&state, "primary").desired_replicas;
                    let odd_exists = (min..=max).any(|n| n % 2 == 1);

                    if let Some(RoleGroupOutcome::Scaled { to, .. }) = report.outcome("primary") {
                        assert_eq!(*to, applied);
                        assert!(applied >= min && applied <= max);
                        if odd_exists {
                            assert_eq!(applied % 2, 1, "min {min} max {max} current {current} -> {applied}");
                        }
                    }
                }
            }
        }
    }
}

#[tokio::test]
async fn quorum_break_allowed_keeps_even_targets() {
    let state = StateStore::open_in_memory().unwrap();
    seed(&state, "primary", 3, 3, HOT);
    seed(&state, "secondary", 1, 1, 500);
    let mut primary = cpu_group("primary", Role::Primary, 1, 7);
    primary.quorum_protection = Some(QuorumProtection {
        enabled: true,
        min_healthy_primaries: 1,
        allow_quorum_break: true,
    });
    let spec = cluster(vec![primary, cpu_group("secondary", Role::Secondary, 1, 5)]);

    autoscaler(&state).reconcile(&spec).await.unwrap();
    assert_eq!(stored(&state, "primary").desired_replicas, 4);
}

#[tokio::test]
async fn accepted_changes_keep_topology_viable() {
    for primaries in 1..=3u32 {
        for secondaries in 0..=2u32 {
            for (primary_cpu, secondary_cpu) in [(HOT, HOT), (IDLE, IDLE), (HOT, IDLE), (IDLE, HOT)] {
                let state = StateStore::open_in_memory().unwrap();
                seed(&state, "primary", primaries, primaries, primary_cpu);
                seed(&state, "secondary", secondaries, secondaries, secondary_cpu);
                let mut primary = cpu_group("primary", Role::Primary, 1, 5);
                primary.quorum_protection = Some(QuorumProtection {
                    enabled: true,
                    min_healthy_primaries: 0,
                    allow_quorum_break: true,
                });
                let spec = cluster(vec![primary, cpu_group("secondary", Role::Secondary, 0, 5)]);

                let report = autoscaler(&state).reconcile(&spec).await.unwrap();

                let p = stored(&state, "primary").desired_replicas;
                let s = stored(&state, "secondary").desired_replicas;
                if report.scaled() > 0 {
                    assert!(p >= 1, "{primaries}/{secondaries} -> {p}/{s}");
                    assert!(!(p == 1 && s == 0), "{primaries}/{secondaries} -> {p}/{s}");
                }
                for (_, outcome) in &report.outcomes {
                    if let RoleGroupOutcome::TopologyRejected { primaries, secondaries } = outcome {
                        assert!(*primaries < 1 || (*primaries == 1 && *secondaries == 0));
                    }
                }
            }
        }
    }
}

#[tokio::test]
async fn secondary_cannot_drop_to_zero_behind_single_primary() {
    let state = StateStore::open_in_memory().unwrap();
    seed(&state, "primary", 1, 1, 500);
    seed(&state, "secondary", 1, 1, IDLE);
    let spec = cluster(vec![
        cpu_group("primary", Role::Primary, 1, 5),
        cpu_group("secondary", Role::Secondary, 0, 5),
    ]);

    let report = autoscaler(&state).reconcile(&spec).await.unwrap();
    assert_eq!(
        report.outcome("secondary"),
        Some(&RoleGroupOutcome::TopologyRejected {
            primaries: 1,
            secondaries: 0
        })
    );
    assert_eq!(stored(&state, "secondary").resource_version, 1);
}

#[tokio::test]
async fn targets_respect_bounds_and_single_steps() {
    for min in 0..3u32 {
        for max in min.max(1)..6u32 {
            for current in 0..7u32 {
                for cpu in [HOT, IDLE] {
                    let state = StateStore::open_in_memory().unwrap();
                    seed(&state, "primary", 3, 3, 500);
                    seed(&state, "secondary", current, current, cpu);
                    let spec = cluster(vec![
                        cpu_group("primary", Role::Primary, 1, 5),
                        cpu_group("secondary", Role::Secondary, min, max),
                    ]);

                    let report = autoscaler(&state).reconcile(&spec).await.unwrap();
                    if let Some(RoleGroupOutcome::Scaled { from, to, reason, .. }) =
                        report.outcome("secondary")
                    {
                        assert!(*to >= min && *to <= max, "[{min},{max}] {from} -> {to}");
                        assert!(!reason.is_empty());
                        if (min..=max).contains(from) {
                            assert_eq!(from.abs_diff(*to), 1, "[{min},{max}] {from} -> {to}");
                        }
                    }
                }
            }
        }
    }
}

#[tokio::test]
async fn zone_distributions_cover_target_and_floor() {
    for replicas in 1..=6u32 {
        for min_per_zone in 0..=2u32 {
            let state = StateStore::open_in_memory().unwrap();
            seed(&state, "primary", 3, 3, 500);
            state
                .put_role_group(&RoleGroupResource::new(CLUSTER, "secondary", replicas))
                .unwrap();
            let zones = ["us-east-1a", "us-east-1b", "us-east-1c"];
            for i in 0..replicas as usize {
                state
                    .put_replica(&replica("secondary", i, Some(zones[i % 3]), HOT))
                    .unwrap();
            }
            let mut secondary = cpu_group("secondary", Role::Secondary, 1, 9);
            secondary.zone_aware = Some(ZoneAwareConfig {
                enabled: true,
                min_replicas_per_zone: min_per_zone,
            });
            let spec = cluster(vec![cpu_group("primary", Role::Primary, 1, 5), secondary]);

            autoscaler(&state).reconcile(&spec).await.unwrap();

            let resource = stored(&state, "secondary");
            let sum: u32 = resource.zone_replicas.values().sum();
            assert!(sum >= resource.desired_replicas);
            assert!(resource.zone_replicas.values().all(|&n| n >= min_per_zone));
        }
    }
}

// ── Scenarios ───────────────────────────────────────────────────────

#[tokio::test]
async fn mixed_signals_hold_until_cpu_weight_dominates() {
    // cpu 0.95 against 0.7, memory 0.5 against 0.8, connections from the
    // degraded-mode value 100 against 500. At weights 1/1/2 the fused score
    // stays below the scale-up threshold; only a dominant CPU weight scales.
    let run = |cpu_weight: f64| async move {
        let state = StateStore::open_in_memory().unwrap();
        seed(&state, "primary", 3, 3, 500);
        seed(&state, "secondary", 2, 2, HOT);
        let secondary = group(
            "secondary",
            Role::Secondary,
            1,
            5,
            vec![
                metric(MetricType::Cpu, 0.7, cpu_weight),
                metric(MetricType::Memory, 0.8, 1.0),
                metric(MetricType::Connections, 500.0, 2.0),
            ],
        );
        let spec = cluster(vec![cpu_group("primary", Role::Primary, 1, 5), secondary]);
        autoscaler(&state).reconcile(&spec).await.unwrap()
    };

    // Equal weighting fuses to (1.0 + 0.5 + 2 × 0.2) / 4 = 0.475.
    let even = run(1.0).await;
    assert!(matches!(even.outcome("secondary"), Some(RoleGroupOutcome::Hold { .. })));

    // CPU at weight 10: (10 + 0.5 + 0.4) / 13 ≈ 0.84.
    let heavy = run(10.0).await;
    match heavy.outcome("secondary") {
        Some(RoleGroupOutcome::Scaled {
            from,
            to,
            reason,
            confidence,
            ..
        }) => {
            assert_eq!((*from, *to), (2, 3));
            assert!(*confidence > 0.8);
            assert!(reason.contains("cpu 0.95 above target 0.70"));
            assert!(reason.contains("connections 100.00 well below target 500.00"));
        }
        other => panic!("expected scale up, got {other:?}"),
    }
}

#[tokio::test]
async fn quorum_floor_short_circuits() {
    let state = StateStore::open_in_memory().unwrap();
    state
        .put_role_group(&RoleGroupResource::new(CLUSTER, "primary", 3))
        .unwrap();
    for i in 0..3 {
        let mut r = replica("primary", i, None, IDLE);
        r.ready = i == 0;
        state.put_replica(&r).unwrap();
    }
    seed(&state, "secondary", 2, 2, 500);
    let mut primary = cpu_group("primary", Role::Primary, 1, 5);
    primary.quorum_protection = Some(QuorumProtection {
        enabled: true,
        min_healthy_primaries: 2,
        allow_quorum_break: false,
    });
    let spec = cluster(vec![primary, cpu_group("secondary", Role::Secondary, 1, 5)]);

    let report = autoscaler(&state).reconcile(&spec).await.unwrap();

    assert_eq!(
        report.outcome("primary"),
        Some(&RoleGroupOutcome::QuorumFloor {
            healthy: 1,
            required: 2
        })
    );
    assert_eq!(stored(&state, "primary").desired_replicas, 3);

    // The report is what `dbgridd evaluate` prints.
    let json = serde_json::to_value(&report).unwrap();
    assert_eq!(json["cluster_id"], CLUSTER);
    assert_eq!(json["dry_run"], false);
    assert_eq!(
        json["outcomes"][0],
        serde_json::json!(["primary", { "outcome": "quorum_floor", "healthy": 1, "required": 2 }])
    );
    assert!(json["degraded"].as_array().is_some_and(|d| !d.is_empty()));
}

#[tokio::test]
async fn seven_replicas_over_three_zones() {
    let state = StateStore::open_in_memory().unwrap();
    seed(&state, "primary", 3, 3, 500);
    // Eight configured, seven placed 2/2/3; idle load steps down to seven.
    state
        .put_role_group(&RoleGroupResource::new(CLUSTER, "secondary", 8))
        .unwrap();
    let placement = ["zone-a", "zone-a", "zone-b", "zone-b", "zone-c", "zone-c", "zone-c"];
    for (i, zone) in placement.iter().enumerate() {
        state.put_replica(&replica("secondary", i, Some(zone), IDLE)).unwrap();
    }
    let mut secondary = cpu_group("secondary", Role::Secondary, 1, 9);
    secondary.zone_aware = Some(ZoneAwareConfig {
        enabled: true,
        min_replicas_per_zone: 1,
    });
    let spec = cluster(vec![cpu_group("primary", Role::Primary, 1, 5), secondary]);

    autoscaler(&state).reconcile(&spec).await.unwrap();

    let resource = stored(&state, "secondary");
    assert_eq!(resource.desired_replicas, 7);
    assert_eq!(
        resource.zone_replicas,
        ZoneDistribution::from([
            ("zone-a".to_string(), 3),
            ("zone-b".to_string(), 2),
            ("zone-c".to_string(), 2),
        ])
    );
}

#[tokio::test]
async fn unreachable_metrics_backend_uses_fallback() {
    // Backend answering every request with HTTP 500.
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let server_url = format!("http://{}", listener.local_addr().unwrap());
    tokio::spawn(async move {
        while let Ok((mut socket, _)) = listener.accept().await {
            let mut buf = [0u8; 2048];
            let _ = socket.read(&mut buf).await;
            let _ = socket
                .write_all(b"HTTP/1.1 500 Internal Server Error\r\ncontent-length: 0\r\nconnection: close\r\n\r\n")
                .await;
            let _ = socket.shutdown().await;
        }
    });

    let state = StateStore::open_in_memory().unwrap();
    seed(&state, "primary", 3, 3, 500);
    seed(&state, "secondary", 2, 2, 500);
    let custom = MetricConfig {
        kind: MetricType::Custom,
        target: MetricTarget::Value(0.5),
        weight: 1.0,
        source: Some(CustomSource {
            kind: SourceKind::Prometheus,
            query: "avg(cpu_usage)".to_string(),
            server_url,
            fallback: None,
        }),
    };
    let spec = cluster(vec![
        cpu_group("primary", Role::Primary, 1, 5),
        group("secondary", Role::Secondary, 1, 5, vec![custom]),
    ]);
    let scaler = AutoScaler::new(
        state.clone(),
        Arc::new(OfflineDatabase),
        Arc::new(PrometheusSource::new()),
    );

    let report = scaler.reconcile(&spec).await.unwrap();

    // 0.65 against a 0.5 target reads as over target.
    match report.outcome("secondary") {
        Some(RoleGroupOutcome::Scaled { to, reason, .. }) => {
            assert_eq!(*to, 3);
            assert!(reason.contains("0.65"), "{reason}");
        }
        other => panic!("expected scale up, got {other:?}"),
    }
}
