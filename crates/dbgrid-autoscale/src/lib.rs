//! dbgrid-autoscale: the autoscaling control loop.
//!
//! Each reconciliation pass collects a fresh [`ClusterMetrics`] snapshot,
//! fuses the weighted per-metric scores of every role group into a single
//! [`ScalingDecision`], filters it through the safety constraints and
//! writes the resulting replica count back to the role group's scalable
//! resource.
//!
//! # Pipeline
//!
//! ```text
//! AutoScaler::reconcile(cluster)
//!   ├── MetricsCollector::collect()          → ClusterMetrics
//!   └── per role group (primaries first):
//!         disabled?                          → Disabled
//!         healthy primaries < floor?         → QuorumFloor
//!         ScaleDecisionEngine                → ScalingDecision (±1)
//!         action == None                     → Hold
//!         clamp [min, max], odd primaries
//!         (primaries, secondaries) invalid?  → TopologyRejected
//!         zone distribution (zone-aware)
//!         unchanged?                         → Unchanged
//!         ScaleTarget::write()               → Scaled
//! ```
//!
//! The fused score only looks at current readings against targets.
//! Trends are shown in the reason text.
//!
//! [`ClusterMetrics`]: dbgrid_metrics::ClusterMetrics

pub mod constraints;
pub mod decision;
pub mod engine;
pub mod error;
pub mod scaler;
pub mod target;

pub use decision::{ScaleAction, ScalingDecision};
pub use engine::{MetricScore, ScaleDecisionEngine};
pub use error::{ReconcileError, RoleGroupFailure, ScaleError, ScaleResult};
pub use scaler::{AutoScaler, AutoscaleConfig, ReconcileReport, RoleGroupOutcome};
pub use target::{ScaleTarget, TargetFuture};
