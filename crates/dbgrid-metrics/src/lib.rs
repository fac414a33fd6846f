//! dbgrid-metrics: telemetry for the autoscaling control loop.
//!
//! Builds a fresh [`ClusterMetrics`] snapshot per reconciliation tick from
//! the platform's replica records and the managed database's status
//! queries, and answers operator-defined custom metrics from a
//! Prometheus-compatible backend.
//!
//! # Architecture
//!
//! ```text
//! MetricsCollector
//!   ├── StateStore        ← replica enumeration, requests, usage
//!   ├── DatabaseClient    ← connections, transactions, running queries
//!   └── collect() → ClusterMetrics (immutable, never cached)
//!
//! PrometheusSource (MetricSource)
//!   └── query() → f64, fallback value when the backend is unreachable
//! ```
//!
//! Telemetry unavailability is never an error: every signal has a
//! documented fallback so the loop keeps running in degraded mode.

pub mod collector;
pub mod database;
pub mod error;
pub mod fallback;
pub mod remote;
pub mod snapshot;

pub use collector::{CollectorConfig, MetricsCollector};
pub use database::{DatabaseClient, DatabaseError, OfflineDatabase, QueryResult, QueryTarget};
pub use error::{MetricsError, MetricsResult};
pub use fallback::{FallbackRule, FallbackTable, FallbackValues};
pub use remote::{MetricFuture, MetricSource, PrometheusSource, RemoteMetricError};
pub use snapshot::{
    ClusterMetrics, MetricValue, QueryMetrics, RoleGroupMetrics, SystemMetrics, Trend,
};
