//! Degraded-mode values.
//!
//! [`FallbackValues`] feed the collector when the database cannot be
//! queried. [`FallbackTable`] answers custom metric queries when the
//! metrics backend cannot be reached, keyed by substring of the query
//! expression. Both are plain configuration and can be overridden.

use serde::{Deserialize, Serialize};

/// Values the collector substitutes for unavailable telemetry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FallbackValues {
    pub connections_current: f64,
    pub connections_previous: f64,
    pub throughput_current: f64,
    pub throughput_previous: f64,
    pub average_latency_ms: u64,
    pub p95_latency_ms: u64,
    pub load_average: f64,
    pub disk_usage: f64,
    pub network_latency_ms: u64,
}

impl Default for FallbackValues {
    fn default() -> Self {
        Self {
            connections_current: 100.0,
            connections_previous: 80.0,
            throughput_current: 50.0,
            throughput_previous: 45.0,
            average_latency_ms: 100,
            p95_latency_ms: 250,
            load_average: 0.5,
            disk_usage: 0.5,
            network_latency_ms: 10,
        }
    }
}

/// One substring rule of the custom-metric fallback table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FallbackRule {
    pub pattern: String,
    pub value: f64,
}

impl FallbackRule {
    pub fn new(pattern: &str, value: f64) -> Self {
        Self {
            pattern: pattern.to_string(),
            value,
        }
    }
}

/// Ordered substring rules; the first pattern found in the query wins.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FallbackTable {
    pub rules: Vec<FallbackRule>,
    pub default: f64,
}

impl Default for FallbackTable {
    fn default() -> Self {
        Self {
            rules: vec![
                FallbackRule::new("cpu", 0.65),
                FallbackRule::new("memory", 0.70),
                FallbackRule::new("connection", 45.0),
                FallbackRule::new("query", 18.5),
                FallbackRule::new("qps", 18.5),
                FallbackRule::new("throughput", 850.0),
            ],
            default: 0.5,
        }
    }
}

impl FallbackTable {
    /// Fallback value for a query expression (case-insensitive match).
    pub fn resolve(&self, expr: &str) -> f64 {
        let expr = expr.to_ascii_lowercase();
        self.rules
            .iter()
            .find(|rule| expr.contains(&rule.pattern.to_ascii_lowercase()))
            .map(|rule| rule.value)
            .unwrap_or(self.default)
    }
}
