//! dbgridd.toml configuration.
//!
//! Every field has a default, so a missing file or an empty one is a valid
//! configuration. Durations are written as `"500ms"`, `"30s"`, `"5m"` or
//! `"1h"`; a bare number is seconds.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, bail};
use serde::{Deserialize, Deserializer};

use dbgrid_autoscale::AutoscaleConfig;
use dbgrid_metrics::{CollectorConfig, FallbackTable, FallbackValues, PrometheusSource};

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct OperatorConfig {
    /// Time between reconciliation passes.
    #[serde(deserialize_with = "duration")]
    pub reconcile_interval: Duration,
    /// Directory holding the state database.
    pub data_dir: PathBuf,
    pub metrics: MetricsConfig,
    pub autoscale: AutoscaleConfig,
}

impl Default for OperatorConfig {
    fn default() -> Self {
        Self {
            reconcile_interval: Duration::from_secs(30),
            data_dir: PathBuf::from("/var/lib/dbgrid"),
            metrics: MetricsConfig::default(),
            autoscale: AutoscaleConfig::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct MetricsConfig {
    /// Timeout of one custom metric query.
    #[serde(deserialize_with = "duration")]
    pub query_timeout: Duration,
    #[serde(deserialize_with = "duration")]
    pub slow_query_threshold: Duration,
    /// Collector values used while the database is unreachable.
    pub fallbacks: FallbackValues,
    /// Custom metric values used while the metrics backend is unreachable.
    pub custom_fallbacks: FallbackTable,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            query_timeout: Duration::from_secs(30),
            slow_query_threshold: Duration::from_secs(1),
            fallbacks: FallbackValues::default(),
            custom_fallbacks: FallbackTable::default(),
        }
    }
}

impl MetricsConfig {
    pub fn collector_config(&self) -> CollectorConfig {
        CollectorConfig {
            slow_query_threshold: self.slow_query_threshold,
            fallbacks: self.fallbacks.clone(),
        }
    }

    pub fn metric_source(&self) -> PrometheusSource {
        PrometheusSource::new()
            .with_timeout(self.query_timeout)
            .with_fallbacks(self.custom_fallbacks.clone())
    }
}

impl OperatorConfig {
    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("reading {}", path.display()))?;
        let config: OperatorConfig =
            toml::from_str(&content).with_context(|| format!("parsing {}", path.display()))?;
        Ok(config)
    }

    /// Load `path` if given, defaults otherwise.
    pub fn load(path: Option<&Path>) -> anyhow::Result<Self> {
        match path {
            Some(path) => Self::from_file(path),
            None => Ok(Self::default()),
        }
    }

    pub fn db_path(&self) -> PathBuf {
        self.data_dir.join("dbgrid.redb")
    }
}

/// Parse a duration like `"250ms"`, `"30s"`, `"5m"`, `"1h"` or `"45"`.
pub fn parse_duration(s: &str) -> anyhow::Result<Duration> {
    let s = s.trim();
    let (number, unit_ms) = if let Some(ms) = s.strip_suffix("ms") {
        (ms, 1)
    } else if let Some(secs) = s.strip_suffix('s') {
        (secs, 1_000)
    } else if let Some(mins) = s.strip_suffix('m') {
        (mins, 60_000)
    } else if let Some(hours) = s.strip_suffix('h') {
        (hours, 3_600_000)
    } else {
        (s, 1_000)
    };

    let value: u64 = match number.trim().parse() {
        Ok(v) => v,
        Err(_) => bail!("invalid duration {s:?}"),
    };
    let millis = value
        .checked_mul(unit_ms)
        .with_context(|| format!("duration {s:?} out of range"))?;
    Ok(Duration::from_millis(millis))
}

fn duration<'de, D>(deserializer: D) -> Result<Duration, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = String::deserialize(deserializer)?;
    parse_duration(&raw).map_err(serde::de::Error::custom)
}
