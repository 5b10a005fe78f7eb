//! Metric acquisition: the fixed metric set, per-cycle snapshots, and the
//! provider boundary.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::Serialize;
use thiserror::Error;

pub mod local;
pub mod prometheus;

#[derive(Debug, Error)]
pub enum MetricsError {
    #[error("metrics query failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("metrics backend returned HTTP {0}")]
    Status(u16),
    #[error("unexpected metrics response: {0}")]
    Malformed(String),
}

/// The metrics watched every cycle.
///
/// `ALL` is the evaluation order used by the aggregator, so duration
/// messages come out the same way every cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum MetricKind {
    Cpu,
    Memory,
    Disk,
    Network,
}

impl MetricKind {
    pub const ALL: [MetricKind; 4] = [
        MetricKind::Cpu,
        MetricKind::Memory,
        MetricKind::Disk,
        MetricKind::Network,
    ];

    /// Key used by the spike tracker and in JSON payloads.
    pub fn name(&self) -> &'static str {
        match self {
            MetricKind::Cpu => "cpu",
            MetricKind::Memory => "memory",
            MetricKind::Disk => "disk",
            MetricKind::Network => "network",
        }
    }

    /// Human label used in alerts and status lines.
    pub fn label(&self) -> &'static str {
        match self {
            MetricKind::Cpu => "CPU",
            MetricKind::Memory => "Memory",
            MetricKind::Disk => "Disk",
            MetricKind::Network => "Network",
        }
    }

    pub fn unit(&self) -> &'static str {
        match self {
            MetricKind::Network => "Mbps",
            _ => "%",
        }
    }
}

impl std::fmt::Display for MetricKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.label())
    }
}

/// One instantaneous reading. `value` is `None` when the probe failed.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct MetricReading {
    pub metric: MetricKind,
    pub value: Option<f64>,
}

impl MetricReading {
    pub fn new(metric: MetricKind, value: f64) -> Self {
        Self {
            metric,
            value: Some(value),
        }
    }

    pub fn unavailable(metric: MetricKind) -> Self {
        Self {
            metric,
            value: None,
        }
    }

    pub fn name(&self) -> &'static str {
        self.metric.name()
    }

    pub fn unit(&self) -> &'static str {
        self.metric.unit()
    }

    pub fn is_available(&self) -> bool {
        self.value.is_some()
    }

    /// `"93.20%"`, `"12.50 Mbps"` or `"N/A"`.
    pub fn display_value(&self) -> String {
        match (self.value, self.metric) {
            (Some(v), MetricKind::Network) => format!("{:.2} Mbps", v),
            (Some(v), _) => format!("{:.2}%", v),
            (None, _) => "N/A".to_string(),
        }
    }
}

/// All readings taken in one cycle.
#[derive(Debug, Clone, Serialize)]
pub struct MetricSnapshot {
    pub taken_at: DateTime<Utc>,
    pub readings: BTreeMap<MetricKind, MetricReading>,
}

impl MetricSnapshot {
    pub fn new(readings: impl IntoIterator<Item = MetricReading>) -> Self {
        Self {
            taken_at: Utc::now(),
            readings: readings.into_iter().map(|r| (r.metric, r)).collect(),
        }
    }

    /// Snapshot where every metric is unavailable.
    pub fn unavailable() -> Self {
        Self::new(MetricKind::ALL.iter().map(|m| MetricReading::unavailable(*m)))
    }

    /// Reading for `metric`; a metric missing from the snapshot reads as
    /// unavailable.
    pub fn get(&self, metric: MetricKind) -> MetricReading {
        self.readings
            .get(&metric)
            .copied()
            .unwrap_or_else(|| MetricReading::unavailable(metric))
    }

    pub fn value(&self, metric: MetricKind) -> Option<f64> {
        self.get(metric).value
    }

    /// `cpu=93.20% memory=41.00% ...` in evaluation order.
    pub fn summary(&self) -> String {
        MetricKind::ALL
            .iter()
            .map(|m| format!("{}={}", m.name(), self.get(*m).display_value()))
            .collect::<Vec<_>>()
            .join(" ")
    }
}

/// Source of per-cycle metric snapshots.
///
/// Implementations never fail as a whole: a metric that cannot be read is
/// reported as unavailable and the rest of the snapshot is still returned.
#[async_trait::async_trait]
pub trait MetricProvider: Send + Sync {
    async fn snapshot(&self) -> MetricSnapshot;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_metric_reads_unavailable() {
        let snap = MetricSnapshot::new([MetricReading::new(MetricKind::Cpu, 12.0)]);
        assert_eq!(snap.value(MetricKind::Cpu), Some(12.0));
        assert!(!snap.get(MetricKind::Disk).is_available());
    }

    #[test]
    fn test_display_values() {
        assert_eq!(MetricReading::new(MetricKind::Cpu, 93.2).display_value(), "93.20%");
        assert_eq!(
            MetricReading::new(MetricKind::Network, 12.5).display_value(),
            "12.50 Mbps"
        );
        assert_eq!(MetricReading::unavailable(MetricKind::Disk).display_value(), "N/A");
    }

    #[test]
    fn test_summary_order_is_fixed() {
        let snap = MetricSnapshot::new([
            MetricReading::new(MetricKind::Network, 1.0),
            MetricReading::new(MetricKind::Cpu, 2.0),
        ]);
        assert_eq!(
            snap.summary(),
            "cpu=2.00% memory=N/A disk=N/A network=1.00 Mbps"
        );
    }
}
