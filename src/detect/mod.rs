//! Sustained-spike detection and per-cycle issue aggregation.

pub mod aggregator;
pub mod tracker;

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::metrics::{MetricKind, MetricSnapshot};

pub use aggregator::IssueAggregator;
pub use tracker::SpikeTracker;

/// A metric over threshold whose run has not lasted long enough yet.
#[derive(Debug, Clone, Serialize)]
pub struct TrackedMetric {
    pub metric: MetricKind,
    pub value: f64,
    pub threshold: f64,
    pub over_for_secs: u64,
}

/// Everything known about a cycle in which at least one metric was
/// sustained over its threshold.
#[derive(Debug, Clone, Serialize)]
pub struct IncidentSnapshot {
    pub id: uuid::Uuid,
    pub detected_at: DateTime<Utc>,
    pub metrics: MetricSnapshot,
    /// Sustained metrics, in evaluation order.
    pub issues: Vec<MetricKind>,
    pub sustained_durations: BTreeMap<MetricKind, u64>,
    /// Metrics over threshold in the same cycle but not yet sustained.
    pub tracking: Vec<TrackedMetric>,
}

impl IncidentSnapshot {
    /// `"CPU, Disk"`
    pub fn issue_labels(&self) -> String {
        self.issues
            .iter()
            .map(|m| m.label())
            .collect::<Vec<_>>()
            .join(", ")
    }

    /// `"CPU sustained 42s, Disk sustained 31s"`
    pub fn durations_summary(&self) -> String {
        self.issues
            .iter()
            .map(|m| {
                let secs = self.sustained_durations.get(m).copied().unwrap_or(0);
                format!("{} sustained {}s", m.label(), secs)
            })
            .collect::<Vec<_>>()
            .join(", ")
    }
}

/// Result of aggregating one cycle's snapshot. Exactly one per cycle.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum CycleOutcome {
    Normal {
        snapshot: MetricSnapshot,
    },
    Tracking {
        snapshot: MetricSnapshot,
        tracking: Vec<TrackedMetric>,
    },
    Incident(IncidentSnapshot),
}

impl CycleOutcome {
    pub fn snapshot(&self) -> &MetricSnapshot {
        match self {
            CycleOutcome::Normal { snapshot } => snapshot,
            CycleOutcome::Tracking { snapshot, .. } => snapshot,
            CycleOutcome::Incident(incident) => &incident.metrics,
        }
    }

    /// One-line status for the non-incident outcomes.
    pub fn status_line(&self) -> String {
        match self {
            CycleOutcome::Normal { snapshot } => {
                format!("All systems normal ({})", snapshot.summary())
            }
            CycleOutcome::Tracking { tracking, .. } => {
                let parts: Vec<String> = tracking
                    .iter()
                    .map(|t| {
                        format!(
                            "{} {:.2}{} over {}{} (tracking {}s)",
                            t.metric.label(),
                            t.value,
                            t.metric.unit(),
                            t.threshold,
                            t.metric.unit(),
                            t.over_for_secs
                        )
                    })
                    .collect();
                format!("Tracking: {}", parts.join(", "))
            }
            CycleOutcome::Incident(incident) => {
                format!("Incident detected: {}", incident.durations_summary())
            }
        }
    }
}
