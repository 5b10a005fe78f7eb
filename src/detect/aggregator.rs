use std::collections::BTreeMap;
use std::time::{Duration, Instant};

use chrono::Utc;
use uuid::Uuid;

use super::tracker::SpikeTracker;
use super::{CycleOutcome, IncidentSnapshot, TrackedMetric};
use crate::config::ThresholdConfig;
use crate::metrics::{MetricKind, MetricSnapshot};

/// Runs the spike tracker over every metric of a snapshot and classifies
/// the cycle.
pub struct IssueAggregator {
    thresholds: ThresholdConfig,
    tracker: SpikeTracker,
}

impl IssueAggregator {
    pub fn new(thresholds: ThresholdConfig, sustain: Duration) -> Self {
        Self {
            thresholds,
            tracker: SpikeTracker::new(sustain),
        }
    }

    pub fn tracker(&self) -> &SpikeTracker {
        &self.tracker
    }

    pub fn tracker_mut(&mut self) -> &mut SpikeTracker {
        &mut self.tracker
    }

    pub fn thresholds(&self) -> &ThresholdConfig {
        &self.thresholds
    }

    /// Evaluate every metric exactly once, in `MetricKind::ALL` order.
    ///
    /// Each per-metric transition is a single insert or remove on the
    /// tracker, so the state is consistent between any two metrics.
    pub fn evaluate(&mut self, snapshot: MetricSnapshot, now: Instant) -> CycleOutcome {
        let mut issues = Vec::new();
        let mut sustained_durations = BTreeMap::new();
        let mut tracking = Vec::new();

        for metric in MetricKind::ALL {
            let threshold = self.thresholds.for_metric(metric);
            // Unavailable probes read as NaN, which is never over threshold.
            let value = snapshot.value(metric).unwrap_or(f64::NAN);
            let sustained = self.tracker.evaluate(metric.name(), value, threshold, now);
            let over_for = self.tracker.duration_over(metric.name(), now);

            if sustained {
                issues.push(metric);
                sustained_durations.insert(metric, over_for.as_secs());
            } else if self.tracker.is_tracking(metric.name()) {
                tracking.push(TrackedMetric {
                    metric,
                    value,
                    threshold,
                    over_for_secs: over_for.as_secs(),
                });
            }
        }

        if !issues.is_empty() {
            CycleOutcome::Incident(IncidentSnapshot {
                id: Uuid::new_v4(),
                detected_at: Utc::now(),
                metrics: snapshot,
                issues,
                sustained_durations,
                tracking,
            })
        } else if !tracking.is_empty() {
            CycleOutcome::Tracking { snapshot, tracking }
        } else {
            CycleOutcome::Normal { snapshot }
        }
    }
}
