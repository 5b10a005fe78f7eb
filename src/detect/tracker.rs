use std::collections::HashMap;
use std::time::{Duration, Instant};

/// Per-metric hysteresis state.
///
/// A metric name is present in `started` iff its current run of
/// over-threshold samples began at the stored instant and has not been
/// interrupted by an under-threshold sample. `evaluate` is the only mutator
/// apart from `reset`.
#[derive(Debug, Clone)]
pub struct SpikeTracker {
    sustain: Duration,
    started: HashMap<String, Instant>,
}

impl SpikeTracker {
    pub fn new(sustain: Duration) -> Self {
        Self {
            sustain,
            started: HashMap::new(),
        }
    }

    pub fn sustain(&self) -> Duration {
        self.sustain
    }

    /// Feed one sample and return whether the metric is now sustained.
    ///
    /// Over threshold means strictly greater: a value equal to the threshold
    /// is not a spike, and neither is NaN (an unavailable reading). The first
    /// over-threshold sample only starts the timer, so it is never sustained
    /// by itself.
    pub fn evaluate(&mut self, metric: &str, value: f64, threshold: f64, now: Instant) -> bool {
        if !(value > threshold) {
            self.started.remove(metric);
            return false;
        }

        match self.started.get(metric) {
            None => {
                self.started.insert(metric.to_string(), now);
                false
            }
            Some(start) => now.saturating_duration_since(*start) >= self.sustain,
        }
    }

    /// Time since `metric` went over threshold, zero if it is not tracked.
    pub fn duration_over(&self, metric: &str, now: Instant) -> Duration {
        self.started
            .get(metric)
            .map(|start| now.saturating_duration_since(*start))
            .unwrap_or_default()
    }

    pub fn is_tracking(&self, metric: &str) -> bool {
        self.started.contains_key(metric)
    }

    pub fn tracked_count(&self) -> usize {
        self.started.len()
    }

    /// Forget every run in progress.
    pub fn reset(&mut self) {
        self.started.clear();
    }
}
