//! The control loop: sample, aggregate, and on a sustained incident run
//! logs -> advisor -> decision -> gate -> alerts.
//!
//! Cycles run serially on one task. The tracker inside the aggregator is the
//! only state carried between cycles.

use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures::FutureExt;
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::advisor::{AdvisorError, ConfidenceDecision, RootCauseAdvisor};
use crate::alerts::{Alert, AlertDispatcher, AlertKind};
use crate::config::{AlertMode, Config};
use crate::detect::{CycleOutcome, IncidentSnapshot, IssueAggregator};
use crate::logs::{excerpt, LogSource, LOG_EXCERPT_MAX_CHARS};
use crate::metrics::MetricProvider;
use crate::remediation::{GateOutcome, GateReport, RemediationExecutor, RemediationGate};

/// External collaborators of the loop.
#[derive(Clone)]
pub struct Collaborators {
    pub provider: Arc<dyn MetricProvider>,
    pub advisor: Arc<dyn RootCauseAdvisor>,
    pub executor: Arc<dyn RemediationExecutor>,
    pub dispatcher: Arc<dyn AlertDispatcher>,
    pub logs: Arc<dyn LogSource>,
}

#[derive(Debug, Clone, Copy, Serialize)]
pub struct AlertDelivery {
    pub kind: AlertKind,
    pub delivered: bool,
}

/// What happened to an incident after detection.
#[derive(Debug, Clone, Serialize)]
pub struct IncidentResolution {
    pub decision: ConfidenceDecision,
    pub gate: GateReport,
    pub alerts: Vec<AlertDelivery>,
}

/// Result of one cycle.
#[derive(Debug, Clone, Serialize)]
pub struct CycleReport {
    pub started_at: DateTime<Utc>,
    pub outcome: CycleOutcome,
    pub resolution: Option<IncidentResolution>,
}

impl CycleReport {
    pub fn is_incident(&self) -> bool {
        matches!(self.outcome, CycleOutcome::Incident(_))
    }

    /// Human-readable status, produced for every cycle.
    pub fn status_line(&self) -> String {
        match &self.resolution {
            None => self.outcome.status_line(),
            Some(res) => format!(
                "{}; decision {}/{} ({}); {}",
                self.outcome.status_line(),
                res.decision.confidence,
                res.decision.recommendation,
                res.decision.reason,
                res.gate.outcome.summary()
            ),
        }
    }
}

pub struct Monitor {
    aggregator: IssueAggregator,
    collab: Collaborators,
    gate: RemediationGate,
    interval: Duration,
    log_window: Duration,
    advisor_timeout: Duration,
    alert_mode: AlertMode,
}

impl Monitor {
    pub fn new(config: &Config, collab: Collaborators) -> Self {
        let gate = RemediationGate::new(
            collab.executor.clone(),
            collab.provider.clone(),
            config.remediation.service.clone(),
            config.remediation.settle(),
        );
        Self {
            aggregator: IssueAggregator::new(
                config.thresholds.clone(),
                config.detection.sustain(),
            ),
            collab,
            gate,
            interval: config.monitor.interval(),
            log_window: config.logging.log_window(),
            advisor_timeout: config.advisor.timeout(),
            alert_mode: config.alerts.mode,
        }
    }

    pub fn aggregator(&self) -> &IssueAggregator {
        &self.aggregator
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Run a single cycle to completion.
    pub async fn run_once(&mut self) -> CycleReport {
        let started_at = Utc::now();
        let snapshot = self.collab.provider.snapshot().await;
        // tokio's clock so paused-time tests advance the tracker too
        let now = tokio::time::Instant::now().into_std();
        let outcome = self.aggregator.evaluate(snapshot, now);

        let resolution = match &outcome {
            CycleOutcome::Incident(incident) => Some(self.handle_incident(incident).await),
            CycleOutcome::Tracking { tracking, .. } => {
                for t in tracking {
                    debug!(
                        metric = t.metric.name(),
                        value = t.value,
                        threshold = t.threshold,
                        over_for_secs = t.over_for_secs,
                        "tracking spike"
                    );
                }
                None
            }
            CycleOutcome::Normal { .. } => None,
        };

        CycleReport {
            started_at,
            outcome,
            resolution,
        }
    }

    async fn handle_incident(&self, incident: &IncidentSnapshot) -> IncidentResolution {
        warn!(
            alert_type = "incident",
            incident_id = %incident.id,
            issues = %incident.issue_labels(),
            sustained = %incident.durations_summary(),
            metrics = %incident.metrics.summary(),
            "incident detected"
        );

        let decision = self.decide(incident).await;
        info!(
            alert_type = "decision",
            incident_id = %incident.id,
            confidence = %decision.confidence,
            recommendation = %decision.recommendation,
            reason = %decision.reason,
            auto_remediate = decision.should_auto_remediate(),
            "decision parsed"
        );

        let mut alerts = Vec::new();
        if self.alert_mode == AlertMode::Separate {
            alerts.push(
                self.deliver(Alert::Incident {
                    incident: incident.clone(),
                    decision: decision.clone(),
                })
                .await,
            );
        }

        let gate = self.gate.resolve(incident, &decision).await;
        let summary = gate.outcome.summary();
        match &gate.outcome {
            GateOutcome::Remediated(attempt) => info!(
                alert_type = "remediation",
                incident_id = %incident.id,
                status = %attempt.status,
                action = %attempt.action_description,
                "{}",
                summary
            ),
            GateOutcome::Escalated { .. } => warn!(
                alert_type = "escalation",
                incident_id = %incident.id,
                confidence = %decision.confidence,
                "{}",
                summary
            ),
        }

        match self.alert_mode {
            AlertMode::Comprehensive => alerts.push(
                self.deliver(Alert::ComprehensiveIncident {
                    incident: incident.clone(),
                    decision: decision.clone(),
                    service: self.gate.service().to_string(),
                    outcome: gate.outcome.clone(),
                })
                .await,
            ),
            AlertMode::Separate => {
                if gate.outcome.attempt().is_some() {
                    alerts.push(
                        self.deliver(Alert::Remediation {
                            incident_id: incident.id,
                            service: self.gate.service().to_string(),
                            outcome: gate.outcome.clone(),
                        })
                        .await,
                    );
                }
            }
        }

        IncidentResolution {
            decision,
            gate,
            alerts,
        }
    }

    /// Logs, advisor and parser. Any failure along the way yields a
    /// decision that escalates.
    async fn decide(&self, incident: &IncidentSnapshot) -> ConfidenceDecision {
        let logs = match self.collab.logs.fetch_recent(self.log_window).await {
            Ok(text) => text,
            Err(e) => {
                warn!(incident_id = %incident.id, error = %e, "log excerpt unavailable");
                String::new()
            }
        };
        let log_excerpt = excerpt(&logs, LOG_EXCERPT_MAX_CHARS);

        let analysis = tokio::time::timeout(
            self.advisor_timeout,
            self.collab
                .advisor
                .analyze(&incident.metrics, &incident.issues, log_excerpt),
        )
        .await
        .unwrap_or_else(|_| Err(AdvisorError::Timeout(self.advisor_timeout.as_secs())));

        match analysis {
            Ok(raw) => ConfidenceDecision::parse(&raw),
            Err(e) => {
                error!(incident_id = %incident.id, error = %e, "root cause analysis failed");
                ConfidenceDecision::advisor_failed(&e.to_string())
            }
        }
    }

    async fn deliver(&self, alert: Alert) -> AlertDelivery {
        let kind = alert.kind();
        let delivered = match self.collab.dispatcher.dispatch(&alert).await {
            Ok(sent) => sent,
            Err(e) => {
                warn!(
                    alert_type = kind.as_str(),
                    incident_id = %alert.incident_id(),
                    error = %e,
                    "alert delivery failed"
                );
                false
            }
        };
        AlertDelivery { kind, delivered }
    }

    /// Run cycles until `cancel` fires.
    ///
    /// A cycle is never interrupted; cancellation is observed while
    /// sleeping between cycles. A panicking cycle is logged and the loop
    /// carries on.
    pub async fn run(mut self, cancel: CancellationToken) {
        info!(
            interval_secs = self.interval.as_secs(),
            sustain_secs = self.aggregator.tracker().sustain().as_secs(),
            service = %self.gate.service(),
            "monitor started"
        );

        while !cancel.is_cancelled() {
            match AssertUnwindSafe(self.run_once()).catch_unwind().await {
                Ok(report) => info!(incident = report.is_incident(), "{}", report.status_line()),
                Err(panic) => error!(reason = %panic_message(&panic), "cycle aborted"),
            }

            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = tokio::time::sleep(self.interval) => {}
            }
        }

        info!("monitor stopped");
    }
}

fn panic_message(panic: &Box<dyn std::any::Any + Send>) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::alerts::DispatchError;
    use crate::logs::LogError;
    use crate::metrics::{MetricKind, MetricReading, MetricSnapshot};
    use crate::remediation::{ExecutionStatus, RemediationError};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    struct FixedProvider(f64);

    #[async_trait::async_trait]
    impl MetricProvider for FixedProvider {
        async fn snapshot(&self) -> MetricSnapshot {
            MetricSnapshot::new([
                MetricReading::new(MetricKind::Cpu, self.0),
                MetricReading::new(MetricKind::Memory, 10.0),
                MetricReading::new(MetricKind::Disk, 10.0),
                MetricReading::new(MetricKind::Network, 1.0),
            ])
        }
    }

    struct CannedAdvisor {
        text: String,
        calls: AtomicUsize,
        seen_excerpt_len: Mutex<Option<usize>>,
    }

    #[async_trait::async_trait]
    impl RootCauseAdvisor for CannedAdvisor {
        async fn analyze(
            &self,
            _metrics: &MetricSnapshot,
            _issues: &[MetricKind],
            log_excerpt: &str,
        ) -> Result<String, AdvisorError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            *self.seen_excerpt_len.lock().unwrap() = Some(log_excerpt.chars().count());
            Ok(self.text.clone())
        }
    }

    struct OkExecutor(AtomicUsize);

    #[async_trait::async_trait]
    impl RemediationExecutor for OkExecutor {
        async fn restart(&self, _service: &str) -> Result<ExecutionStatus, RemediationError> {
            self.0.fetch_add(1, Ordering::SeqCst);
            Ok(ExecutionStatus {
                success: true,
                exit_code: Some(0),
                message: "restarted".into(),
            })
        }

        async fn status(&self, _service: &str) -> Result<String, RemediationError> {
            Ok("active".into())
        }
    }

    #[derive(Default)]
    struct Recorder(Mutex<Vec<AlertKind>>);

    #[async_trait::async_trait]
    impl AlertDispatcher for Recorder {
        async fn dispatch(&self, alert: &Alert) -> Result<bool, DispatchError> {
            self.0.lock().unwrap().push(alert.kind());
            Ok(true)
        }
    }

    struct LongLogs;

    #[async_trait::async_trait]
    impl LogSource for LongLogs {
        async fn fetch_recent(&self, _window: Duration) -> Result<String, LogError> {
            Ok("x".repeat(2_000))
        }
    }

    struct Harness {
        monitor: Monitor,
        advisor: Arc<CannedAdvisor>,
        executor: Arc<OkExecutor>,
        alerts: Arc<Recorder>,
    }

    fn harness(cpu: f64, advisor_text: &str, mode: AlertMode) -> Harness {
        let mut config = Config::default();
        config.thresholds.cpu_percent = 80.0;
        config.detection.sustain_secs = 30;
        config.monitor.interval_secs = 10;
        config.remediation.settle_secs = 5;
        config.alerts.mode = mode;

        let advisor = Arc::new(CannedAdvisor {
            text: advisor_text.to_string(),
            calls: AtomicUsize::new(0),
            seen_excerpt_len: Mutex::new(None),
        });
        let executor = Arc::new(OkExecutor(AtomicUsize::new(0)));
        let alerts = Arc::new(Recorder::default());
        let monitor = Monitor::new(
            &config,
            Collaborators {
                provider: Arc::new(FixedProvider(cpu)),
                advisor: advisor.clone(),
                executor: executor.clone(),
                dispatcher: alerts.clone(),
                logs: Arc::new(LongLogs),
            },
        );
        Harness {
            monitor,
            advisor,
            executor,
            alerts,
        }
    }

    const CONFIDENT: &str = "Runaway container.\nCONFIDENCE: High\nRECOMMENDATION: AUTO_REMEDIATE\nREASON: known leak";

    #[tokio::test]
    async fn test_normal_cycle_skips_advisor() {
        let mut h = harness(20.0, CONFIDENT, AlertMode::Comprehensive);
        let report = h.monitor.run_once().await;
        assert!(!report.is_incident());
        assert!(report.status_line().starts_with("All systems normal"));
        assert_eq!(h.advisor.calls.load(Ordering::SeqCst), 0);
        assert!(h.alerts.0.lock().unwrap().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_sustained_spike_remediates_once_per_cycle() {
        let mut h = harness(95.0, CONFIDENT, AlertMode::Comprehensive);

        let first = h.monitor.run_once().await;
        assert!(first.status_line().starts_with("Tracking: CPU"));

        tokio::time::advance(Duration::from_secs(31)).await;
        let second = h.monitor.run_once().await;
        assert!(second.is_incident());
        let line = second.status_line();
        assert!(line.contains("Remediation succeeded"), "{}", line);
        assert_eq!(h.executor.0.load(Ordering::SeqCst), 1);
        assert_eq!(
            *h.alerts.0.lock().unwrap(),
            vec![AlertKind::ComprehensiveIncident]
        );
        assert_eq!(
            *h.advisor.seen_excerpt_len.lock().unwrap(),
            Some(LOG_EXCERPT_MAX_CHARS)
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_separate_mode_escalation_sends_only_incident_alert() {
        let mut h = harness(95.0, "CONFIDENCE: Low\nRECOMMENDATION: HUMAN_INTERVENTION", AlertMode::Separate);
        h.monitor.run_once().await;
        tokio::time::advance(Duration::from_secs(40)).await;
        let report = h.monitor.run_once().await;

        assert!(report.status_line().contains("Escalated"));
        assert_eq!(h.executor.0.load(Ordering::SeqCst), 0);
        assert_eq!(*h.alerts.0.lock().unwrap(), vec![AlertKind::Incident]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_separate_mode_remediation_sends_both_alerts_in_order() {
        let mut h = harness(95.0, CONFIDENT, AlertMode::Separate);
        h.monitor.run_once().await;
        tokio::time::advance(Duration::from_secs(40)).await;
        h.monitor.run_once().await;

        assert_eq!(
            *h.alerts.0.lock().unwrap(),
            vec![AlertKind::Incident, AlertKind::Remediation]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_stops_on_cancel() {
        let h = harness(20.0, CONFIDENT, AlertMode::Comprehensive);
        let cancel = CancellationToken::new();
        let handle = tokio::spawn(h.monitor.run(cancel.clone()));

        tokio::time::sleep(Duration::from_secs(25)).await;
        cancel.cancel();
        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .expect("loop did not stop")
            .unwrap();
    }

    #[test]
    fn test_panic_message() {
        let boxed: Box<dyn std::any::Any + Send> = Box::new("boom");
        assert_eq!(panic_message(&boxed), "boom");
        let boxed: Box<dyn std::any::Any + Send> = Box::new(String::from("bang"));
        assert_eq!(panic_message(&boxed), "bang");
    }
}
