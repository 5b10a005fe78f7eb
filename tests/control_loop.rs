//! End-to-end control loop scenarios with in-memory collaborators.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use opsguard::advisor::{AdvisorError, Confidence, Recommendation, RootCauseAdvisor};
use opsguard::alerts::slack::payload;
use opsguard::alerts::{Alert, AlertDispatcher, AlertKind, DispatchError};
use opsguard::config::{AlertMode, Config};
use opsguard::detect::CycleOutcome;
use opsguard::logs::{LogError, LogSource};
use opsguard::metrics::{MetricKind, MetricProvider, MetricReading, MetricSnapshot};
use opsguard::monitor::{Collaborators, Monitor};
use opsguard::remediation::{
    ExecutionStatus, GateOutcome, IncidentPhase, RemediationError, RemediationExecutor,
    RemediationStatus,
};
use serde_json::Value;
use tokio_util::sync::CancellationToken;

// ---------------------------------------------------------------------------
// Fakes
// ---------------------------------------------------------------------------

/// Serves queued CPU values, repeating the last one once the queue drains.
struct ScriptedProvider {
    cpu: Mutex<VecDeque<f64>>,
    last: Mutex<f64>,
    calls: AtomicUsize,
}

impl ScriptedProvider {
    fn new(values: &[f64]) -> Arc<Self> {
        Arc::new(Self {
            cpu: Mutex::new(values.iter().copied().collect()),
            last: Mutex::new(0.0),
            calls: AtomicUsize::new(0),
        })
    }
}

#[async_trait::async_trait]
impl MetricProvider for ScriptedProvider {
    async fn snapshot(&self) -> MetricSnapshot {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let mut last = self.last.lock().unwrap();
        if let Some(v) = self.cpu.lock().unwrap().pop_front() {
            *last = v;
        }
        MetricSnapshot::new([
            MetricReading::new(MetricKind::Cpu, *last),
            MetricReading::new(MetricKind::Memory, 40.0),
            MetricReading::unavailable(MetricKind::Disk),
            MetricReading::new(MetricKind::Network, 2.5),
        ])
    }
}

enum AdvisorScript {
    Reply(&'static str),
    Fail,
}

struct FakeAdvisor {
    script: AdvisorScript,
    calls: AtomicUsize,
}

impl FakeAdvisor {
    fn new(script: AdvisorScript) -> Arc<Self> {
        Arc::new(Self {
            script,
            calls: AtomicUsize::new(0),
        })
    }
}

#[async_trait::async_trait]
impl RootCauseAdvisor for FakeAdvisor {
    async fn analyze(
        &self,
        _metrics: &MetricSnapshot,
        issues: &[MetricKind],
        _log_excerpt: &str,
    ) -> Result<String, AdvisorError> {
        assert!(!issues.is_empty(), "advisor called without issues");
        self.calls.fetch_add(1, Ordering::SeqCst);
        match self.script {
            AdvisorScript::Reply(text) => Ok(text.to_string()),
            AdvisorScript::Fail => Err(AdvisorError::Status {
                status: 503,
                body: "overloaded".into(),
            }),
        }
    }
}

struct FakeExecutor {
    exit_code: i32,
    restarts: AtomicUsize,
}

impl FakeExecutor {
    fn new(exit_code: i32) -> Arc<Self> {
        Arc::new(Self {
            exit_code,
            restarts: AtomicUsize::new(0),
        })
    }
}

#[async_trait::async_trait]
impl RemediationExecutor for FakeExecutor {
    async fn restart(&self, service: &str) -> Result<ExecutionStatus, RemediationError> {
        self.restarts.fetch_add(1, Ordering::SeqCst);
        Ok(ExecutionStatus {
            success: self.exit_code == 0,
            exit_code: Some(self.exit_code),
            message: if self.exit_code == 0 {
                format!("{} restarted", service)
            } else {
                format!("Job for {}.service failed", service)
            },
        })
    }

    async fn status(&self, _service: &str) -> Result<String, RemediationError> {
        Ok(if self.exit_code == 0 { "active" } else { "failed" }.to_string())
    }
}

/// Records every alert; optionally fails each delivery.
struct RecordingDispatcher {
    fail: bool,
    sent: Mutex<Vec<Alert>>,
}

impl RecordingDispatcher {
    fn new(fail: bool) -> Arc<Self> {
        Arc::new(Self {
            fail,
            sent: Mutex::new(Vec::new()),
        })
    }

    fn kinds(&self) -> Vec<AlertKind> {
        self.sent.lock().unwrap().iter().map(|a| a.kind()).collect()
    }
}

#[async_trait::async_trait]
impl AlertDispatcher for RecordingDispatcher {
    async fn dispatch(&self, alert: &Alert) -> Result<bool, DispatchError> {
        self.sent.lock().unwrap().push(alert.clone());
        if self.fail {
            Err(DispatchError::Status(500))
        } else {
            Ok(true)
        }
    }
}

struct StaticLogs;

#[async_trait::async_trait]
impl LogSource for StaticLogs {
    async fn fetch_recent(&self, _window: Duration) -> Result<String, LogError> {
        Ok("kernel: dockerd[812]: high cpu in container api-7".into())
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

const CONFIDENT: &str = "A runaway container is saturating the CPU.\n\
                         CONFIDENCE: High\n\
                         RECOMMENDATION: AUTO_REMEDIATE\n\
                         REASON: container restarts resolve this pattern";

struct Rig {
    provider: Arc<ScriptedProvider>,
    advisor: Arc<FakeAdvisor>,
    executor: Arc<FakeExecutor>,
    dispatcher: Arc<RecordingDispatcher>,
    monitor: Monitor,
}

fn rig(
    cpu: &[f64],
    advisor: AdvisorScript,
    exit_code: i32,
    dispatch_fails: bool,
    mode: AlertMode,
) -> Rig {
    let mut config = Config::default();
    config.thresholds.cpu_percent = 90.0;
    config.detection.sustain_secs = 30;
    config.monitor.interval_secs = 10;
    config.remediation.service = "docker".into();
    config.remediation.settle_secs = 5;
    config.alerts.mode = mode;

    let provider = ScriptedProvider::new(cpu);
    let advisor = FakeAdvisor::new(advisor);
    let executor = FakeExecutor::new(exit_code);
    let dispatcher = RecordingDispatcher::new(dispatch_fails);

    let monitor = Monitor::new(
        &config,
        Collaborators {
            provider: provider.clone(),
            advisor: advisor.clone(),
            executor: executor.clone(),
            dispatcher: dispatcher.clone(),
            logs: Arc::new(StaticLogs),
        },
    );

    Rig {
        provider,
        advisor,
        executor,
        dispatcher,
        monitor,
    }
}

/// Cycles at t = 0, 10, 20 and 31 seconds; returns the reports in order.
async fn run_to_incident(rig: &mut Rig) -> Vec<opsguard::monitor::CycleReport> {
    let mut reports = Vec::new();
    for step in [0u64, 10, 10, 11] {
        tokio::time::advance(Duration::from_secs(step)).await;
        reports.push(rig.monitor.run_once().await);
    }
    reports
}

fn field<'a>(body: &'a Value, title: &str) -> Option<&'a Value> {
    body["attachments"][0]["fields"]
        .as_array()?
        .iter()
        .find(|f| f["title"] == title)
        .map(|f| &f["value"])
}

// ---------------------------------------------------------------------------
// Scenarios
// ---------------------------------------------------------------------------

#[tokio::test(start_paused = true)]
async fn test_sustained_cpu_spike_is_remediated() {
    let mut rig = rig(&[95.0], AdvisorScript::Reply(CONFIDENT), 0, false, AlertMode::Comprehensive);
    let reports = run_to_incident(&mut rig).await;

    for report in &reports[..3] {
        assert!(matches!(report.outcome, CycleOutcome::Tracking { .. }));
        assert!(report.resolution.is_none());
    }
    assert_eq!(rig.advisor.calls.load(Ordering::SeqCst), 1);

    let last = &reports[3];
    let CycleOutcome::Incident(incident) = &last.outcome else {
        panic!("expected an incident, got {:?}", last.outcome);
    };
    assert_eq!(incident.issues, vec![MetricKind::Cpu]);
    assert_eq!(incident.sustained_durations[&MetricKind::Cpu], 31);
    assert!(last.status_line().contains("CPU sustained 31s"));

    let res = last.resolution.as_ref().unwrap();
    assert_eq!(res.decision.confidence, Confidence::High);
    assert_eq!(res.decision.recommendation, Recommendation::AutoRemediate);
    assert_eq!(
        res.gate.phases,
        vec![
            IncidentPhase::Detected,
            IncidentPhase::Remediating,
            IncidentPhase::Verifying,
            IncidentPhase::Reported
        ]
    );
    let attempt = res.gate.outcome.attempt().unwrap();
    assert_eq!(attempt.status, RemediationStatus::Success);
    assert_eq!(attempt.service_state.as_deref(), Some("active"));

    assert_eq!(rig.executor.restarts.load(Ordering::SeqCst), 1);
    // four cycle samples plus one post-remediation sample
    assert_eq!(rig.provider.calls.load(Ordering::SeqCst), 5);
    assert_eq!(rig.dispatcher.kinds(), vec![AlertKind::ComprehensiveIncident]);
}

#[tokio::test(start_paused = true)]
async fn test_dip_below_threshold_restarts_the_clock() {
    let mut rig = rig(
        &[95.0, 95.0, 50.0, 95.0, 95.0],
        AdvisorScript::Reply(CONFIDENT),
        0,
        false,
        AlertMode::Comprehensive,
    );
    for _ in 0..5 {
        let report = rig.monitor.run_once().await;
        assert!(!report.is_incident(), "{}", report.status_line());
        tokio::time::advance(Duration::from_secs(15)).await;
    }
    assert_eq!(rig.advisor.calls.load(Ordering::SeqCst), 0);
    assert!(rig.dispatcher.kinds().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_low_confidence_escalates_without_restart() {
    let mut rig = rig(
        &[95.0],
        AdvisorScript::Reply("Unclear.\nCONFIDENCE: Low\nRECOMMENDATION: AUTO_REMEDIATE\nREASON: guess"),
        0,
        false,
        AlertMode::Comprehensive,
    );
    let reports = run_to_incident(&mut rig).await;
    let res = reports[3].resolution.as_ref().unwrap();

    assert!(matches!(res.gate.outcome, GateOutcome::Escalated { .. }));
    assert_eq!(rig.executor.restarts.load(Ordering::SeqCst), 0);
    assert!(reports[3].status_line().contains("Escalated"));

    let sent = rig.dispatcher.sent.lock().unwrap();
    let body = payload(&sent[0]);
    assert_eq!(field(&body, "Remediation Status").unwrap(), "SKIPPED");
}

#[tokio::test(start_paused = true)]
async fn test_failed_restart_is_reported_not_fatal() {
    let mut rig = rig(&[95.0], AdvisorScript::Reply(CONFIDENT), 1, false, AlertMode::Separate);
    let reports = run_to_incident(&mut rig).await;
    let last = &reports[3];

    let line = last.status_line();
    assert!(line.contains("failed"), "{}", line);
    let attempt = last.resolution.as_ref().unwrap().gate.outcome.attempt().unwrap();
    assert_eq!(attempt.status, RemediationStatus::Failed);
    assert_eq!(rig.executor.restarts.load(Ordering::SeqCst), 1);

    assert_eq!(
        rig.dispatcher.kinds(),
        vec![AlertKind::Incident, AlertKind::Remediation]
    );
    let sent = rig.dispatcher.sent.lock().unwrap();
    let body = payload(&sent[1]);
    assert_eq!(field(&body, "Remediation Status").unwrap(), "FAILED");
    drop(sent);

    // the loop keeps going: the next cycle is a fresh incident evaluation
    tokio::time::advance(Duration::from_secs(10)).await;
    let next = rig.monitor.run_once().await;
    assert!(next.is_incident());
    assert_eq!(rig.executor.restarts.load(Ordering::SeqCst), 2);
}

#[tokio::test(start_paused = true)]
async fn test_advisor_error_fails_closed() {
    let mut rig = rig(&[95.0], AdvisorScript::Fail, 0, false, AlertMode::Comprehensive);
    let reports = run_to_incident(&mut rig).await;
    let res = reports[3].resolution.as_ref().unwrap();

    assert_eq!(res.decision.confidence, Confidence::Low);
    assert_eq!(res.decision.recommendation, Recommendation::HumanIntervention);
    assert!(res
        .decision
        .reason
        .starts_with("Root cause analysis failed:"));
    assert_eq!(rig.executor.restarts.load(Ordering::SeqCst), 0);
    assert_eq!(rig.dispatcher.kinds(), vec![AlertKind::ComprehensiveIncident]);
}

#[tokio::test(start_paused = true)]
async fn test_dispatch_failure_does_not_abort_cycle() {
    let mut rig = rig(&[95.0], AdvisorScript::Reply(CONFIDENT), 0, true, AlertMode::Separate);
    let reports = run_to_incident(&mut rig).await;
    let res = reports[3].resolution.as_ref().unwrap();

    assert_eq!(rig.executor.restarts.load(Ordering::SeqCst), 1);
    assert_eq!(res.alerts.len(), 2);
    assert!(res.alerts.iter().all(|a| !a.delivered));
    assert!(reports[3].status_line().contains("Remediation succeeded"));
}

#[tokio::test(start_paused = true)]
async fn test_run_loop_cycles_until_cancelled() {
    let rig = rig(&[20.0], AdvisorScript::Reply(CONFIDENT), 0, false, AlertMode::Comprehensive);
    let provider = rig.provider.clone();
    let cancel = CancellationToken::new();
    let handle = tokio::spawn(rig.monitor.run(cancel.clone()));

    // cycles at 0, 10, 20, 30
    tokio::time::sleep(Duration::from_secs(35)).await;
    cancel.cancel();
    handle.await.unwrap();

    assert_eq!(provider.calls.load(Ordering::SeqCst), 4);
}

#[test]
fn test_unavailable_probe_never_raises_incident() {
    let rig = rig(&[f64::NAN], AdvisorScript::Reply(CONFIDENT), 0, false, AlertMode::Comprehensive);
    let mut monitor = rig.monitor;
    for _ in 0..3 {
        let report = tokio_test::block_on(monitor.run_once());
        assert!(matches!(report.outcome, CycleOutcome::Normal { .. }));
    }
}
