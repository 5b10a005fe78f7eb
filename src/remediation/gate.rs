//! Confidence gate and the per-incident remediation state machine.
//!
//! ```text
//! Detected --auto--> Remediating --> Verifying --> Reported
//!     \--escalate--> Escalated ------------------> Reported
//! ```

use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tracing::{info, warn};

use super::{IncidentPhase, RemediationAttempt, RemediationExecutor, RemediationStatus};
use crate::advisor::ConfidenceDecision;
use crate::detect::IncidentSnapshot;
use crate::metrics::{MetricKind, MetricProvider, MetricSnapshot};

/// How an incident left the gate.
#[derive(Debug, Clone, Serialize)]
pub enum GateOutcome {
    Remediated(RemediationAttempt),
    /// No executor call was made; pre and post metrics are the incident
    /// snapshot.
    Escalated { snapshot: MetricSnapshot },
}

impl GateOutcome {
    pub fn attempt(&self) -> Option<&RemediationAttempt> {
        match self {
            GateOutcome::Remediated(attempt) => Some(attempt),
            GateOutcome::Escalated { .. } => None,
        }
    }

    /// `SUCCESS`, `FAILED` or `SKIPPED`.
    pub fn status_label(&self) -> &'static str {
        match self {
            GateOutcome::Remediated(a) if a.status == RemediationStatus::Success => "SUCCESS",
            GateOutcome::Remediated(_) => "FAILED",
            GateOutcome::Escalated { .. } => "SKIPPED",
        }
    }

    pub fn summary(&self) -> String {
        match self {
            GateOutcome::Remediated(a) => match a.status {
                RemediationStatus::Success => format!(
                    "Remediation succeeded: {} (service {}); {}",
                    a.action_description,
                    a.service_state.as_deref().unwrap_or("state unknown"),
                    recovery_summary(&a.pre_metrics, &a.post_metrics)
                ),
                RemediationStatus::Failed => {
                    format!("Remediation failed: {}: {}", a.action_description, a.detail)
                }
            },
            GateOutcome::Escalated { .. } => {
                "Escalated for human intervention (remediation skipped)".to_string()
            }
        }
    }
}

/// `"CPU 95.00% -> 41.00%, Memory 60.00% -> 58.00%"` for the metrics that
/// were readable before and after.
pub fn recovery_summary(pre: &MetricSnapshot, post: &MetricSnapshot) -> String {
    let parts: Vec<String> = MetricKind::ALL
        .iter()
        .filter(|m| pre.get(**m).is_available() || post.get(**m).is_available())
        .map(|m| {
            format!(
                "{} {} -> {}",
                m.label(),
                pre.get(*m).display_value(),
                post.get(*m).display_value()
            )
        })
        .collect();
    if parts.is_empty() {
        "no metrics available".to_string()
    } else {
        parts.join(", ")
    }
}

/// Gate result plus the phases the incident went through.
#[derive(Debug, Clone, Serialize)]
pub struct GateReport {
    pub outcome: GateOutcome,
    pub phases: Vec<IncidentPhase>,
}

struct Lifecycle {
    incident_id: uuid::Uuid,
    phases: Vec<IncidentPhase>,
}

impl Lifecycle {
    fn new(incident_id: uuid::Uuid) -> Self {
        Self {
            incident_id,
            phases: vec![IncidentPhase::Detected],
        }
    }

    fn current(&self) -> IncidentPhase {
        self.phases
            .last()
            .copied()
            .unwrap_or(IncidentPhase::Detected)
    }

    fn advance(&mut self, next: IncidentPhase) {
        let from = self.current();
        debug_assert!(from.can_advance_to(next), "illegal transition {:?} -> {:?}", from, next);
        info!(incident_id = %self.incident_id, from = ?from, to = ?next, "incident phase");
        self.phases.push(next);
    }
}

/// Applies the remediation policy to a detected incident.
pub struct RemediationGate {
    executor: Arc<dyn RemediationExecutor>,
    provider: Arc<dyn MetricProvider>,
    service: String,
    settle: Duration,
}

impl RemediationGate {
    pub fn new(
        executor: Arc<dyn RemediationExecutor>,
        provider: Arc<dyn MetricProvider>,
        service: impl Into<String>,
        settle: Duration,
    ) -> Self {
        Self {
            executor,
            provider,
            service: service.into(),
            settle,
        }
    }

    pub fn service(&self) -> &str {
        &self.service
    }

    /// Drive one incident from `Detected` to `Reported`.
    ///
    /// Never retries and never returns an error: executor failures become a
    /// `Failed` attempt.
    pub async fn resolve(
        &self,
        incident: &IncidentSnapshot,
        decision: &ConfidenceDecision,
    ) -> GateReport {
        let mut lifecycle = Lifecycle::new(incident.id);

        if !decision.should_auto_remediate() {
            info!(
                incident_id = %incident.id,
                confidence = %decision.confidence,
                recommendation = %decision.recommendation,
                "remediation gated off, escalating"
            );
            lifecycle.advance(IncidentPhase::Escalated);
            lifecycle.advance(IncidentPhase::Reported);
            return GateReport {
                outcome: GateOutcome::Escalated {
                    snapshot: incident.metrics.clone(),
                },
                phases: lifecycle.phases,
            };
        }

        lifecycle.advance(IncidentPhase::Remediating);
        let pre_metrics = incident.metrics.clone();
        let action_description = format!("restart {}", self.service);

        let (status, detail) = match self.executor.restart(&self.service).await {
            Ok(exec) if exec.success => (RemediationStatus::Success, exec.message),
            Ok(exec) => (RemediationStatus::Failed, exec.message),
            Err(e) => {
                warn!(incident_id = %incident.id, error = %e, "remediation executor error");
                (RemediationStatus::Failed, e.to_string())
            }
        };

        lifecycle.advance(IncidentPhase::Verifying);
        if status == RemediationStatus::Success {
            tokio::time::sleep(self.settle).await;
        }
        let post_metrics = self.provider.snapshot().await;
        let service_state = match self.executor.status(&self.service).await {
            Ok(state) => Some(state),
            Err(e) => {
                warn!(service = %self.service, error = %e, "could not read service state");
                None
            }
        };

        info!(
            incident_id = %incident.id,
            status = %status,
            service_state = service_state.as_deref().unwrap_or("unknown"),
            recovery = %recovery_summary(&pre_metrics, &post_metrics),
            "remediation verified"
        );
        lifecycle.advance(IncidentPhase::Reported);

        GateReport {
            outcome: GateOutcome::Remediated(RemediationAttempt {
                pre_metrics,
                post_metrics,
                status,
                action_description,
                detail,
                service_state,
            }),
            phases: lifecycle.phases,
        }
    }
}
