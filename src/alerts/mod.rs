//! Outbound alerts for incidents, decisions and remediation outcomes.

pub mod slack;

use serde::Serialize;
use thiserror::Error;

use crate::advisor::ConfidenceDecision;
use crate::detect::IncidentSnapshot;
use crate::remediation::GateOutcome;

#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("webhook request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("webhook returned HTTP {0}")]
    Status(u16),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertKind {
    Incident,
    Remediation,
    ComprehensiveIncident,
}

impl AlertKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            AlertKind::Incident => "incident",
            AlertKind::Remediation => "remediation",
            AlertKind::ComprehensiveIncident => "comprehensive_incident",
        }
    }
}

/// Alert payloads. Each owns its data so it can outlive the cycle that
/// produced it (e.g. be queued by a dispatcher).
#[derive(Debug, Clone, Serialize)]
pub enum Alert {
    /// Sustained issues plus the advisor's verdict.
    Incident {
        incident: IncidentSnapshot,
        decision: ConfidenceDecision,
    },
    /// Outcome of an attempted remediation.
    Remediation {
        incident_id: uuid::Uuid,
        service: String,
        outcome: GateOutcome,
    },
    /// Incident, verdict and remediation outcome in one message.
    ComprehensiveIncident {
        incident: IncidentSnapshot,
        decision: ConfidenceDecision,
        service: String,
        outcome: GateOutcome,
    },
}

impl Alert {
    pub fn kind(&self) -> AlertKind {
        match self {
            Alert::Incident { .. } => AlertKind::Incident,
            Alert::Remediation { .. } => AlertKind::Remediation,
            Alert::ComprehensiveIncident { .. } => AlertKind::ComprehensiveIncident,
        }
    }

    pub fn incident_id(&self) -> uuid::Uuid {
        match self {
            Alert::Incident { incident, .. } => incident.id,
            Alert::Remediation { incident_id, .. } => *incident_id,
            Alert::ComprehensiveIncident { incident, .. } => incident.id,
        }
    }
}

/// Delivery channel for alerts.
///
/// `Ok(false)` means nothing was sent because the channel is not
/// configured; that is not an error.
#[async_trait::async_trait]
pub trait AlertDispatcher: Send + Sync {
    async fn dispatch(&self, alert: &Alert) -> Result<bool, DispatchError>;
}
