//! Remediation: the executor boundary and the confidence gate that decides
//! whether it is invoked.

pub mod gate;
pub mod systemctl;

use serde::Serialize;
use thiserror::Error;

use crate::metrics::MetricSnapshot;

pub use gate::{GateOutcome, GateReport, RemediationGate};

#[derive(Debug, Error)]
pub enum RemediationError {
    #[error("invalid service name: {0:?}")]
    InvalidService(String),
    #[error("failed to execute {command}: {source}")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },
    #[error("{action} of '{service}' timed out after {secs}s")]
    Timeout {
        action: &'static str,
        service: String,
        secs: u64,
    },
}

/// What the executor reported for one restart.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ExecutionStatus {
    pub success: bool,
    pub exit_code: Option<i32>,
    pub message: String,
}

/// Restart-and-verify capability for one kind of remediation target.
#[async_trait::async_trait]
pub trait RemediationExecutor: Send + Sync {
    /// Restart `service`. A non-zero exit is `Ok` with `success == false`;
    /// `Err` means the action could not be carried out at all.
    async fn restart(&self, service: &str) -> Result<ExecutionStatus, RemediationError>;

    /// Current state of `service`, e.g. `active` or `failed`.
    async fn status(&self, service: &str) -> Result<String, RemediationError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum RemediationStatus {
    Success,
    Failed,
}

impl std::fmt::Display for RemediationStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RemediationStatus::Success => write!(f, "SUCCESS"),
            RemediationStatus::Failed => write!(f, "FAILED"),
        }
    }
}

/// One authorized remediation, from pre-action snapshot to verification.
#[derive(Debug, Clone, Serialize)]
pub struct RemediationAttempt {
    pub pre_metrics: MetricSnapshot,
    pub post_metrics: MetricSnapshot,
    pub status: RemediationStatus,
    pub action_description: String,
    /// Executor's account of the restart (stderr, timeout, spawn error).
    pub detail: String,
    /// Service state queried after the settle wait, if it could be read.
    pub service_state: Option<String>,
}

/// Lifecycle of a single incident through the gate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum IncidentPhase {
    Detected,
    Remediating,
    Verifying,
    Escalated,
    Reported,
}

impl IncidentPhase {
    pub fn can_advance_to(self, next: IncidentPhase) -> bool {
        use IncidentPhase::*;
        matches!(
            (self, next),
            (Detected, Remediating)
                | (Detected, Escalated)
                | (Remediating, Verifying)
                | (Verifying, Reported)
                | (Escalated, Reported)
        )
    }

    pub fn is_terminal(self) -> bool {
        self == IncidentPhase::Reported
    }
}

/// Allowed characters: alphanumeric, hyphen, underscore, dot, `@`.
/// Prevents argument injection through the service name.
pub fn is_safe_service_name(name: &str) -> bool {
    !name.is_empty()
        && name.len() <= 128
        && !name.starts_with('-')
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.' | '@'))
}
