use std::time::Duration;

use reqwest::Client;
use serde_json::{json, Value};
use tracing::{debug, info};

use super::{Alert, AlertDispatcher, DispatchError};
use crate::advisor::ConfidenceDecision;
use crate::detect::IncidentSnapshot;
use crate::metrics::{MetricKind, MetricSnapshot};
use crate::remediation::GateOutcome;

const ROOT_CAUSE_MAX_CHARS: usize = 500;

/// Incoming-webhook dispatcher speaking the Slack attachment format.
pub struct SlackDispatcher {
    client: Client,
    webhook_url: Option<String>,
}

impl SlackDispatcher {
    pub fn new(webhook_url: Option<String>, timeout: Duration) -> Result<Self, DispatchError> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            webhook_url,
        })
    }

    pub fn is_configured(&self) -> bool {
        self.webhook_url.is_some()
    }
}

#[async_trait::async_trait]
impl AlertDispatcher for SlackDispatcher {
    async fn dispatch(&self, alert: &Alert) -> Result<bool, DispatchError> {
        let Some(url) = self.webhook_url.as_deref() else {
            debug!(alert_type = alert.kind().as_str(), "webhook not configured, alert not sent");
            return Ok(false);
        };

        let resp = self.client.post(url).json(&payload(alert)).send().await?;
        if !resp.status().is_success() {
            return Err(DispatchError::Status(resp.status().as_u16()));
        }

        info!(
            alert_type = alert.kind().as_str(),
            incident_id = %alert.incident_id(),
            "alert delivered"
        );
        Ok(true)
    }
}

fn field(title: &str, value: impl Into<String>, short: bool) -> Value {
    json!({ "title": title, "value": value.into(), "short": short })
}

fn truncate_chars(s: &str, max: usize) -> String {
    match s.char_indices().nth(max) {
        Some((idx, _)) => format!("{}...", &s[..idx]),
        None => s.to_string(),
    }
}

fn message(title: &str, summary: String, color: &str, fields: Vec<Value>) -> Value {
    json!({
        "text": format!("ALERT:: {}", title),
        "attachments": [{
            "color": color,
            "title": title,
            "text": summary,
            "fields": fields,
        }]
    })
}

fn usage_fields(metrics: &MetricSnapshot) -> Vec<Value> {
    MetricKind::ALL
        .iter()
        .map(|m| {
            field(
                &format!("{} Usage", m.label()),
                metrics.get(*m).display_value(),
                true,
            )
        })
        .collect()
}

fn incident_fields(incident: &IncidentSnapshot, decision: &ConfidenceDecision) -> Vec<Value> {
    let mut fields = usage_fields(&incident.metrics);
    fields.push(field("Issues Detected", incident.issue_labels(), false));
    fields.push(field("Sustained", incident.durations_summary(), false));
    fields.push(field("Confidence", decision.confidence.to_string(), true));
    fields.push(field("Recommendation", decision.recommendation.to_string(), true));
    fields.push(field("Reason", decision.reason.clone(), false));
    if !decision.narrative.is_empty() {
        fields.push(field(
            "Root Cause",
            truncate_chars(&decision.narrative, ROOT_CAUSE_MAX_CHARS),
            false,
        ));
    }
    fields
}

fn outcome_fields(service: &str, outcome: &GateOutcome) -> Vec<Value> {
    let mut fields = vec![field("Remediation Status", outcome.status_label(), true)];
    match outcome {
        GateOutcome::Remediated(attempt) => {
            fields.push(field("Action", attempt.action_description.clone(), true));
            fields.push(field(
                "Service State",
                attempt.service_state.clone().unwrap_or_else(|| "unknown".into()),
                true,
            ));
            for m in [MetricKind::Cpu, MetricKind::Memory] {
                fields.push(field(
                    &format!("Pre-{}", m.label()),
                    attempt.pre_metrics.get(m).display_value(),
                    true,
                ));
                fields.push(field(
                    &format!("Post-{}", m.label()),
                    attempt.post_metrics.get(m).display_value(),
                    true,
                ));
            }
            fields.push(field("Details", attempt.detail.clone(), false));
        }
        GateOutcome::Escalated { .. } => {
            fields.push(field(
                "Action",
                format!("none; restart of {} requires human approval", service),
                false,
            ));
        }
    }
    fields
}

fn outcome_color(outcome: &GateOutcome) -> &'static str {
    match outcome.status_label() {
        "SUCCESS" => "good",
        _ => "warning",
    }
}

/// Build the webhook body for `alert`.
pub fn payload(alert: &Alert) -> Value {
    match alert {
        Alert::Incident { incident, decision } => message(
            "System Alert - Issues Detected",
            format!(
                "Detected {} sustained system issue(s) requiring attention",
                incident.issues.len()
            ),
            "danger",
            incident_fields(incident, decision),
        ),
        Alert::Remediation {
            service, outcome, ..
        } => message(
            "System Remediation Completed",
            format!("Automatic remediation executed: {}", outcome.summary()),
            outcome_color(outcome),
            outcome_fields(service, outcome),
        ),
        Alert::ComprehensiveIncident {
            incident,
            decision,
            service,
            outcome,
        } => {
            let mut fields = incident_fields(incident, decision);
            fields.extend(outcome_fields(service, outcome));
            let color = match outcome {
                GateOutcome::Escalated { .. } => "danger",
                _ => outcome_color(outcome),
            };
            message(
                "Incident Report",
                format!(
                    "{} sustained issue(s): {}. {}",
                    incident.issues.len(),
                    incident.issue_labels(),
                    outcome.summary()
                ),
                color,
                fields,
            )
        }
    }
}
