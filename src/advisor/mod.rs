//! Root-cause advisor boundary and the decision parser that consumes its
//! output.

pub mod decision;
pub mod gemini;

use thiserror::Error;

use crate::metrics::{MetricKind, MetricSnapshot};

pub use decision::{Confidence, ConfidenceDecision, Recommendation};

#[derive(Debug, Error)]
pub enum AdvisorError {
    #[error("advisor not configured: {0}")]
    NotConfigured(String),
    #[error("advisor request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("advisor returned HTTP {status}: {body}")]
    Status { status: u16, body: String },
    #[error("advisor returned no text")]
    EmptyResponse,
    #[error("advisor timed out after {0}s")]
    Timeout(u64),
}

/// Produces a root-cause narrative for an incident.
///
/// The returned text is expected to end with `CONFIDENCE:`,
/// `RECOMMENDATION:` and `REASON:` lines; see [`decision`].
#[async_trait::async_trait]
pub trait RootCauseAdvisor: Send + Sync {
    async fn analyze(
        &self,
        metrics: &MetricSnapshot,
        issues: &[MetricKind],
        log_excerpt: &str,
    ) -> Result<String, AdvisorError>;
}

/// Prompt sent to a language-model advisor.
pub fn build_prompt(metrics: &MetricSnapshot, issues: &[MetricKind], log_excerpt: &str) -> String {
    let mut prompt = String::from(
        "You are an incident response engineer analysing a Linux host.\n\
         The following metrics have been over their thresholds for a sustained period.\n\n",
    );

    prompt.push_str("Current metrics:\n");
    for metric in MetricKind::ALL {
        prompt.push_str(&format!(
            "- {}: {}\n",
            metric.label(),
            metrics.get(metric).display_value()
        ));
    }

    let issue_list: Vec<&str> = issues.iter().map(|m| m.label()).collect();
    prompt.push_str(&format!("\nIssues detected: {}\n", issue_list.join(", ")));

    prompt.push_str("\nRecent system logs:\n");
    if log_excerpt.trim().is_empty() {
        prompt.push_str("(no logs available)\n");
    } else {
        prompt.push_str(log_excerpt);
        prompt.push('\n');
    }

    prompt.push_str(
        "\nExplain the most likely root cause in a few sentences. Only base your answer on the \
         data above; do not assume problems that are not shown.\n\
         Restarting the affected service is the only automatic remediation available.\n\
         End your answer with exactly these three lines:\n\
         CONFIDENCE: <High|Medium|Low>\n\
         RECOMMENDATION: <AUTO_REMEDIATE|HUMAN_INTERVENTION>\n\
         REASON: <one sentence>\n",
    );
    prompt
}
