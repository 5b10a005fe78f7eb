//! Structured verdict extraction from free-form root-cause text.
//!
//! The advisor is asked to end its answer with three lines:
//!
//! ```text
//! CONFIDENCE: High|Medium|Low
//! RECOMMENDATION: AUTO_REMEDIATE|HUMAN_INTERVENTION
//! REASON: <one line>
//! ```
//!
//! Anything missing or unrecognised falls back to the safe value, so the
//! only way to get `should_auto_remediate() == true` is an explicit
//! auto-remediate recommendation with High or Medium confidence.

use serde::Serialize;

pub const PARSE_FAILED_REASON: &str = "Analysis parsing failed";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Confidence {
    High,
    Medium,
    Low,
}

impl Confidence {
    fn parse(value: &str) -> Option<Self> {
        match normalize(value).as_str() {
            "high" => Some(Confidence::High),
            "medium" => Some(Confidence::Medium),
            "low" => Some(Confidence::Low),
            _ => None,
        }
    }
}

impl std::fmt::Display for Confidence {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Confidence::High => write!(f, "High"),
            Confidence::Medium => write!(f, "Medium"),
            Confidence::Low => write!(f, "Low"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Recommendation {
    AutoRemediate,
    HumanIntervention,
}

impl Recommendation {
    fn parse(value: &str) -> Option<Self> {
        // AUTO_REMEDIATE, auto-remediate, "Auto remediate", AutoRemediate
        match normalize(value).as_str() {
            "autoremediate" => Some(Recommendation::AutoRemediate),
            "humanintervention" => Some(Recommendation::HumanIntervention),
            _ => None,
        }
    }
}

impl std::fmt::Display for Recommendation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Recommendation::AutoRemediate => write!(f, "AUTO_REMEDIATE"),
            Recommendation::HumanIntervention => write!(f, "HUMAN_INTERVENTION"),
        }
    }
}

/// Verdict derived once per incident. Never mutated after construction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ConfidenceDecision {
    pub confidence: Confidence,
    pub recommendation: Recommendation,
    pub reason: String,
    pub narrative: String,
}

#[derive(Clone, Copy)]
enum Field {
    Confidence,
    Recommendation,
    Reason,
}

impl ConfidenceDecision {
    /// Parse advisor output. Pure: the same text always yields the same
    /// decision.
    pub fn parse(raw: &str) -> Self {
        let mut confidence = None;
        let mut recommendation = None;
        let mut reason = None;
        let mut narrative = Vec::new();

        for line in raw.lines() {
            let trimmed = line.trim();
            if trimmed.is_empty() {
                continue;
            }
            match split_field(trimmed) {
                Some((Field::Confidence, value)) => confidence = Confidence::parse(value),
                Some((Field::Recommendation, value)) => {
                    recommendation = Recommendation::parse(value)
                }
                Some((Field::Reason, value)) => {
                    reason = Some(value.to_string()).filter(|r| !r.is_empty())
                }
                None => narrative.push(trimmed),
            }
        }

        Self {
            confidence: confidence.unwrap_or(Confidence::Low),
            recommendation: recommendation.unwrap_or(Recommendation::HumanIntervention),
            reason: reason.unwrap_or_else(|| PARSE_FAILED_REASON.to_string()),
            narrative: narrative.join("\n"),
        }
    }

    /// Decision used when the advisor could not be consulted at all.
    pub fn advisor_failed(cause: &str) -> Self {
        Self {
            confidence: Confidence::Low,
            recommendation: Recommendation::HumanIntervention,
            reason: format!("Root cause analysis failed: {}", cause),
            narrative: format!("Root cause analysis unavailable ({})", cause),
        }
    }

    /// Gate verdict. Fails closed.
    pub fn should_auto_remediate(&self) -> bool {
        self.recommendation == Recommendation::AutoRemediate
            && matches!(self.confidence, Confidence::High | Confidence::Medium)
    }
}

/// Recognise `CONFIDENCE:` / `RECOMMENDATION:` / `REASON:` lines, tolerating
/// any casing and markdown decoration such as `**Confidence:** High` or
/// `- REASON: ...`.
fn split_field(line: &str) -> Option<(Field, &str)> {
    let stripped =
        line.trim_start_matches(|c: char| c == '*' || c == '-' || c == '#' || c.is_whitespace());
    let colon = stripped.find(':')?;
    let key = stripped[..colon].trim_end_matches('*').trim();
    let field = if key.eq_ignore_ascii_case("confidence") {
        Field::Confidence
    } else if key.eq_ignore_ascii_case("recommendation") {
        Field::Recommendation
    } else if key.eq_ignore_ascii_case("reason") {
        Field::Reason
    } else {
        return None;
    };
    let value = stripped[colon + 1..].trim().trim_matches('*').trim();
    Some((field, value))
}

/// The whole value as one lowercase token: surrounding `<>*` and
/// whitespace trimmed, separators dropped. A value holding more than one
/// word or option never matches a single token.
fn normalize(value: &str) -> String {
    value
        .trim_matches(|c: char| matches!(c, '<' | '>' | '*') || c.is_whitespace())
        .trim_end_matches('.')
        .chars()
        .filter(|c| !matches!(c, '_' | '-' | ' '))
        .collect::<String>()
        .to_ascii_lowercase()
}
