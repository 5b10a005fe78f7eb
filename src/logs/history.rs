//! Search over the JSON-lines log written when `logging.json_path` is set.
//!
//! Each line is one flattened `tracing` event:
//! `{"timestamp": "...", "level": "INFO", "message": "...", "alert_type": "incident", ...}`.
//! Rotated files (`<path>.1`, `<path>.2`, ...) are searched after the live
//! file; results come back newest first.

use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};

use chrono::{DateTime, TimeDelta, Utc};
use serde::Serialize;
use serde_json::Value;

use super::LogError;

#[derive(Debug, Clone, Default)]
pub struct LogQuery {
    pub since: Option<DateTime<Utc>>,
    pub until: Option<DateTime<Utc>>,
    /// Case-insensitive level, e.g. `warn`.
    pub level: Option<String>,
    pub alert_type: Option<String>,
    /// Case-insensitive substring of the message.
    pub text: Option<String>,
    pub limit: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct LogEntry {
    pub timestamp: Option<DateTime<Utc>>,
    pub level: String,
    pub message: String,
    pub alert_type: Option<String>,
    pub raw: Value,
}

impl LogEntry {
    fn from_line(line: &str) -> Option<Self> {
        let raw: Value = serde_json::from_str(line.trim()).ok()?;
        let text = |key: &str| {
            raw.get(key)
                .or_else(|| raw.get("fields").and_then(|f| f.get(key)))
                .and_then(Value::as_str)
                .map(str::to_string)
        };
        let timestamp = text("timestamp")
            .and_then(|t| DateTime::parse_from_rfc3339(&t).ok())
            .map(|t| t.with_timezone(&Utc));
        Some(Self {
            timestamp,
            level: text("level").unwrap_or_default(),
            message: text("message").unwrap_or_default(),
            alert_type: text("alert_type"),
            raw,
        })
    }
}

impl LogQuery {
    fn matches(&self, entry: &LogEntry) -> bool {
        if let Some(since) = self.since {
            if entry.timestamp.map_or(true, |t| t < since) {
                return false;
            }
        }
        if let Some(until) = self.until {
            if entry.timestamp.map_or(true, |t| t > until) {
                return false;
            }
        }
        if let Some(level) = &self.level {
            if !entry.level.eq_ignore_ascii_case(level) {
                return false;
            }
        }
        if let Some(alert_type) = &self.alert_type {
            if entry.alert_type.as_deref() != Some(alert_type.as_str()) {
                return false;
            }
        }
        if let Some(text) = &self.text {
            if !entry
                .message
                .to_lowercase()
                .contains(&text.to_lowercase())
            {
                return false;
            }
        }
        true
    }
}

/// `now` minus `hours`, or `None` when that is not representable (the
/// window then has no lower bound).
pub fn hours_before(now: DateTime<Utc>, hours: u64) -> Option<DateTime<Utc>> {
    let hours = i64::try_from(hours).ok()?;
    now.checked_sub_signed(TimeDelta::try_hours(hours)?)
}

/// Live file first, then `.1`, `.2`, ... while they exist.
pub fn log_files(path: &Path) -> Vec<PathBuf> {
    let mut files = Vec::new();
    if path.exists() {
        files.push(path.to_path_buf());
    }
    for n in 1.. {
        let rotated = rotated_path(path, n);
        if !rotated.exists() {
            break;
        }
        files.push(rotated);
    }
    files
}

pub fn rotated_path(path: &Path, n: usize) -> PathBuf {
    let mut name = path.as_os_str().to_os_string();
    name.push(format!(".{}", n));
    PathBuf::from(name)
}

/// Matching entries, newest first, at most `query.limit` (0 = unlimited).
/// Unparseable lines are skipped.
pub fn search(path: &Path, query: &LogQuery) -> Result<Vec<LogEntry>, LogError> {
    let mut results = Vec::new();
    for file in log_files(path) {
        let reader = BufReader::new(File::open(&file)?);
        let mut in_file = Vec::new();
        for line in reader.lines() {
            let line = line?;
            if let Some(entry) = LogEntry::from_line(&line) {
                if query.matches(&entry) {
                    in_file.push(entry);
                }
            }
        }
        results.extend(in_file.into_iter().rev());
        if query.limit > 0 && results.len() >= query.limit {
            results.truncate(query.limit);
            break;
        }
    }
    Ok(results)
}
