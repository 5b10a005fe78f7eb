//! Log access: recent system logs as advisor context, and search over
//! opsguard's own JSON log.

pub mod history;
pub mod journal;

use std::time::Duration;

use thiserror::Error;

/// Advisor context is cut to this many characters.
pub const LOG_EXCERPT_MAX_CHARS: usize = 500;

#[derive(Debug, Error)]
pub enum LogError {
    #[error("failed to run {command}: {source}")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },
    #[error("{command} exited with {code:?}: {stderr}")]
    Exit {
        command: String,
        code: Option<i32>,
        stderr: String,
    },
    #[error("log read failed: {0}")]
    Io(#[from] std::io::Error),
}

#[async_trait::async_trait]
pub trait LogSource: Send + Sync {
    /// Log text covering the last `window`.
    async fn fetch_recent(&self, window: Duration) -> Result<String, LogError>;
}

/// First `max` characters of `text`, cut on a char boundary.
pub fn excerpt(text: &str, max: usize) -> &str {
    match text.char_indices().nth(max) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}
