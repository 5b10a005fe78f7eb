use std::time::Duration;

use tokio::process::Command;
use tracing::debug;

use super::{LogError, LogSource};

/// Reads recent entries from the systemd journal.
pub struct JournalLogSource {
    binary: String,
}

impl Default for JournalLogSource {
    fn default() -> Self {
        Self {
            binary: "journalctl".to_string(),
        }
    }
}

impl JournalLogSource {
    pub fn with_binary(binary: impl Into<String>) -> Self {
        Self {
            binary: binary.into(),
        }
    }

    fn since_arg(window: Duration) -> String {
        format!("{} seconds ago", window.as_secs().max(1))
    }
}

#[async_trait::async_trait]
impl LogSource for JournalLogSource {
    async fn fetch_recent(&self, window: Duration) -> Result<String, LogError> {
        let since = Self::since_arg(window);
        let command = format!("{} --since '{}' --no-pager", self.binary, since);

        let output = Command::new(&self.binary)
            .args(["--since", &since, "--no-pager", "--quiet"])
            .output()
            .await
            .map_err(|e| LogError::Spawn {
                command: command.clone(),
                source: e,
            })?;

        if !output.status.success() {
            return Err(LogError::Exit {
                command,
                code: output.status.code(),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }

        let text = String::from_utf8_lossy(&output.stdout).into_owned();
        debug!(chars = text.len(), "journal excerpt fetched");
        Ok(text)
    }
}
