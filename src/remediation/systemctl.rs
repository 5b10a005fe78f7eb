//! systemd-backed executor: `systemctl restart` and `systemctl is-active`.

use std::time::{Duration, Instant};

use tokio::process::Command;
use tracing::{error, info};

use super::{is_safe_service_name, ExecutionStatus, RemediationError, RemediationExecutor};
use crate::config::RemediationConfig;

const STATUS_TIMEOUT: Duration = Duration::from_secs(10);

pub struct SystemctlExecutor {
    use_sudo: bool,
    restart_timeout: Duration,
}

impl SystemctlExecutor {
    pub fn new(config: &RemediationConfig) -> Self {
        Self {
            use_sudo: config.use_sudo,
            restart_timeout: Duration::from_secs(config.restart_timeout_secs),
        }
    }

    fn command(&self, args: &[&str]) -> Command {
        if self.use_sudo {
            // -n: never prompt, fail instead.
            let mut cmd = Command::new("sudo");
            cmd.arg("-n").arg("systemctl").args(args);
            cmd
        } else {
            let mut cmd = Command::new("systemctl");
            cmd.args(args);
            cmd
        }
    }

    fn describe(&self, args: &[&str]) -> String {
        let prefix = if self.use_sudo { "sudo -n systemctl" } else { "systemctl" };
        format!("{} {}", prefix, args.join(" "))
    }
}

#[async_trait::async_trait]
impl RemediationExecutor for SystemctlExecutor {
    async fn restart(&self, service: &str) -> Result<ExecutionStatus, RemediationError> {
        if !is_safe_service_name(service) {
            return Err(RemediationError::InvalidService(service.to_string()));
        }

        let args = ["restart", service];
        let start = Instant::now();
        info!(service = %service, command = %self.describe(&args), "Executing service restart");

        let output = tokio::time::timeout(self.restart_timeout, self.command(&args).output())
            .await
            .map_err(|_| RemediationError::Timeout {
                action: "restart",
                service: service.to_string(),
                secs: self.restart_timeout.as_secs(),
            })?
            .map_err(|e| RemediationError::Spawn {
                command: self.describe(&args),
                source: e,
            })?;

        let elapsed_ms = start.elapsed().as_millis() as u64;
        let success = output.status.success();
        let stderr = String::from_utf8_lossy(&output.stderr);

        let message = if success {
            info!(service = %service, elapsed_ms, "Restart succeeded");
            format!("Service '{}' restarted successfully", service)
        } else {
            error!(service = %service, elapsed_ms, stderr = %stderr.trim(), "Restart failed");
            format!(
                "Service '{}' restart failed (exit {}): {}",
                service,
                output.status.code().unwrap_or(-1),
                stderr.trim(),
            )
        };

        Ok(ExecutionStatus {
            success,
            exit_code: output.status.code(),
            message,
        })
    }

    async fn status(&self, service: &str) -> Result<String, RemediationError> {
        if !is_safe_service_name(service) {
            return Err(RemediationError::InvalidService(service.to_string()));
        }

        let args = ["is-active", service];
        // is-active exits non-zero for inactive units; stdout still carries
        // the state, so the exit code is not an error here.
        let output = tokio::time::timeout(STATUS_TIMEOUT, self.command(&args).output())
            .await
            .map_err(|_| RemediationError::Timeout {
                action: "status",
                service: service.to_string(),
                secs: STATUS_TIMEOUT.as_secs(),
            })?
            .map_err(|e| RemediationError::Spawn {
                command: self.describe(&args),
                source: e,
            })?;

        let state = String::from_utf8_lossy(&output.stdout).trim().to_string();
        Ok(if state.is_empty() { "unknown".to_string() } else { state })
    }
}
