//! TOML configuration for opsguard.
//!
//! Layered model with defaults for every key: an explicit path, the
//! `OPSGUARD_CONFIG` environment variable, `/etc/opsguard/opsguard.toml`,
//! then compiled-in defaults. Secrets (webhook URL, advisor API key) are read
//! from the environment, which `main` seeds from `.env`.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::metrics::MetricKind;

const SYSTEM_CONFIG_PATH: &str = "/etc/opsguard/opsguard.toml";

// ---------------------------------------------------------------------------
// Top-level config
// ---------------------------------------------------------------------------

/// Root configuration for the opsguard process.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub thresholds: ThresholdConfig,
    #[serde(default)]
    pub detection: DetectionConfig,
    #[serde(default)]
    pub monitor: MonitorConfig,
    #[serde(default)]
    pub metrics: MetricsConfig,
    #[serde(default)]
    pub remediation: RemediationConfig,
    #[serde(default)]
    pub advisor: AdvisorConfig,
    #[serde(default)]
    pub alerts: AlertsConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl Config {
    /// Load configuration from a TOML file at `path`.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config file: {}", path.display()))?;
        let config: Self = toml::from_str(&content)
            .with_context(|| format!("failed to parse config file: {}", path.display()))?;
        info!(path = %path.display(), "loaded opsguard configuration");
        Ok(config)
    }

    /// Resolve configuration for a CLI invocation.
    ///
    /// An explicit `--config` path must load; the implicit locations fall
    /// through to defaults on any problem.
    pub fn resolve(explicit: Option<&Path>) -> Result<Self> {
        match explicit {
            Some(path) => Self::load(path),
            None => Ok(Self::load_or_default()),
        }
    }

    /// Try to load configuration from, in order:
    /// 1. The path specified by the `OPSGUARD_CONFIG` environment variable.
    /// 2. `/etc/opsguard/opsguard.toml`.
    /// 3. Fall back to compiled-in defaults.
    pub fn load_or_default() -> Self {
        if let Ok(env_path) = std::env::var("OPSGUARD_CONFIG") {
            let path = Path::new(&env_path);
            match Self::load(path) {
                Ok(cfg) => return cfg,
                Err(e) => {
                    warn!(
                        path = %path.display(),
                        error = %e,
                        "OPSGUARD_CONFIG set but file could not be loaded, trying fallback"
                    );
                }
            }
        }

        let system_path = Path::new(SYSTEM_CONFIG_PATH);
        if system_path.exists() {
            match Self::load(system_path) {
                Ok(cfg) => return cfg,
                Err(e) => {
                    warn!(
                        path = %system_path.display(),
                        error = %e,
                        "system config file exists but could not be loaded, using defaults"
                    );
                }
            }
        }

        debug!("no config file found, using compiled-in defaults");
        Self::default()
    }
}

// ---------------------------------------------------------------------------
// Thresholds
// ---------------------------------------------------------------------------

/// Per-metric spike thresholds. A reading strictly above its threshold is
/// over; equal is not.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ThresholdConfig {
    pub cpu_percent: f64,
    pub memory_percent: f64,
    pub disk_percent: f64,
    /// Outbound throughput, megabits per second.
    pub network_mbps: f64,
}

impl Default for ThresholdConfig {
    fn default() -> Self {
        Self {
            cpu_percent: 80.0,
            memory_percent: 85.0,
            disk_percent: 90.0,
            network_mbps: 100.0,
        }
    }
}

impl ThresholdConfig {
    pub fn for_metric(&self, metric: MetricKind) -> f64 {
        match metric {
            MetricKind::Cpu => self.cpu_percent,
            MetricKind::Memory => self.memory_percent,
            MetricKind::Disk => self.disk_percent,
            MetricKind::Network => self.network_mbps,
        }
    }
}

// ---------------------------------------------------------------------------
// Detection / loop cadence
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectionConfig {
    /// How long a metric must stay over threshold before it is an incident.
    pub sustain_secs: u64,
}

impl Default for DetectionConfig {
    fn default() -> Self {
        Self { sustain_secs: 30 }
    }
}

impl DetectionConfig {
    pub fn sustain(&self) -> Duration {
        Duration::from_secs(self.sustain_secs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MonitorConfig {
    /// Sleep between the end of one cycle and the start of the next.
    pub interval_secs: u64,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self { interval_secs: 60 }
    }
}

impl MonitorConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }
}

// ---------------------------------------------------------------------------
// Metrics source
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MetricSource {
    /// Instant PromQL queries against a node_exporter-backed Prometheus.
    Prometheus,
    /// Read counters from the local host.
    Local,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MetricsConfig {
    pub source: MetricSource,
    pub prometheus_url: String,
    /// Interface whose transmit rate is reported as network usage.
    pub network_device: String,
    /// Mount point whose usage is reported as disk usage.
    pub disk_mount: String,
    pub request_timeout_secs: u64,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            source: MetricSource::Prometheus,
            prometheus_url: "http://localhost:9090".to_string(),
            network_device: "ens5".to_string(),
            disk_mount: "/".to_string(),
            request_timeout_secs: 5,
        }
    }
}

// ---------------------------------------------------------------------------
// Remediation
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RemediationConfig {
    /// systemd unit restarted on an authorized remediation.
    pub service: String,
    /// Wait between a successful restart and re-sampling metrics.
    pub settle_secs: u64,
    pub restart_timeout_secs: u64,
    /// Prefix systemctl invocations with `sudo -n`.
    pub use_sudo: bool,
}

impl Default for RemediationConfig {
    fn default() -> Self {
        Self {
            service: "docker".to_string(),
            settle_secs: 5,
            restart_timeout_secs: 60,
            use_sudo: true,
        }
    }
}

impl RemediationConfig {
    pub fn settle(&self) -> Duration {
        Duration::from_secs(self.settle_secs)
    }
}

// ---------------------------------------------------------------------------
// Advisor
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AdvisorConfig {
    pub model: String,
    /// Base URL of the generative language API.
    pub endpoint: String,
    /// Environment variable holding the API key.
    pub api_key_env: String,
    pub timeout_secs: u64,
}

impl Default for AdvisorConfig {
    fn default() -> Self {
        Self {
            model: "gemini-1.5-flash".to_string(),
            endpoint: "https://generativelanguage.googleapis.com/v1beta".to_string(),
            api_key_env: "GEMINI_API_KEY".to_string(),
            timeout_secs: 30,
        }
    }
}

impl AdvisorConfig {
    pub fn api_key(&self) -> Option<String> {
        std::env::var(&self.api_key_env)
            .ok()
            .filter(|k| !k.trim().is_empty())
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

// ---------------------------------------------------------------------------
// Alerts
// ---------------------------------------------------------------------------

/// How incident and remediation alerts are grouped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertMode {
    /// One combined alert per incident once it is reported.
    Comprehensive,
    /// An incident alert after the decision, then a remediation alert.
    Separate,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AlertsConfig {
    /// Inline webhook URL. Takes precedence over `webhook_url_env`.
    pub webhook_url: Option<String>,
    pub webhook_url_env: String,
    pub mode: AlertMode,
    pub timeout_secs: u64,
}

impl Default for AlertsConfig {
    fn default() -> Self {
        Self {
            webhook_url: None,
            webhook_url_env: "SLACK_WEBHOOK_URL".to_string(),
            mode: AlertMode::Comprehensive,
            timeout_secs: 10,
        }
    }
}

impl AlertsConfig {
    /// Effective webhook URL, if any is configured.
    pub fn resolved_webhook_url(&self) -> Option<String> {
        self.webhook_url
            .clone()
            .or_else(|| std::env::var(&self.webhook_url_env).ok())
            .filter(|u| !u.trim().is_empty())
    }
}

// ---------------------------------------------------------------------------
// Logging
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Minimum tracing level (`trace`, `debug`, `info`, `warn`, `error`).
    pub level: String,
    /// JSON-lines log. Also the file searched by `history`.
    pub json_path: Option<PathBuf>,
    /// Size at which the JSON log is rotated to `<json_path>.1`.
    pub max_bytes: u64,
    /// Rotated files kept (`.1` newest). 0 disables rotation.
    pub backup_count: usize,
    /// How far back the journal excerpt given to the advisor reaches.
    pub log_window_secs: u64,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json_path: None,
            max_bytes: 10 * 1024 * 1024,
            backup_count: 5,
            log_window_secs: 300,
        }
    }
}

impl LoggingConfig {
    pub fn log_window(&self) -> Duration {
        Duration::from_secs(self.log_window_secs)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
