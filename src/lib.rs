//! opsguard -- automated incident response for a single Linux host.
//!
//! Samples CPU, memory, disk and network usage on a fixed cadence, detects
//! spikes that stay over threshold for a sustained period, asks a root-cause
//! advisor for a verdict, restarts the affected service only on a confident
//! recommendation, and reports every incident to a webhook.

pub mod advisor;
pub mod alerts;
pub mod config;
pub mod detect;
pub mod logging;
pub mod logs;
pub mod metrics;
pub mod monitor;
pub mod remediation;

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tokio_util::sync::CancellationToken;

use crate::config::{Config, MetricSource};
use crate::metrics::MetricProvider;
use crate::monitor::{Collaborators, CycleReport, Monitor};

/// Production collaborators for `config`.
pub fn build_collaborators(config: &Config) -> Result<Collaborators> {
    let provider: Arc<dyn MetricProvider> = match config.metrics.source {
        MetricSource::Prometheus => Arc::new(
            metrics::prometheus::PrometheusProvider::new(&config.metrics)
                .context("building Prometheus client")?,
        ),
        MetricSource::Local => Arc::new(metrics::local::LocalProvider::new(&config.metrics)),
    };

    let advisor = advisor::gemini::GeminiAdvisor::new(&config.advisor)
        .context("building advisor client")?;

    let webhook = config.alerts.resolved_webhook_url();
    if webhook.is_none() {
        tracing::warn!(
            env = %config.alerts.webhook_url_env,
            "no alert webhook configured, alerts will only be logged"
        );
    }
    let dispatcher = alerts::slack::SlackDispatcher::new(
        webhook,
        Duration::from_secs(config.alerts.timeout_secs),
    )
    .context("building webhook client")?;

    Ok(Collaborators {
        provider,
        advisor: Arc::new(advisor),
        executor: Arc::new(remediation::systemctl::SystemctlExecutor::new(
            &config.remediation,
        )),
        dispatcher: Arc::new(dispatcher),
        logs: Arc::new(logs::journal::JournalLogSource::default()),
    })
}

/// Run the control loop until Ctrl-C or SIGTERM.
pub async fn run(config: Config) -> Result<()> {
    let monitor = Monitor::new(&config, build_collaborators(&config)?);
    let cancel = CancellationToken::new();

    let signal_cancel = cancel.clone();
    tokio::spawn(async move {
        shutdown_signal().await;
        tracing::info!("shutdown requested, finishing current cycle");
        signal_cancel.cancel();
    });

    monitor.run(cancel).await;
    Ok(())
}

/// Run one cycle. A single cycle can only detect an incident when
/// `detection.sustain_secs` is zero.
pub async fn run_once(config: &Config) -> Result<CycleReport> {
    let mut monitor = Monitor::new(config, build_collaborators(config)?);
    Ok(monitor.run_once().await)
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "failed to listen for Ctrl-C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
