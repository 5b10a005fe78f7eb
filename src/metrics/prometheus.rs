use std::time::Duration;

use futures::future::join_all;
use reqwest::Client;
use serde::Deserialize;
use tracing::{debug, warn};

use super::{MetricKind, MetricProvider, MetricReading, MetricSnapshot, MetricsError};
use crate::config::MetricsConfig;

/// Instant-query provider backed by node_exporter series in Prometheus.
///
/// The four queries run concurrently; the snapshot is assembled only after
/// all of them have resolved.
pub struct PrometheusProvider {
    client: Client,
    base_url: String,
    network_device: String,
    disk_mount: String,
}

// Prometheus `/api/v1/query` response, only the parts we read.
#[derive(Debug, Deserialize)]
struct QueryResponse {
    status: String,
    #[serde(default)]
    data: Option<QueryData>,
    #[serde(default)]
    error: Option<String>,
}

#[derive(Debug, Deserialize)]
struct QueryData {
    #[serde(default)]
    result: Vec<VectorSample>,
}

#[derive(Debug, Deserialize)]
struct VectorSample {
    // [ <unix time>, "<value>" ]
    value: (f64, String),
}

impl PrometheusProvider {
    pub fn new(config: &MetricsConfig) -> Result<Self, MetricsError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()?;
        Ok(Self {
            client,
            base_url: config.prometheus_url.trim_end_matches('/').to_string(),
            network_device: config.network_device.clone(),
            disk_mount: config.disk_mount.clone(),
        })
    }

    /// PromQL expression for `metric`. Network is transmit bits/s scaled to
    /// Mbps so it compares directly against the Mbps threshold.
    pub fn query_for(&self, metric: MetricKind) -> String {
        match metric {
            MetricKind::Cpu => {
                r#"100-(avg(rate(node_cpu_seconds_total{mode="idle"}[5m]))*100)"#.to_string()
            }
            MetricKind::Memory => {
                "100*(1-node_memory_MemAvailable_bytes/node_memory_MemTotal_bytes)".to_string()
            }
            MetricKind::Disk => format!(
                r#"100*(1-node_filesystem_avail_bytes{{mountpoint="{m}"}}/node_filesystem_size_bytes{{mountpoint="{m}"}})"#,
                m = self.disk_mount
            ),
            MetricKind::Network => format!(
                r#"rate(node_network_transmit_bytes_total{{device="{}"}}[5m])*8/1000000"#,
                self.network_device
            ),
        }
    }

    async fn query(&self, metric: MetricKind) -> Result<Option<f64>, MetricsError> {
        let url = format!("{}/api/v1/query", self.base_url);
        let resp = self
            .client
            .get(&url)
            .query(&[("query", self.query_for(metric))])
            .send()
            .await?;

        if !resp.status().is_success() {
            return Err(MetricsError::Status(resp.status().as_u16()));
        }

        let body: QueryResponse = resp.json().await?;
        parse_instant_value(body)
    }

    async fn read(&self, metric: MetricKind) -> MetricReading {
        match self.query(metric).await {
            Ok(Some(v)) => MetricReading::new(metric, v),
            // An idle interface has no transmit series at all.
            Ok(None) if metric == MetricKind::Network => MetricReading::new(metric, 0.0),
            Ok(None) => {
                warn!(metric = %metric.name(), "empty result vector, marking unavailable");
                MetricReading::unavailable(metric)
            }
            Err(e) => {
                warn!(metric = %metric.name(), error = %e, "metric query failed, marking unavailable");
                MetricReading::unavailable(metric)
            }
        }
    }
}

fn parse_instant_value(body: QueryResponse) -> Result<Option<f64>, MetricsError> {
    if body.status != "success" {
        return Err(MetricsError::Malformed(
            body.error.unwrap_or_else(|| format!("status {}", body.status)),
        ));
    }
    let Some(sample) = body.data.and_then(|d| d.result.into_iter().next()) else {
        return Ok(None);
    };
    let value: f64 = sample
        .value
        .1
        .parse()
        .map_err(|_| MetricsError::Malformed(format!("non-numeric sample {:?}", sample.value.1)))?;
    if !value.is_finite() || value < 0.0 {
        return Err(MetricsError::Malformed(format!("out of range sample {}", value)));
    }
    Ok(Some(value))
}

#[async_trait::async_trait]
impl MetricProvider for PrometheusProvider {
    async fn snapshot(&self) -> MetricSnapshot {
        let readings = join_all(MetricKind::ALL.iter().map(|m| self.read(*m))).await;
        let snapshot = MetricSnapshot::new(readings);
        debug!(summary = %snapshot.summary(), "prometheus snapshot");
        snapshot
    }
}
