use std::path::PathBuf;
use std::sync::Mutex;
use std::time::Instant;

use sysinfo::{Disks, Networks, System};
use tracing::{debug, warn};

use super::{MetricKind, MetricProvider, MetricReading, MetricSnapshot};
use crate::config::MetricsConfig;

/// Host-local provider using `sysinfo` counters.
///
/// CPU usage and network throughput are rates, so they are computed between
/// consecutive snapshots; the first network sample after startup is
/// unavailable.
pub struct LocalProvider {
    network_device: String,
    disk_mount: PathBuf,
    state: Mutex<LocalState>,
}

struct LocalState {
    sys: System,
    networks: Networks,
    // (when, cumulative transmitted bytes) from the previous snapshot
    last_tx: Option<(Instant, u64)>,
}

impl LocalProvider {
    pub fn new(config: &MetricsConfig) -> Self {
        let mut sys = System::new();
        // Prime the CPU counters so the first real refresh has a baseline.
        sys.refresh_cpu_usage();
        Self {
            network_device: config.network_device.clone(),
            disk_mount: PathBuf::from(&config.disk_mount),
            state: Mutex::new(LocalState {
                sys,
                networks: Networks::new_with_refreshed_list(),
                last_tx: None,
            }),
        }
    }

    fn disk_percent(&self) -> Option<f64> {
        let disks = Disks::new_with_refreshed_list();
        let disk = disks
            .list()
            .iter()
            .find(|d| d.mount_point() == self.disk_mount)?;
        let total = disk.total_space();
        if total == 0 {
            return None;
        }
        let used = total.saturating_sub(disk.available_space());
        Some(used as f64 / total as f64 * 100.0)
    }

    fn sample(&self) -> MetricSnapshot {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());

        state.sys.refresh_cpu_usage();
        let cpu = f64::from(state.sys.global_cpu_usage());

        state.sys.refresh_memory();
        let total_mem = state.sys.total_memory();
        let memory = if total_mem > 0 {
            Some(state.sys.used_memory() as f64 / total_mem as f64 * 100.0)
        } else {
            None
        };

        state.networks.refresh();
        let now = Instant::now();
        let tx_total = state
            .networks
            .list()
            .iter()
            .find(|(name, _)| name.as_str() == self.network_device)
            .map(|(_, data)| data.total_transmitted());
        let network = match (tx_total, state.last_tx) {
            (Some(total), Some((then, prev))) => {
                let secs = now.duration_since(then).as_secs_f64();
                (secs > 0.0).then(|| total.saturating_sub(prev) as f64 * 8.0 / 1_000_000.0 / secs)
            }
            _ => None,
        };
        if tx_total.is_none() {
            warn!(device = %self.network_device, "network device not found");
        }
        state.last_tx = tx_total.map(|t| (now, t));
        drop(state);

        let disk = self.disk_percent();

        let reading = |metric, value: Option<f64>| match value {
            Some(v) => MetricReading::new(metric, v),
            None => MetricReading::unavailable(metric),
        };

        let snapshot = MetricSnapshot::new([
            MetricReading::new(MetricKind::Cpu, cpu),
            reading(MetricKind::Memory, memory),
            reading(MetricKind::Disk, disk),
            reading(MetricKind::Network, network),
        ]);
        debug!(summary = %snapshot.summary(), "local snapshot");
        snapshot
    }
}

#[async_trait::async_trait]
impl MetricProvider for LocalProvider {
    async fn snapshot(&self) -> MetricSnapshot {
        self.sample()
    }
}
