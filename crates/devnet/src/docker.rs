//! Docker client used to observe node containers.

use std::pin::pin;

use anyhow::{Context, Result};
use bollard::{
    Docker,
    container::{Stats, StatsOptions},
};
use derive_more::Deref;
use futures::StreamExt;

use crate::probe::{ContainerProbe, ContainerStatus, MemoryUsage};

/// Docker client wrapper for container inspection.
#[derive(Debug, Clone, Deref)]
pub struct BenchyDocker {
    #[deref]
    docker: Docker,
}

impl BenchyDocker {
    /// Connect to the local Docker daemon.
    pub fn connect() -> Result<Self> {
        let docker = Docker::connect_with_local_defaults()
            .context("Failed to connect to Docker. Is Docker running?")?;
        Ok(Self { docker })
    }

    /// Check if a container is running via Docker inspect.
    pub async fn is_container_running(&self, container_name: &str) -> bool {
        self.docker
            .inspect_container(container_name, None)
            .await
            .ok()
            .and_then(|info| info.state)
            .and_then(|s| s.running)
            .unwrap_or(false)
    }

    /// Take a single, non-streaming stats sample.
    async fn sample_stats(&self, container_name: &str) -> Result<Stats> {
        let mut stream = pin!(self.docker.stats(
            container_name,
            Some(StatsOptions {
                stream: false,
                one_shot: false,
            }),
        ));

        stream
            .next()
            .await
            .with_context(|| format!("No stats returned for {}", container_name))?
            .with_context(|| format!("Failed to read stats for {}", container_name))
    }
}

impl ContainerProbe for BenchyDocker {
    async fn container_status(&self, container_name: &str) -> ContainerStatus {
        if !self.is_container_running(container_name).await {
            tracing::trace!(container_name, "Container is not running");
            return ContainerStatus::stopped();
        }

        match self.sample_stats(container_name).await {
            Ok(stats) => status_from_stats(&stats),
            Err(e) => {
                tracing::debug!(container_name, error = %e, "Could not sample container stats");
                ContainerStatus {
                    running: true,
                    cpu_percent: 0.0,
                    memory: None,
                }
            }
        }
    }
}

fn status_from_stats(stats: &Stats) -> ContainerStatus {
    let online_cpus = stats.cpu_stats.online_cpus.unwrap_or_else(|| {
        stats
            .cpu_stats
            .cpu_usage
            .percpu_usage
            .as_ref()
            .map_or(1, |per_cpu| per_cpu.len() as u64)
    });

    ContainerStatus {
        running: true,
        cpu_percent: cpu_percent(
            stats.cpu_stats.cpu_usage.total_usage,
            stats.precpu_stats.cpu_usage.total_usage,
            stats.cpu_stats.system_cpu_usage.unwrap_or(0),
            stats.precpu_stats.system_cpu_usage.unwrap_or(0),
            online_cpus,
        ),
        memory: Some(MemoryUsage {
            used: stats.memory_stats.usage.unwrap_or(0),
            limit: stats.memory_stats.limit.unwrap_or(0),
        }),
    }
}

/// CPU usage in percent, computed the same way as `docker stats`.
fn cpu_percent(total: u64, pre_total: u64, system: u64, pre_system: u64, online_cpus: u64) -> f64 {
    let cpu_delta = total.saturating_sub(pre_total) as f64;
    let system_delta = system.saturating_sub(pre_system) as f64;

    if system_delta <= 0.0 || cpu_delta <= 0.0 {
        return 0.0;
    }

    cpu_delta / system_delta * online_cpus.max(1) as f64 * 100.0
}
