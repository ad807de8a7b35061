//! The two facts the monitor consumes for every node, and the traits that produce them.

use std::{fmt, future::Future};

use alloy_core::primitives::{Address, U256};
use anyhow::Result;

/// Memory usage of a container, in bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct MemoryUsage {
    pub used: u64,
    pub limit: u64,
}

impl MemoryUsage {
    /// A zero sample is what docker reports for a container that is shutting down.
    pub fn is_empty(&self) -> bool {
        self.used == 0 && self.limit == 0
    }
}

impl fmt::Display for MemoryUsage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} / {}", format_bytes(self.used), format_bytes(self.limit))
    }
}

/// Format a byte count the way `docker stats` does (binary units, one decimal).
pub fn format_bytes(bytes: u64) -> String {
    const UNITS: [&str; 5] = ["B", "KiB", "MiB", "GiB", "TiB"];

    if bytes < 1024 {
        return format!("{}B", bytes);
    }

    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }

    format!("{:.1}{}", value, UNITS[unit])
}

/// Container status fact.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ContainerStatus {
    pub running: bool,
    pub cpu_percent: f64,
    pub memory: Option<MemoryUsage>,
}

impl ContainerStatus {
    pub fn stopped() -> Self {
        Self::default()
    }

    /// Running, with a memory sample that is not empty.
    pub fn is_up(&self) -> bool {
        self.running && !self.memory.is_some_and(|m| m.is_empty())
    }
}

/// Chain status fact. Every field is absent when the node did not answer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ChainStatus {
    pub block_number: Option<u64>,
    pub transaction_count: Option<u64>,
    pub pending_transactions: Option<u64>,
}

/// Source of container status facts.
pub trait ContainerProbe {
    /// Inspect a container. A container that does not exist is reported as stopped.
    fn container_status(&self, container_name: &str) -> impl Future<Output = ContainerStatus> + Send;
}

/// Source of chain status facts.
pub trait ChainProbe {
    fn block_number(&self, url: &str) -> impl Future<Output = Option<u64>> + Send;

    fn balance(&self, url: &str, address: Address) -> impl Future<Output = Option<U256>> + Send;

    fn transaction_count(
        &self,
        url: &str,
        address: Address,
    ) -> impl Future<Output = Option<u64>> + Send;

    /// Pending plus queued transactions in the node's pool.
    fn pending_transactions(&self, url: &str) -> impl Future<Output = Option<u64>> + Send;

    fn accounts(&self, url: &str) -> impl Future<Output = Result<Vec<Address>>> + Send;
}

/// Sends value transfers from accounts unlocked on a node.
pub trait TransferSender {
    /// Submit a transfer and return its transaction hash.
    fn send_transfer(
        &self,
        url: &str,
        from: Address,
        to: Address,
        value: U256,
    ) -> impl Future<Output = Result<String>> + Send;

    /// Wait until a submitted transfer is mined and succeeded.
    fn confirm_transfer(&self, url: &str, tx_hash: &str) -> impl Future<Output = Result<()>> + Send;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_bytes() {
        assert_eq!(format_bytes(0), "0B");
        assert_eq!(format_bytes(512), "512B");
        assert_eq!(format_bytes(1536), "1.5KiB");
        assert_eq!(format_bytes(52_428_800), "50.0MiB");
        assert_eq!(format_bytes(8 * 1024 * 1024 * 1024), "8.0GiB");
    }

    #[test]
    fn test_memory_display() {
        let memory = MemoryUsage {
            used: 129_394_278,
            limit: 8_160_437_862,
        };
        assert_eq!(memory.to_string(), "123.4MiB / 7.6GiB");
        assert_eq!(MemoryUsage::default().to_string(), "0B / 0B");
    }

    #[test]
    fn test_empty_memory_means_down() {
        let status = ContainerStatus {
            running: true,
            cpu_percent: 0.0,
            memory: Some(MemoryUsage::default()),
        };
        assert!(!status.is_up());

        let status = ContainerStatus {
            memory: Some(MemoryUsage {
                used: 1,
                limit: 2,
            }),
            ..status
        };
        assert!(status.is_up());
        assert!(!ContainerStatus::stopped().is_up());
    }
}
