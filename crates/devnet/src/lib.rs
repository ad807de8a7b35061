//! benchy-devnet - Monitoring library for the benchy demo network.
//!
//! This crate observes a small multi-node Ethereum network running in Docker,
//! reconciles what it sees with a persisted scenario ledger, and plays back the
//! demo scenarios.

pub mod balance;
pub mod config;
pub mod docker;
pub mod monitor;
pub mod probe;
pub mod reconcile;
pub mod report;
pub mod rpc;
pub mod scenarios;
pub mod state;

pub use balance::{BalanceDisplay, eth_to_wei, wei_to_eth};
pub use config::{
    BENCHY_CONFIG_FILENAME, BalanceMode, ClientKind, NetworkConfig, NodeConfig, Participant,
};
pub use docker::BenchyDocker;
pub use monitor::{AccountReport, AccountStatus, NetworkMonitor, NetworkReport, NodeReport, NodeStatus};
pub use probe::{ChainProbe, ChainStatus, ContainerProbe, ContainerStatus, MemoryUsage, TransferSender};
pub use report::{AccountsReport, StateReport};
pub use rpc::RpcChainProbe;
pub use scenarios::{Scenario, ScenarioOptions, ScenarioOutcome, ScenarioRunner};
pub use state::{PersistentState, StateStore};
