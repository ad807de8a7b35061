//! Network configuration: the participants, their clients and how to reach them.

use std::{
    collections::HashSet,
    path::{Path, PathBuf},
};

use alloy_core::primitives::{Address, address};
use anyhow::{Context, Result};
use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use serde::{Deserialize, Serialize};
use url::Url;

/// The default name for the benchy configuration file.
pub const BENCHY_CONFIG_FILENAME: &str = "Benchy.toml";

/// The default name for the persistent state file.
pub const DEFAULT_STATE_FILENAME: &str = "benchy_state.json";

/// Prefix of the environment variables that override configuration values.
pub const ENV_PREFIX: &str = "BENCHY_";

/// A named participant of the demo network.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    Serialize,
    Deserialize,
    strum::Display,
    strum::EnumString,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
pub enum Participant {
    Alice,
    Bob,
    Cassandra,
    Driss,
    Elena,
}

impl Participant {
    /// Capitalized name used in tables.
    pub fn title(&self) -> &'static str {
        match self {
            Participant::Alice => "Alice",
            Participant::Bob => "Bob",
            Participant::Cassandra => "Cassandra",
            Participant::Driss => "Driss",
            Participant::Elena => "Elena",
        }
    }
}

/// Execution client running inside a node container.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, strum::Display, strum::EnumString,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
pub enum ClientKind {
    Geth,
    Nethermind,
}

impl ClientKind {
    pub fn title(&self) -> &'static str {
        match self {
            ClientKind::Geth => "Geth",
            ClientKind::Nethermind => "Nethermind",
        }
    }
}

/// Where displayed balances come from.
#[derive(
    Debug,
    Clone,
    Copy,
    Default,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    strum::Display,
    strum::EnumString,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum BalanceMode {
    /// Balances derived from the persistent scenario ledger.
    #[default]
    Ledger,
    /// Balances read from the chain through `eth_getBalance`.
    Chain,
}

/// Configuration of a single node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeConfig {
    /// The participant this node belongs to.
    pub participant: Participant,
    /// The execution client.
    pub client: ClientKind,
    /// The participant's account address.
    pub address: Address,
    /// JSON-RPC port published on the host.
    pub rpc_port: u16,
    /// P2P port published on the host.
    pub p2p_port: u16,
    /// Whether the node seals blocks.
    pub validator: bool,
    /// Participant whose endpoint knows this node's account, if not the node itself.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub balance_via: Option<Participant>,
}

impl NodeConfig {
    /// The JSON-RPC URL reachable from the host.
    pub fn host_rpc_url(&self) -> Result<Url> {
        Url::parse(&format!("http://localhost:{}/", self.rpc_port))
            .context("Failed to parse node RPC URL")
    }
}

/// Configuration of the whole network.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetworkConfig {
    /// Name of the Docker network the nodes are attached to.
    pub network_name: String,
    /// Containers are named `<container_prefix>-<participant>`.
    pub container_prefix: String,
    /// Chain network id.
    pub network_id: u64,
    /// Consensus engine label shown in reports.
    pub consensus: String,
    /// Path to the persistent state file.
    pub state_file: PathBuf,
    /// Where displayed balances come from.
    #[serde(default)]
    pub balance_mode: BalanceMode,
    /// The nodes, in display order.
    pub nodes: Vec<NodeConfig>,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            network_name: "benchy-network".to_string(),
            container_prefix: "benchy".to_string(),
            network_id: 1337,
            consensus: "Clique PoA".to_string(),
            state_file: PathBuf::from(DEFAULT_STATE_FILENAME),
            balance_mode: BalanceMode::default(),
            nodes: vec![
                NodeConfig {
                    participant: Participant::Alice,
                    client: ClientKind::Geth,
                    address: address!("0x71562b71999873db5b286df957af199ec94617f7"),
                    rpc_port: 8545,
                    p2p_port: 30303,
                    validator: true,
                    balance_via: None,
                },
                NodeConfig {
                    participant: Participant::Bob,
                    client: ClientKind::Nethermind,
                    address: address!("0x742d35Cc6558FfC7876CFBbA534d3a05E5d8b4F1"),
                    rpc_port: 8547,
                    p2p_port: 30304,
                    validator: true,
                    balance_via: Some(Participant::Alice),
                },
                NodeConfig {
                    participant: Participant::Cassandra,
                    client: ClientKind::Geth,
                    address: address!("0x71562b71999873db5b286df957af199ec94617f7"),
                    rpc_port: 8549,
                    p2p_port: 30305,
                    validator: true,
                    balance_via: None,
                },
                NodeConfig {
                    participant: Participant::Driss,
                    client: ClientKind::Nethermind,
                    address: address!("0x9876543210fedcba9876543210fedcba98765431"),
                    rpc_port: 8551,
                    p2p_port: 30306,
                    validator: false,
                    balance_via: Some(Participant::Cassandra),
                },
                NodeConfig {
                    participant: Participant::Elena,
                    client: ClientKind::Geth,
                    address: address!("0x9876543210fedcba9876543210fedcba98765432"),
                    rpc_port: 8553,
                    p2p_port: 30307,
                    validator: false,
                    balance_via: Some(Participant::Cassandra),
                },
            ],
        }
    }
}

impl NetworkConfig {
    /// Load the configuration from defaults, a TOML file and `BENCHY_*` environment variables.
    ///
    /// When `path` is `None`, `Benchy.toml` in the working directory is used if present.
    /// An explicit path that does not exist is an error.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let file = match path {
            Some(path) if path.is_dir() => path.join(BENCHY_CONFIG_FILENAME),
            Some(path) => path.to_path_buf(),
            None => PathBuf::from(BENCHY_CONFIG_FILENAME),
        };

        if path.is_some() && !file.exists() {
            anyhow::bail!("Configuration file not found: {}", file.display());
        }

        let config: Self = Figment::from(Serialized::defaults(Self::default()))
            .merge(Toml::file(&file))
            .merge(Env::prefixed(ENV_PREFIX).ignore(&["verbosity", "config"]))
            .extract()
            .with_context(|| format!("Failed to load configuration ({})", file.display()))?;

        config.validate()?;

        tracing::debug!(
            path = %file.display(),
            nodes = config.nodes.len(),
            state_file = %config.state_file.display(),
            "Configuration loaded"
        );

        Ok(config)
    }

    /// Save the configuration to a TOML file.
    pub fn save_to_file(&self, path: &Path) -> Result<()> {
        let content =
            toml::to_string_pretty(self).context("Failed to serialize network config to TOML")?;
        std::fs::write(path, content)
            .with_context(|| format!("Failed to write config to {}", path.display()))?;
        tracing::info!(path = %path.display(), "Configuration saved");
        Ok(())
    }

    /// Load the configuration from a TOML file, without defaults or environment overrides.
    pub fn load_from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config from {}", path.display()))?;
        let config: Self =
            toml::from_str(&content).context("Failed to parse config file as TOML")?;
        config.validate()?;
        Ok(config)
    }

    /// Check that participants and ports are unique and that balance routes resolve.
    pub fn validate(&self) -> Result<()> {
        if self.nodes.is_empty() {
            anyhow::bail!("Network configuration has no nodes");
        }

        let mut participants = HashSet::new();
        let mut ports = HashSet::new();

        for node in &self.nodes {
            if !participants.insert(node.participant) {
                anyhow::bail!("Participant {} is configured more than once", node.participant);
            }
            if !ports.insert(node.rpc_port) {
                anyhow::bail!(
                    "RPC port {} is used by more than one node ({})",
                    node.rpc_port,
                    node.participant
                );
            }
        }

        for node in &self.nodes {
            if let Some(via) = node.balance_via
                && !participants.contains(&via)
            {
                anyhow::bail!(
                    "Node {} reads its balance through {}, which is not part of the network",
                    node.participant,
                    via
                );
            }
        }

        Ok(())
    }

    /// Look up a node by participant name (case-insensitive).
    pub fn node(&self, name: &str) -> Result<&NodeConfig> {
        let participant: Participant = name
            .parse()
            .map_err(|_| anyhow::anyhow!("Unknown node: {}", name))?;
        self.participant(participant)
    }

    /// Look up the node of a participant.
    pub fn participant(&self, participant: Participant) -> Result<&NodeConfig> {
        self.nodes
            .iter()
            .find(|n| n.participant == participant)
            .with_context(|| format!("Node {} is not part of the network", participant))
    }

    /// The container name of a node.
    pub fn container_name(&self, node: &NodeConfig) -> String {
        format!("{}-{}", self.container_prefix, node.participant)
    }

    /// The node whose RPC endpoint serves `node`'s balance.
    pub fn balance_endpoint<'a>(&'a self, node: &'a NodeConfig) -> &'a NodeConfig {
        node.balance_via
            .and_then(|via| self.participant(via).ok())
            .unwrap_or(node)
    }

    /// Validator nodes, in display order.
    pub fn validators(&self) -> impl Iterator<Item = &NodeConfig> {
        self.nodes.iter().filter(|n| n.validator)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_network() {
        let config = NetworkConfig::default();
        assert_eq!(config.nodes.len(), 5);
        assert!(config.validate().is_ok());
        assert_eq!(
            config
                .validators()
                .map(|n| n.participant)
                .collect::<Vec<_>>(),
            vec![Participant::Alice, Participant::Bob, Participant::Cassandra]
        );
    }

    #[test]
    fn test_node_lookup_is_case_insensitive() {
        let config = NetworkConfig::default();
        assert_eq!(config.node("Bob").unwrap().rpc_port, 8547);
        assert_eq!(config.node("elena").unwrap().rpc_port, 8553);
        assert!(config.node("mallory").is_err());
    }

    #[test]
    fn test_container_name() {
        let config = NetworkConfig::default();
        let driss = config.node("driss").unwrap();
        assert_eq!(config.container_name(driss), "benchy-driss");
    }

    #[test]
    fn test_balance_endpoint_routing() {
        let config = NetworkConfig::default();
        let bob = config.node("bob").unwrap();
        let alice = config.node("alice").unwrap();
        let elena = config.node("elena").unwrap();

        assert_eq!(config.balance_endpoint(bob).participant, Participant::Alice);
        assert_eq!(config.balance_endpoint(alice).participant, Participant::Alice);
        assert_eq!(
            config.balance_endpoint(elena).participant,
            Participant::Cassandra
        );
    }

    #[test]
    fn test_validate_rejects_duplicate_ports() {
        let mut config = NetworkConfig::default();
        config.nodes[1].rpc_port = config.nodes[0].rpc_port;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_dangling_balance_route() {
        let mut config = NetworkConfig::default();
        config.nodes.retain(|n| n.participant != Participant::Cassandra);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_toml_roundtrip_through_file() {
        let dir = tempdir::TempDir::new("benchy-config").unwrap();
        let path = dir.path().join(BENCHY_CONFIG_FILENAME);

        let mut config = NetworkConfig::default();
        config.balance_mode = BalanceMode::Chain;
        config.save_to_file(&path).unwrap();

        let loaded = NetworkConfig::load_from_file(&path).unwrap();
        assert_eq!(loaded, config);
    }

    #[test]
    fn test_load_missing_explicit_path_fails() {
        let dir = tempdir::TempDir::new("benchy-config").unwrap();
        let missing = dir.path().join("nope.toml");
        assert!(NetworkConfig::load(Some(&missing)).is_err());
    }

    #[test]
    fn test_load_merges_file_over_defaults() {
        let dir = tempdir::TempDir::new("benchy-config").unwrap();
        let path = dir.path().join(BENCHY_CONFIG_FILENAME);
        std::fs::write(&path, "container_prefix = \"demo\"\nbalance_mode = \"chain\"\n").unwrap();

        let config = NetworkConfig::load(Some(&path)).unwrap();
        assert_eq!(config.container_prefix, "demo");
        assert_eq!(config.balance_mode, BalanceMode::Chain);
        assert_eq!(config.nodes.len(), 5);
    }
}
