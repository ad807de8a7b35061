//! Aggregation of container and chain facts into a per-node status report.

use std::path::PathBuf;

use alloy_core::primitives::{Address, U256};
use anyhow::Result;
use futures::future::join_all;

use crate::{
    balance::{BalanceDisplay, wei_to_eth},
    config::{BalanceMode, ClientKind, NetworkConfig, NodeConfig, Participant},
    probe::{ChainProbe, ChainStatus, ContainerProbe, ContainerStatus, MemoryUsage},
    reconcile,
    state::{PersistentState, StateStore},
};

/// Liveness of a node as shown in the status column.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeStatus {
    /// Container running and RPC answering.
    Online,
    /// Container running, RPC silent.
    Unresponsive,
    /// Container stopped or missing.
    Offline,
}

/// Status record of a single node.
#[derive(Debug, Clone, PartialEq)]
pub struct NodeReport {
    pub participant: Participant,
    pub client: ClientKind,
    pub container_name: String,
    pub validator: bool,
    pub status: NodeStatus,
    pub cpu_percent: f64,
    pub memory: MemoryUsage,
    pub peers: u64,
    pub block: u64,
    pub transaction_count: Option<u64>,
    pub address: Address,
    pub balance: BalanceDisplay,
    pub mempool: u64,
    /// Seen stopped and not caught up yet.
    pub lagging: bool,
}

/// Status of the whole network at one instant.
#[derive(Debug, Clone, PartialEq)]
pub struct NetworkReport {
    pub nodes: Vec<NodeReport>,
    pub consensus: String,
    pub network_id: u64,
    pub validators: Vec<Participant>,
    /// Highest block reported by any node.
    pub network_max: u64,
    pub ledger: PersistentState,
    pub state_file: PathBuf,
}

impl NetworkReport {
    pub fn node(&self, participant: Participant) -> Option<&NodeReport> {
        self.nodes.iter().find(|n| n.participant == participant)
    }
}

/// What `eth_accounts` revealed about a node.
#[derive(Debug, Clone, PartialEq)]
pub enum AccountStatus {
    /// First account of the node and its balance, if the balance query answered.
    Found { address: Address, balance: Option<U256> },
    /// The node answered but manages no account.
    NoAccounts,
    /// The node could not be queried.
    Unavailable(String),
}

#[derive(Debug, Clone, PartialEq)]
pub struct AccountReport {
    pub participant: Participant,
    pub client: ClientKind,
    pub status: AccountStatus,
}

/// Per-node facts gathered before reconciliation.
struct Observation<'a> {
    node: &'a NodeConfig,
    container_name: String,
    url: String,
    container: ContainerStatus,
    /// Only `block_number` is known at this point.
    chain: ChainStatus,
}

impl Observation<'_> {
    fn up(&self) -> bool {
        self.container.is_up()
    }
}

/// Observes the network through a container probe and a chain probe.
pub struct NetworkMonitor<C, R> {
    config: NetworkConfig,
    store: StateStore,
    containers: C,
    chain: R,
}

impl<C: ContainerProbe, R: ChainProbe> NetworkMonitor<C, R> {
    pub fn new(config: NetworkConfig, containers: C, chain: R) -> Self {
        let store = StateStore::new(config.state_file.clone());
        Self {
            config,
            store,
            containers,
            chain,
        }
    }

    /// Take a snapshot of every node.
    ///
    /// Unreachable containers and nodes never fail the snapshot. Only
    /// configuration and state file errors are returned.
    pub async fn snapshot(&self, now_secs: u64) -> Result<NetworkReport> {
        let observations = self.observe().await?;

        let network_max = observations
            .iter()
            .filter_map(|o| o.chain.block_number)
            .max()
            .unwrap_or(0);

        let bob_eth = self.observed_eth(Participant::Bob, &observations).await;
        let elena_eth = self.observed_eth(Participant::Elena, &observations).await;

        let restarts: Vec<(Participant, bool, u64)> = observations
            .iter()
            .map(|o| (o.node.participant, o.up(), o.chain.block_number.unwrap_or(0)))
            .collect();

        let ledger = self
            .store
            .spawn_update(move |ledger| {
                for (participant, up, block) in restarts {
                    reconcile::observe_restart(ledger, participant, up, block, network_max);
                }
                reconcile::observe_balances(ledger, bob_eth, elena_eth);
            })
            .await?;

        let running: Vec<(Participant, bool)> = observations
            .iter()
            .map(|o| (o.node.participant, o.up()))
            .collect();

        let nodes = join_all(
            observations
                .iter()
                .map(|o| self.node_report(o, &observations, &running, network_max, &ledger, now_secs)),
        )
        .await;

        tracing::debug!(
            network_max,
            online = nodes.iter().filter(|n| n.status == NodeStatus::Online).count(),
            "Snapshot taken"
        );

        Ok(NetworkReport {
            nodes,
            consensus: self.config.consensus.clone(),
            network_id: self.config.network_id,
            validators: self.config.validators().map(|n| n.participant).collect(),
            network_max,
            ledger,
            state_file: self.store.path().to_path_buf(),
        })
    }

    /// Query container status, then block numbers of running containers, concurrently.
    async fn observe(&self) -> Result<Vec<Observation<'_>>> {
        let nodes = &self.config.nodes;

        let container_names: Vec<String> =
            nodes.iter().map(|n| self.config.container_name(n)).collect();
        let urls = nodes
            .iter()
            .map(|n| n.host_rpc_url().map(String::from))
            .collect::<Result<Vec<_>>>()?;

        let containers = join_all(
            container_names
                .iter()
                .map(|name| self.containers.container_status(name)),
        )
        .await;

        let blocks = join_all(urls.iter().zip(&containers).map(|(url, container)| async move {
            if container.is_up() {
                self.chain.block_number(url).await
            } else {
                None
            }
        }))
        .await;

        Ok(nodes
            .iter()
            .zip(container_names)
            .zip(urls)
            .zip(containers)
            .zip(blocks)
            .map(|((((node, container_name), url), container), block_number)| Observation {
                node,
                container_name,
                url,
                container,
                chain: ChainStatus {
                    block_number,
                    ..Default::default()
                },
            })
            .collect())
    }

    /// Balance of a participant in ETH, read through its balance endpoint.
    async fn observed_eth(&self, participant: Participant, observations: &[Observation<'_>]) -> Option<f64> {
        let node = self.config.participant(participant).ok()?;
        let wei = self.endpoint_balance(node, observations).await?;
        Some(wei_to_eth(wei))
    }

    /// Balance of a node's account, asked to the node serving it. `None` when that node is down.
    async fn endpoint_balance(&self, node: &NodeConfig, observations: &[Observation<'_>]) -> Option<U256> {
        let endpoint = self.config.balance_endpoint(node);
        let observation = observations
            .iter()
            .find(|o| o.node.participant == endpoint.participant)?;

        if !observation.up() {
            return None;
        }

        self.chain.balance(&observation.url, node.address).await
    }

    async fn node_report(
        &self,
        o: &Observation<'_>,
        observations: &[Observation<'_>],
        running: &[(Participant, bool)],
        network_max: u64,
        ledger: &PersistentState,
        now_secs: u64,
    ) -> NodeReport {
        let node = o.node;
        let participant = node.participant;
        let lagging = ledger.is_lagging(participant);

        let status = match (o.up(), o.chain.block_number) {
            (false, _) => NodeStatus::Offline,
            (true, Some(_)) => NodeStatus::Online,
            (true, None) => NodeStatus::Unresponsive,
        };

        let balance = match self.config.balance_mode {
            BalanceMode::Ledger => reconcile::expected_balance(participant, ledger),
            BalanceMode::Chain => self
                .endpoint_balance(node, observations)
                .await
                .map_or(BalanceDisplay::Unknown, BalanceDisplay::from_wei),
        };

        let mut report = NodeReport {
            participant,
            client: node.client,
            container_name: o.container_name.clone(),
            validator: node.validator,
            status,
            cpu_percent: 0.0,
            memory: MemoryUsage::default(),
            peers: 0,
            block: 0,
            transaction_count: None,
            address: node.address,
            balance,
            mempool: 0,
            lagging,
        };

        if status == NodeStatus::Offline {
            return report;
        }

        report.cpu_percent = o.container.cpu_percent;
        report.memory = o.container.memory.unwrap_or_default();
        report.block =
            reconcile::block_height(participant, true, o.chain.block_number, network_max, ledger);

        if status == NodeStatus::Unresponsive {
            return report;
        }

        report.peers = reconcile::peer_count(participant, true, running);

        let chain = self.chain_status(o).await;
        report.transaction_count = chain.transaction_count;
        report.mempool = chain.pending_transactions.unwrap_or_else(|| {
            reconcile::estimated_mempool(participant, true, lagging, ledger, now_secs)
        });

        report
    }

    /// Complete the chain fact of an answering node.
    async fn chain_status(&self, o: &Observation<'_>) -> ChainStatus {
        let (transaction_count, pending_transactions) = futures::join!(
            self.chain.transaction_count(&o.url, o.node.address),
            self.chain.pending_transactions(&o.url),
        );

        ChainStatus {
            transaction_count,
            pending_transactions,
            ..o.chain
        }
    }

    /// List the first account managed by every node, with its balance.
    pub async fn accounts(&self) -> Result<Vec<AccountReport>> {
        let urls = self
            .config
            .nodes
            .iter()
            .map(|n| n.host_rpc_url().map(String::from))
            .collect::<Result<Vec<_>>>()?;

        Ok(join_all(self.config.nodes.iter().zip(&urls).map(|(node, url)| async move {
            let status = match self.chain.accounts(url).await {
                Ok(accounts) => match accounts.first() {
                    Some(&address) => AccountStatus::Found {
                        address,
                        balance: self.chain.balance(url, address).await,
                    },
                    None => AccountStatus::NoAccounts,
                },
                Err(e) => {
                    tracing::debug!(node = %node.participant, error = %e, "eth_accounts failed");
                    AccountStatus::Unavailable(format!("{:#}", e))
                }
            };

            AccountReport {
                participant: node.participant,
                client: node.client,
                status,
            }
        }))
        .await)
    }
}
