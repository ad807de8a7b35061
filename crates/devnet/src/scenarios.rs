//! Scripted demo scenarios played against the network.

use std::{fmt, time::Duration};

use alloy_core::primitives::U256;
use anyhow::{Context, Result};

use crate::{
    balance::{eth_to_wei, wei_to_eth},
    config::{NetworkConfig, NodeConfig, Participant},
    probe::{ChainProbe, TransferSender},
    rpc,
    state::{
        DEFAULT_SCENARIO1_TRANSFERS, PersistentState, SCENARIO1_TRANSFER_ETH,
        SCENARIO3_TRANSFER_ETH, StateStore,
    },
};

/// A demo scenario, selected by number.
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display, strum::EnumString)]
pub enum Scenario {
    /// Check that the validators are funded.
    #[strum(serialize = "0")]
    ValidatorCheck,
    /// Alice sends a series of 0.1 ETH transfers to Bob.
    #[strum(serialize = "1")]
    AliceToBob,
    /// Cassandra deploys the BY token and grants it to Driss and Elena.
    #[strum(serialize = "2")]
    TokenDeployment,
    /// Cassandra sends 1 ETH to Elena.
    #[strum(serialize = "3")]
    CassandraToElena,
}

impl Scenario {
    pub fn number(&self) -> u8 {
        match self {
            Scenario::ValidatorCheck => 0,
            Scenario::AliceToBob => 1,
            Scenario::TokenDeployment => 2,
            Scenario::CassandraToElena => 3,
        }
    }

    pub fn description(&self) -> &'static str {
        match self {
            Scenario::ValidatorCheck => "Validator balance check",
            Scenario::AliceToBob => "Alice pays Bob",
            Scenario::TokenDeployment => "BY token deployment",
            Scenario::CassandraToElena => "Cassandra pays Elena",
        }
    }
}

/// Knobs of a scenario run.
#[derive(Debug, Clone, Copy)]
pub struct ScenarioOptions {
    /// Transfers sent by scenario 1.
    pub transfers: u32,
    /// Pause between two scenario 1 transfers.
    pub interval: Duration,
    /// How long to wait for the sending node to come online. Zero checks once.
    pub ready_timeout_secs: u64,
    /// Wait for each transfer to be mined before counting it as a success.
    pub confirm: bool,
}

impl Default for ScenarioOptions {
    fn default() -> Self {
        Self {
            transfers: DEFAULT_SCENARIO1_TRANSFERS,
            interval: Duration::from_secs(10),
            ready_timeout_secs: 0,
            confirm: false,
        }
    }
}

/// Balance of a participant after a run. `None` when the node did not answer.
#[derive(Debug, Clone, PartialEq)]
pub struct ParticipantBalance {
    pub participant: Participant,
    pub balance: Option<U256>,
}

/// Result of a scenario run.
#[derive(Debug, Clone, PartialEq)]
pub struct ScenarioOutcome {
    pub scenario: Scenario,
    pub tx_hashes: Vec<String>,
    pub succeeded: u32,
    pub failed: u32,
    pub balances: Vec<ParticipantBalance>,
    /// The persistent state once the run was recorded.
    pub state: PersistentState,
}

impl fmt::Display for ScenarioOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "Scenario {} ({}): {} succeeded, {} failed",
            self.scenario,
            self.scenario.description(),
            self.succeeded,
            self.failed
        )?;

        for hash in &self.tx_hashes {
            writeln!(f, "  tx {}", hash)?;
        }

        for entry in &self.balances {
            match entry.balance {
                Some(wei) => writeln!(
                    f,
                    "  {}: {:.4} ETH",
                    entry.participant.title(),
                    wei_to_eth(wei)
                )?,
                None => writeln!(f, "  {}: N/A", entry.participant.title())?,
            }
        }

        write!(f, "  State: {}", self.state.summary())
    }
}

/// Runs scenarios against the configured network and records them.
pub struct ScenarioRunner<R> {
    config: NetworkConfig,
    chain: R,
    store: StateStore,
}

impl<R: ChainProbe + TransferSender> ScenarioRunner<R> {
    pub fn new(config: NetworkConfig, chain: R) -> Self {
        let store = StateStore::new(config.state_file.clone());
        Self {
            config,
            chain,
            store,
        }
    }

    pub async fn run(&self, scenario: Scenario, options: &ScenarioOptions) -> Result<ScenarioOutcome> {
        tracing::info!(scenario = %scenario, description = scenario.description(), "Running scenario");

        let outcome = match scenario {
            Scenario::ValidatorCheck => self.validator_check().await?,
            Scenario::AliceToBob => self.alice_to_bob(options).await?,
            Scenario::TokenDeployment => self.token_deployment(options).await?,
            Scenario::CassandraToElena => self.cassandra_to_elena(options).await?,
        };

        tracing::info!(
            scenario = %scenario,
            succeeded = outcome.succeeded,
            failed = outcome.failed,
            "Scenario finished"
        );

        Ok(outcome)
    }

    /// Fail unless the participant's node answers `eth_blockNumber`.
    async fn require_online(&self, node: &NodeConfig, options: &ScenarioOptions) -> Result<String> {
        let url = String::from(node.host_rpc_url()?);
        let name = node.participant.title();

        if options.ready_timeout_secs > 0 {
            let chain = &self.chain;
            let endpoint = url.as_str();
            rpc::wait_until_ready(name, options.ready_timeout_secs, move || async move {
                chain
                    .block_number(endpoint)
                    .await
                    .map(|_| ())
                    .with_context(|| format!("{} is not answering", name))
            })
            .await?;
        } else if self.chain.block_number(&url).await.is_none() {
            anyhow::bail!("{} is offline, cannot run the scenario", name);
        }

        Ok(url)
    }

    async fn balance_of(&self, participant: Participant) -> ParticipantBalance {
        let balance = match self.config.participant(participant) {
            Ok(node) => {
                let endpoint = self.config.balance_endpoint(node);
                match endpoint.host_rpc_url() {
                    Ok(url) => self.chain.balance(url.as_str(), node.address).await,
                    Err(_) => None,
                }
            }
            Err(_) => None,
        };

        ParticipantBalance {
            participant,
            balance,
        }
    }

    async fn balances_of(&self, participants: &[Participant]) -> Vec<ParticipantBalance> {
        futures::future::join_all(participants.iter().map(|p| self.balance_of(*p))).await
    }

    /// Send a transfer, and optionally wait for it to be mined.
    async fn transfer(
        &self,
        url: &str,
        from: &NodeConfig,
        to: &NodeConfig,
        eth: f64,
        options: &ScenarioOptions,
    ) -> Result<String> {
        let tx_hash = self
            .chain
            .send_transfer(url, from.address, to.address, eth_to_wei(eth))
            .await?;

        if options.confirm {
            self.chain.confirm_transfer(url, &tx_hash).await?;
        }

        tracing::info!(
            from = %from.participant,
            to = %to.participant,
            eth,
            tx_hash = %tx_hash,
            "Transfer sent"
        );
        Ok(tx_hash)
    }

    async fn validator_check(&self) -> Result<ScenarioOutcome> {
        let validators: Vec<Participant> = self.config.validators().map(|n| n.participant).collect();
        let balances = self.balances_of(&validators).await;

        let funded = balances
            .iter()
            .filter(|b| b.balance.is_some_and(|wei| !wei.is_zero()))
            .count() as u32;

        for entry in balances.iter().filter(|b| !b.balance.is_some_and(|wei| !wei.is_zero())) {
            tracing::warn!(node = %entry.participant, "Validator has no funds");
        }

        Ok(ScenarioOutcome {
            scenario: Scenario::ValidatorCheck,
            tx_hashes: Vec::new(),
            succeeded: funded,
            failed: balances.len() as u32 - funded,
            balances,
            state: self.store.load()?,
        })
    }

    async fn alice_to_bob(&self, options: &ScenarioOptions) -> Result<ScenarioOutcome> {
        if options.transfers == 0 {
            anyhow::bail!("Scenario 1 needs at least one transfer");
        }

        let alice = self.config.participant(Participant::Alice)?;
        let bob = self.config.participant(Participant::Bob)?;
        let url = self.require_online(alice, options).await?;

        let mut tx_hashes = Vec::new();
        let mut failed = 0;

        for i in 0..options.transfers {
            if i > 0 && !options.interval.is_zero() {
                tokio::time::sleep(options.interval).await;
            }

            match self
                .transfer(&url, alice, bob, SCENARIO1_TRANSFER_ETH, options)
                .await
            {
                Ok(tx_hash) => tx_hashes.push(tx_hash),
                Err(e) => {
                    failed += 1;
                    tracing::warn!(attempt = i + 1, error = %e, "Transfer from Alice to Bob failed");
                }
            }
        }

        let succeeded = tx_hashes.len() as u32;
        if succeeded == 0 {
            anyhow::bail!(
                "None of the {} transfers from Alice to Bob succeeded",
                options.transfers
            );
        }

        let state = self.store.spawn_record_scenario(1, Some(succeeded)).await?;

        Ok(ScenarioOutcome {
            scenario: Scenario::AliceToBob,
            tx_hashes,
            succeeded,
            failed,
            balances: self
                .balances_of(&[Participant::Alice, Participant::Bob])
                .await,
            state,
        })
    }

    async fn token_deployment(&self, options: &ScenarioOptions) -> Result<ScenarioOutcome> {
        let cassandra = self.config.participant(Participant::Cassandra)?;
        self.require_online(cassandra, options).await?;

        let state = self.store.spawn_record_scenario(2, None).await?;

        Ok(ScenarioOutcome {
            scenario: Scenario::TokenDeployment,
            tx_hashes: Vec::new(),
            succeeded: 1,
            failed: 0,
            balances: Vec::new(),
            state,
        })
    }

    async fn cassandra_to_elena(&self, options: &ScenarioOptions) -> Result<ScenarioOutcome> {
        let cassandra = self.config.participant(Participant::Cassandra)?;
        let elena = self.config.participant(Participant::Elena)?;
        let url = self.require_online(cassandra, options).await?;

        let tx_hash = self
            .transfer(&url, cassandra, elena, SCENARIO3_TRANSFER_ETH, options)
            .await
            .context("Transfer from Cassandra to Elena failed")?;

        let state = self.store.spawn_record_scenario(3, None).await?;

        Ok(ScenarioOutcome {
            scenario: Scenario::CassandraToElena,
            tx_hashes: vec![tx_hash],
            succeeded: 1,
            failed: 0,
            balances: self
                .balances_of(&[Participant::Driss, Participant::Elena])
                .await,
            state,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scenario_from_str() {
        assert_eq!("0".parse::<Scenario>().unwrap(), Scenario::ValidatorCheck);
        assert_eq!("3".parse::<Scenario>().unwrap(), Scenario::CassandraToElena);
        assert!("4".parse::<Scenario>().is_err());
        assert!("one".parse::<Scenario>().is_err());
    }

    #[test]
    fn test_scenario_display_matches_number() {
        for scenario in [
            Scenario::ValidatorCheck,
            Scenario::AliceToBob,
            Scenario::TokenDeployment,
            Scenario::CassandraToElena,
        ] {
            assert_eq!(scenario.to_string(), scenario.number().to_string());
        }
    }

    #[test]
    fn test_outcome_display() {
        let mut state = PersistentState::default();
        state.record_scenario(1, Some(2)).unwrap();

        let outcome = ScenarioOutcome {
            scenario: Scenario::AliceToBob,
            tx_hashes: vec!["0xaa".to_string(), "0xbb".to_string()],
            succeeded: 2,
            failed: 1,
            balances: vec![ParticipantBalance {
                participant: Participant::Bob,
                balance: Some(eth_to_wei(100.2)),
            }],
            state,
        };

        let output = outcome.to_string();
        assert!(output.starts_with("Scenario 1 (Alice pays Bob): 2 succeeded, 1 failed"));
        assert!(output.contains("tx 0xbb"));
        assert!(output.contains("Bob: 100.2000 ETH"));
        assert!(output.contains("Alice_tx=2, Bob_ETH=0.2"));
    }
}
