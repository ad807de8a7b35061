//! Reconciliation of live observations with the persistent ledger.
//!
//! Everything here is a pure function of its inputs. The monitor feeds in the
//! container and RPC facts it gathered, together with the ledger and the clock.

use crate::{
    balance::{BY_TOKEN_GRANT, BalanceDisplay},
    config::Participant,
    state::{PersistentState, SCENARIO1_TRANSFER_ETH},
};

/// Blocks a lagging node is assumed to be behind the network.
const LAG_BLOCKS: u64 = 2;

/// Period of the simulated mempool activity, in seconds.
const MEMPOOL_CYCLE_SECS: u64 = 30;

/// Genesis allocation of the funded participants, in ETH.
const INITIAL_BALANCE_ETH: f64 = 100.0;

/// Gas spent per ledger transaction by Cassandra, in ETH.
const CASSANDRA_TX_COST_ETH: f64 = 0.05;

/// Number of *other* nodes whose container is running.
pub fn peer_count(participant: Participant, running: bool, statuses: &[(Participant, bool)]) -> u64 {
    if !running {
        return 0;
    }

    statuses
        .iter()
        .filter(|(other, other_running)| *other != participant && *other_running)
        .count() as u64
}

/// Block height estimated from the ledger alone.
pub fn ledger_block_estimate(ledger: &PersistentState) -> u64 {
    let mut estimate: u64 = 0;
    if ledger.scenario1_executed {
        estimate = estimate.saturating_add(ledger.alice_transactions_sent);
    }
    if ledger.scenario2_executed {
        estimate = estimate.saturating_add(2);
    }
    if ledger.scenario3_executed {
        estimate = estimate.saturating_add(1);
    }
    estimate
}

/// The block height shown for a node.
pub fn block_height(
    participant: Participant,
    running: bool,
    real_block: Option<u64>,
    network_max: u64,
    ledger: &PersistentState,
) -> u64 {
    if !running {
        return 0;
    }

    let lagging = ledger.is_lagging(participant);

    match real_block {
        Some(block) if block > 0 => {
            if lagging && block < network_max && network_max > LAG_BLOCKS {
                network_max - LAG_BLOCKS
            } else {
                block
            }
        }
        _ => {
            let estimate = ledger_block_estimate(ledger);
            if lagging && estimate > LAG_BLOCKS {
                estimate - LAG_BLOCKS
            } else {
                estimate
            }
        }
    }
}

/// Track stopped containers and their catch-up. Returns whether the ledger changed.
pub fn observe_restart(
    ledger: &mut PersistentState,
    participant: Participant,
    running: bool,
    node_block: u64,
    network_max: u64,
) -> bool {
    if !running {
        let changed = ledger.restarted_nodes.insert(participant);
        if changed {
            tracing::info!(node = %participant, "Node stopped, marking it as lagging");
        }
        return changed;
    }

    if ledger.is_lagging(participant)
        && (network_max == 0 || node_block.saturating_add(1) >= network_max)
    {
        ledger.restarted_nodes.remove(&participant);
        tracing::info!(node = %participant, block = node_block, "Node caught up with the network");
        return true;
    }

    false
}

/// Infer executed scenarios from on-chain balances. Returns whether the ledger changed.
///
/// Observation only ever sets flags and raises counters.
pub fn observe_balances(
    ledger: &mut PersistentState,
    bob_eth: Option<f64>,
    elena_eth: Option<f64>,
) -> bool {
    if ledger.scenario3_executed {
        return false;
    }

    let mut changed = false;

    if let Some(bob) = bob_eth
        && bob > 0.05
        && !ledger.scenario1_executed
    {
        ledger.scenario1_executed = true;
        if ledger.alice_transactions_sent == 0 {
            // Float to int casts saturate.
            let transfers = ((bob + 1e-9) / SCENARIO1_TRANSFER_ETH).floor() as u64;
            ledger.alice_transactions_sent = transfers.saturating_mul(3);
        }
        if ledger.bob_eth_received == 0.0 {
            ledger.bob_eth_received = bob;
        }
        tracing::debug!(bob_eth = bob, "Detected scenario 1 from Bob's balance");
        changed = true;
    }

    if let Some(elena) = elena_eth {
        if elena > 2.5 {
            ledger.scenario1_executed = true;
            ledger.scenario2_executed = true;
            ledger.scenario3_executed = true;
            ledger.cassandra_transactions_sent = ledger.cassandra_transactions_sent.max(3);
            tracing::debug!(elena_eth = elena, "Detected scenario 3 from Elena's balance");
            changed = true;
        } else if elena > 1.5 && !ledger.scenario2_executed {
            ledger.scenario1_executed = true;
            ledger.scenario2_executed = true;
            ledger.cassandra_transactions_sent = ledger.cassandra_transactions_sent.max(2);
            tracing::debug!(elena_eth = elena, "Detected scenario 2 from Elena's balance");
            changed = true;
        }
    }

    changed
}

/// Simulated pool size, used when the node does not expose `txpool_status`.
pub fn estimated_mempool(
    participant: Participant,
    running: bool,
    lagging: bool,
    ledger: &PersistentState,
    now_secs: u64,
) -> u64 {
    if !running || !ledger.any_scenario() {
        return 0;
    }

    let cycle = now_secs % MEMPOOL_CYCLE_SECS;
    let base = 1;

    match participant {
        Participant::Alice if lagging => 0,
        Participant::Alice => base + cycle % 2,
        Participant::Bob => base + (cycle + 10) % 3,
        Participant::Cassandra => base + (cycle + 20) % 2,
        Participant::Driss | Participant::Elena => {
            if cycle < 15 {
                cycle % 2
            } else {
                0
            }
        }
    }
}

/// The balance the ledger says a participant should hold.
pub fn expected_balance(participant: Participant, ledger: &PersistentState) -> BalanceDisplay {
    match participant {
        Participant::Alice if ledger.scenario1_executed => BalanceDisplay::Eth(
            (INITIAL_BALANCE_ETH - ledger.alice_transactions_sent as f64 * 0.1).max(0.0),
        ),
        Participant::Bob if ledger.scenario1_executed && ledger.bob_eth_received > 0.0 => {
            BalanceDisplay::Eth(INITIAL_BALANCE_ETH + ledger.bob_eth_received)
        }
        Participant::Cassandra if ledger.scenario2_executed || ledger.scenario3_executed => {
            BalanceDisplay::Eth(
                (INITIAL_BALANCE_ETH
                    - ledger.cassandra_transactions_sent as f64 * CASSANDRA_TX_COST_ETH)
                    .max(0.0),
            )
        }
        Participant::Alice | Participant::Bob | Participant::Cassandra => {
            BalanceDisplay::Eth(INITIAL_BALANCE_ETH)
        }
        Participant::Driss if ledger.scenario2_executed => BalanceDisplay::Tokens {
            tokens: BY_TOKEN_GRANT,
            eth: None,
        },
        Participant::Elena if ledger.scenario3_executed => BalanceDisplay::Tokens {
            tokens: BY_TOKEN_GRANT,
            eth: (ledger.elena_eth_received > 0.0).then_some(ledger.elena_eth_received),
        },
        Participant::Elena if ledger.scenario2_executed => BalanceDisplay::Tokens {
            tokens: BY_TOKEN_GRANT,
            eth: None,
        },
        Participant::Driss | Participant::Elena => BalanceDisplay::Eth(0.0),
    }
}

#[cfg(test)]
mod tests {
    use alloy_core::primitives::U256;

    use super::*;
    use crate::balance::wei_to_eth;

    fn after_scenario(scenarios: &[u8]) -> PersistentState {
        let mut ledger = PersistentState::default();
        for scenario in scenarios {
            ledger.record_scenario(*scenario, None).unwrap();
        }
        ledger
    }

    fn lagging(participant: Participant, mut ledger: PersistentState) -> PersistentState {
        ledger.restarted_nodes.insert(participant);
        ledger
    }

    #[test]
    fn test_peer_count() {
        let statuses = [
            (Participant::Alice, true),
            (Participant::Bob, true),
            (Participant::Cassandra, false),
            (Participant::Driss, true),
            (Participant::Elena, true),
        ];
        assert_eq!(peer_count(Participant::Alice, true, &statuses), 3);
        assert_eq!(peer_count(Participant::Cassandra, false, &statuses), 0);
        assert!(peer_count(Participant::Bob, true, &statuses) <= statuses.len() as u64 - 1);
    }

    #[test]
    fn test_block_height_offline_is_zero() {
        let ledger = after_scenario(&[1]);
        assert_eq!(block_height(Participant::Alice, false, Some(42), 42, &ledger), 0);
    }

    #[test]
    fn test_block_height_uses_real_block() {
        let ledger = PersistentState::default();
        assert_eq!(block_height(Participant::Bob, true, Some(17), 20, &ledger), 17);
    }

    #[test]
    fn test_block_height_lagging_node() {
        let ledger = lagging(Participant::Alice, PersistentState::default());
        assert_eq!(block_height(Participant::Alice, true, Some(5), 20, &ledger), 18);
        // Caught up or tiny networks are shown as is.
        assert_eq!(block_height(Participant::Alice, true, Some(20), 20, &ledger), 20);
        assert_eq!(block_height(Participant::Alice, true, Some(1), 2, &ledger), 1);
    }

    #[test]
    fn test_block_height_ledger_fallback() {
        let ledger = after_scenario(&[1, 2, 3]);
        assert_eq!(ledger_block_estimate(&ledger), 6);
        assert_eq!(block_height(Participant::Driss, true, None, 0, &ledger), 6);
        assert_eq!(block_height(Participant::Driss, true, Some(0), 0, &ledger), 6);

        let ledger = lagging(Participant::Driss, ledger);
        assert_eq!(block_height(Participant::Driss, true, None, 0, &ledger), 4);
    }

    #[test]
    fn test_observe_restart() {
        let mut ledger = PersistentState::default();

        assert!(observe_restart(&mut ledger, Participant::Bob, false, 0, 10));
        assert!(ledger.is_lagging(Participant::Bob));
        assert!(!observe_restart(&mut ledger, Participant::Bob, false, 0, 10));

        // Still behind.
        assert!(!observe_restart(&mut ledger, Participant::Bob, true, 5, 10));
        assert!(ledger.is_lagging(Participant::Bob));

        assert!(observe_restart(&mut ledger, Participant::Bob, true, 9, 10));
        assert!(!ledger.is_lagging(Participant::Bob));

        assert!(!observe_restart(&mut ledger, Participant::Alice, true, 3, 10));
    }

    #[test]
    fn test_observe_restart_clears_without_network_blocks() {
        let mut ledger = lagging(Participant::Elena, PersistentState::default());
        assert!(observe_restart(&mut ledger, Participant::Elena, true, 0, 0));
        assert!(ledger.restarted_nodes.is_empty());
    }

    #[test]
    fn test_observe_balances_bob() {
        let mut ledger = PersistentState::default();
        assert!(observe_balances(&mut ledger, Some(0.3), None));
        assert!(ledger.scenario1_executed);
        assert_eq!(ledger.alice_transactions_sent, 9);
        assert_eq!(ledger.bob_eth_received, 0.3);

        // Already recorded.
        assert!(!observe_balances(&mut ledger, Some(0.6), None));
        assert_eq!(ledger.alice_transactions_sent, 9);
    }

    #[test]
    fn test_observe_balances_keeps_recorded_counters() {
        let mut ledger = PersistentState {
            alice_transactions_sent: 2,
            ..Default::default()
        };
        assert!(observe_balances(&mut ledger, Some(1.0), None));
        assert_eq!(ledger.alice_transactions_sent, 2);
        assert_eq!(ledger.bob_eth_received, 1.0);

        let mut ledger = PersistentState {
            bob_eth_received: 0.2,
            ..Default::default()
        };
        assert!(observe_balances(&mut ledger, Some(0.3), None));
        assert_eq!(ledger.alice_transactions_sent, 9);
        assert_eq!(ledger.bob_eth_received, 0.2);
    }

    #[test]
    fn test_observe_balances_huge_bob_balance() {
        let huge = wei_to_eth(U256::from(1u64) << 200usize);
        let mut ledger = PersistentState::default();

        assert!(observe_balances(&mut ledger, Some(huge), None));
        assert_eq!(ledger.alice_transactions_sent, u64::MAX);
        assert_eq!(ledger.bob_eth_received, huge);

        ledger.record_scenario(3, None).unwrap();
        assert_eq!(ledger_block_estimate(&ledger), u64::MAX);
        assert_eq!(block_height(Participant::Driss, true, None, 0, &ledger), u64::MAX);

        let ledger = lagging(Participant::Driss, ledger);
        assert_eq!(
            block_height(Participant::Driss, true, None, 0, &ledger),
            u64::MAX - LAG_BLOCKS
        );
        assert_eq!(expected_balance(Participant::Alice, &ledger), BalanceDisplay::Eth(0.0));
    }

    #[test]
    fn test_observe_balances_elena() {
        let mut ledger = PersistentState::default();
        assert!(observe_balances(&mut ledger, None, Some(2.0)));
        assert!(ledger.scenario2_executed && ledger.scenario1_executed);
        assert!(!ledger.scenario3_executed);
        assert_eq!(ledger.cassandra_transactions_sent, 2);

        assert!(observe_balances(&mut ledger, None, Some(3.0)));
        assert!(ledger.scenario3_executed);
        assert_eq!(ledger.cassandra_transactions_sent, 3);

        // Nothing moves once scenario 3 is recorded.
        assert!(!observe_balances(&mut ledger, Some(5.0), Some(10.0)));
    }

    #[test]
    fn test_observe_balances_never_lowers_counters() {
        let mut ledger = PersistentState {
            cassandra_transactions_sent: 7,
            ..Default::default()
        };
        observe_balances(&mut ledger, None, Some(2.6));
        assert_eq!(ledger.cassandra_transactions_sent, 7);
    }

    #[test]
    fn test_observe_balances_ignores_small_amounts() {
        let mut ledger = PersistentState::default();
        assert!(!observe_balances(&mut ledger, Some(0.01), Some(1.0)));
        assert_eq!(ledger, PersistentState::default());
    }

    #[test]
    fn test_estimated_mempool() {
        let ledger = after_scenario(&[1]);

        assert_eq!(estimated_mempool(Participant::Alice, false, false, &ledger, 7), 0);
        assert_eq!(
            estimated_mempool(Participant::Alice, true, false, &PersistentState::default(), 7),
            0
        );

        assert_eq!(estimated_mempool(Participant::Alice, true, false, &ledger, 7), 2);
        assert_eq!(estimated_mempool(Participant::Alice, true, true, &ledger, 7), 0);
        assert_eq!(estimated_mempool(Participant::Bob, true, false, &ledger, 7), 3);
        assert_eq!(estimated_mempool(Participant::Cassandra, true, false, &ledger, 7), 2);
        assert_eq!(estimated_mempool(Participant::Driss, true, false, &ledger, 7), 1);
        assert_eq!(estimated_mempool(Participant::Elena, true, false, &ledger, 37), 1);
        assert_eq!(estimated_mempool(Participant::Elena, true, false, &ledger, 20), 0);
    }

    #[test]
    fn test_expected_balance_fresh_network() {
        let ledger = PersistentState::default();
        assert_eq!(expected_balance(Participant::Alice, &ledger), BalanceDisplay::Eth(100.0));
        assert_eq!(expected_balance(Participant::Bob, &ledger), BalanceDisplay::Eth(100.0));
        assert_eq!(expected_balance(Participant::Cassandra, &ledger), BalanceDisplay::Eth(100.0));
        assert_eq!(expected_balance(Participant::Driss, &ledger), BalanceDisplay::Eth(0.0));
        assert_eq!(expected_balance(Participant::Elena, &ledger), BalanceDisplay::Eth(0.0));
    }

    #[test]
    fn test_expected_balance_after_scenarios() {
        let ledger = after_scenario(&[1]);
        assert_eq!(
            expected_balance(Participant::Alice, &ledger).to_string(),
            "99.7000 ETH"
        );
        assert_eq!(
            expected_balance(Participant::Bob, &ledger).to_string(),
            "100.3000 ETH"
        );

        let ledger = after_scenario(&[1, 2]);
        assert_eq!(
            expected_balance(Participant::Cassandra, &ledger).to_string(),
            "99.9000 ETH"
        );
        assert_eq!(
            expected_balance(Participant::Driss, &ledger).to_string(),
            "1000 BY tokens"
        );
        assert_eq!(
            expected_balance(Participant::Elena, &ledger).to_string(),
            "1000 BY tokens"
        );

        let ledger = after_scenario(&[1, 2, 3]);
        assert_eq!(
            expected_balance(Participant::Elena, &ledger).to_string(),
            "1000 BY tokens + 1.0 ETH"
        );
    }

    #[test]
    fn test_expected_balance_is_floored() {
        let ledger = PersistentState {
            scenario1_executed: true,
            alice_transactions_sent: 5000,
            ..Default::default()
        };
        assert_eq!(expected_balance(Participant::Alice, &ledger), BalanceDisplay::Eth(0.0));
    }
}
