//! Printable forms of the monitor output.

use std::{fmt, path::PathBuf};

use comfy_table::{Cell, Color, Table, presets::UTF8_FULL};

use crate::{
    balance::wei_to_eth,
    monitor::{AccountReport, AccountStatus, NetworkReport, NodeReport, NodeStatus},
    state::PersistentState,
};

impl NodeStatus {
    pub fn label(&self) -> &'static str {
        match self {
            NodeStatus::Online => "🟢 ON",
            NodeStatus::Unresponsive => "🟡 RPC DOWN",
            NodeStatus::Offline => "🔴 OFF",
        }
    }

    fn color(&self) -> Color {
        match self {
            NodeStatus::Online => Color::Green,
            NodeStatus::Unresponsive => Color::Yellow,
            NodeStatus::Offline => Color::Red,
        }
    }
}

impl fmt::Display for NodeStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

fn new_table(header: Vec<&str>) -> Table {
    let mut table = Table::new();
    table.load_preset(UTF8_FULL).set_header(header);
    table
}

fn node_row(node: &NodeReport) -> Vec<Cell> {
    let mut name = node.participant.title().to_string();
    if node.validator {
        name.push_str(" ⛏");
    }
    if node.lagging && node.status != NodeStatus::Offline {
        name.push_str(" (syncing)");
    }

    vec![
        Cell::new(name),
        Cell::new(node.client.title()),
        Cell::new(node.status).fg(node.status.color()),
        Cell::new(format!("#{}", node.block)),
        Cell::new(node.peers),
        Cell::new(format!("{:.2}%", node.cpu_percent)),
        Cell::new(node.memory),
        Cell::new(node.address),
        Cell::new(node.balance),
        Cell::new(format!("{} txs", node.mempool)),
    ]
}

impl fmt::Display for NetworkReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut table = new_table(vec![
            "Node", "Client", "Status", "Block", "Peers", "CPU%", "Memory", "Address", "Balance",
            "Mempool",
        ]);
        for node in &self.nodes {
            table.add_row(node_row(node));
        }
        writeln!(f, "{table}")?;

        let validators = self
            .validators
            .iter()
            .map(|p| p.title())
            .collect::<Vec<_>>()
            .join(", ");
        writeln!(
            f,
            "🔗 Consensus: {} | Network ID: {} | Validators: {}",
            self.consensus, self.network_id, validators
        )?;

        if self.ledger.any_scenario() {
            writeln!(
                f,
                "💾 Persistent state: {} ({})",
                self.ledger.summary(),
                self.state_file.display()
            )?;
        }

        Ok(())
    }
}

/// The `state show` output.
pub struct StateReport {
    pub state: PersistentState,
    pub path: PathBuf,
}

impl fmt::Display for StateReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let flag = |executed: bool| if executed { "executed" } else { "not executed" };

        writeln!(f, "State file: {}", self.path.display())?;
        writeln!(f, "  Scenario 1: {}", flag(self.state.scenario1_executed))?;
        writeln!(f, "  Scenario 2: {}", flag(self.state.scenario2_executed))?;
        writeln!(f, "  Scenario 3: {}", flag(self.state.scenario3_executed))?;
        writeln!(f, "  Alice transactions sent: {}", self.state.alice_transactions_sent)?;
        writeln!(f, "  Bob ETH received: {:.1}", self.state.bob_eth_received)?;
        writeln!(
            f,
            "  Cassandra transactions sent: {}",
            self.state.cassandra_transactions_sent
        )?;
        writeln!(f, "  Elena ETH received: {:.1}", self.state.elena_eth_received)?;

        if self.state.restarted_nodes.is_empty() {
            write!(f, "  Lagging nodes: none")
        } else {
            let lagging = self
                .state
                .restarted_nodes
                .iter()
                .map(|p| p.title())
                .collect::<Vec<_>>()
                .join(", ");
            write!(f, "  Lagging nodes: {}", lagging)
        }
    }
}

/// Table of the accounts found on every node.
pub struct AccountsReport<'a>(pub &'a [AccountReport]);

impl fmt::Display for AccountsReport<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut table = new_table(vec!["Node", "Client", "Account", "Balance"]);

        for account in self.0 {
            let (address, balance) = match &account.status {
                AccountStatus::Found { address, balance } => (
                    address.to_string(),
                    balance.map_or("N/A".to_string(), |wei| format!("{:.4} ETH", wei_to_eth(wei))),
                ),
                AccountStatus::NoAccounts => ("no accounts".to_string(), "-".to_string()),
                AccountStatus::Unavailable(reason) => (format!("unavailable: {}", reason), "-".to_string()),
            };

            table.add_row(vec![
                Cell::new(account.participant.title()),
                Cell::new(account.client.title()),
                Cell::new(address),
                Cell::new(balance),
            ]);
        }

        write!(f, "{table}")
    }
}
