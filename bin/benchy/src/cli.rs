use std::path::PathBuf;

use benchy_devnet::{BalanceMode, Scenario};
use clap::{Parser, Subcommand};
use tracing::level_filters::LevelFilter;

/// Refresh period used when `--update` is given without a usable value.
pub const DEFAULT_REFRESH_SECS: u64 = 60;

#[derive(Parser)]
#[command(name = "benchy")]
#[command(
    author,
    version,
    about = "Monitor the benchy demo network and play its scenarios"
)]
pub struct Cli {
    /// The verbosity level.
    #[arg(short, long, global = true, env = "BENCHY_VERBOSITY", default_value_t = LevelFilter::INFO)]
    pub verbosity: LevelFilter,

    /// Path to a Benchy.toml configuration file, or to the directory holding it.
    ///
    /// If not provided, ./Benchy.toml is used when present, otherwise the
    /// built-in five-node network.
    #[arg(short, long, global = true, env = "BENCHY_CONFIG")]
    pub config: Option<PathBuf>,

    /// Where the balance column comes from: the scenario ledger or the chain.
    #[arg(long, global = true)]
    pub balance_mode: Option<BalanceMode>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Show the status of every node.
    Infos {
        /// Keep refreshing every SECS seconds until Ctrl+C (0 or no value means 60).
        #[arg(short, long, value_name = "SECS", num_args = 0..=1, default_missing_value = "60")]
        update: Option<u64>,
    },

    /// Run a demo scenario (0 to 3).
    Scenario {
        /// The scenario number.
        scenario: Scenario,

        /// Number of transfers sent by scenario 1.
        #[arg(long, default_value_t = 3, value_parser = clap::value_parser!(u32).range(1..))]
        transfers: u32,

        /// Seconds between two scenario 1 transfers.
        #[arg(long, value_name = "SECS", default_value_t = 10)]
        interval: u64,

        /// Wait up to SECS seconds for the sending node to answer.
        #[arg(long, value_name = "SECS", default_value_t = 0)]
        wait_ready: u64,

        /// Wait for every transfer to be mined.
        #[arg(long)]
        confirm: bool,

        /// Show the network status afterwards, refreshing every SECS seconds.
        #[arg(short, long, value_name = "SECS", num_args = 0..=1, default_missing_value = "60")]
        update: Option<u64>,
    },

    /// List the first account managed by every node.
    Accounts,

    /// Inspect or reset the persistent state file.
    State {
        #[command(subcommand)]
        action: StateAction,
    },
}

#[derive(Debug, Subcommand)]
pub enum StateAction {
    /// Print the recorded scenarios and counters.
    Show,
    /// Delete the state file.
    Reset,
}

/// Seconds between two refreshes.
pub fn refresh_period(update: u64) -> u64 {
    if update == 0 {
        DEFAULT_REFRESH_SECS
    } else {
        update
    }
}
