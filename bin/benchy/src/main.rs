//! benchy is a CLI tool to watch a small multi-node Ethereum demo network and play its scenarios.

mod cli;

use std::time::Duration;

use anyhow::Result;
use benchy_devnet::{
    AccountsReport, BenchyDocker, ChainProbe, ContainerProbe, NetworkConfig, NetworkMonitor,
    RpcChainProbe, ScenarioOptions, ScenarioRunner, StateReport, StateStore,
};
use chrono::Utc;
use clap::Parser;

use cli::{Cli, Command, StateAction, refresh_period};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize the logger.
    tracing_subscriber::fmt()
        .with_max_level(cli.verbosity)
        .init();

    let mut config = NetworkConfig::load(cli.config.as_deref())?;
    if let Some(balance_mode) = cli.balance_mode {
        config.balance_mode = balance_mode;
    }

    match cli.command {
        Command::Infos { update } => {
            let monitor = NetworkMonitor::new(config, BenchyDocker::connect()?, RpcChainProbe::new()?);
            show_network(&monitor, update).await?;
        }
        Command::Scenario {
            scenario,
            transfers,
            interval,
            wait_ready,
            confirm,
            update,
        } => {
            let chain = RpcChainProbe::new()?;
            let options = ScenarioOptions {
                transfers,
                interval: Duration::from_secs(interval),
                ready_timeout_secs: wait_ready,
                confirm,
            };

            let outcome = ScenarioRunner::new(config.clone(), chain.clone())
                .run(scenario, &options)
                .await?;
            println!("{outcome}");

            if update.is_some() {
                let monitor = NetworkMonitor::new(config, BenchyDocker::connect()?, chain);
                show_network(&monitor, update).await?;
            }
        }
        Command::Accounts => {
            let monitor = NetworkMonitor::new(config, BenchyDocker::connect()?, RpcChainProbe::new()?);
            let accounts = monitor.accounts().await?;
            println!("{}", AccountsReport(&accounts));
        }
        Command::State { action } => {
            let store = StateStore::new(&config.state_file);
            match action {
                StateAction::Show => {
                    let report = StateReport {
                        state: store.load()?,
                        path: store.path().to_path_buf(),
                    };
                    println!("{report}");
                }
                StateAction::Reset => {
                    store.reset()?;
                    println!("State reset ({})", store.path().display());
                }
            }
        }
    }

    Ok(())
}

fn now_secs() -> u64 {
    Utc::now().timestamp().max(0) as u64
}

/// Print one snapshot, or keep refreshing until Ctrl+C when `update` is set.
async fn show_network<C: ContainerProbe, R: ChainProbe>(
    monitor: &NetworkMonitor<C, R>,
    update: Option<u64>,
) -> Result<()> {
    let Some(update) = update else {
        println!("{}", monitor.snapshot(now_secs()).await?);
        return Ok(());
    };

    let period = Duration::from_secs(refresh_period(update));
    tracing::debug!(period_secs = period.as_secs(), "Starting refresh loop");

    loop {
        let report = monitor.snapshot(now_secs()).await?;

        print!("\x1B[2J\x1B[H");
        println!("Last update {} UTC (Ctrl+C to stop)", Utc::now().format("%H:%M:%S"));
        println!("{report}");

        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("Refresh loop stopped");
                return Ok(());
            }
            _ = tokio::time::sleep(period) => {}
        }
    }
}
