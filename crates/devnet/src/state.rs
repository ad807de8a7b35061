//! The persistent scenario ledger (`benchy_state.json`).
//!
//! The ledger remembers which scenarios ran and how much value they moved, so
//! that the status table stays consistent across invocations and node restarts.

use std::{
    collections::BTreeSet,
    fs::{self, OpenOptions},
    io::ErrorKind,
    path::{Path, PathBuf},
};

use anyhow::{Context, Result};
use fs2::FileExt;
use serde::{Deserialize, Serialize};

use crate::config::Participant;

/// Transfers sent by scenario 1 when the caller does not say how many succeeded.
pub const DEFAULT_SCENARIO1_TRANSFERS: u32 = 3;

/// ETH moved by a single scenario 1 transfer.
pub const SCENARIO1_TRANSFER_ETH: f64 = 0.1;

/// ETH moved by the scenario 3 replacement transfer.
pub const SCENARIO3_TRANSFER_ETH: f64 = 1.0;

/// In-memory form of the persistent state file.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(from = "StoredState")]
pub struct PersistentState {
    pub scenario1_executed: bool,
    pub scenario2_executed: bool,
    pub scenario3_executed: bool,
    pub alice_transactions_sent: u64,
    pub bob_eth_received: f64,
    pub cassandra_transactions_sent: u64,
    pub elena_eth_received: f64,
    /// Nodes seen stopped that have not caught up with the network yet.
    pub restarted_nodes: BTreeSet<Participant>,
}

/// On-disk layout, including keys written by older versions.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct StoredState {
    scenario1_executed: bool,
    scenario2_executed: bool,
    scenario3_executed: bool,
    alice_transactions_sent: u64,
    bob_eth_received: f64,
    cassandra_transactions_sent: u64,
    elena_eth_received: f64,
    restarted_nodes: BTreeSet<Participant>,
    alice_has_restarted: bool,
}

impl From<StoredState> for PersistentState {
    fn from(stored: StoredState) -> Self {
        let mut restarted_nodes = stored.restarted_nodes;
        if stored.alice_has_restarted {
            restarted_nodes.insert(Participant::Alice);
        }

        Self {
            scenario1_executed: stored.scenario1_executed,
            scenario2_executed: stored.scenario2_executed,
            scenario3_executed: stored.scenario3_executed,
            alice_transactions_sent: stored.alice_transactions_sent,
            bob_eth_received: stored.bob_eth_received,
            cassandra_transactions_sent: stored.cassandra_transactions_sent,
            elena_eth_received: stored.elena_eth_received,
            restarted_nodes,
        }
    }
}

impl PersistentState {
    /// Whether any scenario has been recorded.
    pub fn any_scenario(&self) -> bool {
        self.scenario1_executed || self.scenario2_executed || self.scenario3_executed
    }

    pub fn is_lagging(&self, participant: Participant) -> bool {
        self.restarted_nodes.contains(&participant)
    }

    /// Apply the effects of a scenario run.
    ///
    /// `actual_transactions` is the number of scenario 1 transfers that went
    /// through; it is ignored by the other scenarios. Returns whether the
    /// scenario had already been recorded before.
    pub fn record_scenario(&mut self, scenario: u8, actual_transactions: Option<u32>) -> Result<bool> {
        let repeat = match scenario {
            0 => return Ok(false),
            1 => {
                let repeat = self.scenario1_executed;
                let sent = actual_transactions.unwrap_or(DEFAULT_SCENARIO1_TRANSFERS);
                self.scenario1_executed = true;
                self.alice_transactions_sent =
                    self.alice_transactions_sent.saturating_add(u64::from(sent));
                self.bob_eth_received += f64::from(sent) * SCENARIO1_TRANSFER_ETH;
                repeat
            }
            2 => {
                let repeat = self.scenario2_executed;
                self.scenario1_executed = true;
                self.scenario2_executed = true;
                self.cassandra_transactions_sent = self.cassandra_transactions_sent.saturating_add(2);
                repeat
            }
            3 => {
                let repeat = self.scenario3_executed;
                self.scenario1_executed = true;
                self.scenario2_executed = true;
                self.scenario3_executed = true;
                self.cassandra_transactions_sent = self.cassandra_transactions_sent.saturating_add(1);
                self.elena_eth_received += SCENARIO3_TRANSFER_ETH;
                repeat
            }
            other => anyhow::bail!("Unknown scenario: {}", other),
        };

        Ok(repeat)
    }

    /// One-line summary of the counters.
    pub fn summary(&self) -> String {
        format!(
            "Alice_tx={}, Bob_ETH={:.1}, Cassandra_tx={}",
            self.alice_transactions_sent, self.bob_eth_received, self.cassandra_transactions_sent
        )
    }
}

/// Reads and writes the persistent state file.
#[derive(Debug, Clone)]
pub struct StateStore {
    path: PathBuf,
}

impl StateStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn sidecar(&self, extension: &str) -> PathBuf {
        let mut name = self.path.clone().into_os_string();
        name.push(extension);
        PathBuf::from(name)
    }

    fn ensure_parent(&self) -> Result<()> {
        if let Some(parent) = self.path.parent()
            && !parent.as_os_str().is_empty()
        {
            fs::create_dir_all(parent).with_context(|| {
                format!("Failed to create state directory {}", parent.display())
            })?;
        }
        Ok(())
    }

    /// Read the state file.
    ///
    /// A missing file yields the default state. So does a corrupt one, with a warning.
    pub fn load(&self) -> Result<PersistentState> {
        let content = match fs::read_to_string(&self.path) {
            Ok(content) => content,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(PersistentState::default()),
            Err(e) => {
                return Err(e)
                    .with_context(|| format!("Failed to read state from {}", self.path.display()));
            }
        };

        match serde_json::from_str(&content) {
            Ok(state) => Ok(state),
            Err(e) => {
                tracing::warn!(
                    path = %self.path.display(),
                    error = %e,
                    "State file is corrupt, starting from an empty state"
                );
                Ok(PersistentState::default())
            }
        }
    }

    /// Write the state file atomically.
    pub fn save(&self, state: &PersistentState) -> Result<()> {
        self.ensure_parent()?;

        let content =
            serde_json::to_string_pretty(state).context("Failed to serialize state to JSON")?;
        let tmp = self.sidecar(".tmp");
        fs::write(&tmp, content)
            .with_context(|| format!("Failed to write state to {}", tmp.display()))?;
        fs::rename(&tmp, &self.path)
            .with_context(|| format!("Failed to move state into {}", self.path.display()))?;

        tracing::debug!(path = %self.path.display(), "State saved");
        Ok(())
    }

    /// Read-modify-write the state under an exclusive lock.
    ///
    /// The file is only rewritten when `f` changed something. Returns the new state.
    pub fn update<F>(&self, f: F) -> Result<PersistentState>
    where
        F: FnOnce(&mut PersistentState),
    {
        self.ensure_parent()?;

        let lock_path = self.sidecar(".lock");
        let lock = OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(&lock_path)
            .with_context(|| format!("Failed to open lock file {}", lock_path.display()))?;
        lock.lock_exclusive()
            .with_context(|| format!("Failed to lock {}", lock_path.display()))?;

        let result = self.load().and_then(|before| {
            let mut state = before.clone();
            f(&mut state);
            if state != before {
                self.save(&state)?;
            }
            Ok(state)
        });

        FileExt::unlock(&lock)
            .with_context(|| format!("Failed to unlock {}", lock_path.display()))?;

        result
    }

    /// [`Self::update`] on tokio's blocking pool.
    ///
    /// Another process may hold the file lock, so async callers must not wait
    /// for it on a runtime worker.
    pub async fn spawn_update<F>(&self, f: F) -> Result<PersistentState>
    where
        F: FnOnce(&mut PersistentState) + Send + 'static,
    {
        let store = self.clone();
        tokio::task::spawn_blocking(move || store.update(f))
            .await
            .context("State update task failed")?
    }

    /// [`Self::record_scenario`] on tokio's blocking pool.
    pub async fn spawn_record_scenario(
        &self,
        scenario: u8,
        actual_transactions: Option<u32>,
    ) -> Result<PersistentState> {
        let store = self.clone();
        tokio::task::spawn_blocking(move || store.record_scenario(scenario, actual_transactions))
            .await
            .context("State update task failed")?
    }

    /// Delete the state file. A missing file is not an error.
    pub fn reset(&self) -> Result<()> {
        match fs::remove_file(&self.path) {
            Ok(()) => {
                tracing::info!(path = %self.path.display(), "State reset");
                Ok(())
            }
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => {
                Err(e).with_context(|| format!("Failed to remove {}", self.path.display()))
            }
        }
    }

    /// Record a scenario run and persist it.
    pub fn record_scenario(
        &self,
        scenario: u8,
        actual_transactions: Option<u32>,
    ) -> Result<PersistentState> {
        let mut outcome = Ok(false);
        let state = self.update(|state| outcome = state.record_scenario(scenario, actual_transactions))?;

        if outcome? {
            tracing::info!(scenario, summary = %state.summary(), "Scenario repeated, counters accumulated");
        } else if scenario != 0 {
            tracing::info!(scenario, summary = %state.summary(), "Scenario recorded for the first time");
        }

        Ok(state)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store() -> (tempdir::TempDir, StateStore) {
        let dir = tempdir::TempDir::new("benchy-state").unwrap();
        let store = StateStore::new(dir.path().join("benchy_state.json"));
        (dir, store)
    }

    #[test]
    fn test_missing_file_is_default() {
        let (_dir, store) = store();
        assert_eq!(store.load().unwrap(), PersistentState::default());
    }

    #[test]
    fn test_corrupt_file_is_default() {
        let (_dir, store) = store();
        fs::write(store.path(), "{ not json").unwrap();
        assert_eq!(store.load().unwrap(), PersistentState::default());
    }

    #[test]
    fn test_save_and_load() {
        let (_dir, store) = store();
        let mut state = PersistentState::default();
        state.record_scenario(1, None).unwrap();
        state.restarted_nodes.insert(Participant::Driss);
        store.save(&state).unwrap();

        assert_eq!(store.load().unwrap(), state);
        assert!(!store.sidecar(".tmp").exists());
    }

    #[test]
    fn test_json_keys() {
        let mut state = PersistentState::default();
        state.record_scenario(3, None).unwrap();
        let value = serde_json::to_value(&state).unwrap();

        for key in [
            "scenario1_executed",
            "scenario2_executed",
            "scenario3_executed",
            "alice_transactions_sent",
            "bob_eth_received",
            "cassandra_transactions_sent",
            "elena_eth_received",
            "restarted_nodes",
        ] {
            assert!(value.get(key).is_some(), "missing key {}", key);
        }
        assert!(value.get("alice_has_restarted").is_none());
    }

    #[test]
    fn test_legacy_restart_flag_is_migrated() {
        let legacy = r#"{
            "scenario1_executed": true,
            "scenario2_executed": false,
            "scenario3_executed": false,
            "alice_transactions_sent": 3,
            "bob_eth_received": 0.3,
            "cassandra_transactions_sent": 0,
            "alice_has_restarted": true
        }"#;
        let state: PersistentState = serde_json::from_str(legacy).unwrap();
        assert!(state.is_lagging(Participant::Alice));
        assert_eq!(state.alice_transactions_sent, 3);
        assert_eq!(state.elena_eth_received, 0.0);
    }

    #[test]
    fn test_record_scenario_rules() {
        let mut state = PersistentState::default();

        assert!(!state.record_scenario(0, None).unwrap());
        assert!(!state.any_scenario());

        assert!(!state.record_scenario(1, Some(2)).unwrap());
        assert_eq!(state.alice_transactions_sent, 2);
        assert!((state.bob_eth_received - 0.2).abs() < 1e-9);

        assert!(!state.record_scenario(2, None).unwrap());
        assert!(state.scenario1_executed && state.scenario2_executed);
        assert_eq!(state.cassandra_transactions_sent, 2);

        assert!(!state.record_scenario(3, None).unwrap());
        assert!(state.scenario3_executed);
        assert_eq!(state.cassandra_transactions_sent, 3);
        assert_eq!(state.elena_eth_received, 1.0);

        assert!(state.record_scenario(4, None).is_err());
    }

    #[test]
    fn test_scenario3_implies_earlier_flags() {
        let mut state = PersistentState::default();
        state.record_scenario(3, None).unwrap();
        assert!(state.scenario1_executed);
        assert!(state.scenario2_executed);
        assert_eq!(state.alice_transactions_sent, 0);
    }

    #[test]
    fn test_repeated_scenario_accumulates() {
        let (_dir, store) = store();
        store.record_scenario(1, None).unwrap();
        let state = store.record_scenario(1, None).unwrap();

        assert_eq!(state.alice_transactions_sent, 6);
        assert!((state.bob_eth_received - 0.6).abs() < 1e-9);
        assert_eq!(store.load().unwrap(), state);
    }

    #[test]
    fn test_update_skips_write_when_unchanged() {
        let (_dir, store) = store();
        store.update(|_| {}).unwrap();
        assert!(!store.path().exists());

        store.update(|s| s.scenario2_executed = true).unwrap();
        assert!(store.load().unwrap().scenario2_executed);
    }

    #[test]
    fn test_reset() {
        let (_dir, store) = store();
        store.record_scenario(2, None).unwrap();
        store.reset().unwrap();
        assert_eq!(store.load().unwrap(), PersistentState::default());
        store.reset().unwrap();
    }

    #[test]
    fn test_summary() {
        let mut state = PersistentState::default();
        state.record_scenario(1, None).unwrap();
        state.record_scenario(2, None).unwrap();
        assert_eq!(state.summary(), "Alice_tx=3, Bob_ETH=0.3, Cassandra_tx=2");
    }

    #[test]
    fn test_counters_saturate() {
        let mut state = PersistentState {
            alice_transactions_sent: u64::MAX - 1,
            cassandra_transactions_sent: u64::MAX,
            ..Default::default()
        };
        state.record_scenario(1, None).unwrap();
        state.record_scenario(3, None).unwrap();
        assert_eq!(state.alice_transactions_sent, u64::MAX);
        assert_eq!(state.cassandra_transactions_sent, u64::MAX);
    }

    #[tokio::test]
    async fn test_spawn_update_waits_for_lock_holder() {
        let (_dir, store) = store();

        let lock_path = store.sidecar(".lock");
        let lock = OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(&lock_path)
            .unwrap();
        lock.lock_exclusive().unwrap();

        let pending = tokio::spawn({
            let store = store.clone();
            async move { store.spawn_record_scenario(2, None).await }
        });

        // The runtime keeps serving other tasks while the lock is held.
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        assert!(!pending.is_finished());
        assert!(!store.path().exists());

        FileExt::unlock(&lock).unwrap();
        let state = pending.await.unwrap().unwrap();
        assert_eq!(state.cassandra_transactions_sent, 2);

        let state = store.spawn_update(|s| s.scenario3_executed = true).await.unwrap();
        assert!(state.scenario3_executed);
        assert_eq!(store.load().unwrap(), state);
    }

    #[test]
    fn test_concurrent_updates_are_not_lost() {
        let (_dir, store) = store();
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let store = store.clone();
                std::thread::spawn(move || store.record_scenario(2, None).unwrap())
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(store.load().unwrap().cassandra_transactions_sent, 16);
    }
}
