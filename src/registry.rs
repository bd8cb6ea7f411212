use std::collections::VecDeque;
use std::io::Write;
use std::path::Path;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tempfile::NamedTempFile;
use tracing::{debug, info};

use crate::error::TrackerError;
use crate::types::{Alert, Chain, RunnerInfo, TokenTransfer, TrackedWallet};

/// Maximum number of tracked wallets across all chains.
pub const MAX_WALLETS: usize = 10;

/// Number of alerts retained; older alerts are evicted first.
pub const MAX_ALERTS: usize = 100;

/// Authoritative in-memory store of tracked wallets and recorded alerts.
#[derive(Debug, Default)]
pub struct WalletRegistry {
    /// Wallets in insertion order.
    wallets: Vec<TrackedWallet>,
    /// Alerts newest-first.
    alerts: VecDeque<Alert>,
    /// Process currently scheduling cycles, if any.
    runner: Option<RunnerInfo>,
}

impl WalletRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start tracking `address` on `chain`.
    ///
    /// The address is stored lowercased with a zero watermark. Fails when the
    /// registry is full or the (chain, address) key is already tracked.
    pub fn add_wallet(
        &mut self,
        address: &str,
        label: &str,
        chain: Chain,
    ) -> Result<TrackedWallet, TrackerError> {
        if self.wallets.len() >= MAX_WALLETS {
            return Err(TrackerError::CapacityExceeded { max: MAX_WALLETS });
        }
        let address = address.to_ascii_lowercase();
        if self.wallet(&address, chain).is_some() {
            return Err(TrackerError::DuplicateWallet { chain, address });
        }

        let wallet = TrackedWallet {
            address,
            label: label.to_string(),
            chain,
            last_checked_block: 0,
            is_active: true,
            created_at: Utc::now(),
        };
        info!("Added wallet: {} ({}) on {}", wallet.label, wallet.address, chain);
        self.wallets.push(wallet.clone());
        Ok(wallet)
    }

    /// Stop tracking a wallet. Returns whether anything was removed.
    pub fn remove_wallet(&mut self, address: &str, chain: Chain) -> bool {
        let before = self.wallets.len();
        self.wallets.retain(|w| !w.matches(address, chain));
        let removed = self.wallets.len() != before;
        if removed {
            info!("Removed wallet: {address} from {chain}");
        }
        removed
    }

    /// Include or exclude a wallet from check cycles.
    pub fn set_active(&mut self, address: &str, chain: Chain, active: bool) -> bool {
        match self.wallet_mut(address, chain) {
            Some(wallet) => {
                wallet.is_active = active;
                true
            }
            None => false,
        }
    }

    pub fn wallet(&self, address: &str, chain: Chain) -> Option<&TrackedWallet> {
        self.wallets.iter().find(|w| w.matches(address, chain))
    }

    fn wallet_mut(&mut self, address: &str, chain: Chain) -> Option<&mut TrackedWallet> {
        self.wallets.iter_mut().find(|w| w.matches(address, chain))
    }

    pub fn wallets(&self) -> Vec<TrackedWallet> {
        self.wallets.clone()
    }

    pub fn active_wallets(&self) -> Vec<TrackedWallet> {
        self.wallets.iter().filter(|w| w.is_active).cloned().collect()
    }

    /// Alerts, newest first.
    pub fn alerts(&self) -> Vec<Alert> {
        self.alerts.iter().cloned().collect()
    }

    pub fn unread_count(&self) -> usize {
        self.alerts.iter().filter(|a| !a.is_read).count()
    }

    /// Set a wallet's last scanned block. No-op if the wallet was removed.
    pub fn update_watermark(&mut self, address: &str, chain: Chain, block_number: u64) {
        if let Some(wallet) = self.wallet_mut(address, chain) {
            debug!(
                "Updating {} ({chain}) last checked block: {} -> {block_number}",
                wallet.label, wallet.last_checked_block
            );
            wallet.last_checked_block = block_number;
        }
    }

    /// Record an alert for a transfer seen by `wallet_address`.
    ///
    /// Returns the new alert, or `None` if an alert already covers the same
    /// (transaction hash, wallet) pair.
    pub fn record_alert(
        &mut self,
        wallet_address: &str,
        chain: Chain,
        transfer: TokenTransfer,
    ) -> Option<Alert> {
        if self.alerts.iter().any(|a| a.covers(&transfer.hash, wallet_address)) {
            debug!("Duplicate transfer {} for {wallet_address} on {chain}, skipping", transfer.hash);
            return None;
        }

        let alert = Alert::new(wallet_address, transfer);
        self.alerts.push_front(alert.clone());
        self.alerts.truncate(MAX_ALERTS);
        Some(alert)
    }

    /// Mark an alert as read. Returns whether the id was found.
    pub fn mark_alert_read(&mut self, alert_id: &str) -> bool {
        match self.alerts.iter_mut().find(|a| a.id == alert_id) {
            Some(alert) => {
                alert.is_read = true;
                true
            }
            None => false,
        }
    }

    pub fn capacity(&self) -> usize {
        MAX_WALLETS
    }

    pub fn runner(&self) -> Option<&RunnerInfo> {
        self.runner.as_ref()
    }

    /// Claim the runner slot for this process.
    pub fn register_runner(&mut self, runner: RunnerInfo) {
        if let Some(previous) = self.runner.as_ref().filter(|r| r.pid != runner.pid) {
            debug!("Replacing runner record of pid {}", previous.pid);
        }
        self.runner = Some(runner);
    }

    /// Refresh the heartbeat if `pid` still owns the runner slot.
    pub fn heartbeat(&mut self, pid: u32, at: DateTime<Utc>) {
        if let Some(runner) = self.runner.as_mut().filter(|r| r.pid == pid) {
            runner.heartbeat_at = at;
        }
    }

    /// Release the runner slot if `pid` owns it.
    pub fn clear_runner(&mut self, pid: u32) {
        if self.runner.as_ref().is_some_and(|r| r.pid == pid) {
            self.runner = None;
        }
    }

    pub fn snapshot(&self) -> RegistrySnapshot {
        RegistrySnapshot {
            wallets: self.wallets(),
            alerts: self.alerts(),
            runner: self.runner.clone(),
        }
    }

    /// Rebuild a registry from a snapshot, re-applying the size bounds.
    pub fn from_snapshot(snapshot: RegistrySnapshot) -> Self {
        let mut wallets = snapshot.wallets;
        wallets.truncate(MAX_WALLETS);
        let mut alerts: VecDeque<Alert> = snapshot.alerts.into();
        alerts.truncate(MAX_ALERTS);
        Self {
            wallets,
            alerts,
            runner: snapshot.runner,
        }
    }
}

/// Serialized registry state written between runs.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RegistrySnapshot {
    pub wallets: Vec<TrackedWallet>,
    pub alerts: Vec<Alert>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub runner: Option<RunnerInfo>,
}

impl RegistrySnapshot {
    /// Load a snapshot from the given JSON file path.
    pub fn load(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read {}", path.display()))?;
        let snapshot: Self = serde_json::from_str(&contents)
            .with_context(|| format!("failed to parse {}", path.display()))?;
        Ok(snapshot)
    }

    /// Write the snapshot to the given JSON file path.
    ///
    /// The file is replaced atomically: readers see either the old or the new
    /// snapshot, never a partial one.
    pub fn save(&self, path: &Path) -> Result<()> {
        let contents = serde_json::to_vec_pretty(self).context("failed to serialize state")?;
        let dir = match path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent,
            _ => Path::new("."),
        };
        let mut tmp = NamedTempFile::new_in(dir)
            .with_context(|| format!("failed to create temp file in {}", dir.display()))?;
        tmp.write_all(&contents)
            .and_then(|()| tmp.as_file().sync_all())
            .with_context(|| format!("failed to write {}", tmp.path().display()))?;
        tmp.persist(path)
            .with_context(|| format!("failed to replace {}", path.display()))?;
        Ok(())
    }
}
