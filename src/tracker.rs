use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::Utc;
use tokio::sync::{Mutex, RwLock, broadcast, watch};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use crate::api::ExplorerClient;
use crate::config::AppConfig;
use crate::engine::{format_token_amount, scan_range, sort_chronological};
use crate::error::TrackerError;
use crate::registry::WalletRegistry;
use crate::store::StateStore;
use crate::types::{
    Alert, Chain, ConnectionReports, CycleReport, Diagnosis, Direction, RunnerInfo, TokenTransfer,
    TrackedWallet, TrackerStatus, WalletScan, normalize_address,
};

/// Pause between wallets within a cycle, to stay under explorer rate limits.
pub const INTER_WALLET_DELAY: Duration = Duration::from_secs(1);

/// Longest accepted schedule interval (one day).
pub const MAX_INTERVAL_MINUTES: i64 = 24 * 60;

/// Capacity of the new-alert broadcast channel.
const ALERT_CHANNEL_CAPACITY: usize = 256;

/// Tunables for a [`TrackingEngine`].
#[derive(Debug, Clone)]
pub struct EngineOptions {
    pub inter_wallet_delay: Duration,
    /// Where the registry is persisted; `None` keeps state in memory.
    pub state_path: Option<PathBuf>,
}

impl Default for EngineOptions {
    fn default() -> Self {
        Self {
            inter_wallet_delay: INTER_WALLET_DELAY,
            state_path: None,
        }
    }
}

impl EngineOptions {
    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            inter_wallet_delay: Duration::from_millis(config.settings.inter_wallet_delay_ms),
            state_path: Some(config.settings.state_path.clone()),
        }
    }
}

/// Handle to the recurring check task.
struct Schedule {
    stop_tx: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

/// Polls explorers for new token transfers of every tracked wallet and
/// records them as alerts.
///
/// Check cycles are serialized: a manual [`run_check`](Self::run_check) that
/// overlaps a scheduled one waits for it to finish. With a state path the
/// file is authoritative and the in-memory registry is a cache of it; other
/// processes may change the file between any two operations.
pub struct TrackingEngine {
    client: ExplorerClient,
    registry: RwLock<WalletRegistry>,
    store: Option<Arc<StateStore>>,
    cycle_lock: Mutex<()>,
    schedule: Mutex<Option<Schedule>>,
    alerts_tx: broadcast::Sender<Alert>,
    options: EngineOptions,
}

fn storage_error(e: anyhow::Error) -> TrackerError {
    TrackerError::Storage(format!("{e:#}"))
}

fn log_alert(wallet: &TrackedWallet, alert: &Alert) {
    let tx = &alert.transfer;
    let direction = Direction::of(tx, &wallet.address);
    let amount = format_token_amount(&tx.value, tx.decimals);
    info!(
        "ALERT: {} {} {amount} {} on {} (block {}, tx {})",
        wallet.label,
        direction.label(),
        tx.token_symbol,
        wallet.chain.config().name,
        tx.block_number,
        tx.hash
    );
}

/// Record the transfers of a scanned range and advance the watermark.
///
/// Returns `None`, recording nothing, if the wallet was removed or paused in
/// the meantime. The watermark never moves backwards.
fn record_scan(
    registry: &mut WalletRegistry,
    address: &str,
    chain: Chain,
    transfers: Vec<TokenTransfer>,
    latest_block: u64,
) -> Option<Vec<Alert>> {
    let watermark = registry
        .wallet(address, chain)
        .filter(|w| w.is_active)?
        .last_checked_block;

    let new_alerts = transfers
        .into_iter()
        .filter_map(|transfer| registry.record_alert(address, chain, transfer))
        .collect();
    if latest_block > watermark {
        registry.update_watermark(address, chain, latest_block);
    }
    Some(new_alerts)
}

impl TrackingEngine {
    /// With `options.state_path` set, the file's contents replace `registry`
    /// at the first refresh.
    pub fn new(client: ExplorerClient, registry: WalletRegistry, options: EngineOptions) -> Self {
        let (alerts_tx, _) = broadcast::channel(ALERT_CHANNEL_CAPACITY);
        let store = options
            .state_path
            .as_ref()
            .map(|path| Arc::new(StateStore::new(path)));
        Self {
            client,
            registry: RwLock::new(registry),
            store,
            cycle_lock: Mutex::new(()),
            schedule: Mutex::new(None),
            alerts_tx,
            options,
        }
    }

    /// Build an engine from config, restoring persisted state if present.
    pub fn from_config(config: &AppConfig) -> Result<Self> {
        let client = ExplorerClient::from_config(config)?;
        let options = EngineOptions::from_config(config);
        let registry = match &options.state_path {
            Some(path) => StateStore::new(path)
                .restore()
                .with_context(|| format!("failed to restore state from {}", path.display()))?,
            None => WalletRegistry::new(),
        };
        Ok(Self::new(client, registry, options))
    }

    /// Receive every alert recorded from now on.
    pub fn subscribe(&self) -> broadcast::Receiver<Alert> {
        self.alerts_tx.subscribe()
    }

    // ── state ──────────────────────────────────────────────────────

    /// Apply `f` to the registry, as a locked read-modify-write of the state
    /// file when one is configured.
    async fn update<T, F>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&mut WalletRegistry) -> T + Send + 'static,
        T: Send + 'static,
    {
        let mut registry = self.registry.write().await;
        let Some(store) = self.store.clone() else {
            return Ok(f(&mut *registry));
        };
        let (fresh, out) = tokio::task::spawn_blocking(move || store.transact(f))
            .await
            .context("state update task failed")??;
        *registry = fresh;
        Ok(out)
    }

    /// Reload the cache from the state file. On failure the cache is kept.
    async fn refresh(&self) {
        let Some(store) = self.store.clone() else {
            return;
        };
        let mut registry = self.registry.write().await;
        match tokio::task::spawn_blocking(move || store.load()).await {
            Ok(Ok(fresh)) => *registry = fresh,
            Ok(Err(e)) => warn!("Failed to reload tracker state: {e:#}"),
            Err(e) => warn!("State reload task failed: {e}"),
        }
    }

    // ── lifecycle ──────────────────────────────────────────────────

    /// Start checking every `interval_minutes`, beginning immediately.
    ///
    /// Already running is a logged no-op.
    pub async fn start(self: &Arc<Self>, interval_minutes: i64) -> Result<(), TrackerError> {
        if !(1..=MAX_INTERVAL_MINUTES).contains(&interval_minutes) {
            return Err(TrackerError::InvalidInterval {
                minutes: interval_minutes,
                max: MAX_INTERVAL_MINUTES,
            });
        }

        let mut schedule = self.schedule.lock().await;
        if schedule.as_ref().is_some_and(|s| !s.handle.is_finished()) {
            warn!("Tracker is already running");
            return Ok(());
        }

        let minutes = interval_minutes.unsigned_abs();
        self.register_runner(minutes).await;

        let period = Duration::from_secs(minutes * 60);
        let (stop_tx, mut stop_rx) = watch::channel(false);
        let engine = Arc::clone(self);

        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = stop_rx.changed() => break,
                    _ = ticker.tick() => {
                        engine.run_check().await;
                        engine.heartbeat().await;
                    }
                }
            }
            debug!("Check loop exited");
        });

        *schedule = Some(Schedule { stop_tx, handle });
        info!("Started ERC20 tracker (interval: {interval_minutes} minute(s))");
        Ok(())
    }

    /// Cancel the recurring schedule, waiting for an in-flight cycle to
    /// finish.
    pub async fn stop(&self) {
        let Some(schedule) = self.schedule.lock().await.take() else {
            info!("Tracker is not running");
            return;
        };
        // The loop may already have exited; nothing to signal then.
        let _ = schedule.stop_tx.send(true);
        if let Err(e) = schedule.handle.await {
            warn!("Check loop ended abnormally: {e}");
        }

        let pid = std::process::id();
        if let Err(e) = self.update(move |r| r.clear_runner(pid)).await {
            warn!("Failed to clear runner record: {e:#}");
        }
        info!("ERC20 tracker stopped");
    }

    pub async fn is_running(&self) -> bool {
        self.schedule
            .lock()
            .await
            .as_ref()
            .is_some_and(|s| !s.handle.is_finished())
    }

    async fn register_runner(&self, interval_minutes: u64) {
        let runner = RunnerInfo::new(interval_minutes);
        let result = self
            .update(move |r| {
                let now = Utc::now();
                if let Some(other) = r.runner().filter(|o| o.pid != runner.pid && o.is_live(now)) {
                    warn!(
                        "Process {} is also running cycles against this state file",
                        other.pid
                    );
                }
                r.register_runner(runner);
            })
            .await;
        if let Err(e) = result {
            warn!("Failed to record runner: {e:#}");
        }
    }

    async fn heartbeat(&self) {
        let pid = std::process::id();
        if let Err(e) = self.update(move |r| r.heartbeat(pid, Utc::now())).await {
            warn!("Failed to record heartbeat: {e:#}");
        }
    }

    // ── check cycle ────────────────────────────────────────────────

    /// Run one scan pass over every active wallet.
    ///
    /// Per-wallet failures are logged and do not stop the cycle. Each wallet's
    /// results are saved as soon as it is scanned.
    pub async fn run_check(&self) -> CycleReport {
        let _guard = self.cycle_lock.lock().await;
        let mut report = CycleReport::default();

        self.refresh().await;
        let wallets = self.registry.read().await.active_wallets();
        if wallets.is_empty() {
            info!("No active wallets to monitor");
            return report;
        }
        info!("Starting check cycle for {} wallet(s)", wallets.len());

        for (idx, snapshot) in wallets.iter().enumerate() {
            // Re-read: the wallet may have been removed or paused since the cycle began.
            let current = self
                .registry
                .read()
                .await
                .wallet(&snapshot.address, snapshot.chain)
                .filter(|w| w.is_active)
                .cloned();

            if let Some(wallet) = current {
                match self.check_wallet(&wallet).await {
                    Ok(WalletScan::Scanned { new_alerts, .. }) => {
                        report.wallets_checked += 1;
                        report.new_alerts.extend(new_alerts);
                    }
                    Ok(WalletScan::UpToDate { .. }) => report.wallets_checked += 1,
                    Ok(WalletScan::NoLatestBlock | WalletScan::Withdrawn) => {
                        report.wallets_skipped += 1
                    }
                    Err(e) => {
                        warn!(
                            "Error checking wallet {} on {}: {e:#}",
                            wallet.address, wallet.chain
                        );
                        report.wallets_failed += 1;
                    }
                }
            }

            if idx + 1 < wallets.len() && !self.options.inter_wallet_delay.is_zero() {
                tokio::time::sleep(self.options.inter_wallet_delay).await;
            }
        }

        info!(
            "Check cycle completed: {} checked, {} skipped, {} failed, {} new alert(s)",
            report.wallets_checked,
            report.wallets_skipped,
            report.wallets_failed,
            report.new_alerts.len()
        );
        report
    }

    /// Scan one wallet from its watermark to the chain head.
    ///
    /// The watermark only advances once every transfer in the range has been
    /// fetched and recorded; on error the same range is retried next cycle.
    pub async fn check_wallet(&self, wallet: &TrackedWallet) -> Result<WalletScan> {
        let chain = wallet.chain;
        debug!(
            "Checking wallet {} ({}) on {chain}, last checked block {}",
            wallet.label, wallet.address, wallet.last_checked_block
        );

        let latest_block = self.client.latest_block_height(chain).await;
        if latest_block == 0 {
            warn!("Latest block unknown for {chain}, skipping {}", wallet.label);
            return Ok(WalletScan::NoLatestBlock);
        }

        let initial_range = chain.config().initial_block_range;
        let Some((from_block, to_block)) =
            scan_range(wallet.last_checked_block, latest_block, initial_range)
        else {
            debug!("No new blocks to check for {}", wallet.label);
            return Ok(WalletScan::UpToDate { latest_block });
        };
        if wallet.last_checked_block == 0 {
            let blocks = to_block - from_block;
            info!(
                "First check for {} - scanning last {blocks} blocks (~{}h, {from_block}-{to_block})",
                wallet.label,
                blocks * chain.config().block_time_secs / 3600
            );
        }

        let mut transfers = self
            .client
            .fetch_token_transfers(&wallet.address, chain, from_block, to_block)
            .await
            .with_context(|| format!("blocks {from_block}-{to_block} not scanned"))?;
        sort_chronological(&mut transfers);
        let transfer_count = transfers.len();

        let address = wallet.address.clone();
        let recorded = self
            .update(move |registry| record_scan(registry, &address, chain, transfers, latest_block))
            .await
            .with_context(|| format!("results for blocks {from_block}-{to_block} not saved"))?;
        let Some(new_alerts) = recorded else {
            info!(
                "{} was removed or paused during its scan, discarding results",
                wallet.label
            );
            return Ok(WalletScan::Withdrawn);
        };

        for alert in &new_alerts {
            log_alert(wallet, alert);
            // No subscribers is fine.
            let _ = self.alerts_tx.send(alert.clone());
        }

        debug!(
            "Updated {} last checked block to {latest_block} ({transfer_count} transfer(s))",
            wallet.label
        );
        Ok(WalletScan::Scanned {
            from_block,
            to_block,
            transfers: transfer_count,
            new_alerts,
        })
    }

    // ── registry operations ────────────────────────────────────────

    /// Validate and start tracking a wallet.
    pub async fn add_wallet(
        &self,
        address: &str,
        label: &str,
        chain: Chain,
    ) -> Result<TrackedWallet, TrackerError> {
        let address = normalize_address(address)?;
        let label = label.to_string();
        self.update(move |r| r.add_wallet(&address, &label, chain))
            .await
            .map_err(storage_error)?
    }

    /// Stop tracking a wallet. Unknown wallets are a no-op returning `false`.
    pub async fn remove_wallet(&self, address: &str, chain: Chain) -> Result<bool, TrackerError> {
        let address = address.to_string();
        self.update(move |r| r.remove_wallet(&address, chain))
            .await
            .map_err(storage_error)
    }

    /// Pause or resume a wallet without losing its watermark.
    pub async fn set_wallet_active(
        &self,
        address: &str,
        chain: Chain,
        active: bool,
    ) -> Result<bool, TrackerError> {
        let address = address.to_string();
        self.update(move |r| r.set_active(&address, chain, active))
            .await
            .map_err(storage_error)
    }

    pub async fn mark_alert_read(&self, alert_id: &str) -> Result<bool, TrackerError> {
        let alert_id = alert_id.to_string();
        self.update(move |r| r.mark_alert_read(&alert_id))
            .await
            .map_err(storage_error)
    }

    pub async fn wallets(&self) -> Vec<TrackedWallet> {
        self.refresh().await;
        self.registry.read().await.wallets()
    }

    pub async fn alerts(&self) -> Vec<Alert> {
        self.refresh().await;
        self.registry.read().await.alerts()
    }

    /// Running state covers this process and any live runner recorded in the
    /// shared state file.
    pub async fn status(&self) -> TrackerStatus {
        self.refresh().await;
        let local = self.is_running().await;
        let registry = self.registry.read().await;
        let runner = registry
            .runner()
            .filter(|r| r.is_live(Utc::now()))
            .cloned();
        TrackerStatus {
            running: local || runner.is_some(),
            runner,
            max_wallets: registry.capacity(),
            unread_alerts: registry.unread_count(),
            wallets: registry.wallets(),
            alerts: registry.alerts(),
        }
    }

    pub async fn test_connections(&self) -> ConnectionReports {
        self.client.test_connections().await
    }

    /// Explorer diagnostics for one address.
    pub async fn diagnose(&self, address: &str, chain: Chain) -> Result<Diagnosis, TrackerError> {
        let address = normalize_address(address)?;
        Ok(self.client.diagnose(&address, chain).await)
    }
}
