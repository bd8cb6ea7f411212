use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::engine::format_token_amount;
use crate::error::TrackerError;

/// Supported chains. Each variant carries a fixed [`ChainConfig`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Chain {
    Ethereum,
    Avalanche,
}

/// Static per-chain explorer configuration.
#[derive(Debug)]
pub struct ChainConfig {
    pub name: &'static str,
    /// Explorer API base URL (Etherscan-compatible).
    pub api_url: &'static str,
    /// Explorer web URL used for transaction links.
    pub explorer_url: &'static str,
    pub native_symbol: &'static str,
    /// Environment variable holding the explorer API key.
    pub api_key_env: &'static str,
    /// Average block time in seconds.
    pub block_time_secs: u64,
    /// Blocks scanned on a wallet's first check (~1.5 days).
    pub initial_block_range: u64,
}

const ETHEREUM: ChainConfig = ChainConfig {
    name: "Ethereum",
    api_url: "https://api.etherscan.io/api",
    explorer_url: "https://etherscan.io",
    native_symbol: "ETH",
    api_key_env: "ETHERSCAN_API_KEY",
    block_time_secs: 12,
    initial_block_range: 10_000,
};

const AVALANCHE: ChainConfig = ChainConfig {
    name: "Avalanche",
    api_url: "https://api.snowtrace.io/api",
    explorer_url: "https://snowtrace.io",
    native_symbol: "AVAX",
    api_key_env: "SNOWSCAN_API_KEY",
    block_time_secs: 2,
    initial_block_range: 50_000,
};

impl Chain {
    pub const ALL: [Chain; 2] = [Chain::Ethereum, Chain::Avalanche];

    pub fn config(self) -> &'static ChainConfig {
        match self {
            Chain::Ethereum => &ETHEREUM,
            Chain::Avalanche => &AVALANCHE,
        }
    }

    /// Lowercase tag used on the wire and in CLI arguments.
    pub fn as_str(self) -> &'static str {
        match self {
            Chain::Ethereum => "ethereum",
            Chain::Avalanche => "avalanche",
        }
    }

    /// Explorer link for a transaction hash.
    pub fn tx_url(self, hash: &str) -> String {
        format!("{}/tx/{hash}", self.config().explorer_url)
    }
}

impl fmt::Display for Chain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Chain {
    type Err = TrackerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "ethereum" => Ok(Chain::Ethereum),
            "avalanche" => Ok(Chain::Avalanche),
            _ => Err(TrackerError::UnknownChain(s.to_string())),
        }
    }
}

/// Validate a `0x`-prefixed 40-hex-digit address and return it lowercased.
pub fn normalize_address(address: &str) -> Result<String, TrackerError> {
    let valid = address.len() == 42
        && address.starts_with("0x")
        && address[2..].chars().all(|c| c.is_ascii_hexdigit());
    if !valid {
        return Err(TrackerError::InvalidAddress(address.to_string()));
    }
    Ok(address.to_ascii_lowercase())
}

/// A wallet the tracker monitors on one chain.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrackedWallet {
    /// Lowercase hex address.
    pub address: String,
    pub label: String,
    pub chain: Chain,
    /// Highest block already scanned (0 = never scanned).
    pub last_checked_block: u64,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
}

impl TrackedWallet {
    pub fn matches(&self, address: &str, chain: Chain) -> bool {
        self.chain == chain && self.address.eq_ignore_ascii_case(address)
    }
}

/// One ERC20 transfer observed by the explorer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenTransfer {
    pub hash: String,
    pub from: String,
    pub to: String,
    pub token_address: String,
    pub token_symbol: String,
    pub token_name: String,
    /// Raw amount as a decimal integer string (uint256 range).
    pub value: String,
    pub decimals: u8,
    pub timestamp_ms: i64,
    pub block_number: u64,
    pub chain: Chain,
}

/// A recorded notification of a transfer touching a tracked wallet.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Alert {
    pub id: String,
    pub wallet_address: String,
    pub transfer: TokenTransfer,
    pub created_at: DateTime<Utc>,
    pub is_read: bool,
}

impl Alert {
    pub fn new(wallet_address: &str, transfer: TokenTransfer) -> Self {
        let wallet_address = wallet_address.to_ascii_lowercase();
        let created_at = Utc::now();
        let id = format!(
            "{}-{}-{}",
            transfer.hash,
            wallet_address,
            created_at.timestamp_millis()
        );
        Self {
            id,
            wallet_address,
            transfer,
            created_at,
            is_read: false,
        }
    }

    /// Whether this alert covers the given (hash, wallet) pair.
    pub fn covers(&self, hash: &str, wallet_address: &str) -> bool {
        self.transfer.hash == hash && self.wallet_address.eq_ignore_ascii_case(wallet_address)
    }
}

/// Transfer direction relative to a tracked wallet.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Sent,
    Received,
}

impl Direction {
    pub fn of(transfer: &TokenTransfer, wallet_address: &str) -> Self {
        if transfer.from.eq_ignore_ascii_case(wallet_address) {
            Direction::Sent
        } else {
            Direction::Received
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Direction::Sent => "SENT",
            Direction::Received => "RECEIVED",
        }
    }
}

/// Result of an explorer health check.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectionReport {
    pub success: bool,
    pub message: String,
    #[serde(default, skip_serializing_if = "serde_json::Value::is_null")]
    pub data: serde_json::Value,
}

/// Health checks for every supported chain.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectionReports {
    pub ethereum: ConnectionReport,
    pub avalanche: ConnectionReport,
}

/// The process running scheduled cycles against a shared state file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunnerInfo {
    pub pid: u32,
    pub interval_minutes: u64,
    pub started_at: DateTime<Utc>,
    /// Refreshed after every completed cycle.
    pub heartbeat_at: DateTime<Utc>,
}

impl RunnerInfo {
    pub fn new(interval_minutes: u64) -> Self {
        let now = Utc::now();
        Self {
            pid: std::process::id(),
            interval_minutes,
            started_at: now,
            heartbeat_at: now,
        }
    }

    /// A runner is live while its last heartbeat is within two intervals
    /// plus one minute.
    pub fn is_live(&self, now: DateTime<Utc>) -> bool {
        let grace_secs = self.interval_minutes.saturating_mul(120).saturating_add(60);
        let elapsed = now.signed_duration_since(self.heartbeat_at).num_seconds();
        u64::try_from(elapsed).map_or(true, |elapsed| elapsed <= grace_secs)
    }
}

/// Snapshot returned by the status operation.
#[derive(Debug, Clone, Serialize)]
pub struct TrackerStatus {
    /// True when this process or a live runner sharing the state file is
    /// scheduling cycles.
    pub running: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub runner: Option<RunnerInfo>,
    pub max_wallets: usize,
    pub unread_alerts: usize,
    pub wallets: Vec<TrackedWallet>,
    pub alerts: Vec<Alert>,
}

/// Outcome of scanning one wallet.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum WalletScan {
    /// Latest block unknown; watermark left untouched.
    NoLatestBlock,
    /// Wallet removed or paused while its range was being fetched; nothing
    /// recorded.
    Withdrawn,
    /// Watermark already at (or past) the chain head.
    UpToDate { latest_block: u64 },
    Scanned {
        from_block: u64,
        to_block: u64,
        transfers: usize,
        new_alerts: Vec<Alert>,
    },
}

/// Summary of one check cycle.
#[derive(Debug, Clone, Default, Serialize)]
pub struct CycleReport {
    pub wallets_checked: usize,
    pub wallets_skipped: usize,
    pub wallets_failed: usize,
    pub new_alerts: Vec<Alert>,
}

/// Explorer answer for one look-back window of a diagnostic run.
#[derive(Debug, Clone, Serialize)]
pub struct WindowReport {
    pub name: String,
    pub action: String,
    pub block_range: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub http_status: Option<u16>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_status: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_message: Option<String>,
    pub transaction_count: usize,
    /// First few raw records, newest first.
    pub sample: Vec<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Per-wallet explorer diagnostics, for telling "no activity" apart from a
/// stalled or rate-limited upstream.
#[derive(Debug, Clone, Serialize)]
pub struct Diagnosis {
    pub address: String,
    pub chain: Chain,
    pub latest_block: u64,
    pub endpoint: String,
    /// "free tier" or "configured".
    pub api_key: &'static str,
    pub timestamp: DateTime<Utc>,
    pub windows: Vec<WindowReport>,
}

/// Display-ready view of an alert, emitted as one JSON line per alert.
#[derive(Debug, Clone, Serialize)]
pub struct AlertEvent {
    pub alert_id: String,
    pub timestamp: String,
    pub chain: Chain,
    pub wallet: String,
    pub direction: Direction,
    /// The other side of the transfer.
    pub counterparty: String,
    pub amount: String,
    pub token_symbol: String,
    pub token_address: String,
    pub block_number: u64,
    pub tx_hash: String,
    pub tx_url: String,
}

impl AlertEvent {
    pub fn new(alert: &Alert) -> Self {
        let tx = &alert.transfer;
        let direction = Direction::of(tx, &alert.wallet_address);
        let counterparty = match direction {
            Direction::Sent => tx.to.clone(),
            Direction::Received => tx.from.clone(),
        };
        Self {
            alert_id: alert.id.clone(),
            timestamp: alert.created_at.to_rfc3339(),
            chain: tx.chain,
            wallet: alert.wallet_address.clone(),
            direction,
            counterparty,
            amount: format_token_amount(&tx.value, tx.decimals),
            token_symbol: tx.token_symbol.clone(),
            token_address: tx.token_address.clone(),
            block_number: tx.block_number,
            tx_hash: tx.hash.clone(),
            tx_url: tx.chain.tx_url(&tx.hash),
        }
    }
}
