//! Validation errors surfaced to callers of tracker operations.

use thiserror::Error;

use crate::types::Chain;

/// Errors returned synchronously by registry and engine operations.
///
/// Upstream explorer failures never appear here; they are logged and treated
/// as "no new data" for the current cycle.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum TrackerError {
    /// Address is not `0x` followed by 40 hex digits.
    #[error("invalid address format: {0}")]
    InvalidAddress(String),

    /// Chain tag is not one of the supported chains.
    #[error("unsupported chain: {0}")]
    UnknownChain(String),

    #[error("maximum of {max} wallets allowed")]
    CapacityExceeded { max: usize },

    /// A wallet with the same (chain, address) key is already tracked.
    #[error("wallet {address} is already tracked on {chain}")]
    DuplicateWallet { chain: Chain, address: String },

    /// Interval is not between 1 and `MAX_INTERVAL_MINUTES`.
    #[error("check interval must be between 1 and {max} minutes, got {minutes}")]
    InvalidInterval { minutes: i64, max: i64 },

    /// The shared state file could not be read, locked or written.
    #[error("state file error: {0}")]
    Storage(String),
}
