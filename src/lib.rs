pub mod api;
pub mod config;
pub mod engine;
pub mod error;
pub mod registry;
pub mod reporter;
pub mod store;
pub mod tracker;
pub mod types;

/// User agent sent with every explorer request.
pub const USER_AGENT: &str = "WalletTracker/1.0";

/// Address with steady ERC20 activity, used for explorer health checks.
pub const TEST_ADDRESS: &str = "0x1ad2dF0E33378c5c6479A92990a6c2c005Bf3B60";
