use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::types::Chain;

/// Default config file path.
pub const CONFIG_PATH: &str = "config.toml";

/// Placeholder API key accepted by explorers on their free tier.
pub const FREE_TIER_API_KEY: &str = "YourApiKeyToken";

/// Top-level application config deserialized from `config.toml`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub settings: SettingsConfig,
    #[serde(default)]
    pub endpoints: EndpointsConfig,
}

/// Runtime settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SettingsConfig {
    /// Minutes between scheduled check cycles.
    #[serde(default = "default_interval_minutes")]
    pub interval_minutes: i64,
    /// Upper bound on every explorer request.
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
    /// Pause between wallets within a cycle, for upstream rate limits.
    #[serde(default = "default_inter_wallet_delay")]
    pub inter_wallet_delay_ms: u64,
    /// Records requested per token-transfer page.
    #[serde(default = "default_page_size")]
    pub page_size: u32,
    /// JSON file holding wallets, watermarks and alerts between runs.
    #[serde(default = "default_state_path")]
    pub state_path: PathBuf,
}

fn default_interval_minutes() -> i64 {
    1
}

fn default_request_timeout() -> u64 {
    20
}

fn default_inter_wallet_delay() -> u64 {
    1000
}

fn default_page_size() -> u32 {
    1000
}

fn default_state_path() -> PathBuf {
    PathBuf::from("tracker-state.json")
}

impl Default for SettingsConfig {
    fn default() -> Self {
        Self {
            interval_minutes: default_interval_minutes(),
            request_timeout_secs: default_request_timeout(),
            inter_wallet_delay_ms: default_inter_wallet_delay(),
            page_size: default_page_size(),
            state_path: default_state_path(),
        }
    }
}

/// Optional explorer API base URL overrides, one per chain.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EndpointsConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ethereum: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub avalanche: Option<String>,
}

impl EndpointsConfig {
    pub fn get(&self, chain: Chain) -> Option<&str> {
        match chain {
            Chain::Ethereum => self.ethereum.as_deref(),
            Chain::Avalanche => self.avalanche.as_deref(),
        }
    }
}

impl AppConfig {
    /// Load config from the given TOML file path.
    pub fn load(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read {}", path.display()))?;
        let config: Self = toml::from_str(&contents)
            .with_context(|| format!("failed to parse {}", path.display()))?;
        Ok(config)
    }

    /// Load config if the file exists, otherwise fall back to defaults.
    pub fn load_or_default(path: &Path) -> Result<Self> {
        if path.exists() {
            Self::load(path)
        } else {
            Ok(Self::default())
        }
    }

    /// Write config to the given TOML file path.
    pub fn save(&self, path: &Path) -> Result<()> {
        let contents = toml::to_string_pretty(self).context("failed to serialize config")?;
        std::fs::write(path, contents)
            .with_context(|| format!("failed to write {}", path.display()))?;
        Ok(())
    }
}

/// Resolve an explorer API key, falling back to the free tier when the key is
/// unset, blank, or the `test` placeholder.
pub fn resolve_api_key(raw: Option<String>) -> String {
    match raw {
        Some(key) if !key.trim().is_empty() && key != "test" => key,
        _ => FREE_TIER_API_KEY.to_string(),
    }
}

/// API key for `chain` from its environment variable.
pub fn api_key_for(chain: Chain) -> String {
    resolve_api_key(std::env::var(chain.config().api_key_env).ok())
}
