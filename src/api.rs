use std::collections::HashMap;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use chrono::Utc;
use reqwest::header::ACCEPT;
use serde::Deserialize;
use serde_json::{Value, json};
use tracing::{debug, info, warn};
use url::Url;

use crate::config::{AppConfig, FREE_TIER_API_KEY, api_key_for};
use crate::types::{
    Chain, ConnectionReport, ConnectionReports, Diagnosis, TokenTransfer, WindowReport,
};
use crate::{TEST_ADDRESS, USER_AGENT};

/// Upper bound on token-transfer pages fetched for one block range.
pub const MAX_PAGES: u32 = 10;

/// Explorers reject `page * offset` beyond this many records.
pub const MAX_RESULT_WINDOW: u32 = 10_000;

/// Default records per token-transfer page, also the largest page size that
/// keeps all [`MAX_PAGES`] pages inside [`MAX_RESULT_WINDOW`].
pub const DEFAULT_PAGE_SIZE: u32 = MAX_RESULT_WINDOW / MAX_PAGES;

/// Sample records kept per diagnostic window.
const DIAGNOSE_SAMPLE: usize = 5;

/// Pause between diagnostic requests.
const DIAGNOSE_DELAY: Duration = Duration::from_millis(200);

/// HTTP client for the Etherscan-compatible explorer API of each chain.
pub struct ExplorerClient {
    http: reqwest::Client,
    endpoints: HashMap<Chain, Url>,
    page_size: u32,
}

/// Standard explorer response envelope: `{"status", "message", "result"}`.
#[derive(Debug, Deserialize)]
struct Envelope {
    #[serde(default)]
    status: String,
    #[serde(default)]
    message: String,
    #[serde(default)]
    result: Value,
}

/// A `tokentx` record as returned by the explorer (all fields are strings).
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawTransfer {
    hash: Option<String>,
    from: Option<String>,
    to: Option<String>,
    contract_address: Option<String>,
    token_symbol: Option<String>,
    token_name: Option<String>,
    value: Option<String>,
    token_decimal: Option<String>,
    time_stamp: Option<String>,
    block_number: Option<String>,
}

/// Treat missing and empty strings alike.
fn present(field: Option<String>) -> Option<String> {
    field.filter(|s| !s.trim().is_empty())
}

impl RawTransfer {
    /// Convert to a [`TokenTransfer`], or `None` if a required field is missing.
    fn into_transfer(self, chain: Chain) -> Option<TokenTransfer> {
        let hash = present(self.hash)?;
        let from = present(self.from)?;
        let to = present(self.to)?;
        let token_address = present(self.contract_address)?;
        let block_number = present(self.block_number)?.trim().parse::<u64>().ok()?;

        let decimals = self
            .token_decimal
            .and_then(|d| d.trim().parse::<u8>().ok())
            .unwrap_or(18);
        let timestamp_ms = match present(self.time_stamp) {
            Some(t) => t.trim().parse::<i64>().ok()?.checked_mul(1000)?,
            None => 0,
        };

        Some(TokenTransfer {
            hash,
            from: from.to_ascii_lowercase(),
            to: to.to_ascii_lowercase(),
            token_address: token_address.to_ascii_lowercase(),
            token_symbol: present(self.token_symbol).unwrap_or_else(|| "UNKNOWN".to_string()),
            token_name: present(self.token_name).unwrap_or_else(|| "Unknown Token".to_string()),
            value: present(self.value).unwrap_or_else(|| "0".to_string()),
            decimals,
            timestamp_ms,
            block_number,
            chain,
        })
    }
}

/// Parse the `eth_blockNumber` proxy response (`{"result": "0x..."}`).
fn parse_block_number(body: &Value) -> Result<u64> {
    let result = body
        .get("result")
        .and_then(Value::as_str)
        .with_context(|| format!("no block number in response: {body}"))?;
    let hex = result
        .strip_prefix("0x")
        .with_context(|| format!("block number is not hex: {result}"))?;
    u64::from_str_radix(hex, 16).with_context(|| format!("invalid block number: {result}"))
}

/// Extract the raw record list from a `tokentx` response.
///
/// "No transactions found" is an empty success; any other non-`"1"` status is
/// an error (rate limiting, invalid key, ...).
fn transfer_records(body: Value) -> Result<Vec<Value>> {
    let envelope: Envelope = serde_json::from_value(body).context("malformed explorer response")?;
    match (envelope.status.as_str(), envelope.result) {
        ("1", Value::Array(records)) => Ok(records),
        ("0", _) if envelope.message.starts_with("No transactions found") => Ok(Vec::new()),
        (status, result) => bail!(
            "explorer returned status {status:?}: {} ({})",
            envelope.message,
            excerpt(&result.to_string())
        ),
    }
}

/// Parse records into transfers, dropping malformed ones and anything outside
/// `[from_block, to_block]`.
fn parse_transfers(records: Vec<Value>, chain: Chain, from_block: u64, to_block: u64) -> Vec<TokenTransfer> {
    let total = records.len();
    let transfers: Vec<TokenTransfer> = records
        .into_iter()
        .filter_map(|record| serde_json::from_value::<RawTransfer>(record).ok())
        .filter_map(|raw| raw.into_transfer(chain))
        .filter(|t| (from_block..=to_block).contains(&t.block_number))
        .collect();
    if transfers.len() < total {
        debug!(
            "Dropped {} of {total} {chain} records (malformed or out of range {from_block}-{to_block})",
            total - transfers.len()
        );
    }
    transfers
}

fn excerpt(text: &str) -> String {
    text.chars().take(200).collect()
}

fn tokentx_params(
    address: &str,
    range: Option<(u64, u64)>,
    page: u32,
    offset: u32,
) -> Vec<(&'static str, String)> {
    let mut params = vec![
        ("module", "account".to_string()),
        ("action", "tokentx".to_string()),
        ("address", address.to_string()),
    ];
    if let Some((from_block, to_block)) = range {
        params.push(("startblock", from_block.to_string()));
        params.push(("endblock", to_block.to_string()));
    }
    params.push(("page", page.to_string()));
    params.push(("offset", offset.to_string()));
    params.push(("sort", "desc".to_string()));
    params
}

impl ExplorerClient {
    /// Create a client with the given per-request timeout and the default
    /// explorer endpoints.
    pub fn new(timeout: Duration) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(USER_AGENT)
            .build()
            .context("failed to build HTTP client")?;
        let mut endpoints = HashMap::new();
        for chain in Chain::ALL {
            let url = Url::parse(chain.config().api_url)
                .with_context(|| format!("invalid {chain} API URL"))?;
            endpoints.insert(chain, url);
        }
        Ok(Self {
            http,
            endpoints,
            page_size: DEFAULT_PAGE_SIZE,
        })
    }

    /// Build a client from the `[settings]` and `[endpoints]` config sections.
    pub fn from_config(config: &AppConfig) -> Result<Self> {
        let mut client = Self::new(Duration::from_secs(config.settings.request_timeout_secs))?
            .with_page_size(config.settings.page_size);
        for chain in Chain::ALL {
            if let Some(url) = config.endpoints.get(chain) {
                client = client.with_endpoint(chain, url)?;
            }
        }
        Ok(client)
    }

    /// Point `chain` at a different explorer API base URL.
    pub fn with_endpoint(mut self, chain: Chain, url: &str) -> Result<Self> {
        let url = Url::parse(url).with_context(|| format!("invalid {chain} endpoint {url}"))?;
        self.endpoints.insert(chain, url);
        Ok(self)
    }

    /// Records per `tokentx` page, clamped to `1..=DEFAULT_PAGE_SIZE`.
    pub fn with_page_size(mut self, page_size: u32) -> Self {
        let clamped = page_size.clamp(1, DEFAULT_PAGE_SIZE);
        if clamped != page_size {
            warn!(
                "page_size {page_size} outside 1-{DEFAULT_PAGE_SIZE} (explorer result window is {MAX_RESULT_WINDOW}), using {clamped}"
            );
        }
        self.page_size = clamped;
        self
    }

    pub fn page_size(&self) -> u32 {
        self.page_size
    }

    pub fn endpoint(&self, chain: Chain) -> &Url {
        &self.endpoints[&chain]
    }

    /// GET the chain's explorer with the given query.
    async fn send(&self, chain: Chain, params: &[(&str, String)]) -> Result<reqwest::Response> {
        let api_key = api_key_for(chain);
        self.http
            .get(self.endpoint(chain).clone())
            .query(params)
            .query(&[("apikey", api_key.as_str())])
            .header(ACCEPT, "application/json")
            .send()
            .await
            .with_context(|| format!("{chain} explorer request failed"))
    }

    /// GET the chain's explorer with the given query, returning the JSON body.
    async fn query(&self, chain: Chain, params: &[(&str, String)]) -> Result<Value> {
        let resp = self.send(chain, params).await?;
        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            bail!("HTTP {status} from {chain} explorer: {}", excerpt(&body));
        }
        resp.json::<Value>()
            .await
            .with_context(|| format!("invalid JSON from {chain} explorer"))
    }

    /// Fetch the chain head block number.
    pub async fn fetch_latest_block(&self, chain: Chain) -> Result<u64> {
        let params = [
            ("module", "proxy".to_string()),
            ("action", "eth_blockNumber".to_string()),
        ];
        let body = self.query(chain, &params).await?;
        let block = parse_block_number(&body)?;
        debug!("Latest block for {chain}: {block}");
        Ok(block)
    }

    /// Latest block height, or 0 if it could not be fetched.
    pub async fn latest_block_height(&self, chain: Chain) -> u64 {
        match self.fetch_latest_block(chain).await {
            Ok(block) => block,
            Err(e) => {
                warn!("Failed to fetch latest block for {chain}: {e:#}");
                0
            }
        }
    }

    /// Fetch every ERC20 transfer touching `address` in `[from_block, to_block]`.
    ///
    /// Pages newest-first until a short page or [`MAX_PAGES`]. Any failure,
    /// including on a later page, fails the whole range so callers can retry it.
    pub async fn fetch_token_transfers(
        &self,
        address: &str,
        chain: Chain,
        from_block: u64,
        to_block: u64,
    ) -> Result<Vec<TokenTransfer>> {
        let api_key_kind = if api_key_for(chain) == FREE_TIER_API_KEY {
            "free tier"
        } else {
            "configured"
        };
        debug!(
            "Fetching ERC20 transfers for {address} on {chain}, blocks {from_block}-{to_block} (API key: {api_key_kind})"
        );

        let mut transfers = Vec::new();
        for page in 1..=MAX_PAGES {
            let params = tokentx_params(address, Some((from_block, to_block)), page, self.page_size);
            let body = self.query(chain, &params).await?;
            let records = transfer_records(body)?;
            let count = records.len();
            transfers.extend(parse_transfers(records, chain, from_block, to_block));

            if count < self.page_size as usize {
                break;
            }
            if page == MAX_PAGES {
                warn!(
                    "{address} on {chain}: hit {MAX_PAGES}-page cap in blocks {from_block}-{to_block}, older transfers may be missing"
                );
            }
        }

        debug!("Found {} transfers for {address} on {chain}", transfers.len());
        Ok(transfers)
    }

    /// Token transfers in the range, or an empty list if the fetch failed.
    pub async fn token_transfers(
        &self,
        address: &str,
        chain: Chain,
        from_block: u64,
        to_block: u64,
    ) -> Vec<TokenTransfer> {
        match self.fetch_token_transfers(address, chain, from_block, to_block).await {
            Ok(transfers) => transfers,
            Err(e) => {
                warn!("Failed to fetch ERC20 transfers for {address} on {chain}: {e:#}");
                Vec::new()
            }
        }
    }

    /// Check the explorer against an address with known token activity.
    pub async fn test_connection(&self, chain: Chain) -> ConnectionReport {
        let name = chain.config().name;
        info!("Testing API connection for {chain}...");

        let params = tokentx_params(TEST_ADDRESS, None, 1, 10);
        let body = match self.query(chain, &params).await {
            Ok(body) => body,
            Err(e) => {
                return ConnectionReport {
                    success: false,
                    message: format!("{name} API connection failed: {e:#}"),
                    data: Value::Null,
                };
            }
        };

        let api_status = body.get("status").and_then(Value::as_str).unwrap_or_default();
        let api_message = body
            .get("message")
            .and_then(Value::as_str)
            .unwrap_or("Unknown error")
            .to_string();
        let records = body.get("result").and_then(Value::as_array);
        let count = records.map_or(0, Vec::len);

        if api_status == "1" {
            ConnectionReport {
                success: true,
                message: format!("{name} API connection successful - Found {count} token transactions"),
                data: json!({
                    "chain": chain,
                    "nativeSymbol": chain.config().native_symbol,
                    "endpoint": self.endpoint(chain).as_str(),
                    "testAddress": TEST_ADDRESS,
                    "tokenTxCount": count,
                    "tokenTxStatus": api_status,
                    "tokenTxMessage": api_message,
                    "sampleTransaction": records.and_then(|r| r.first()).cloned(),
                }),
            }
        } else {
            ConnectionReport {
                success: false,
                message: format!("{name} API test failed: {api_message}"),
                data: json!({
                    "response": body,
                    "testAddress": TEST_ADDRESS,
                }),
            }
        }
    }

    /// Query `address` over several look-back windows and report what the
    /// explorer answers for each, without touching any tracker state.
    ///
    /// Windows: the last 100, 1,000 and 10,000 blocks and all history of
    /// `tokentx`, then the 10 most recent plain transactions (`txlist`).
    pub async fn diagnose(&self, address: &str, chain: Chain) -> Diagnosis {
        let api_key = if api_key_for(chain) == FREE_TIER_API_KEY {
            "free tier"
        } else {
            "configured"
        };
        info!("Diagnosing {address} on {chain} (API key: {api_key})");

        let latest_block = self.latest_block_height(chain).await;
        let mut windows = Vec::new();
        for (name, lookback) in [
            ("Last 100 blocks", Some(100)),
            ("Last 1000 blocks", Some(1_000)),
            ("Last 10000 blocks", Some(10_000)),
            ("All transactions", None),
        ] {
            let range = match lookback {
                Some(blocks) => (latest_block.saturating_sub(blocks), latest_block),
                None => (0, 999_999_999),
            };
            let params = tokentx_params(address, Some(range), 1, MAX_RESULT_WINDOW);
            let report = self
                .diagnose_window(chain, name, "tokentx", range, &params, DIAGNOSE_SAMPLE)
                .await;
            windows.push(report);
            tokio::time::sleep(DIAGNOSE_DELAY).await;
        }

        let range = (0, 99_999_999);
        let params = vec![
            ("module", "account".to_string()),
            ("action", "txlist".to_string()),
            ("address", address.to_string()),
            ("startblock", range.0.to_string()),
            ("endblock", range.1.to_string()),
            ("page", "1".to_string()),
            ("offset", "10".to_string()),
            ("sort", "desc".to_string()),
        ];
        windows.push(
            self.diagnose_window(chain, "Regular transactions", "txlist", range, &params, 3)
                .await,
        );

        Diagnosis {
            address: address.to_string(),
            chain,
            latest_block,
            endpoint: self.endpoint(chain).to_string(),
            api_key,
            timestamp: Utc::now(),
            windows,
        }
    }

    async fn diagnose_window(
        &self,
        chain: Chain,
        name: &str,
        action: &str,
        (from_block, to_block): (u64, u64),
        params: &[(&str, String)],
        sample: usize,
    ) -> WindowReport {
        let mut report = WindowReport {
            name: name.to_string(),
            action: action.to_string(),
            block_range: format!("{from_block}-{to_block}"),
            http_status: None,
            api_status: None,
            api_message: None,
            transaction_count: 0,
            sample: Vec::new(),
            error: None,
        };

        let resp = match self.send(chain, params).await {
            Ok(resp) => resp,
            Err(e) => {
                report.error = Some(format!("{e:#}"));
                return report;
            }
        };
        report.http_status = Some(resp.status().as_u16());

        let body = match resp.json::<Value>().await {
            Ok(body) => body,
            Err(e) => {
                report.error = Some(format!("invalid JSON: {e}"));
                return report;
            }
        };
        let field = |key: &str| body.get(key).and_then(Value::as_str).map(str::to_string);
        report.api_status = field("status");
        report.api_message = field("message");
        if let Some(records) = body.get("result").and_then(Value::as_array) {
            report.transaction_count = records.len();
            report.sample = records.iter().take(sample).cloned().collect();
        }
        debug!(
            "{name}: HTTP {:?}, status {:?}, {} record(s)",
            report.http_status, report.api_status, report.transaction_count
        );
        report
    }

    /// Health-check every chain concurrently.
    pub async fn test_connections(&self) -> ConnectionReports {
        let (ethereum, avalanche) = tokio::join!(
            self.test_connection(Chain::Ethereum),
            self.test_connection(Chain::Avalanche),
        );
        ConnectionReports { ethereum, avalanche }
    }
}
