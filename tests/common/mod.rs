#![allow(dead_code)]

use std::path::Path;
use std::time::Duration;

use serde_json::{Value, json};
use wallet_tracker::api::ExplorerClient;
use wallet_tracker::registry::WalletRegistry;
use wallet_tracker::tracker::{EngineOptions, TrackingEngine};
use wallet_tracker::types::Chain;
use wiremock::matchers::{method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

pub const WALLET: &str = "0x1111111111111111111111111111111111111111";
pub const COUNTERPARTY: &str = "0x2222222222222222222222222222222222222222";
pub const USDC: &str = "0xa0b86991c6218b36c1d19d4a2e9eb0ce3606eb48";

/// A mock explorer serving both chains under `/api`.
pub struct MockExplorer {
    pub server: MockServer,
}

impl MockExplorer {
    pub async fn start() -> Self {
        Self {
            server: MockServer::start().await,
        }
    }

    pub fn endpoint(&self) -> String {
        format!("{}/api", self.server.uri())
    }

    pub fn client(&self) -> ExplorerClient {
        ExplorerClient::new(Duration::from_secs(5))
            .unwrap()
            .with_endpoint(Chain::Ethereum, &self.endpoint())
            .unwrap()
            .with_endpoint(Chain::Avalanche, &self.endpoint())
            .unwrap()
    }

    /// Engine over `registry` with no pause between wallets and no persistence.
    pub fn engine(&self, registry: WalletRegistry) -> TrackingEngine {
        let options = EngineOptions {
            inter_wallet_delay: Duration::ZERO,
            state_path: None,
        };
        TrackingEngine::new(self.client(), registry, options)
    }

    /// Engine over an empty registry with explicit options.
    pub fn engine_with(&self, client: ExplorerClient, options: EngineOptions) -> TrackingEngine {
        TrackingEngine::new(client, WalletRegistry::new(), options)
    }

    /// Engine persisting to `state_path`, with no pause between wallets.
    pub fn shared_engine(&self, state_path: &Path) -> TrackingEngine {
        let options = EngineOptions {
            inter_wallet_delay: Duration::ZERO,
            state_path: Some(state_path.to_path_buf()),
        };
        self.engine_with(self.client(), options)
    }

    pub async fn mock_latest_block(&self, block: u64) {
        Mock::given(method("GET"))
            .and(path("/api"))
            .and(query_param("action", "eth_blockNumber"))
            .respond_with(ResponseTemplate::new(200).set_body_json(block_number_body(block)))
            .mount(&self.server)
            .await;
    }

    /// Serve `block` for the next `times` head queries only.
    pub async fn mock_latest_block_times(&self, block: u64, times: u64) {
        Mock::given(method("GET"))
            .and(path("/api"))
            .and(query_param("action", "eth_blockNumber"))
            .respond_with(ResponseTemplate::new(200).set_body_json(block_number_body(block)))
            .up_to_n_times(times)
            .mount(&self.server)
            .await;
    }

    /// Answer `tokentx` for the given `startblock` with `records`.
    pub async fn mock_transfers_from(&self, start_block: u64, records: Vec<Value>) {
        Mock::given(method("GET"))
            .and(path("/api"))
            .and(query_param("action", "tokentx"))
            .and(query_param("startblock", start_block.to_string()))
            .respond_with(ResponseTemplate::new(200).set_body_json(transfers_body(records)))
            .mount(&self.server)
            .await;
    }
}

pub fn block_number_body(block: u64) -> Value {
    json!({"jsonrpc": "2.0", "id": 83, "result": format!("0x{block:x}")})
}

pub fn transfers_body(records: Vec<Value>) -> Value {
    if records.is_empty() {
        json!({"status": "0", "message": "No transactions found", "result": []})
    } else {
        json!({"status": "1", "message": "OK", "result": records})
    }
}

/// A USDC transfer of 1.5 from `from` to `to` at `block`.
pub fn transfer(hash: &str, block: u64, from: &str, to: &str) -> Value {
    json!({
        "blockNumber": block.to_string(),
        "timeStamp": (1_700_000_000 + block).to_string(),
        "hash": hash,
        "from": from,
        "to": to,
        "contractAddress": USDC,
        "value": "1500000",
        "tokenName": "USD Coin",
        "tokenSymbol": "USDC",
        "tokenDecimal": "6"
    })
}

/// Registry tracking [`WALLET`] on `chain` with the given watermark.
pub fn registry_with_wallet(chain: Chain, last_checked_block: u64) -> WalletRegistry {
    let mut registry = WalletRegistry::new();
    registry.add_wallet(WALLET, "treasury", chain).unwrap();
    registry.update_watermark(WALLET, chain, last_checked_block);
    registry
}
