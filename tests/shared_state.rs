mod common;

use std::sync::Arc;

use common::*;
use wallet_tracker::store::StateStore;
use wallet_tracker::types::Chain;

const THIRD: &str = "0x3333333333333333333333333333333333333333";

// ── concurrent writers ─────────────────────────────────────────────

#[tokio::test]
async fn engines_sharing_a_state_file_keep_each_others_changes() {
    let dir = tempfile::tempdir().unwrap();
    let state_path = dir.path().join("state.json");
    let explorer = MockExplorer::start().await;
    explorer.mock_latest_block(1_000_000).await;
    explorer
        .mock_transfers_from(990_000, vec![transfer("0xin", 999_999, COUNTERPARTY, WALLET)])
        .await;

    // Both built before either writes, so each starts from an empty cache.
    let runner = explorer.shared_engine(&state_path);
    let cli = explorer.shared_engine(&state_path);

    runner.add_wallet(WALLET, "treasury", Chain::Ethereum).await.unwrap();
    cli.add_wallet(THIRD, "ops", Chain::Ethereum).await.unwrap();

    let report = runner.run_check().await;
    assert_eq!(report.wallets_checked, 2);
    // The mock serves the same transfer for both addresses.
    assert_eq!(report.new_alerts.len(), 2);

    let on_disk = StateStore::new(&state_path).load().unwrap();
    assert_eq!(on_disk.wallets().len(), 2);
    assert!(on_disk.wallets().iter().all(|w| w.last_checked_block == 1_000_000));
    assert_eq!(cli.wallets().await.len(), 2);

    // A read mark from one process survives the next cycle of the other.
    let alert_id = cli.alerts().await[0].id.clone();
    assert!(cli.mark_alert_read(&alert_id).await.unwrap());
    runner.run_check().await;
    runner.add_wallet(COUNTERPARTY, "desk", Chain::Avalanche).await.unwrap();

    let on_disk = StateStore::new(&state_path).load().unwrap();
    assert!(on_disk.alerts()[0].is_read);
    assert_eq!(on_disk.wallets().len(), 3);
    assert!(runner.alerts().await[0].is_read);
}

#[tokio::test]
async fn removal_by_another_process_is_respected() {
    let dir = tempfile::tempdir().unwrap();
    let state_path = dir.path().join("state.json");
    let explorer = MockExplorer::start().await;
    explorer.mock_latest_block(1_000_000).await;
    explorer
        .mock_transfers_from(990_000, vec![transfer("0xin", 999_999, COUNTERPARTY, WALLET)])
        .await;

    let runner = explorer.shared_engine(&state_path);
    let cli = explorer.shared_engine(&state_path);
    runner.add_wallet(WALLET, "treasury", Chain::Ethereum).await.unwrap();
    assert!(cli.remove_wallet(WALLET, Chain::Ethereum).await.unwrap());

    let report = runner.run_check().await;
    assert_eq!(report.wallets_checked, 0);
    assert!(runner.wallets().await.is_empty());
    assert!(StateStore::new(&state_path).load().unwrap().alerts().is_empty());
}

// ── running state ──────────────────────────────────────────────────

#[tokio::test]
async fn status_reports_runner_in_other_engine() {
    let dir = tempfile::tempdir().unwrap();
    let state_path = dir.path().join("state.json");
    let explorer = MockExplorer::start().await;
    explorer.mock_latest_block(1_000_000).await;

    let runner = Arc::new(explorer.shared_engine(&state_path));
    let cli = explorer.shared_engine(&state_path);
    assert!(!cli.status().await.running);

    runner.start(1).await.unwrap();
    let status = cli.status().await;
    assert!(status.running);
    let record = status.runner.unwrap();
    assert_eq!(record.pid, std::process::id());
    assert_eq!(record.interval_minutes, 1);

    runner.stop().await;
    let status = cli.status().await;
    assert!(!status.running);
    assert!(status.runner.is_none());
}
