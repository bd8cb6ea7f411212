use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tokio::sync::broadcast::error::RecvError;
use tracing::{info, warn};

use wallet_tracker::config::{AppConfig, CONFIG_PATH};
use wallet_tracker::reporter;
use wallet_tracker::tracker::TrackingEngine;
use wallet_tracker::types::Chain;

#[derive(Parser)]
#[command(name = "wallet-tracker", about = "ERC20 transfer tracker for Ethereum and Avalanche wallets")]
struct Args {
    /// Path to the TOML config file
    #[arg(long, default_value = CONFIG_PATH)]
    config: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Show running state, wallets and alerts
    Status,
    /// List tracked wallets
    Wallets,
    /// List alerts, newest first
    Alerts,
    /// Check connectivity to every explorer API
    TestApis,
    /// Query the explorer over several block windows for one address
    Debug {
        #[arg(long)]
        address: String,
        #[arg(long)]
        chain: String,
    },
    /// Start tracking a wallet
    Add {
        #[arg(long)]
        address: String,
        #[arg(long)]
        label: String,
        /// ethereum or avalanche
        #[arg(long)]
        chain: String,
    },
    /// Stop tracking a wallet
    Remove {
        #[arg(long)]
        address: String,
        #[arg(long)]
        chain: String,
    },
    /// Exclude a wallet from check cycles, keeping its history
    Pause {
        #[arg(long)]
        address: String,
        #[arg(long)]
        chain: String,
    },
    /// Include a paused wallet in check cycles again
    Resume {
        #[arg(long)]
        address: String,
        #[arg(long)]
        chain: String,
    },
    /// Mark an alert as read
    MarkRead {
        #[arg(long)]
        id: String,
    },
    /// Run one check cycle now and print new alerts
    Check,
    /// Check on a schedule until Ctrl+C
    Run {
        /// Minutes between cycles (defaults to settings.interval_minutes)
        #[arg(long, allow_negative_numbers = true)]
        interval_minutes: Option<i64>,
    },
    /// Write a default config file
    Init,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();
    dotenvy::dotenv().ok();

    let args = Args::parse();

    if let Command::Init = args.command {
        if args.config.exists() {
            anyhow::bail!("{} already exists", args.config.display());
        }
        AppConfig::default().save(&args.config)?;
        info!("Wrote default config to {}", args.config.display());
        return Ok(());
    }

    let config = AppConfig::load_or_default(&args.config)?;
    let engine = Arc::new(TrackingEngine::from_config(&config)?);

    match args.command {
        Command::Status => reporter::report_pretty(&engine.status().await),
        Command::Wallets => reporter::report_pretty(&engine.wallets().await),
        Command::Alerts => reporter::report_pretty(&engine.alerts().await),
        Command::TestApis => reporter::report_pretty(&engine.test_connections().await),
        Command::Debug { address, chain } => {
            let chain: Chain = chain.parse()?;
            reporter::report_pretty(&engine.diagnose(&address, chain).await?);
        }
        Command::Add {
            address,
            label,
            chain,
        } => {
            let chain: Chain = chain.parse()?;
            let wallet = engine.add_wallet(&address, &label, chain).await?;
            reporter::report_pretty(&wallet);
        }
        Command::Remove { address, chain } => {
            let chain: Chain = chain.parse()?;
            if !engine.remove_wallet(&address, chain).await? {
                info!("{address} was not tracked on {chain}");
            }
        }
        Command::Pause { address, chain } => set_active(&engine, &address, &chain, false).await?,
        Command::Resume { address, chain } => set_active(&engine, &address, &chain, true).await?,
        Command::MarkRead { id } => {
            if !engine.mark_alert_read(&id).await? {
                info!("No alert with id {id}");
            }
        }
        Command::Check => {
            let report = engine.run_check().await;
            for alert in report.new_alerts.iter().rev() {
                reporter::report_alert(alert);
            }
        }
        Command::Run { interval_minutes } => {
            let requested = interval_minutes.unwrap_or(config.settings.interval_minutes);
            run(&engine, cli_interval(requested)).await?;
        }
        Command::Init => unreachable!("handled above"),
    }

    Ok(())
}

/// Longest interval the CLI schedules; the engine itself accepts up to a day.
const MAX_CLI_INTERVAL_MINUTES: i64 = 60;

fn cli_interval(requested: i64) -> i64 {
    if requested > MAX_CLI_INTERVAL_MINUTES {
        warn!("Interval {requested} exceeds {MAX_CLI_INTERVAL_MINUTES} minutes, using {MAX_CLI_INTERVAL_MINUTES}");
        return MAX_CLI_INTERVAL_MINUTES;
    }
    requested
}

async fn set_active(engine: &TrackingEngine, address: &str, chain: &str, active: bool) -> Result<()> {
    let chain: Chain = chain.parse()?;
    if !engine.set_wallet_active(address, chain, active).await? {
        warn!("{address} is not tracked on {chain}");
    }
    Ok(())
}

/// Start the schedule and stream alerts to stdout until Ctrl+C.
async fn run(engine: &Arc<TrackingEngine>, interval_minutes: i64) -> Result<()> {
    let mut alerts = engine.subscribe();
    engine.start(interval_minutes).await?;
    info!("Tracking {} wallet(s). Press Ctrl+C to stop.", engine.wallets().await.len());

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("Shutdown signal received");
                break;
            }
            received = alerts.recv() => match received {
                Ok(alert) => reporter::report_alert(&alert),
                Err(RecvError::Lagged(skipped)) => warn!("Dropped {skipped} alert(s) from output"),
                Err(RecvError::Closed) => break,
            },
        }
    }

    engine.stop().await;
    Ok(())
}
