use anyhow::{Context, Result};
use clap::Parser;
use rust_decimal::Decimal;
use std::path::PathBuf;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use dcabot::{
    exchange::ExchangeSet,
    hooks::MinimumSpend,
    DcaEngine, Environment, KeyStore, StrategyFile,
};

#[derive(Parser, Debug)]
#[command(name = "dcabot")]
#[command(about = "Dollar-cost-averaging bot for centralized crypto exchanges")]
struct Args {
    /// Path to the strategy file (YAML)
    #[arg(long)]
    strategy: PathBuf,

    /// Path to the exchange API keys file (YAML)
    #[arg(long)]
    keys: PathBuf,

    /// Use exchange sandbox environments where supported
    #[arg(long)]
    test: bool,

    /// Log the orders that would be placed without placing them
    #[arg(long)]
    dry_run: bool,

    /// Skip orders spending less than this amount of the base asset
    #[arg(long)]
    min_spend: Option<Decimal>,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "dcabot=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let args = Args::parse();

    info!("Starting dcabot...");

    // Configuration problems abort before any exchange is contacted
    let strategies = StrategyFile::load_from_path(&args.strategy)
        .context("Failed to load strategy file")?;
    strategies.validate().context("Invalid strategy file")?;
    info!("Strategies loaded from {}", args.strategy.display());

    let keys = KeyStore::load_from_path(&args.keys).context("Failed to load keys file")?;
    strategies.check_keys(&keys)?;

    let environment = Environment::from_test_flag(args.test);
    if environment == Environment::Sandbox {
        info!("Test mode enabled: orders go to sandbox endpoints where supported");
    } else {
        warn!("Running in LIVE mode - real funds at risk!");
    }
    if args.dry_run {
        warn!("Dry run enabled - no orders will be placed");
    }

    for strategy in &strategies.strategy {
        info!(
            "Running '{}' for pairs {:?} on exchanges {:?}",
            strategy,
            strategy
                .pairs()
                .iter()
                .map(|p| p.to_string())
                .collect::<Vec<_>>(),
            strategy.exchanges
        );
    }

    let exchanges = ExchangeSet::connect_all(&strategies.exchange_ids(), &keys, environment);

    let mut engine = DcaEngine::new(strategies.strategy, exchanges).dry_run(args.dry_run);
    if let Some(minimum) = args.min_spend {
        engine = engine.with_timing(Box::new(MinimumSpend { minimum }));
    }

    let report = engine.run_once().await;
    report.log_summary();

    if report.has_failures() {
        anyhow::bail!("{} order(s) failed", report.failed());
    }

    Ok(())
}
