//! trust-core runner binary.
//!
//! Startup order matters: ledger recovery, then reconciliation (live mode),
//! and only then the trading loop. The loop never evaluates an entry before
//! an operating mode exists.

mod auth;
mod engine;
mod exchange;
mod signal;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tracing::{error, info};

use tc_core::config::load_config;
use tc_core::logging::init_logging;
use tc_ledger::{LedgerStore, ReconcileMode, ReconciliationEngine};

use crate::engine::{PaperRouter, TradingEngine};
use crate::exchange::{BinanceFuturesClient, MarketData, OrderRouter};
use crate::signal::RuleSignal;

#[derive(Parser, Debug)]
#[command(name = "tc-runner", about = "Futures trading runner with a reconciled trust core")]
struct Cli {
    /// Path to the JSON config file.
    config: PathBuf,

    /// Log level (trace, debug, info, warn, error).
    #[arg(short, long, default_value = "info")]
    log_level: String,

    /// Directory for daily-rotating log files.
    #[arg(long)]
    log_dir: Option<String>,

    /// Trade against the live exchange. Without this flag the runner stays
    /// in paper mode: simulated fills, no reconciliation against the
    /// exchange.
    #[arg(long)]
    live: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_logging(&cli.log_level, cli.log_dir.as_deref(), "tc-runner");

    let config = load_config(&cli.config)?;
    // The raw config text is snapshotted verbatim into the run manifest.
    let raw: serde_json::Value = serde_json::from_str(&std::fs::read_to_string(&cli.config)?)?;

    info!(config = %cli.config.display(), live = cli.live, "trust-core runner starting");

    let mut ledger = LedgerStore::open(&config.ledger, raw)?;
    ledger.recover_open_positions()?;

    let client = Arc::new(BinanceFuturesClient::new(&config.exchange));

    let mode = if cli.live {
        let mut recon = ReconciliationEngine::new(config.reconcile.clone());
        let report = recon.perform(&mut ledger, client.as_ref()).await;
        info!(
            mode = %report.mode,
            local = report.local_positions,
            exchange = report.exchange_positions,
            adopted = ?report.adopted,
            closed_stale = ?report.closed_stale,
            "reconciliation complete"
        );
        report.mode
    } else {
        info!("paper mode: reconciliation skipped, fills simulated at the decision mark");
        ReconcileMode::Normal
    };

    if mode == ReconcileMode::EmergencyStop {
        error!("EMERGENCY_STOP: all trading suspended; monitoring only until operator restart");
    }

    let market: Arc<dyn MarketData> = client.clone();
    let router: Arc<dyn OrderRouter> = if cli.live {
        client.clone()
    } else {
        Arc::new(PaperRouter::new(config.edge.costs.clone()))
    };

    let round_interval = Duration::from_secs(config.runner.round_interval_secs);
    let mut engine = TradingEngine::new(
        config.runner,
        &config.edge,
        ledger,
        mode,
        market,
        Arc::new(RuleSignal::default()),
        router,
    );

    loop {
        engine.run_round().await;
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("shutdown signal received");
                break;
            }
            _ = tokio::time::sleep(round_interval) => {}
        }
    }

    engine.shutdown();
    info!("trust-core runner stopped");
    Ok(())
}
