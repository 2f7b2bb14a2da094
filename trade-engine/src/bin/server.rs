//! Trade engine server binary
//!
//! Wires configuration, the ledger, the engine, the expiry scheduler and the
//! event log, then runs until ctrl-c.

use anyhow::Context;
use escrow_ledger::{AccountId, EscrowLedger};
use std::sync::Arc;
use tokio::sync::{broadcast, watch};
use trade_engine::{
    ArbitrationService, BroadcastBus, Config, ExpiryScheduler, SystemClock, TradeEngine,
    TradeJournal,
};

fn init_tracing() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));

    if std::env::var("TRADE_LOG_JSON").is_ok() {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();

    // Load configuration
    let config = match std::env::args().nth(1) {
        Some(path) => Config::from_file(&path)
            .with_context(|| format!("loading config from {}", path))?,
        None => Config::from_env().context("loading config from environment")?,
    };
    config.validate()?;

    tracing::info!(
        service = %config.service_name,
        version = %config.service_version,
        "Starting trade engine"
    );

    let ledger = Arc::new(EscrowLedger::new(AccountId::new(
        config.trading.platform_account.clone(),
    )));
    let bus = Arc::new(BroadcastBus::new(config.events.capacity));
    let mut engine = TradeEngine::new(&config, ledger, bus.clone(), Arc::new(SystemClock))?;

    if config.journal.enabled {
        let journal = TradeJournal::open(&config.journal.path)
            .with_context(|| format!("opening journal {}", config.journal.path.display()))?;
        let entries = journal.verify_integrity().await?;
        tracing::info!(entries, "Trade journal verified");
        engine = engine.with_journal(Arc::new(journal));
    }

    let engine = Arc::new(engine);
    let arbitration = ArbitrationService::new(engine.clone(), &config.arbitration)?;
    tracing::info!(
        required_factors = arbitration.required_factors(),
        "Arbitration ready"
    );

    // Event log
    let mut events = bus.subscribe();
    let event_log = tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(event) => tracing::info!(
                    subject = event.subject(),
                    trade_id = %event.trade.id,
                    status = %event.trade.status,
                    "Trade event"
                ),
                Err(broadcast::error::RecvError::Lagged(missed)) => {
                    tracing::warn!(missed, "Event log lagging")
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    });

    // Expiry scheduler
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let scheduler = if config.scheduler.enabled {
        let scheduler = Arc::new(ExpiryScheduler::from_config(engine.clone(), &config));
        Some(tokio::spawn(scheduler.run(shutdown_rx)))
    } else {
        tracing::warn!("Expiry scheduler disabled");
        None
    };

    tokio::signal::ctrl_c().await?;
    tracing::info!("Shutting down trade engine");

    shutdown_tx.send(true).ok();
    if let Some(handle) = scheduler {
        handle.await?;
    }
    event_log.abort();

    let snapshot = engine.snapshot().await;
    tracing::info!(
        orders = snapshot.orders.len(),
        trades = snapshot.trades.len(),
        active_holds = engine.ledger().active_hold_count(),
        "Final state"
    );

    Ok(())
}
