//! Expiry scheduler
//!
//! Periodically cancels CREATED trades whose payment window has elapsed,
//! refunding the seller. Each expiry carries the version the sweep read, so a
//! trade that moved in the meantime is skipped and looked at again next tick.

use crate::{config::Config, engine::TradeEngine, Error};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

/// Outcome of one sweep
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SweepReport {
    /// CREATED trades inspected
    pub scanned: usize,

    /// Trades cancelled as expired
    pub expired: usize,

    /// Trades that changed under the sweep
    pub skipped: usize,

    /// Trades whose expiry failed
    pub failed: usize,
}

/// Periodic expiry sweep
#[derive(Debug)]
pub struct ExpiryScheduler {
    engine: Arc<TradeEngine>,
    interval: Duration,
}

impl ExpiryScheduler {
    /// Create scheduler sweeping every `interval`
    pub fn new(engine: Arc<TradeEngine>, interval: Duration) -> Self {
        Self { engine, interval }
    }

    /// Create scheduler from configuration
    pub fn from_config(engine: Arc<TradeEngine>, config: &Config) -> Self {
        Self::new(engine, config.sweep_interval())
    }

    /// Sweep interval
    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Run one sweep now
    pub async fn sweep_once(&self) -> SweepReport {
        let now = self.engine.now();
        let trades = self.engine.pending_trades().await;
        let mut report = SweepReport {
            scanned: trades.len(),
            ..Default::default()
        };

        for trade in trades
            .iter()
            .filter(|trade| self.engine.machine().is_expired(trade, now))
        {
            match self.engine.expire_trade(trade.id, trade.version).await {
                Ok(_) => {
                    info!(trade_id = %trade.id, order_id = %trade.order_id, "Trade expired");
                    report.expired += 1;
                }
                Err(Error::StaleVersion { .. } | Error::TradeClosed { .. }) => {
                    debug!(trade_id = %trade.id, "Trade changed during sweep, skipping");
                    report.skipped += 1;
                }
                Err(e) => {
                    warn!(trade_id = %trade.id, error = %e, "Failed to expire trade");
                    report.failed += 1;
                }
            }
        }

        if report.expired > 0 || report.failed > 0 {
            info!(
                scanned = report.scanned,
                expired = report.expired,
                skipped = report.skipped,
                failed = report.failed,
                "Expiry sweep complete"
            );
        }

        report
    }

    /// Sweep every interval until `shutdown` flips to true
    pub async fn run(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        info!(interval_secs = self.interval.as_secs(), "Starting expiry scheduler");

        let mut interval = tokio::time::interval(self.interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    self.sweep_once().await;
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }

        info!("Expiry scheduler stopped");
    }
}
