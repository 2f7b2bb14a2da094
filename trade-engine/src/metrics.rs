//! Metrics collection for observability
//!
//! # Metrics
//!
//! - `trade_orders_created_total` - Orders listed
//! - `trade_transitions_total{status}` - Trades entering each status
//! - `trade_expired_total` - Trades cancelled by the expiry sweep
//! - `trade_auth_failures_total` - Rejected arbitration attempts
//! - `trade_escrow_active_holds` - Unsettled escrow holds

use crate::types::TradeStatus;
use prometheus::{IntCounter, IntCounterVec, IntGauge, Opts, Registry};
use std::sync::Arc;

/// Metrics collector
#[derive(Clone, Debug)]
pub struct Metrics {
    /// Orders listed
    pub orders_created: IntCounter,

    /// Trades entering each status
    pub transitions: IntCounterVec,

    /// Trades cancelled by the sweep
    pub trades_expired: IntCounter,

    /// Rejected arbitration attempts
    pub auth_failures: IntCounter,

    /// Unsettled escrow holds
    pub active_holds: IntGauge,

    /// Prometheus registry
    pub registry: Arc<Registry>,
}

impl Metrics {
    /// Create new metrics collector on its own registry
    pub fn new() -> prometheus::Result<Self> {
        let registry = Arc::new(Registry::new());

        let orders_created =
            IntCounter::new("trade_orders_created_total", "Total number of orders listed")?;
        registry.register(Box::new(orders_created.clone()))?;

        let transitions = IntCounterVec::new(
            Opts::new(
                "trade_transitions_total",
                "Total number of trades entering each status",
            ),
            &["status"],
        )?;
        registry.register(Box::new(transitions.clone()))?;

        let trades_expired = IntCounter::new(
            "trade_expired_total",
            "Total number of trades cancelled by the expiry sweep",
        )?;
        registry.register(Box::new(trades_expired.clone()))?;

        let auth_failures = IntCounter::new(
            "trade_auth_failures_total",
            "Total number of rejected arbitration attempts",
        )?;
        registry.register(Box::new(auth_failures.clone()))?;

        let active_holds =
            IntGauge::new("trade_escrow_active_holds", "Number of unsettled escrow holds")?;
        registry.register(Box::new(active_holds.clone()))?;

        Ok(Self {
            orders_created,
            transitions,
            trades_expired,
            auth_failures,
            active_holds,
            registry,
        })
    }

    /// Record order listing
    pub fn record_order_created(&self) {
        self.orders_created.inc();
    }

    /// Record a trade entering `status`
    pub fn record_transition(&self, status: TradeStatus) {
        self.transitions.with_label_values(&[status.as_str()]).inc();
    }

    /// Record sweep expiry
    pub fn record_expired(&self) {
        self.trades_expired.inc();
    }

    /// Record rejected arbitration
    pub fn record_auth_failure(&self) {
        self.auth_failures.inc();
    }

    /// Update unsettled hold count
    pub fn set_active_holds(&self, count: usize) {
        self.active_holds.set(count as i64);
    }

    /// Trades that entered `status`
    pub fn transitions_to(&self, status: TradeStatus) -> u64 {
        self.transitions.with_label_values(&[status.as_str()]).get()
    }

    /// Get metrics registry
    pub fn registry(&self) -> &Registry {
        &self.registry
    }
}
