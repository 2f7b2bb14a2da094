//! Main trade engine
//!
//! Orchestrates the order book, the escrow ledger and the state machine.
//!
//! Every mutation of a trade runs while holding that trade's async mutex. The
//! next snapshot is computed on a copy, the ledger movement (if any) runs, and
//! only then is the copy committed. Events and the journal follow the commit
//! and never roll it back.

use crate::{
    arbitration::ArbitrationOutcome,
    clock::Clock,
    config::Config,
    events::{EventPublisher, TradeEvent, TradeEventKind},
    evidence::{EvidenceRecord, EvidenceStore},
    journal::TradeJournal,
    metrics::Metrics,
    order_book::OrderBook,
    state_machine::{Actor, TradeAction, TradeStateMachine},
    types::*,
    Error, Result,
};
use chrono::{DateTime, Utc};
use dashmap::{DashMap, DashSet};
use escrow_ledger::{AccountId, EscrowLedger, LedgerSnapshot, Settlement};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::{debug, info, warn};
use uuid::Uuid;

type TradeSlot = Arc<Mutex<Trade>>;

/// Who is asking for a transition
#[derive(Debug, Clone, Copy)]
enum Caller<'a> {
    Account(&'a AccountId),
    Scheduler,
}

/// Serializable export of the whole engine state
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineSnapshot {
    /// Every order, oldest first
    pub orders: Vec<Order>,

    /// Every trade, oldest first
    pub trades: Vec<Trade>,

    /// Balances and holds
    pub ledger: LedgerSnapshot,

    /// Export time
    pub taken_at: DateTime<Utc>,
}

/// Trade engine
#[derive(Debug)]
pub struct TradeEngine {
    /// Balances and escrow holds
    ledger: Arc<EscrowLedger>,

    /// Seller orders
    orders: OrderBook,

    /// Trades, each behind its own lock
    trades: DashMap<Uuid, TradeSlot>,

    /// Trades still in CREATED
    pending: DashSet<Uuid>,

    /// Payment evidence history
    evidence: EvidenceStore,

    /// Transition rules
    machine: TradeStateMachine,

    /// Outbound events
    publisher: Arc<dyn EventPublisher>,

    /// Time source
    clock: Arc<dyn Clock>,

    /// Audit journal
    journal: Option<Arc<TradeJournal>>,

    /// Metrics
    metrics: Metrics,

    /// Commission on release, in percent
    commission_percent: Decimal,
}

impl TradeEngine {
    /// Create new trade engine
    pub fn new(
        config: &Config,
        ledger: Arc<EscrowLedger>,
        publisher: Arc<dyn EventPublisher>,
        clock: Arc<dyn Clock>,
    ) -> Result<Self> {
        config.validate()?;

        if ledger.platform_account().as_str() != config.trading.platform_account {
            warn!(
                ledger = %ledger.platform_account(),
                configured = %config.trading.platform_account,
                "Ledger platform account differs from configuration"
            );
        }

        Ok(Self {
            ledger,
            orders: OrderBook::new(),
            trades: DashMap::new(),
            pending: DashSet::new(),
            evidence: EvidenceStore::new(),
            machine: TradeStateMachine::new(config.payment_window()),
            publisher,
            clock,
            journal: None,
            metrics: Metrics::new()?,
            commission_percent: config.trading.commission_percent,
        })
    }

    /// Append every committed trade to `journal`
    pub fn with_journal(mut self, journal: Arc<TradeJournal>) -> Self {
        self.journal = Some(journal);
        self
    }

    /// Escrow ledger
    pub fn ledger(&self) -> &Arc<EscrowLedger> {
        &self.ledger
    }

    /// Metrics
    pub fn metrics(&self) -> &Metrics {
        &self.metrics
    }

    /// Transition rules
    pub fn machine(&self) -> &TradeStateMachine {
        &self.machine
    }

    /// Current time from the engine clock
    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    // ---- orders ----

    /// List a sell order
    pub async fn create_order(
        &self,
        seller: &AccountId,
        amount: Decimal,
        rate: Decimal,
        payment_method: &str,
        payment_details: &str,
    ) -> Result<Order> {
        if seller.as_str().trim().is_empty() {
            return Err(Error::Validation("seller is required".to_string()));
        }

        let order = self.orders.create(
            seller,
            amount,
            rate,
            payment_method,
            payment_details,
            self.now(),
        )?;
        self.metrics.record_order_created();
        Ok(order)
    }

    /// Seller withdraws an OPEN order
    pub async fn cancel_order(&self, order_id: Uuid, seller: &AccountId) -> Result<Order> {
        self.orders.cancel(order_id, seller)
    }

    /// Buyer takes an OPEN order
    ///
    /// Locks the order amount from the seller's balance and creates the trade
    /// in CREATED. If the lock fails the order stays OPEN.
    ///
    /// The trade is registered, still locked, before the order shows it, so a
    /// reader following `Order::trade_id` always finds the trade.
    pub async fn match_order(&self, order_id: Uuid, buyer: &AccountId) -> Result<Trade> {
        if buyer.as_str().trim().is_empty() {
            return Err(Error::Validation("buyer is required".to_string()));
        }

        let now = self.now();
        let trade_id = Uuid::now_v7();
        let ledger = &self.ledger;

        let (_, guard) = self.orders.match_with(order_id, trade_id, |order| {
            if order.seller == *buyer {
                return Err(Error::Validation(
                    "buyer cannot match their own order".to_string(),
                ));
            }
            self.register(Trade::from_order(trade_id, order, buyer.clone(), now), |trade| {
                ledger.lock(trade_id, &trade.seller, trade.amount, now)?;
                Ok(())
            })
        })?;

        // The guard is held until the created event is out
        let trade = Trade::clone(&guard);
        self.after_commit(&trade, now).await;

        Ok(trade)
    }

    /// Insert `trade` locked, keeping it only if `reserve` succeeds
    fn register<F>(&self, trade: Trade, reserve: F) -> Result<OwnedMutexGuard<Trade>>
    where
        F: FnOnce(&Trade) -> Result<()>,
    {
        let trade_id = trade.id;
        let slot: TradeSlot = Arc::new(Mutex::new(trade));
        let guard = Arc::clone(&slot)
            .try_lock_owned()
            .map_err(|_| Error::Validation(format!("trade {} is already locked", trade_id)))?;

        self.trades.insert(trade_id, slot);
        if let Err(e) = reserve(&guard) {
            self.trades.remove(&trade_id);
            return Err(e);
        }
        Ok(guard)
    }

    // ---- trade actions ----

    /// Buyer attaches payment evidence
    pub async fn submit_evidence(
        &self,
        trade_id: Uuid,
        caller: &AccountId,
        evidence: Evidence,
    ) -> Result<Trade> {
        let slot = self.slot(trade_id)?;
        let mut guard = slot.lock().await;
        let now = self.now();

        let record = self.evidence.attach(&guard, evidence, caller, now)?;

        // Past CREATED the trade keeps the evidence markPaid was accepted on
        if guard.status != TradeStatus::Created {
            info!(%trade_id, status = %guard.status, "Late payment evidence recorded");
            return Ok(guard.clone());
        }

        let mut next = guard.clone();
        next.evidence = Some(record.evidence);
        next.version += 1;
        *guard = next.clone();

        info!(%trade_id, version = next.version, "Payment evidence attached");
        self.journal(&next, now).await;

        Ok(next)
    }

    /// Buyer confirms the off-platform payment was sent
    pub async fn mark_paid(&self, trade_id: Uuid, caller: &AccountId) -> Result<Trade> {
        self.transition(trade_id, Caller::Account(caller), TradeAction::MarkPaid, None)
            .await
            .map(|(trade, _)| trade)
    }

    /// Buyer or seller contests the trade
    pub async fn raise_dispute(
        &self,
        trade_id: Uuid,
        caller: &AccountId,
        reason: &str,
    ) -> Result<Trade> {
        let action = TradeAction::RaiseDispute {
            reason: reason.to_string(),
        };
        self.transition(trade_id, Caller::Account(caller), action, None)
            .await
            .map(|(trade, _)| trade)
    }

    /// Buyer abandons an unpaid trade
    ///
    /// Repeating the cancel on a cancelled trade returns it unchanged.
    pub async fn cancel_trade(&self, trade_id: Uuid, caller: &AccountId) -> Result<Trade> {
        self.transition(trade_id, Caller::Account(caller), TradeAction::Cancel, None)
            .await
            .map(|(trade, _)| trade)
    }

    /// Cancel a trade whose payment window has elapsed
    ///
    /// Fails with [`Error::StaleVersion`] if the trade changed since the
    /// caller read `expected_version`.
    pub async fn expire_trade(&self, trade_id: Uuid, expected_version: u64) -> Result<Trade> {
        let (trade, _) = self
            .transition(
                trade_id,
                Caller::Scheduler,
                TradeAction::Expire,
                Some(expected_version),
            )
            .await?;
        self.metrics.record_expired();
        Ok(trade)
    }

    /// Settle a trade by admin decision
    ///
    /// Callers must have authorized the admin already. A trade that already
    /// reached this resolution's terminal status returns the original settlement.
    pub(crate) async fn apply_resolution(
        &self,
        trade_id: Uuid,
        resolution: Resolution,
    ) -> Result<ArbitrationOutcome> {
        let slot = self.slot(trade_id)?;
        let mut guard = slot.lock().await;

        if guard.status.is_terminal() {
            if guard.status != resolution.target_status() {
                return Err(Error::TradeClosed {
                    trade_id,
                    status: guard.status,
                });
            }

            let settlement = self
                .ledger
                .hold(trade_id)
                .and_then(|hold| hold.settlement)
                .ok_or(Error::Ledger(escrow_ledger::Error::HoldNotFound(trade_id)))?;

            debug!(%trade_id, status = %guard.status, "Resolution already applied");
            return Ok(ArbitrationOutcome {
                trade: guard.clone(),
                settlement,
                already_resolved: true,
            });
        }

        let (trade, settlement) = self
            .commit(&mut guard, Actor::Admin, &TradeAction::Resolve(resolution))
            .await?;
        let settlement = settlement.ok_or_else(|| {
            Error::Validation(format!("resolution of {} moved no funds", trade_id))
        })?;

        Ok(ArbitrationOutcome {
            trade,
            settlement,
            already_resolved: false,
        })
    }

    async fn transition(
        &self,
        trade_id: Uuid,
        caller: Caller<'_>,
        action: TradeAction,
        expected_version: Option<u64>,
    ) -> Result<(Trade, Option<Settlement>)> {
        let slot = self.slot(trade_id)?;
        let mut guard = slot.lock().await;

        if let Some(expected) = expected_version {
            if guard.version != expected {
                return Err(Error::StaleVersion {
                    trade_id,
                    expected,
                    actual: guard.version,
                });
            }
        }

        let actor = match caller {
            Caller::Account(account) => guard
                .role_of(account)
                .map(Actor::from)
                .ok_or_else(|| Error::NotParticipant(account.clone()))?,
            Caller::Scheduler => Actor::Scheduler,
        };

        if action == TradeAction::Cancel
            && actor == Actor::Buyer
            && guard.status == TradeStatus::Cancelled
        {
            debug!(%trade_id, "Trade already cancelled");
            return Ok((guard.clone(), None));
        }

        self.commit(&mut guard, actor, &action).await
    }

    /// Apply `action` to the locked trade, moving funds on terminal states
    async fn commit(
        &self,
        current: &mut Trade,
        actor: Actor,
        action: &TradeAction,
    ) -> Result<(Trade, Option<Settlement>)> {
        let now = self.now();
        let next = self.machine.apply(current, action, actor, now)?;

        let settlement = match next.status {
            TradeStatus::Completed => Some(self.ledger.release(
                next.id,
                &next.buyer,
                self.commission_percent,
                now,
            )?),
            TradeStatus::Cancelled => Some(self.ledger.refund(next.id, now)?),
            _ => None,
        };

        *current = next.clone();

        info!(
            trade_id = %next.id,
            order_id = %next.order_id,
            action = action.name(),
            status = %next.status,
            version = next.version,
            "Trade transition committed"
        );

        self.after_commit(&next, now).await;
        Ok((next, settlement))
    }

    async fn after_commit(&self, trade: &Trade, now: DateTime<Utc>) {
        if trade.status == TradeStatus::Created {
            self.pending.insert(trade.id);
        } else {
            self.pending.remove(&trade.id);
        }
        if trade.status.is_terminal() {
            self.orders.close(trade.order_id);
        }

        self.metrics.record_transition(trade.status);
        self.metrics.set_active_holds(self.ledger.active_hold_count());

        self.publisher.publish(TradeEvent::new(
            TradeEventKind::for_status(trade.status),
            trade.clone(),
            now,
        ));

        self.journal(trade, now).await;
    }

    async fn journal(&self, trade: &Trade, now: DateTime<Utc>) {
        if let Some(journal) = &self.journal {
            if let Err(e) = journal.append(trade, now).await {
                warn!(trade_id = %trade.id, error = %e, "Failed to journal trade");
            }
        }
    }

    fn slot(&self, trade_id: Uuid) -> Result<TradeSlot> {
        self.trades
            .get(&trade_id)
            .map(|slot| Arc::clone(slot.value()))
            .ok_or(Error::TradeNotFound(trade_id))
    }

    // ---- reads ----

    /// Current snapshot of a trade
    pub async fn trade(&self, trade_id: Uuid) -> Result<Trade> {
        let slot = self.slot(trade_id)?;
        let trade = slot.lock().await.clone();
        Ok(trade)
    }

    /// Every trade, oldest first
    pub async fn trades(&self) -> Vec<Trade> {
        let slots: Vec<TradeSlot> = self
            .trades
            .iter()
            .map(|entry| Arc::clone(entry.value()))
            .collect();

        let mut trades = Vec::with_capacity(slots.len());
        for slot in slots {
            trades.push(slot.lock().await.clone());
        }
        trades.sort_by_key(|trade| (trade.created_at, trade.id));
        trades
    }

    /// Trades still in CREATED, oldest first
    ///
    /// Reads the pending index, so it never visits settled trades.
    pub async fn pending_trades(&self) -> Vec<Trade> {
        let slots: Vec<TradeSlot> = self
            .pending
            .iter()
            .filter_map(|id| self.trades.get(id.key()).map(|slot| Arc::clone(slot.value())))
            .collect();

        let mut trades = Vec::with_capacity(slots.len());
        for slot in slots {
            let trade = slot.lock().await;
            if trade.status == TradeStatus::Created {
                trades.push(trade.clone());
            }
        }
        trades.sort_by_key(|trade| (trade.created_at, trade.id));
        trades
    }

    /// Order by ID
    pub fn order(&self, order_id: Uuid) -> Result<Order> {
        self.orders.get(order_id)
    }

    /// OPEN orders, oldest first
    pub fn open_orders(&self) -> Vec<Order> {
        self.orders.open_orders()
    }

    /// Every evidence submission for a trade
    pub fn evidence_history(&self, trade_id: Uuid) -> Vec<EvidenceRecord> {
        self.evidence.records(trade_id)
    }

    /// Export orders, trades and the ledger
    ///
    /// Every trade lock is held while the ledger is read, so each trade's
    /// status agrees with its hold. Locks are taken in trade-id order.
    pub async fn snapshot(&self) -> EngineSnapshot {
        let mut slots: Vec<(Uuid, TradeSlot)> = self
            .trades
            .iter()
            .map(|entry| (*entry.key(), Arc::clone(entry.value())))
            .collect();
        slots.sort_by_key(|(trade_id, _)| *trade_id);

        let mut guards = Vec::with_capacity(slots.len());
        for (trade_id, slot) in &slots {
            let guard = slot.lock().await;
            // A failed match unregisters its trade before unlocking it
            if self.trades.contains_key(trade_id) {
                guards.push(guard);
            }
        }

        let ledger = self.ledger.snapshot();
        let orders = self.orders.all();
        let mut trades: Vec<Trade> = guards.iter().map(|guard| Trade::clone(guard)).collect();
        drop(guards);

        trades.sort_by_key(|trade| (trade.created_at, trade.id));
        EngineSnapshot {
            orders,
            trades,
            ledger,
            taken_at: self.now(),
        }
    }
}
