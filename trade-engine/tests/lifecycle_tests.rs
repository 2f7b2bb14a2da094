//! End-to-end trade lifecycle tests
//!
//! Drives the engine, the arbitration service and the expiry sweep together:
//! - Match → evidence → paid → dispute → admin release
//! - Timed expiry and refund
//! - Races between buyer, sweep and admin on one trade
//! - Ledger conservation after every scenario

use chrono::{Duration, Utc};
use escrow_ledger::{AccountId, EscrowLedger, ReleaseTarget};
use rust_decimal::Decimal;
use std::sync::Arc;
use tempfile::tempdir;
use trade_engine::{
    digest_factor, ArbitrationService, BroadcastBus, CancelReason, Config, EngineSnapshot, Error,
    Evidence, ExpiryScheduler, ManualClock, OrderStatus, Resolution, Trade, TradeEngine,
    TradeJournal, TradeStatus,
};

const FACTORS: [&str; 3] = ["otp-482913", "hardware-key-7f", "second-admin-pin"];

struct TestEnvironment {
    engine: Arc<TradeEngine>,
    arbitration: Arc<ArbitrationService>,
    scheduler: Arc<ExpiryScheduler>,
    clock: Arc<ManualClock>,
    bus: Arc<BroadcastBus>,
    seller: AccountId,
    buyer: AccountId,
    platform: AccountId,
}

impl TestEnvironment {
    fn new() -> Self {
        Self::with_journal(None)
    }

    fn with_journal(journal: Option<Arc<TradeJournal>>) -> Self {
        let mut config = Config::default();
        config.arbitration.factor_digests = FACTORS.iter().map(|f| digest_factor(f)).collect();

        let clock = Arc::new(ManualClock::new(Utc::now()));
        let bus = Arc::new(BroadcastBus::new(config.events.capacity));
        let platform = AccountId::new(config.trading.platform_account.clone());
        let ledger = Arc::new(EscrowLedger::new(platform.clone()));

        let mut engine = TradeEngine::new(&config, ledger, bus.clone(), clock.clone()).unwrap();
        if let Some(journal) = journal {
            engine = engine.with_journal(journal);
        }
        let engine = Arc::new(engine);

        let arbitration =
            Arc::new(ArbitrationService::new(engine.clone(), &config.arbitration).unwrap());
        let scheduler = Arc::new(ExpiryScheduler::from_config(engine.clone(), &config));

        let seller = AccountId::new("seller-1");
        engine.ledger().deposit(&seller, Decimal::from(100)).unwrap();

        Self {
            engine,
            arbitration,
            scheduler,
            clock,
            bus,
            seller,
            buyer: AccountId::new("buyer-1"),
            platform,
        }
    }

    async fn open_trade(&self) -> Trade {
        let order = self
            .engine
            .create_order(
                &self.seller,
                Decimal::from(100),
                Decimal::from(126),
                "bank transfer",
                "IBAN 0001",
            )
            .await
            .unwrap();
        self.engine.match_order(order.id, &self.buyer).await.unwrap()
    }

    fn balance(&self, account: &AccountId) -> Decimal {
        self.engine.ledger().balance(account)
    }

    fn assert_conserved(&self) {
        self.engine.ledger().check_conservation().unwrap();
    }
}

fn factors() -> Vec<String> {
    FACTORS.iter().map(|f| f.to_string()).collect()
}

/// Every trade's status must agree with how its hold was settled
fn assert_snapshot_consistent(snapshot: &EngineSnapshot) {
    for trade in &snapshot.trades {
        let hold = snapshot
            .ledger
            .holds
            .iter()
            .find(|hold| hold.trade_id == trade.id)
            .unwrap();
        let expected = match trade.status {
            TradeStatus::Completed => Some(ReleaseTarget::Buyer),
            TradeStatus::Cancelled => Some(ReleaseTarget::Seller),
            _ => None,
        };
        assert_eq!(
            hold.released_to, expected,
            "trade {} is {} but hold says {:?}",
            trade.id, trade.status, hold.released_to
        );
    }
}

#[tokio::test]
async fn test_dispute_resolved_to_buyer() {
    let env = TestEnvironment::new();
    let mut events = env.bus.subscribe();

    let trade = env.open_trade().await;
    assert_eq!(trade.status, TradeStatus::Created);
    assert_eq!(trade.local_amount(), Some(Decimal::from(12600)));
    assert_eq!(env.engine.ledger().active_hold_total(), Decimal::from(100));
    env.assert_conserved();

    env.clock.advance(Duration::minutes(2));
    env.engine
        .submit_evidence(trade.id, &env.buyer, Evidence::transfer("TX1", "1234"))
        .await
        .unwrap();
    let paid = env.engine.mark_paid(trade.id, &env.buyer).await.unwrap();
    assert_eq!(paid.status, TradeStatus::Paid);

    env.clock.advance(Duration::minutes(1));
    let disputed = env
        .engine
        .raise_dispute(trade.id, &env.seller, "Wrong amount")
        .await
        .unwrap();
    assert_eq!(disputed.status, TradeStatus::Dispute);
    assert_eq!(disputed.dispute_reason.as_deref(), Some("Wrong amount"));

    let outcome = env
        .arbitration
        .resolve(trade.id, Resolution::ReleaseToBuyer, &factors())
        .await
        .unwrap();
    assert!(!outcome.already_resolved);
    assert_eq!(outcome.trade.status, TradeStatus::Completed);
    assert_eq!(outcome.settlement.credited, Decimal::from(98));
    assert_eq!(outcome.settlement.fee, Decimal::from(2));
    assert_eq!(env.balance(&env.buyer), Decimal::from(98));
    assert_eq!(env.balance(&env.platform), Decimal::from(2));
    assert_eq!(env.balance(&env.seller), Decimal::ZERO);
    env.assert_conserved();

    let balances = env.engine.ledger().snapshot().balances;
    let again = env
        .arbitration
        .resolve(trade.id, Resolution::ReleaseToBuyer, &factors())
        .await
        .unwrap();
    assert!(again.already_resolved);
    assert_eq!(again.settlement, outcome.settlement);
    assert_eq!(env.engine.ledger().snapshot().balances, balances);

    let order = env.engine.order(trade.order_id).unwrap();
    assert_eq!(order.status, OrderStatus::Closed);

    let subjects: Vec<_> = std::iter::from_fn(|| events.try_recv().ok())
        .map(|event| event.subject())
        .collect();
    assert_eq!(
        subjects,
        vec!["trade.created", "trade.paid", "trade.disputed", "trade.completed"]
    );
}

#[tokio::test]
async fn test_refund_to_seller_and_conflicting_resolution() {
    let env = TestEnvironment::new();
    let trade = env.open_trade().await;

    env.engine
        .raise_dispute(trade.id, &env.buyer, "Seller unresponsive")
        .await
        .unwrap();

    let outcome = env
        .arbitration
        .resolve(trade.id, Resolution::RefundToSeller, &factors())
        .await
        .unwrap();
    assert_eq!(outcome.trade.status, TradeStatus::Cancelled);
    assert_eq!(outcome.settlement.fee, Decimal::ZERO);
    assert_eq!(env.balance(&env.seller), Decimal::from(100));

    let err = env
        .arbitration
        .resolve(trade.id, Resolution::ReleaseToBuyer, &factors())
        .await
        .unwrap_err();
    assert!(matches!(err, Error::TradeClosed { .. }));
    assert_eq!(env.balance(&env.buyer), Decimal::ZERO);
    env.assert_conserved();
}

#[tokio::test]
async fn test_auth_mismatch_mutates_nothing() {
    let env = TestEnvironment::new();
    let trade = env.open_trade().await;
    env.engine
        .raise_dispute(trade.id, &env.seller, "No payment")
        .await
        .unwrap();
    let before = env.engine.trade(trade.id).await.unwrap();

    let mut wrong = factors();
    wrong[1] = "guess".to_string();
    let err = env
        .arbitration
        .resolve(trade.id, Resolution::ReleaseToBuyer, &wrong)
        .await
        .unwrap_err();
    assert!(matches!(err, Error::AuthFactorMismatch));

    let err = env
        .arbitration
        .resolve(trade.id, Resolution::ReleaseToBuyer, &factors()[..2])
        .await
        .unwrap_err();
    assert!(matches!(err, Error::AuthFactorMismatch));

    assert_eq!(env.engine.trade(trade.id).await.unwrap(), before);
    assert_eq!(env.engine.ledger().active_hold_total(), Decimal::from(100));
    assert_eq!(env.engine.metrics().auth_failures.get(), 2);
}

#[tokio::test]
async fn test_admin_release_from_paid_but_not_refund() {
    let env = TestEnvironment::new();
    let trade = env.open_trade().await;
    env.engine
        .submit_evidence(trade.id, &env.buyer, Evidence::proof("receipt-42"))
        .await
        .unwrap();
    env.engine.mark_paid(trade.id, &env.buyer).await.unwrap();

    let err = env
        .arbitration
        .resolve(trade.id, Resolution::RefundToSeller, &factors())
        .await
        .unwrap_err();
    assert!(matches!(err, Error::InvalidTransition { .. }));

    let outcome = env
        .arbitration
        .resolve(trade.id, Resolution::ReleaseToBuyer, &factors())
        .await
        .unwrap();
    assert_eq!(outcome.trade.status, TradeStatus::Completed);
    env.assert_conserved();
}

#[tokio::test]
async fn test_expiry_restores_seller_balance() {
    let env = TestEnvironment::new();
    let trade = env.open_trade().await;

    env.clock.advance(Duration::minutes(15));
    assert_eq!(env.scheduler.sweep_once().await.expired, 0);
    assert_eq!(
        env.engine.trade(trade.id).await.unwrap().status,
        TradeStatus::Created
    );

    env.clock.advance(Duration::seconds(1));
    assert_eq!(env.scheduler.sweep_once().await.expired, 1);
    assert_eq!(
        env.engine.trade(trade.id).await.unwrap().status,
        TradeStatus::Cancelled
    );
    assert_eq!(env.balance(&env.seller), Decimal::from(100));
    env.assert_conserved();

    let err = env.engine.mark_paid(trade.id, &env.buyer).await.unwrap_err();
    assert!(matches!(err, Error::TradeClosed { .. }));
}

#[tokio::test]
async fn test_evidence_gate_and_window() {
    let env = TestEnvironment::new();
    let trade = env.open_trade().await;

    let err = env.engine.mark_paid(trade.id, &env.buyer).await.unwrap_err();
    assert!(matches!(err, Error::EvidenceMissing(_)));

    let err = env
        .engine
        .submit_evidence(
            trade.id,
            &env.buyer,
            Evidence::new(None, Some("TX1".to_string()), None),
        )
        .await
        .unwrap_err();
    assert!(matches!(err, Error::EvidenceMissing(_)));

    env.engine
        .submit_evidence(trade.id, &env.buyer, Evidence::transfer("TX1", "1234"))
        .await
        .unwrap();

    env.clock.advance(Duration::minutes(16));
    let err = env.engine.mark_paid(trade.id, &env.buyer).await.unwrap_err();
    assert!(matches!(err, Error::WindowExpired(_)));
    assert_eq!(
        env.engine.trade(trade.id).await.unwrap().status,
        TradeStatus::Created
    );
}

#[tokio::test]
async fn test_dispute_freezes_party_actions() {
    let env = TestEnvironment::new();
    let trade = env.open_trade().await;
    env.engine
        .submit_evidence(trade.id, &env.buyer, Evidence::proof("receipt"))
        .await
        .unwrap();
    env.engine
        .raise_dispute(trade.id, &env.buyer, "Seller claims no payment")
        .await
        .unwrap();

    let err = env.engine.mark_paid(trade.id, &env.buyer).await.unwrap_err();
    assert!(matches!(err, Error::TradeClosed { .. }));

    let err = env.engine.cancel_trade(trade.id, &env.buyer).await.unwrap_err();
    assert!(matches!(err, Error::TradeClosed { .. }));

    env.clock.advance(Duration::hours(1));
    assert_eq!(env.scheduler.sweep_once().await.expired, 0);
    assert_eq!(
        env.engine.trade(trade.id).await.unwrap().status,
        TradeStatus::Dispute
    );
    assert_eq!(env.engine.ledger().active_hold_total(), Decimal::from(100));
}

#[tokio::test]
async fn test_insufficient_funds_leaves_order_open() {
    let env = TestEnvironment::new();
    let order = env
        .engine
        .create_order(&env.seller, Decimal::from(150), Decimal::from(126), "bank", "x")
        .await
        .unwrap();

    let err = env.engine.match_order(order.id, &env.buyer).await.unwrap_err();
    assert!(matches!(err, Error::InsufficientFunds { .. }));
    assert_eq!(env.engine.order(order.id).unwrap().status, OrderStatus::Open);
    assert_eq!(env.balance(&env.seller), Decimal::from(100));
    assert!(env.engine.trades().await.is_empty());

    env.engine
        .ledger()
        .deposit(&env.seller, Decimal::from(50))
        .unwrap();
    let trade = env.engine.match_order(order.id, &env.buyer).await.unwrap();
    assert_eq!(trade.amount, Decimal::from(150));

    let err = env
        .engine
        .match_order(order.id, &AccountId::new("buyer-2"))
        .await
        .unwrap_err();
    assert!(matches!(err, Error::OrderUnavailable { .. }));
    env.assert_conserved();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_matches_lock_once() {
    let env = TestEnvironment::new();
    let order = env
        .engine
        .create_order(&env.seller, Decimal::from(100), Decimal::ONE, "bank", "x")
        .await
        .unwrap();

    let order_id = order.id;
    let mut handles = Vec::new();
    for i in 0..8 {
        let engine = env.engine.clone();
        let buyer = AccountId::new(format!("buyer-{}", i));
        handles.push(tokio::spawn(async move {
            engine.match_order(order_id, &buyer).await
        }));
    }

    let mut matched = 0;
    for handle in handles {
        if handle.await.unwrap().is_ok() {
            matched += 1;
        }
    }

    assert_eq!(matched, 1);
    assert_eq!(env.engine.ledger().active_hold_count(), 1);
    assert_eq!(env.balance(&env.seller), Decimal::ZERO);
    env.assert_conserved();
}

#[tokio::test]
async fn test_stale_expiry_retried_next_sweep() {
    let env = TestEnvironment::new();
    let trade = env.open_trade().await;
    env.clock.advance(Duration::minutes(15) + Duration::seconds(1));

    // Sweep read version v, then the buyer moved the trade to v + 1
    let seen = env.engine.trade(trade.id).await.unwrap().version;
    let moved = env
        .engine
        .submit_evidence(trade.id, &env.buyer, Evidence::proof("late receipt"))
        .await
        .unwrap();
    assert_eq!(moved.version, seen + 1);

    let err = env.engine.expire_trade(trade.id, seen).await.unwrap_err();
    assert!(matches!(
        err,
        Error::StaleVersion { expected, actual, .. } if expected == seen && actual == seen + 1
    ));
    assert_eq!(
        env.engine.trade(trade.id).await.unwrap().status,
        TradeStatus::Created
    );
    assert_eq!(env.engine.ledger().active_hold_total(), Decimal::from(100));

    let err = env.engine.mark_paid(trade.id, &env.buyer).await.unwrap_err();
    assert!(matches!(err, Error::WindowExpired(_)));

    let report = env.scheduler.sweep_once().await;
    assert_eq!(report.expired, 1);
    let trade = env.engine.trade(trade.id).await.unwrap();
    assert_eq!(trade.cancel_reason, Some(CancelReason::Expired));
    assert_eq!(env.balance(&env.seller), Decimal::from(100));
    env.assert_conserved();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_buyer_cancel_races_expiry() {
    let env = TestEnvironment::new();
    const ROUNDS: u64 = 20;

    for round in 0..ROUNDS {
        let trade_id = env.open_trade().await.id;
        env.clock.advance(Duration::minutes(16));

        let cancel = {
            let engine = env.engine.clone();
            let buyer = env.buyer.clone();
            tokio::spawn(async move { engine.cancel_trade(trade_id, &buyer).await })
        };
        let sweep = {
            let scheduler = env.scheduler.clone();
            tokio::spawn(async move { scheduler.sweep_once().await })
        };

        let cancelled = cancel.await.unwrap().unwrap();
        let report = sweep.await.unwrap();

        assert_eq!(cancelled.status, TradeStatus::Cancelled);
        assert!(report.expired <= 1);
        assert_eq!(report.failed, 0);

        let hold = env.engine.ledger().hold(trade_id).unwrap();
        assert_eq!(hold.released_to, Some(ReleaseTarget::Seller));
        assert_eq!(env.balance(&env.seller), Decimal::from(100));
        assert_eq!(
            env.engine.metrics().transitions_to(TradeStatus::Cancelled),
            round + 1
        );
        env.assert_conserved();
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_snapshot_consistent_during_resolutions() {
    let env = TestEnvironment::new();
    env.engine
        .ledger()
        .deposit(&env.seller, Decimal::from(700))
        .unwrap();

    let mut trades = Vec::new();
    for _ in 0..8 {
        let trade = env.open_trade().await;
        env.engine
            .raise_dispute(trade.id, &env.seller, "No payment received")
            .await
            .unwrap();
        trades.push(trade.id);
    }

    let readers: Vec<_> = (0..4)
        .map(|_| {
            let engine = env.engine.clone();
            tokio::spawn(async move {
                for _ in 0..25 {
                    assert_snapshot_consistent(&engine.snapshot().await);
                    tokio::task::yield_now().await;
                }
            })
        })
        .collect();

    let resolvers: Vec<_> = trades
        .iter()
        .enumerate()
        .map(|(i, &trade_id)| {
            let arbitration = env.arbitration.clone();
            let resolution = if i % 2 == 0 {
                Resolution::ReleaseToBuyer
            } else {
                Resolution::RefundToSeller
            };
            tokio::spawn(async move { arbitration.resolve(trade_id, resolution, &factors()).await })
        })
        .collect();

    for resolver in resolvers {
        resolver.await.unwrap().unwrap();
    }
    for reader in readers {
        reader.await.unwrap();
    }

    let snapshot = env.engine.snapshot().await;
    assert_snapshot_consistent(&snapshot);
    assert!(snapshot.trades.iter().all(|trade| trade.status.is_terminal()));
    env.assert_conserved();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_matched_order_always_finds_its_trade() {
    let env = TestEnvironment::new();
    let order = env
        .engine
        .create_order(&env.seller, Decimal::from(100), Decimal::ONE, "bank", "x")
        .await
        .unwrap();

    let order_id = order.id;
    let matcher = {
        let engine = env.engine.clone();
        let buyer = env.buyer.clone();
        tokio::spawn(async move { engine.match_order(order_id, &buyer).await })
    };

    let trade_id = loop {
        if let Some(trade_id) = env.engine.order(order_id).unwrap().trade_id {
            break trade_id;
        }
        tokio::task::yield_now().await;
    };
    let seen = env.engine.trade(trade_id).await.unwrap();

    let matched = matcher.await.unwrap().unwrap();
    assert_eq!(seen, matched);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_resolutions_settle_once() {
    let env = TestEnvironment::new();
    let trade = env.open_trade().await;
    env.engine
        .raise_dispute(trade.id, &env.seller, "Chargeback")
        .await
        .unwrap();

    let (factors_a, factors_b) = (factors(), factors());
    let (a, b) = tokio::join!(
        env.arbitration
            .resolve(trade.id, Resolution::ReleaseToBuyer, &factors_a),
        env.arbitration
            .resolve(trade.id, Resolution::ReleaseToBuyer, &factors_b)
    );

    let (a, b) = (a.unwrap(), b.unwrap());
    assert!(a.already_resolved != b.already_resolved);
    assert_eq!(env.balance(&env.buyer), Decimal::from(98));
    assert_eq!(env.balance(&env.platform), Decimal::from(2));
    env.assert_conserved();
}

#[tokio::test]
async fn test_journal_records_every_commit() {
    let temp_dir = tempdir().unwrap();
    let journal = Arc::new(TradeJournal::open(temp_dir.path().join("trades.journal")).unwrap());
    let env = TestEnvironment::with_journal(Some(journal.clone()));

    let trade = env.open_trade().await;
    env.engine
        .submit_evidence(trade.id, &env.buyer, Evidence::proof("receipt"))
        .await
        .unwrap();
    env.engine.mark_paid(trade.id, &env.buyer).await.unwrap();
    env.arbitration
        .resolve(trade.id, Resolution::ReleaseToBuyer, &factors())
        .await
        .unwrap();

    assert_eq!(journal.verify_integrity().await.unwrap(), 4);

    let latest = journal.latest_snapshots().await.unwrap();
    assert_eq!(latest[&trade.id], env.engine.trade(trade.id).await.unwrap());
    assert_eq!(latest[&trade.id].status, TradeStatus::Completed);
}

#[tokio::test]
async fn test_withdrawn_order_cannot_match() {
    let env = TestEnvironment::new();
    let order = env
        .engine
        .create_order(&env.seller, Decimal::from(10), Decimal::from(126), "bank", "x")
        .await
        .unwrap();
    assert_eq!(env.engine.open_orders().len(), 1);

    let err = env
        .engine
        .cancel_order(order.id, &env.buyer)
        .await
        .unwrap_err();
    assert!(matches!(err, Error::NotParticipant(_)));

    env.engine.cancel_order(order.id, &env.seller).await.unwrap();
    assert!(env.engine.open_orders().is_empty());

    let err = env.engine.match_order(order.id, &env.buyer).await.unwrap_err();
    assert!(matches!(err, Error::OrderUnavailable { .. }));
}
