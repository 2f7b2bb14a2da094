//! Trade Engine
//!
//! Lifecycle engine for peer-to-peer trades: a seller posts an order, a buyer
//! matches it, pays off-platform, and the escrowed balance is released or
//! refunded.
//!
//! # Lifecycle
//!
//! ```text
//! CREATED --(buyer: evidence + mark paid)--> PAID
//! CREATED --(buyer: cancel | sweep: expire)--> CANCELLED
//! CREATED | PAID --(buyer/seller: dispute)--> DISPUTE
//! PAID | DISPUTE --(admin: release to buyer)--> COMPLETED
//! DISPUTE --(admin: refund to seller)--> CANCELLED
//! ```
//!
//! # Example
//!
//! ```no_run
//! use escrow_ledger::{AccountId, EscrowLedger};
//! use rust_decimal::Decimal;
//! use std::sync::Arc;
//! use trade_engine::{BroadcastBus, Config, SystemClock, TradeEngine};
//!
//! #[tokio::main]
//! async fn main() -> trade_engine::Result<()> {
//!     let config = Config::default();
//!     let ledger = Arc::new(EscrowLedger::new(AccountId::new("platform")));
//!     let bus = Arc::new(BroadcastBus::new(config.events.capacity));
//!     let engine = TradeEngine::new(&config, ledger, bus, Arc::new(SystemClock))?;
//!
//!     let seller = AccountId::new("seller");
//!     engine.ledger().deposit(&seller, Decimal::from(100))?;
//!     let order = engine
//!         .create_order(&seller, Decimal::from(100), Decimal::from(126), "bank", "acct 001")
//!         .await?;
//!     let trade = engine.match_order(order.id, &AccountId::new("buyer")).await?;
//!     println!("trade {} is {}", trade.id, trade.status);
//!
//!     Ok(())
//! }
//! ```

#![forbid(unsafe_code)]
#![warn(
    missing_docs,
    rust_2018_idioms,
    missing_debug_implementations,
    clippy::all
)]

pub mod arbitration;
pub mod clock;
pub mod config;
pub mod engine;
pub mod error;
pub mod events;
pub mod evidence;
pub mod journal;
pub mod metrics;
pub mod order_book;
pub mod scheduler;
pub mod state_machine;
pub mod types;

// Re-exports
pub use arbitration::{digest_factor, ArbitrationOutcome, ArbitrationService};
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::Config;
pub use engine::{EngineSnapshot, TradeEngine};
pub use error::{Error, Result};
pub use events::{BroadcastBus, EventPublisher, TradeEvent, TradeEventKind};
pub use evidence::{EvidenceRecord, EvidenceStore};
pub use journal::{JournalEntry, TradeJournal};
pub use metrics::Metrics;
pub use order_book::OrderBook;
pub use scheduler::{ExpiryScheduler, SweepReport};
pub use state_machine::{Actor, TradeAction, TradeStateMachine};
pub use types::*;
