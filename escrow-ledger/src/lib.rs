//! Escrow Ledger
//!
//! Balance accounts and per-trade escrow holds for peer-to-peer trades.
//!
//! # Architecture
//!
//! - **Hold**: funds debited from a seller and parked against one trade
//! - **Release**: hold paid out to the buyer, minus a platform fee
//! - **Refund**: hold returned in full to the seller
//! - **Single critical section**: every balance/hold mutation runs under one lock
//!
//! # Invariants
//!
//! - Conservation: Σ(deposits) == Σ(balances) + Σ(active holds)
//! - A hold is settled exactly once; repeat settlement returns the first result
//! - Balances never go negative

#![forbid(unsafe_code)]
#![warn(
    missing_docs,
    rust_2018_idioms,
    missing_debug_implementations,
    clippy::all
)]

pub mod error;
pub mod ledger;
pub mod types;

// Re-exports
pub use error::{Error, Result};
pub use ledger::{EscrowLedger, LedgerSnapshot};
pub use types::{AccountId, EscrowHold, ReleaseTarget, Settlement};
