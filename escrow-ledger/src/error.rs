//! Error types for the escrow ledger

use rust_decimal::Decimal;
use thiserror::Error;
use uuid::Uuid;

use crate::types::AccountId;

/// Result type for ledger operations
pub type Result<T> = std::result::Result<T, Error>;

/// Ledger errors
#[derive(Error, Debug, Clone, PartialEq)]
pub enum Error {
    /// Account cannot cover the requested hold
    #[error("Insufficient funds in {account}: requested {requested}, available {available}")]
    InsufficientFunds {
        /// Debited account
        account: AccountId,
        /// Amount asked for
        requested: Decimal,
        /// Spendable balance at the time
        available: Decimal,
    },

    /// Amount is zero or negative
    #[error("Invalid amount: {0}")]
    InvalidAmount(Decimal),

    /// Fee percentage outside [0, 100)
    #[error("Invalid fee percentage: {0}")]
    InvalidFee(Decimal),

    /// Trade already has a hold
    #[error("Hold already exists for trade {0}")]
    HoldExists(Uuid),

    /// No hold recorded for trade
    #[error("Hold not found for trade {0}")]
    HoldNotFound(Uuid),

    /// Hold was settled the other way (refund vs release)
    #[error("Hold for trade {trade_id} already settled to {settled:?}")]
    SettlementConflict {
        /// Trade the hold belongs to
        trade_id: Uuid,
        /// Existing settlement direction
        settled: crate::types::ReleaseTarget,
    },

    /// Result would not fit in a decimal
    #[error("Arithmetic overflow: {0}")]
    Overflow(String),

    /// Invariant violation (money conservation, etc.)
    #[error("Invariant violation: {0}")]
    InvariantViolation(String),
}
