//! Error types for the trade engine

use crate::types::{OrderStatus, TradeStatus};
use escrow_ledger::AccountId;
use rust_decimal::Decimal;
use thiserror::Error;
use uuid::Uuid;

/// Result type for trade engine operations
pub type Result<T> = std::result::Result<T, Error>;

/// Trade engine errors
///
/// None of these leave a trade or the ledger partially mutated.
#[derive(Error, Debug)]
pub enum Error {
    /// Action not allowed from the trade's current status
    #[error("Invalid transition: {action} from {from}")]
    InvalidTransition {
        /// Status the trade was in
        from: TradeStatus,
        /// Attempted action
        action: &'static str,
    },

    /// Mark-paid without sufficient payment evidence
    #[error("Payment evidence missing for trade {0}")]
    EvidenceMissing(Uuid),

    /// Payment window elapsed
    #[error("Payment window expired for trade {0}")]
    WindowExpired(Uuid),

    /// Order cannot be matched or withdrawn
    #[error("Order {order_id} unavailable ({status})")]
    OrderUnavailable {
        /// Order ID
        order_id: Uuid,
        /// Status the order was in
        status: OrderStatus,
    },

    /// Seller cannot cover the escrow hold
    #[error("Insufficient funds in {account}: requested {requested}, available {available}")]
    InsufficientFunds {
        /// Seller account
        account: AccountId,
        /// Hold amount
        requested: Decimal,
        /// Spendable balance
        available: Decimal,
    },

    /// Arbitration authorization failed
    #[error("Authorization factors rejected")]
    AuthFactorMismatch,

    /// Action attempted on a terminal (or frozen) trade
    #[error("Trade {trade_id} is closed ({status})")]
    TradeClosed {
        /// Trade ID
        trade_id: Uuid,
        /// Status the trade was in
        status: TradeStatus,
    },

    /// Trade not found
    #[error("Trade not found: {0}")]
    TradeNotFound(Uuid),

    /// Order not found
    #[error("Order not found: {0}")]
    OrderNotFound(Uuid),

    /// Caller is neither buyer nor seller (or not the order owner)
    #[error("Account {0} is not a participant")]
    NotParticipant(AccountId),

    /// Malformed input
    #[error("Validation error: {0}")]
    Validation(String),

    /// Trade changed since it was read
    #[error("Trade {trade_id} changed: expected version {expected}, found {actual}")]
    StaleVersion {
        /// Trade ID
        trade_id: Uuid,
        /// Version the caller read
        expected: u64,
        /// Version found under the lock
        actual: u64,
    },

    /// Ledger error
    #[error("Ledger error: {0}")]
    Ledger(escrow_ledger::Error),

    /// Journal write/read error
    #[error("Journal error: {0}")]
    Journal(String),

    /// Metrics registration error
    #[error("Metrics error: {0}")]
    Metrics(#[from] prometheus::Error),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Stable code for clients to map to a message
    pub fn code(&self) -> &'static str {
        match self {
            Error::InvalidTransition { .. } => "INVALID_TRANSITION",
            Error::EvidenceMissing(_) => "EVIDENCE_MISSING",
            Error::WindowExpired(_) => "WINDOW_EXPIRED",
            Error::OrderUnavailable { .. } => "ORDER_UNAVAILABLE",
            Error::InsufficientFunds { .. } => "INSUFFICIENT_FUNDS",
            Error::AuthFactorMismatch => "AUTH_FACTOR_MISMATCH",
            Error::TradeClosed { .. } => "TRADE_CLOSED",
            Error::TradeNotFound(_) => "TRADE_NOT_FOUND",
            Error::OrderNotFound(_) => "ORDER_NOT_FOUND",
            Error::NotParticipant(_) => "NOT_PARTICIPANT",
            Error::Validation(_) => "VALIDATION",
            Error::StaleVersion { .. } => "STALE_VERSION",
            Error::Ledger(_) => "LEDGER",
            Error::Journal(_) => "JOURNAL",
            Error::Metrics(_) => "METRICS",
            Error::Config(_) => "CONFIG",
            Error::Io(_) => "IO",
        }
    }
}

impl From<escrow_ledger::Error> for Error {
    fn from(err: escrow_ledger::Error) -> Self {
        match err {
            escrow_ledger::Error::InsufficientFunds {
                account,
                requested,
                available,
            } => Error::InsufficientFunds {
                account,
                requested,
                available,
            },
            other => Error::Ledger(other),
        }
    }
}
