//! Core types for the escrow ledger
//!
//! Money is always `Decimal`; timestamps are always UTC.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Account identifier (user id or the platform fee account)
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct AccountId(String);

impl AccountId {
    /// Create new account ID
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Get as string
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for AccountId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for AccountId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

/// Side a hold was settled to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReleaseTarget {
    /// Paid out to the counterparty (minus fee)
    Buyer,
    /// Returned in full to the source account
    Seller,
}

/// Outcome of settling a hold
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Settlement {
    /// Trade the hold belonged to
    pub trade_id: Uuid,

    /// Direction of the settlement
    pub target: ReleaseTarget,

    /// Account credited
    pub beneficiary: AccountId,

    /// Amount credited to the beneficiary
    pub credited: Decimal,

    /// Amount credited to the platform account
    pub fee: Decimal,

    /// When the hold was settled
    pub settled_at: DateTime<Utc>,
}

impl Settlement {
    /// Total amount that left the hold (credited + fee)
    pub fn gross(&self) -> Decimal {
        self.credited + self.fee
    }
}

/// Escrowed funds parked against one trade
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EscrowHold {
    /// Trade this hold secures
    pub trade_id: Uuid,

    /// Held amount
    pub amount: Decimal,

    /// Account the funds were debited from (seller)
    pub source: AccountId,

    /// When the funds were locked
    pub held_at: DateTime<Utc>,

    /// Settlement direction, set exactly once
    pub released_to: Option<ReleaseTarget>,

    /// Settlement details, set together with `released_to`
    pub settlement: Option<Settlement>,
}

impl EscrowHold {
    /// Hold still owns its funds
    pub fn is_active(&self) -> bool {
        self.released_to.is_none()
    }
}
