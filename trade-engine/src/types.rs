//! Core types for orders and trades

use chrono::{DateTime, Duration, Utc};
use escrow_ledger::AccountId;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Order status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OrderStatus {
    /// Listed, waiting for a buyer
    Open,
    /// Taken by a buyer, trade in progress
    Matched,
    /// Withdrawn or its trade finished
    Closed,
}

impl fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            OrderStatus::Open => "OPEN",
            OrderStatus::Matched => "MATCHED",
            OrderStatus::Closed => "CLOSED",
        };
        write!(f, "{}", s)
    }
}

/// Seller-posted standing offer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Order {
    /// Order ID (UUIDv7 for time-ordering)
    pub id: Uuid,

    /// Seller account
    pub seller: AccountId,

    /// Platform balance offered
    pub amount: Decimal,

    /// Local currency per unit of platform balance
    pub rate: Decimal,

    /// Off-platform payment method (bank, mobile wallet, ...)
    pub payment_method: String,

    /// Where the buyer sends the payment
    pub payment_details: String,

    /// Current status
    pub status: OrderStatus,

    /// Created timestamp
    pub created_at: DateTime<Utc>,

    /// Trade created by matching this order
    pub trade_id: Option<Uuid>,
}

/// Trade status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TradeStatus {
    /// Matched, escrow locked, waiting for payment
    Created,
    /// Buyer claims payment with evidence
    Paid,
    /// Escrow released to buyer (terminal)
    Completed,
    /// Frozen pending admin resolution
    Dispute,
    /// Escrow refunded to seller (terminal)
    Cancelled,
}

impl TradeStatus {
    /// Check if status is terminal
    pub fn is_terminal(&self) -> bool {
        matches!(self, TradeStatus::Completed | TradeStatus::Cancelled)
    }

    /// Wire name
    pub fn as_str(&self) -> &'static str {
        match self {
            TradeStatus::Created => "CREATED",
            TradeStatus::Paid => "PAID",
            TradeStatus::Completed => "COMPLETED",
            TradeStatus::Dispute => "DISPUTE",
            TradeStatus::Cancelled => "CANCELLED",
        }
    }
}

impl fmt::Display for TradeStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Side of a trade
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Party {
    /// Pays off-platform, receives the escrow
    Buyer,
    /// Funds the escrow, receives the off-platform payment
    Seller,
}

/// Why a trade was cancelled
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CancelReason {
    /// Buyer walked away
    Buyer,
    /// Payment window elapsed
    Expired,
    /// Admin refunded the seller
    Arbitration,
}

/// Admin resolution outcome
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Resolution {
    /// Release escrow to the buyer, minus commission
    ReleaseToBuyer,
    /// Refund escrow to the seller in full
    RefundToSeller,
}

impl Resolution {
    /// Terminal status this resolution produces
    pub fn target_status(&self) -> TradeStatus {
        match self {
            Resolution::ReleaseToBuyer => TradeStatus::Completed,
            Resolution::RefundToSeller => TradeStatus::Cancelled,
        }
    }
}

/// Proof of off-platform payment
///
/// Sufficient when it carries a proof reference, or both a transaction id and
/// the sender identifier.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Evidence {
    /// Uploaded receipt / screenshot reference
    pub proof_ref: Option<String>,

    /// Payment provider transaction id
    pub tx_id: Option<String>,

    /// Account or phone the payment was sent from
    pub sender_identifier: Option<String>,
}

fn non_blank(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

impl Evidence {
    /// Build evidence, dropping blank fields
    pub fn new(
        proof_ref: Option<String>,
        tx_id: Option<String>,
        sender_identifier: Option<String>,
    ) -> Self {
        Self {
            proof_ref: non_blank(proof_ref),
            tx_id: non_blank(tx_id),
            sender_identifier: non_blank(sender_identifier),
        }
    }

    /// Evidence backed by an uploaded proof
    pub fn proof(proof_ref: impl Into<String>) -> Self {
        Self::new(Some(proof_ref.into()), None, None)
    }

    /// Evidence backed by a transfer reference
    pub fn transfer(tx_id: impl Into<String>, sender_identifier: impl Into<String>) -> Self {
        Self::new(None, Some(tx_id.into()), Some(sender_identifier.into()))
    }

    /// proof OR (tx id AND sender)
    pub fn is_sufficient(&self) -> bool {
        let present = |v: &Option<String>| v.as_deref().is_some_and(|s| !s.trim().is_empty());
        present(&self.proof_ref) || (present(&self.tx_id) && present(&self.sender_identifier))
    }
}

/// One matched exchange between a buyer and an order
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Trade {
    /// Trade ID (UUIDv7 for time-ordering)
    pub id: Uuid,

    /// Matched order
    pub order_id: Uuid,

    /// Buyer account
    pub buyer: AccountId,

    /// Seller account
    pub seller: AccountId,

    /// Escrowed platform balance
    pub amount: Decimal,

    /// Agreed rate, copied from the order
    pub rate: Decimal,

    /// Current status
    pub status: TradeStatus,

    /// Created timestamp (start of the payment window)
    pub created_at: DateTime<Utc>,

    /// When the buyer marked the trade paid
    pub paid_at: Option<DateTime<Utc>>,

    /// When the trade reached a terminal state
    pub resolved_at: Option<DateTime<Utc>>,

    /// Latest sufficient payment evidence
    pub evidence: Option<Evidence>,

    /// Dispute reason
    pub dispute_reason: Option<String>,

    /// Who raised the dispute
    pub dispute_raised_by: Option<Party>,

    /// Why the trade was cancelled
    pub cancel_reason: Option<CancelReason>,

    /// Admin resolution, if any
    pub resolution: Option<Resolution>,

    /// Bumped on every mutation
    pub version: u64,
}

impl Trade {
    /// New trade in CREATED for a freshly matched order
    pub fn from_order(id: Uuid, order: &Order, buyer: AccountId, now: DateTime<Utc>) -> Self {
        Self {
            id,
            order_id: order.id,
            buyer,
            seller: order.seller.clone(),
            amount: order.amount,
            rate: order.rate,
            status: TradeStatus::Created,
            created_at: now,
            paid_at: None,
            resolved_at: None,
            evidence: None,
            dispute_reason: None,
            dispute_raised_by: None,
            cancel_reason: None,
            resolution: None,
            version: 1,
        }
    }

    /// Local currency the buyer owes off-platform, `None` on overflow
    pub fn local_amount(&self) -> Option<Decimal> {
        self.amount.checked_mul(self.rate)
    }

    /// Time since the trade was created
    pub fn age(&self, now: DateTime<Utc>) -> Duration {
        now - self.created_at
    }

    /// Side `account` plays in this trade
    pub fn role_of(&self, account: &AccountId) -> Option<Party> {
        if *account == self.buyer {
            Some(Party::Buyer)
        } else if *account == self.seller {
            Some(Party::Seller)
        } else {
            None
        }
    }
}
