//! Trade finite state machine
//!
//! Pure transition logic: given a trade snapshot, an action and who is acting,
//! either produce the next snapshot or reject without touching the input.
//!
//! ```text
//! CREATED --(buyer: mark paid)-------------> PAID
//! CREATED --(buyer: cancel)----------------> CANCELLED
//! CREATED --(scheduler: expire)------------> CANCELLED
//! CREATED --(buyer|seller: dispute)--------> DISPUTE
//! PAID    --(buyer|seller: dispute)--------> DISPUTE
//! PAID    --(admin: release to buyer)------> COMPLETED
//! DISPUTE --(admin: release to buyer)------> COMPLETED
//! DISPUTE --(admin: refund to seller)------> CANCELLED
//! ```

use crate::{
    types::{CancelReason, Party, Resolution, Trade, TradeStatus},
    Error, Result,
};
use chrono::{DateTime, Duration, Utc};

/// Who drives a transition
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Actor {
    /// Trade buyer
    Buyer,
    /// Trade seller
    Seller,
    /// Expiry sweep
    Scheduler,
    /// Authorized arbitrator
    Admin,
}

impl From<Party> for Actor {
    fn from(party: Party) -> Self {
        match party {
            Party::Buyer => Actor::Buyer,
            Party::Seller => Actor::Seller,
        }
    }
}

impl Actor {
    fn party(&self) -> Option<Party> {
        match self {
            Actor::Buyer => Some(Party::Buyer),
            Actor::Seller => Some(Party::Seller),
            Actor::Scheduler | Actor::Admin => None,
        }
    }
}

/// Requested state change
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TradeAction {
    /// Buyer claims the off-platform payment was sent
    MarkPaid,
    /// Buyer abandons the trade
    Cancel,
    /// Payment window elapsed
    Expire,
    /// Either party contests the trade
    RaiseDispute {
        /// Free-text reason, must not be blank
        reason: String,
    },
    /// Admin settles the trade
    Resolve(Resolution),
}

impl TradeAction {
    /// Action name for errors and logs
    pub fn name(&self) -> &'static str {
        match self {
            TradeAction::MarkPaid => "mark_paid",
            TradeAction::Cancel => "cancel",
            TradeAction::Expire => "expire",
            TradeAction::RaiseDispute { .. } => "raise_dispute",
            TradeAction::Resolve(Resolution::ReleaseToBuyer) => "release_to_buyer",
            TradeAction::Resolve(Resolution::RefundToSeller) => "refund_to_seller",
        }
    }
}

/// Validates and applies legal transitions
#[derive(Debug, Clone)]
pub struct TradeStateMachine {
    payment_window: Duration,
}

impl TradeStateMachine {
    /// Create with the buyer's payment window
    pub fn new(payment_window: Duration) -> Self {
        Self { payment_window }
    }

    /// Buyer's payment window
    pub fn payment_window(&self) -> Duration {
        self.payment_window
    }

    /// CREATED and older than the payment window
    pub fn is_expired(&self, trade: &Trade, now: DateTime<Utc>) -> bool {
        trade.status == TradeStatus::Created && trade.age(now) > self.payment_window
    }

    /// Target status for `action` by `actor`, graph edges only
    pub fn next_status(trade: &Trade, action: &TradeAction, actor: Actor) -> Result<TradeStatus> {
        use TradeStatus::*;

        let party_action = matches!(actor, Actor::Buyer | Actor::Seller);
        if trade.status.is_terminal() || (trade.status == Dispute && party_action) {
            return Err(Error::TradeClosed {
                trade_id: trade.id,
                status: trade.status,
            });
        }

        let next = match (trade.status, action, actor) {
            (Created, TradeAction::MarkPaid, Actor::Buyer) => Paid,
            (Created, TradeAction::Cancel, Actor::Buyer) => Cancelled,
            (Created, TradeAction::Expire, Actor::Scheduler) => Cancelled,
            (Created | Paid, TradeAction::RaiseDispute { .. }, Actor::Buyer | Actor::Seller) => {
                Dispute
            }
            (Paid | Dispute, TradeAction::Resolve(Resolution::ReleaseToBuyer), Actor::Admin) => {
                Completed
            }
            (Dispute, TradeAction::Resolve(Resolution::RefundToSeller), Actor::Admin) => Cancelled,
            (from, action, _) => {
                return Err(Error::InvalidTransition {
                    from,
                    action: action.name(),
                })
            }
        };

        Ok(next)
    }

    /// Apply `action` to a copy of `trade`
    ///
    /// On error the input is untouched and nothing is returned to commit.
    pub fn apply(
        &self,
        trade: &Trade,
        action: &TradeAction,
        actor: Actor,
        now: DateTime<Utc>,
    ) -> Result<Trade> {
        let target = Self::next_status(trade, action, actor)?;

        match action {
            TradeAction::MarkPaid => {
                let sufficient = trade
                    .evidence
                    .as_ref()
                    .map(|evidence| evidence.is_sufficient())
                    .unwrap_or(false);
                if !sufficient {
                    return Err(Error::EvidenceMissing(trade.id));
                }
                if trade.age(now) > self.payment_window {
                    return Err(Error::WindowExpired(trade.id));
                }
            }
            TradeAction::Expire => {
                if !self.is_expired(trade, now) {
                    return Err(Error::InvalidTransition {
                        from: trade.status,
                        action: action.name(),
                    });
                }
            }
            TradeAction::RaiseDispute { reason } => {
                if reason.trim().is_empty() {
                    return Err(Error::Validation(
                        "dispute reason must not be empty".to_string(),
                    ));
                }
            }
            TradeAction::Cancel | TradeAction::Resolve(_) => {}
        }

        let mut next = trade.clone();
        next.status = target;
        next.version += 1;

        match action {
            TradeAction::MarkPaid => next.paid_at = Some(now),
            TradeAction::Cancel => next.cancel_reason = Some(CancelReason::Buyer),
            TradeAction::Expire => next.cancel_reason = Some(CancelReason::Expired),
            TradeAction::RaiseDispute { reason } => {
                next.dispute_reason = Some(reason.trim().to_string());
                next.dispute_raised_by = actor.party();
            }
            TradeAction::Resolve(resolution) => {
                next.resolution = Some(*resolution);
                if target == TradeStatus::Cancelled {
                    next.cancel_reason = Some(CancelReason::Arbitration);
                }
            }
        }

        if target.is_terminal() {
            next.resolved_at = Some(now);
        }

        Ok(next)
    }
}

impl Default for TradeStateMachine {
    fn default() -> Self {
        Self::new(Duration::minutes(15))
    }
}
