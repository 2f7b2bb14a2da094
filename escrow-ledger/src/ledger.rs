//! Escrow ledger
//!
//! Holds spendable balances and per-trade escrow holds behind a single lock so
//! that a debit and its hold (or a hold and its credit) are one atomic unit.
//!
//! # Example
//!
//! ```
//! use escrow_ledger::{AccountId, EscrowLedger};
//! use rust_decimal::Decimal;
//! use uuid::Uuid;
//!
//! let ledger = EscrowLedger::new(AccountId::new("platform"));
//! let seller = AccountId::new("seller");
//! let buyer = AccountId::new("buyer");
//! ledger.deposit(&seller, Decimal::from(100)).unwrap();
//!
//! let trade_id = Uuid::now_v7();
//! ledger.lock(trade_id, &seller, Decimal::from(100), chrono::Utc::now()).unwrap();
//! let settlement = ledger
//!     .release(trade_id, &buyer, Decimal::from(2), chrono::Utc::now())
//!     .unwrap();
//! assert_eq!(settlement.credited, Decimal::from(98));
//! ```

use crate::{
    types::{AccountId, EscrowHold, ReleaseTarget, Settlement},
    Error, Result,
};
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tracing::{debug, info};
use uuid::Uuid;

#[derive(Debug, Default)]
struct LedgerState {
    balances: HashMap<AccountId, Decimal>,
    holds: HashMap<Uuid, EscrowHold>,
    total_deposited: Decimal,
}

impl LedgerState {
    fn balance(&self, account: &AccountId) -> Decimal {
        self.balances.get(account).copied().unwrap_or(Decimal::ZERO)
    }

    /// Balance of `account` after adding `amount`, without applying it
    fn credited(&self, account: &AccountId, amount: Decimal) -> Result<Decimal> {
        self.balance(account)
            .checked_add(amount)
            .ok_or_else(|| Error::Overflow(format!("balance of {} plus {}", account, amount)))
    }

    fn credit(&mut self, account: &AccountId, amount: Decimal) -> Result<()> {
        let balance = self.credited(account, amount)?;
        self.balances.insert(account.clone(), balance);
        Ok(())
    }
}

/// Serializable view of the ledger
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LedgerSnapshot {
    /// Spendable balances, sorted by account
    pub balances: Vec<(AccountId, Decimal)>,

    /// All holds, active and settled
    pub holds: Vec<EscrowHold>,

    /// Total ever deposited
    pub total_deposited: Decimal,
}

/// Balance and escrow-hold ledger
#[derive(Debug)]
pub struct EscrowLedger {
    state: Mutex<LedgerState>,

    /// Account that collects release fees
    platform_account: AccountId,
}

impl EscrowLedger {
    /// Create an empty ledger
    pub fn new(platform_account: AccountId) -> Self {
        Self {
            state: Mutex::new(LedgerState::default()),
            platform_account,
        }
    }

    /// Platform fee account
    pub fn platform_account(&self) -> &AccountId {
        &self.platform_account
    }

    /// Fund an account
    pub fn deposit(&self, account: &AccountId, amount: Decimal) -> Result<Decimal> {
        if amount <= Decimal::ZERO {
            return Err(Error::InvalidAmount(amount));
        }

        let mut state = self.state.lock();
        let balance = state.credited(account, amount)?;
        let total = state
            .total_deposited
            .checked_add(amount)
            .ok_or_else(|| Error::Overflow(format!("total deposits plus {}", amount)))?;

        state.balances.insert(account.clone(), balance);
        state.total_deposited = total;

        debug!(account = %account, %amount, %balance, "Deposit applied");
        Ok(balance)
    }

    /// Spendable balance of an account
    pub fn balance(&self, account: &AccountId) -> Decimal {
        self.state.lock().balance(account)
    }

    /// Debit `account` and park `amount` against `trade_id`
    pub fn lock(
        &self,
        trade_id: Uuid,
        account: &AccountId,
        amount: Decimal,
        at: DateTime<Utc>,
    ) -> Result<EscrowHold> {
        if amount <= Decimal::ZERO {
            return Err(Error::InvalidAmount(amount));
        }

        let mut state = self.state.lock();

        if state.holds.contains_key(&trade_id) {
            return Err(Error::HoldExists(trade_id));
        }

        let available = state.balance(account);
        if available < amount {
            return Err(Error::InsufficientFunds {
                account: account.clone(),
                requested: amount,
                available,
            });
        }

        state.credit(account, -amount)?;

        let hold = EscrowHold {
            trade_id,
            amount,
            source: account.clone(),
            held_at: at,
            released_to: None,
            settlement: None,
        };
        state.holds.insert(trade_id, hold.clone());

        info!(%trade_id, account = %account, %amount, "Escrow locked");
        Ok(hold)
    }

    /// Pay the hold out to `to`, keeping `fee_percent` for the platform
    ///
    /// Settling an already released hold returns the original settlement and
    /// moves no funds.
    pub fn release(
        &self,
        trade_id: Uuid,
        to: &AccountId,
        fee_percent: Decimal,
        at: DateTime<Utc>,
    ) -> Result<Settlement> {
        if fee_percent < Decimal::ZERO || fee_percent >= Decimal::ONE_HUNDRED {
            return Err(Error::InvalidFee(fee_percent));
        }

        let mut state = self.state.lock();
        let hold = state
            .holds
            .get(&trade_id)
            .cloned()
            .ok_or(Error::HoldNotFound(trade_id))?;

        if let Some(existing) = Self::already_settled(&hold, ReleaseTarget::Buyer)? {
            debug!(%trade_id, "Release already applied");
            return Ok(existing);
        }

        // Rate first so the product never exceeds the hold
        let fee = (fee_percent / Decimal::ONE_HUNDRED)
            .checked_mul(hold.amount)
            .ok_or_else(|| Error::Overflow(format!("fee on {}", hold.amount)))?
            .round_dp(8);
        let credited = hold.amount - fee;

        let beneficiary_balance = state.credited(to, credited)?;
        let platform_base = if *to == self.platform_account {
            beneficiary_balance
        } else {
            state.balance(&self.platform_account)
        };
        let platform_balance = platform_base
            .checked_add(fee)
            .ok_or_else(|| Error::Overflow(format!("platform balance plus {}", fee)))?;

        state.balances.insert(to.clone(), beneficiary_balance);
        if fee > Decimal::ZERO {
            state
                .balances
                .insert(self.platform_account.clone(), platform_balance);
        }

        let settlement = Settlement {
            trade_id,
            target: ReleaseTarget::Buyer,
            beneficiary: to.clone(),
            credited,
            fee,
            settled_at: at,
        };
        Self::mark_settled(&mut state, trade_id, &settlement);

        info!(%trade_id, beneficiary = %to, %credited, %fee, "Escrow released");
        Ok(settlement)
    }

    /// Return the hold in full to its source account
    ///
    /// Idempotent in the same way as [`EscrowLedger::release`].
    pub fn refund(&self, trade_id: Uuid, at: DateTime<Utc>) -> Result<Settlement> {
        let mut state = self.state.lock();
        let hold = state
            .holds
            .get(&trade_id)
            .cloned()
            .ok_or(Error::HoldNotFound(trade_id))?;

        if let Some(existing) = Self::already_settled(&hold, ReleaseTarget::Seller)? {
            debug!(%trade_id, "Refund already applied");
            return Ok(existing);
        }

        state.credit(&hold.source, hold.amount)?;

        let settlement = Settlement {
            trade_id,
            target: ReleaseTarget::Seller,
            beneficiary: hold.source.clone(),
            credited: hold.amount,
            fee: Decimal::ZERO,
            settled_at: at,
        };
        Self::mark_settled(&mut state, trade_id, &settlement);

        info!(%trade_id, account = %hold.source, amount = %hold.amount, "Escrow refunded");
        Ok(settlement)
    }

    fn already_settled(hold: &EscrowHold, wanted: ReleaseTarget) -> Result<Option<Settlement>> {
        match (hold.released_to, &hold.settlement) {
            (None, _) => Ok(None),
            (Some(target), Some(settlement)) if target == wanted => Ok(Some(settlement.clone())),
            (Some(target), _) if target == wanted => Err(Error::InvariantViolation(format!(
                "hold {} released without settlement record",
                hold.trade_id
            ))),
            (Some(settled), _) => Err(Error::SettlementConflict {
                trade_id: hold.trade_id,
                settled,
            }),
        }
    }

    fn mark_settled(state: &mut LedgerState, trade_id: Uuid, settlement: &Settlement) {
        if let Some(hold) = state.holds.get_mut(&trade_id) {
            hold.released_to = Some(settlement.target);
            hold.settlement = Some(settlement.clone());
        }
    }

    /// Hold recorded for a trade
    pub fn hold(&self, trade_id: Uuid) -> Option<EscrowHold> {
        self.state.lock().holds.get(&trade_id).cloned()
    }

    /// Sum of all holds that still own their funds
    pub fn active_hold_total(&self) -> Decimal {
        self.state
            .lock()
            .holds
            .values()
            .filter(|hold| hold.is_active())
            .map(|hold| hold.amount)
            .sum()
    }

    /// Number of holds that still own their funds
    pub fn active_hold_count(&self) -> usize {
        self.state
            .lock()
            .holds
            .values()
            .filter(|hold| hold.is_active())
            .count()
    }

    /// Check money conservation
    ///
    /// Everything ever deposited must sit either in a balance or in an active
    /// hold, and every settled hold must have paid out exactly its amount.
    pub fn check_conservation(&self) -> Result<()> {
        let state = self.state.lock();

        let overflow = || Error::InvariantViolation("balance sum overflows".to_string());
        let balances = state
            .balances
            .values()
            .try_fold(Decimal::ZERO, |acc, b| acc.checked_add(*b))
            .ok_or_else(overflow)?;
        let held = state
            .holds
            .values()
            .filter(|hold| hold.is_active())
            .try_fold(Decimal::ZERO, |acc, hold| acc.checked_add(hold.amount))
            .ok_or_else(overflow)?;

        if balances.checked_add(held) != Some(state.total_deposited) {
            return Err(Error::InvariantViolation(format!(
                "balances {} + holds {} != deposits {}",
                balances, held, state.total_deposited
            )));
        }

        if let Some((id, balance)) = state.balances.iter().find(|(_, b)| **b < Decimal::ZERO) {
            return Err(Error::InvariantViolation(format!(
                "negative balance {} on {}",
                balance, id
            )));
        }

        for hold in state.holds.values() {
            if let Some(settlement) = &hold.settlement {
                if settlement.gross() != hold.amount {
                    return Err(Error::InvariantViolation(format!(
                        "hold {} settled {} of {}",
                        hold.trade_id,
                        settlement.gross(),
                        hold.amount
                    )));
                }
            }
        }

        Ok(())
    }

    /// Export balances and holds
    pub fn snapshot(&self) -> LedgerSnapshot {
        let state = self.state.lock();

        let mut balances: Vec<_> = state
            .balances
            .iter()
            .map(|(account, balance)| (account.clone(), *balance))
            .collect();
        balances.sort_by(|a, b| a.0.cmp(&b.0));

        let mut holds: Vec<_> = state.holds.values().cloned().collect();
        holds.sort_by_key(|hold| hold.held_at);

        LedgerSnapshot {
            balances,
            holds,
            total_deposited: state.total_deposited,
        }
    }
}
