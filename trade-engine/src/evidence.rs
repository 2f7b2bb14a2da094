//! Proof-of-payment store
//!
//! Append-only history of evidence per trade. The engine calls [`EvidenceStore::attach`]
//! while holding the trade's lock. While the trade is CREATED the engine mirrors
//! the record onto it; later submissions only extend the history.

use crate::{
    types::{Evidence, Party, Trade},
    Error, Result,
};
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use escrow_ledger::AccountId;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// One submitted piece of evidence
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EvidenceRecord {
    /// Trade the evidence belongs to
    pub trade_id: Uuid,

    /// Submitted evidence
    pub evidence: Evidence,

    /// Submitting account
    pub submitted_by: AccountId,

    /// Submission time
    pub submitted_at: DateTime<Utc>,
}

/// Evidence history by trade
#[derive(Debug, Default)]
pub struct EvidenceStore {
    records: DashMap<Uuid, Vec<EvidenceRecord>>,
}

impl EvidenceStore {
    /// Create empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Check the proof OR (tx id AND sender) rule
    pub fn validate(trade_id: Uuid, evidence: &Evidence) -> Result<()> {
        if evidence.is_sufficient() {
            Ok(())
        } else {
            Err(Error::EvidenceMissing(trade_id))
        }
    }

    /// Append evidence for `trade`
    ///
    /// Only the buyer may submit, and never once the trade is terminal.
    pub fn attach(
        &self,
        trade: &Trade,
        evidence: Evidence,
        submitted_by: &AccountId,
        at: DateTime<Utc>,
    ) -> Result<EvidenceRecord> {
        if trade.status.is_terminal() {
            return Err(Error::TradeClosed {
                trade_id: trade.id,
                status: trade.status,
            });
        }

        match trade.role_of(submitted_by) {
            Some(Party::Buyer) => {}
            Some(Party::Seller) => {
                return Err(Error::InvalidTransition {
                    from: trade.status,
                    action: "submit_evidence",
                })
            }
            None => return Err(Error::NotParticipant(submitted_by.clone())),
        }

        Self::validate(trade.id, &evidence)?;

        let record = EvidenceRecord {
            trade_id: trade.id,
            evidence,
            submitted_by: submitted_by.clone(),
            submitted_at: at,
        };
        self.records
            .entry(trade.id)
            .or_default()
            .push(record.clone());

        Ok(record)
    }

    /// Full history for a trade, oldest first
    pub fn records(&self, trade_id: Uuid) -> Vec<EvidenceRecord> {
        self.records
            .get(&trade_id)
            .map(|records| records.value().clone())
            .unwrap_or_default()
    }
}
