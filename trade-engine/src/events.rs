//! Trade events for external consumers
//!
//! Published after a transition commits. Delivery is best-effort: a dropped
//! event never affects the ledger or the trade record.

use crate::types::{Trade, TradeStatus};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt::Debug;
use tokio::sync::broadcast;
use tracing::debug;
use uuid::Uuid;

/// Event kind
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TradeEventKind {
    /// Order matched, escrow locked
    Created,
    /// Buyer marked the trade paid
    Paid,
    /// Dispute raised
    Disputed,
    /// Escrow released to buyer
    Completed,
    /// Escrow refunded to seller
    Cancelled,
}

impl TradeEventKind {
    /// Subject consumers subscribe to
    pub fn subject(&self) -> &'static str {
        match self {
            TradeEventKind::Created => "trade.created",
            TradeEventKind::Paid => "trade.paid",
            TradeEventKind::Disputed => "trade.disputed",
            TradeEventKind::Completed => "trade.completed",
            TradeEventKind::Cancelled => "trade.cancelled",
        }
    }

    /// Event announcing that a trade entered `status`
    pub fn for_status(status: TradeStatus) -> Self {
        match status {
            TradeStatus::Created => TradeEventKind::Created,
            TradeStatus::Paid => TradeEventKind::Paid,
            TradeStatus::Dispute => TradeEventKind::Disputed,
            TradeStatus::Completed => TradeEventKind::Completed,
            TradeStatus::Cancelled => TradeEventKind::Cancelled,
        }
    }
}

/// Event envelope carrying the full trade snapshot
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TradeEvent {
    /// Event ID (UUIDv7 for ordering)
    pub id: Uuid,

    /// Event kind
    pub kind: TradeEventKind,

    /// Trade as committed
    pub trade: Trade,

    /// Commit time
    pub timestamp: DateTime<Utc>,
}

impl TradeEvent {
    /// Create new event
    pub fn new(kind: TradeEventKind, trade: Trade, timestamp: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::now_v7(),
            kind,
            trade,
            timestamp,
        }
    }

    /// Subject for routing
    pub fn subject(&self) -> &'static str {
        self.kind.subject()
    }

    /// Serialize to bytes
    pub fn to_bytes(&self) -> crate::Result<Vec<u8>> {
        serde_json::to_vec(self).map_err(|e| crate::Error::Validation(e.to_string()))
    }
}

/// Outbound event sink
///
/// Implementations must not block; the engine calls this while holding a
/// trade lock.
pub trait EventPublisher: Send + Sync + Debug {
    /// Fire-and-forget publish
    fn publish(&self, event: TradeEvent);
}

/// In-process bus backed by a tokio broadcast channel
#[derive(Debug, Clone)]
pub struct BroadcastBus {
    sender: broadcast::Sender<TradeEvent>,
}

impl BroadcastBus {
    /// Create bus buffering up to `capacity` events per slow subscriber
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    /// New subscription receiving events published from now on
    pub fn subscribe(&self) -> broadcast::Receiver<TradeEvent> {
        self.sender.subscribe()
    }
}

impl EventPublisher for BroadcastBus {
    fn publish(&self, event: TradeEvent) {
        let subject = event.subject();
        let trade_id = event.trade.id;
        if self.sender.send(event).is_err() {
            debug!(%trade_id, subject, "No subscribers for trade event");
        }
    }
}
