//! Seller-posted sell orders
//!
//! OPEN → MATCHED → CLOSED, or OPEN → CLOSED when the seller withdraws.

use crate::{
    types::{Order, OrderStatus},
    Error, Result,
};
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use escrow_ledger::AccountId;
use rust_decimal::Decimal;
use tracing::info;
use uuid::Uuid;

/// Order book
#[derive(Debug, Default)]
pub struct OrderBook {
    orders: DashMap<Uuid, Order>,
}

impl OrderBook {
    /// Create empty order book
    pub fn new() -> Self {
        Self::default()
    }

    /// List a new OPEN order
    pub fn create(
        &self,
        seller: &AccountId,
        amount: Decimal,
        rate: Decimal,
        payment_method: &str,
        payment_details: &str,
        now: DateTime<Utc>,
    ) -> Result<Order> {
        if amount <= Decimal::ZERO {
            return Err(Error::Validation("amount must be positive".to_string()));
        }
        if rate <= Decimal::ZERO {
            return Err(Error::Validation("rate must be positive".to_string()));
        }
        if payment_method.trim().is_empty() {
            return Err(Error::Validation("payment method is required".to_string()));
        }
        if payment_details.trim().is_empty() {
            return Err(Error::Validation("payment details are required".to_string()));
        }
        if amount.checked_mul(rate).is_none() {
            return Err(Error::Validation(
                "amount times rate exceeds the representable range".to_string(),
            ));
        }

        let order = Order {
            id: Uuid::now_v7(),
            seller: seller.clone(),
            amount,
            rate,
            payment_method: payment_method.trim().to_string(),
            payment_details: payment_details.trim().to_string(),
            status: OrderStatus::Open,
            created_at: now,
            trade_id: None,
        };
        self.orders.insert(order.id, order.clone());

        info!(order_id = %order.id, seller = %seller, %amount, %rate, "Order opened");
        Ok(order)
    }

    /// Flip an OPEN order to MATCHED once `reserve` succeeds
    ///
    /// `reserve` runs while the order entry is locked; if it fails the order
    /// stays OPEN. Its output is handed back next to the matched order.
    pub fn match_with<F, R>(&self, order_id: Uuid, trade_id: Uuid, reserve: F) -> Result<(Order, R)>
    where
        F: FnOnce(&Order) -> Result<R>,
    {
        let mut order = self
            .orders
            .get_mut(&order_id)
            .ok_or(Error::OrderNotFound(order_id))?;

        if order.status != OrderStatus::Open {
            return Err(Error::OrderUnavailable {
                order_id,
                status: order.status,
            });
        }

        let reserved = reserve(order.value())?;

        order.status = OrderStatus::Matched;
        order.trade_id = Some(trade_id);
        Ok((order.value().clone(), reserved))
    }

    /// Seller withdraws an OPEN order
    pub fn cancel(&self, order_id: Uuid, seller: &AccountId) -> Result<Order> {
        let mut order = self
            .orders
            .get_mut(&order_id)
            .ok_or(Error::OrderNotFound(order_id))?;

        if order.seller != *seller {
            return Err(Error::NotParticipant(seller.clone()));
        }
        if order.status != OrderStatus::Open {
            return Err(Error::OrderUnavailable {
                order_id,
                status: order.status,
            });
        }

        order.status = OrderStatus::Closed;
        info!(%order_id, "Order withdrawn");
        Ok(order.value().clone())
    }

    /// Close a MATCHED order whose trade finished
    pub fn close(&self, order_id: Uuid) -> Option<Order> {
        let mut order = self.orders.get_mut(&order_id)?;
        order.status = OrderStatus::Closed;
        Some(order.value().clone())
    }

    /// Get order by ID
    pub fn get(&self, order_id: Uuid) -> Result<Order> {
        self.orders
            .get(&order_id)
            .map(|order| order.value().clone())
            .ok_or(Error::OrderNotFound(order_id))
    }

    /// OPEN orders, oldest first
    pub fn open_orders(&self) -> Vec<Order> {
        let mut open: Vec<Order> = self
            .orders
            .iter()
            .filter(|entry| entry.status == OrderStatus::Open)
            .map(|entry| entry.value().clone())
            .collect();
        open.sort_by_key(|order| order.created_at);
        open
    }

    /// Every order ever listed, oldest first
    pub fn all(&self) -> Vec<Order> {
        let mut orders: Vec<Order> = self
            .orders
            .iter()
            .map(|entry| entry.value().clone())
            .collect();
        orders.sort_by_key(|order| (order.created_at, order.id));
        orders
    }
}
