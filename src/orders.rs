//! Customer orders and their PENDING -> COMPLETE lifecycle.
//!
//! An order and its lines are written in one transaction and never edited
//! afterwards, except for the status flip. Completion appends one OUT ledger
//! entry per line in the same transaction that marks the order complete.
use std::collections::BTreeMap;

use chrono::Utc;
use tracing::info;

use crate::catalog::load_live_product;
use crate::error::{Result, StoreError};
use crate::ledger::{Ledger, ShelfLife, StockKind, append_in, guard_in, new_entry, with_retries};
use crate::store::{Store, Tx, TxResult, abort, key, tables};
use crate::types::{OrderId, OrderLineId, ProductId, TimeStamp, UserId};
use crate::users::load_live_user;

#[derive(Debug, Clone, Copy, PartialEq, Eq, minicbor::Encode, minicbor::Decode)]
pub enum OrderStatus {
    #[n(0)]
    Pending,
    #[n(1)]
    Complete,
}

#[derive(Debug, Clone, PartialEq, Eq, minicbor::Encode, minicbor::Decode)]
pub struct OrderLine {
    #[n(0)]
    pub id: OrderLineId,
    #[n(1)]
    pub order_id: OrderId,
    #[n(2)]
    pub product_id: ProductId,
    #[n(3)]
    pub quantity: u32,
    // price per unit when the order was placed
    #[n(4)]
    pub unit_price: u64,
}

impl OrderLine {
    pub fn line_total(&self) -> u64 {
        self.unit_price.saturating_mul(u64::from(self.quantity))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, minicbor::Encode, minicbor::Decode)]
pub struct Order {
    #[n(0)]
    pub id: OrderId,
    #[n(1)]
    pub customer_id: UserId,
    #[n(2)]
    pub placed_on: TimeStamp<Utc>,
    #[n(3)]
    pub status: OrderStatus,
    #[n(4)]
    pub completed_on: Option<TimeStamp<Utc>>,
    #[n(5)]
    pub lines: Vec<OrderLine>,
}

impl Order {
    pub fn total(&self) -> u64 {
        self.lines
            .iter()
            .fold(0, |total, line| total.saturating_add(line.line_total()))
    }

    /// Quantity per product across all lines.
    pub fn required_stock(&self) -> BTreeMap<ProductId, u64> {
        let mut required = BTreeMap::new();
        for line in &self.lines {
            *required.entry(line.product_id).or_insert(0) += u64::from(line.quantity);
        }
        required
    }
}

/// One requested line of a new order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LineItem {
    pub product_id: ProductId,
    pub quantity: u32,
    pub unit_price: u64,
}

pub(crate) fn order_key(id: OrderId) -> Vec<u8> {
    key(tables::ORDER, &[id.as_bytes()])
}

fn pending_key(id: OrderId) -> Vec<u8> {
    key(tables::PENDING_ORDER, &[id.as_bytes()])
}

pub(crate) fn load_order(tx: &Tx<'_>, id: OrderId) -> TxResult<Order> {
    match tx.get::<Order>(&order_key(id))? {
        Some(order) => Ok(order),
        None => abort(StoreError::not_found("order", id)),
    }
}

fn validate(items: &[LineItem]) -> Result<()> {
    if items.is_empty() {
        return Err(StoreError::InvalidInput(
            "an order needs at least one line".into(),
        ));
    }
    if items.iter().any(|item| item.quantity == 0) {
        return Err(StoreError::InvalidQuantity);
    }
    items
        .iter()
        .try_fold(0u64, |total, item| {
            item.unit_price
                .checked_mul(u64::from(item.quantity))
                .and_then(|line| total.checked_add(line))
        })
        .ok_or_else(|| StoreError::InvalidInput("order total does not fit in u64".into()))?;
    Ok(())
}

#[derive(Clone)]
pub struct Orders {
    store: Store,
    ledger: Ledger,
}

impl Orders {
    pub fn new(store: Store, ledger: Ledger) -> Self {
        Self { store, ledger }
    }

    /// Persists a PENDING order with all of its lines, or nothing at all.
    pub fn place_order(&self, customer_id: UserId, items: Vec<LineItem>) -> Result<Order> {
        validate(&items)?;

        let order = self.store.transact(|tx| {
            load_live_user(tx, customer_id)?;
            for item in &items {
                load_live_product(tx, item.product_id)?;
            }

            let id = OrderId::new();
            let lines: Vec<OrderLine> = items
                .iter()
                .map(|item| OrderLine {
                    id: OrderLineId::new(),
                    order_id: id,
                    product_id: item.product_id,
                    quantity: item.quantity,
                    unit_price: item.unit_price,
                })
                .collect();
            let order = Order {
                id,
                customer_id,
                placed_on: TimeStamp::new(),
                status: OrderStatus::Pending,
                completed_on: None,
                lines,
            };

            tx.put(&order_key(id), &order)?;
            tx.put(&pending_key(id), &id)?;
            tx.put(
                &key(tables::CUSTOMER_ORDERS, &[customer_id.as_bytes(), id.as_bytes()]),
                &id,
            )?;
            for line in &order.lines {
                tx.put(
                    &key(tables::PRODUCT_LINES, &[line.product_id.as_bytes(), line.id.as_bytes()]),
                    line,
                )?;
            }
            Ok(order)
        })?;

        info!(
            order_id = %order.id,
            customer_id = %customer_id,
            lines = order.lines.len(),
            total = order.total(),
            "order placed"
        );
        Ok(order)
    }

    /// Consumes stock for every line and marks the order COMPLETE, atomically.
    pub fn complete_order(&self, id: OrderId) -> Result<Order> {
        let order = with_retries(self.ledger.retries(), "complete order", || {
            let order = self.get_order(id)?;
            if order.status == OrderStatus::Complete {
                return Err(StoreError::AlreadyComplete(id.to_string()));
            }

            let mut snapshots = Vec::new();
            for (product_id, requested) in order.required_stock() {
                let snapshot = self.ledger.snapshot(product_id)?;
                self.ledger.check_available(&snapshot, requested)?;
                snapshots.push(snapshot);
            }

            self.store.transact(|tx| {
                let mut order = load_order(tx, id)?;
                if order.status == OrderStatus::Complete {
                    return abort(StoreError::AlreadyComplete(id.to_string()));
                }
                for snapshot in &snapshots {
                    guard_in(tx, snapshot)?;
                }
                for line in &order.lines {
                    let entry = new_entry(
                        line.product_id,
                        StockKind::Out,
                        line.quantity,
                        ShelfLife::default(),
                    );
                    append_in(tx, &entry)?;
                }

                order.status = OrderStatus::Complete;
                order.completed_on = Some(TimeStamp::new());
                tx.put(&order_key(id), &order)?;
                tx.remove(&pending_key(id))?;
                Ok(order)
            })
        })?;

        info!(order_id = %id, lines = order.lines.len(), "order completed");
        Ok(order)
    }

    pub fn get_order(&self, id: OrderId) -> Result<Order> {
        self.store
            .get(&order_key(id))?
            .ok_or_else(|| StoreError::not_found("order", id))
    }

    /// PENDING orders, oldest first.
    pub fn pending_orders(&self) -> Result<Vec<Order>> {
        let ids: Vec<OrderId> = self.store.scan(tables::PENDING_ORDER)?;
        ids.into_iter().map(|id| self.get_order(id)).collect()
    }

    /// Every order a customer placed, oldest first.
    pub fn order_history(&self, customer_id: UserId) -> Result<Vec<Order>> {
        let ids: Vec<OrderId> = self
            .store
            .scan(&key(tables::CUSTOMER_ORDERS, &[customer_id.as_bytes()]))?;
        ids.into_iter().map(|id| self.get_order(id)).collect()
    }
}
