//! Append-only stock ledger.
//!
//! Stock is never stored, it is folded from a product's entries on every read.
//! Entries are keyed `stock/<product><entry>` with time-ordered ids, so a prefix
//! scan returns them in append order. Corrections are new entries, never edits.
//!
//! OUT appends must not race each other into negative stock. The fold happens
//! outside the transaction, so each product row carries `ledger_seq`: the fold
//! records it in a [`LedgerSnapshot`] and the transaction re-checks it before
//! writing. A moved sequence aborts with `StaleLedger` and the caller retries.
use chrono::Utc;
use serde::Deserialize;
use tracing::{debug, info};

use crate::catalog::{Product, load_live_product, product_key};
use crate::error::{Result, StoreError};
use crate::orders::OrderLine;
use crate::store::{Store, Tx, TxResult, abort, key, tables};
use crate::types::{CalendarDate, ProductId, TimeStamp, TransactionId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, minicbor::Encode, minicbor::Decode)]
pub enum StockKind {
    #[n(0)]
    In,
    #[n(1)]
    Out,
}

#[derive(Debug, Clone, PartialEq, Eq, minicbor::Encode, minicbor::Decode)]
pub struct StockTransaction {
    #[n(0)]
    pub id: TransactionId,
    #[n(1)]
    pub product_id: ProductId,
    #[n(2)]
    pub kind: StockKind,
    #[n(3)]
    pub quantity: u32,
    #[n(4)]
    pub manufactured_on: Option<CalendarDate>,
    #[n(5)]
    pub expires_on: Option<CalendarDate>,
    #[n(6)]
    pub recorded_on: TimeStamp<Utc>,
}

impl StockTransaction {
    pub fn signed_quantity(&self) -> i64 {
        match self.kind {
            StockKind::In => i64::from(self.quantity),
            StockKind::Out => -i64::from(self.quantity),
        }
    }
}

/// Optional dates carried by IN entries.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ShelfLife {
    pub manufactured_on: Option<CalendarDate>,
    pub expires_on: Option<CalendarDate>,
}

impl ShelfLife {
    pub fn new(manufactured_on: CalendarDate, expires_on: CalendarDate) -> Self {
        Self {
            manufactured_on: Some(manufactured_on),
            expires_on: Some(expires_on),
        }
    }
    fn is_empty(&self) -> bool {
        self.manufactured_on.is_none() && self.expires_on.is_none()
    }
}

/// What happens when an OUT append would take available stock below zero.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StockPolicy {
    #[default]
    Reject,
    Allow,
}

/// Σ IN − Σ OUT.
pub fn available(entries: &[StockTransaction]) -> i64 {
    entries.iter().map(StockTransaction::signed_quantity).sum()
}

/// Σ OUT.
pub fn sold(entries: &[StockTransaction]) -> u64 {
    entries
        .iter()
        .filter(|e| e.kind == StockKind::Out)
        .map(|e| u64::from(e.quantity))
        .sum()
}

fn entry_key(product_id: ProductId, id: TransactionId) -> Vec<u8> {
    key(tables::STOCK, &[product_id.as_bytes(), id.as_bytes()])
}

fn entries_prefix(product_id: ProductId) -> Vec<u8> {
    key(tables::STOCK, &[product_id.as_bytes()])
}

pub(crate) fn new_entry(
    product_id: ProductId,
    kind: StockKind,
    quantity: u32,
    shelf_life: ShelfLife,
) -> StockTransaction {
    StockTransaction {
        id: TransactionId::new(),
        product_id,
        kind,
        quantity,
        manufactured_on: shelf_life.manufactured_on,
        expires_on: shelf_life.expires_on,
        recorded_on: TimeStamp::new(),
    }
}

/// Ledger state of one product as folded outside a transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct LedgerSnapshot {
    pub product_id: ProductId,
    pub seq: u64,
    pub available: i64,
}

/// Fails unless the product is live and its ledger has not moved since `snapshot`.
pub(crate) fn guard_in(tx: &Tx<'_>, snapshot: &LedgerSnapshot) -> TxResult<()> {
    let product = load_live_product(tx, snapshot.product_id)?;
    if product.ledger_seq != snapshot.seq {
        return abort(StoreError::StaleLedger(snapshot.product_id.to_string()));
    }
    Ok(())
}

/// Writes `entry` and bumps the owning product's sequence.
pub(crate) fn append_in(tx: &Tx<'_>, entry: &StockTransaction) -> TxResult<()> {
    let mut product = load_live_product(tx, entry.product_id)?;
    product.ledger_seq += 1;
    tx.put(&product_key(product.id), &product)?;
    tx.put(&entry_key(entry.product_id, entry.id), entry)
}

/// Re-runs `attempt` while it fails with `StaleLedger`, at most `retries` extra times.
pub(crate) fn with_retries<T>(
    retries: u32,
    operation: &str,
    mut attempt: impl FnMut() -> Result<T>,
) -> Result<T> {
    for round in 0..=retries {
        match attempt() {
            Err(StoreError::StaleLedger(product)) => {
                debug!(operation, round, product = %product, "ledger moved, retrying");
            }
            other => return other,
        }
    }
    Err(StoreError::TransactionFailed(format!(
        "{operation}: stock kept changing after {retries} retries"
    )))
}

#[derive(Clone)]
pub struct Ledger {
    store: Store,
    policy: StockPolicy,
    retries: u32,
}

impl Ledger {
    pub fn new(store: Store, policy: StockPolicy, retries: u32) -> Self {
        Self {
            store,
            policy,
            retries,
        }
    }

    pub fn policy(&self) -> StockPolicy {
        self.policy
    }

    pub(crate) fn retries(&self) -> u32 {
        self.retries
    }

    /// Records a stock movement for a live product.
    pub fn append(
        &self,
        product_id: ProductId,
        kind: StockKind,
        quantity: u32,
        shelf_life: ShelfLife,
    ) -> Result<TransactionId> {
        if quantity == 0 {
            return Err(StoreError::InvalidQuantity);
        }
        if kind == StockKind::Out && !shelf_life.is_empty() {
            return Err(StoreError::InvalidInput(
                "manufacture and expiry dates only apply to IN entries".into(),
            ));
        }
        if let ShelfLife {
            manufactured_on: Some(made),
            expires_on: Some(expires),
        } = shelf_life
        {
            if expires < made {
                return Err(StoreError::InvalidInput(format!(
                    "expiry {expires} precedes manufacture {made}"
                )));
            }
        }

        let entry = match kind {
            StockKind::In => self.store.transact(|tx| {
                let entry = new_entry(product_id, kind, quantity, shelf_life);
                append_in(tx, &entry)?;
                Ok(entry)
            })?,
            StockKind::Out => with_retries(self.retries, "stock out", || {
                let snapshot = self.snapshot(product_id)?;
                self.check_available(&snapshot, u64::from(quantity))?;
                self.store.transact(|tx| {
                    guard_in(tx, &snapshot)?;
                    let entry = new_entry(product_id, kind, quantity, ShelfLife::default());
                    append_in(tx, &entry)?;
                    Ok(entry)
                })
            })?,
        };

        info!(
            product_id = %product_id,
            entry_id = %entry.id,
            kind = ?kind,
            quantity,
            "stock entry appended"
        );
        Ok(entry.id)
    }

    /// Entries of one product in append order.
    pub fn entries(&self, product_id: ProductId) -> Result<Vec<StockTransaction>> {
        self.require_product(product_id)?;
        self.store.scan(&entries_prefix(product_id))
    }

    pub fn all_entries(&self) -> Result<Vec<StockTransaction>> {
        self.store.scan(tables::STOCK)
    }

    pub fn available_stock(&self, product_id: ProductId) -> Result<i64> {
        Ok(available(&self.entries(product_id)?))
    }

    pub fn total_sold(&self, product_id: ProductId) -> Result<u64> {
        Ok(sold(&self.entries(product_id)?))
    }

    /// Units ever ordered, counted from order lines rather than the ledger.
    pub fn total_ordered(&self, product_id: ProductId) -> Result<u64> {
        self.require_product(product_id)?;
        let lines: Vec<OrderLine> = self
            .store
            .scan(&key(tables::PRODUCT_LINES, &[product_id.as_bytes()]))?;
        Ok(lines.iter().map(|l| u64::from(l.quantity)).sum())
    }

    // Reads the sequence before folding, so an append racing the fold always shows up as a moved sequence.
    pub(crate) fn snapshot(&self, product_id: ProductId) -> Result<LedgerSnapshot> {
        let product = self.require_product(product_id)?;
        let entries: Vec<StockTransaction> = self.store.scan(&entries_prefix(product_id))?;

        Ok(LedgerSnapshot {
            product_id,
            seq: product.ledger_seq,
            available: available(&entries),
        })
    }

    pub(crate) fn check_available(&self, snapshot: &LedgerSnapshot, requested: u64) -> Result<()> {
        let short = i128::from(snapshot.available) < i128::from(requested);
        if self.policy == StockPolicy::Reject && short {
            return Err(StoreError::InsufficientStock {
                product: snapshot.product_id.to_string(),
                requested,
                available: snapshot.available,
            });
        }
        Ok(())
    }

    fn require_product(&self, product_id: ProductId) -> Result<Product> {
        self.store
            .get::<Product>(&product_key(product_id))?
            .ok_or_else(|| StoreError::not_found("product", product_id))
    }
}
