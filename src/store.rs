//! Key layout and transactional access to the sled tree behind every component.
//!
//! All records live in one tree under table prefixes. A logical operation is one
//! sled transaction; its closure may be re-run on conflict, so it must only touch
//! the tree and never the outside world.
use std::path::Path;
use std::sync::Arc;

use sled::transaction::{
    ConflictableTransactionError, ConflictableTransactionResult, TransactionError,
    TransactionalTree,
};

use crate::error::{Result, StoreError};

pub(crate) mod tables {
    pub const CATEGORY: &[u8] = b"category/";
    pub const CATEGORY_NAME: &[u8] = b"category-name/";
    pub const CATEGORY_PRODUCTS: &[u8] = b"category-products/";
    pub const PRODUCT: &[u8] = b"product/";
    pub const PRODUCT_NAME: &[u8] = b"product-name/";
    pub const STOCK: &[u8] = b"stock/";
    pub const ORDER: &[u8] = b"order/";
    pub const PENDING_ORDER: &[u8] = b"pending-order/";
    pub const PRODUCT_LINES: &[u8] = b"product-lines/";
    pub const CUSTOMER_ORDERS: &[u8] = b"customer-orders/";
    pub const USER: &[u8] = b"user/";
    pub const USER_NAME: &[u8] = b"user-name/";
    pub const USER_EMAIL: &[u8] = b"user-email/";
    pub const CATEGORY_REQUEST: &[u8] = b"category-request/";
    pub const MANAGER_REQUEST: &[u8] = b"manager-request/";
    pub const MANAGER_REQUEST_NAME: &[u8] = b"manager-request-name/";
    pub const REVIEW: &[u8] = b"review/";
    pub const REVIEWED_LINE: &[u8] = b"reviewed-line/";
}

pub(crate) fn key(table: &[u8], parts: &[&[u8]]) -> Vec<u8> {
    let mut key = table.to_vec();
    for part in parts {
        key.extend_from_slice(part);
    }
    key
}

pub(crate) fn encode<T: minicbor::Encode<()>>(value: &T) -> Result<Vec<u8>> {
    Ok(minicbor::to_vec(value)?)
}

pub(crate) fn decode<T>(bytes: &[u8]) -> Result<T>
where
    T: for<'b> minicbor::Decode<'b, ()>,
{
    Ok(minicbor::decode(bytes)?)
}

pub(crate) type TxResult<T> = ConflictableTransactionResult<T, StoreError>;

pub(crate) fn abort<T>(err: StoreError) -> TxResult<T> {
    Err(ConflictableTransactionError::Abort(err))
}

/// Typed view over the tree inside one transaction attempt.
pub(crate) struct Tx<'a> {
    tree: &'a TransactionalTree,
}

impl Tx<'_> {
    pub fn get<T>(&self, key: &[u8]) -> TxResult<Option<T>>
    where
        T: for<'b> minicbor::Decode<'b, ()>,
    {
        match self.tree.get(key)? {
            Some(bytes) => decode(&bytes).map(Some).or_else(abort),
            None => Ok(None),
        }
    }

    pub fn put<T: minicbor::Encode<()>>(&self, key: &[u8], value: &T) -> TxResult<()> {
        let bytes = encode(value).or_else(abort)?;
        self.tree.insert(key, bytes)?;
        Ok(())
    }

    pub fn contains(&self, key: &[u8]) -> TxResult<bool> {
        Ok(self.tree.get(key)?.is_some())
    }

    pub fn remove(&self, key: &[u8]) -> TxResult<()> {
        self.tree.remove(key)?;
        Ok(())
    }
}

/// Handle to the embedded database. Cheap to clone.
#[derive(Clone)]
pub struct Store {
    instance: Arc<sled::Db>,
}

impl Store {
    pub fn new(instance: Arc<sled::Db>) -> Self {
        Self { instance }
    }

    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        Ok(Self::new(Arc::new(sled::open(path)?)))
    }

    /// A database that is removed when the last handle drops.
    pub fn temporary() -> Result<Self> {
        let db = sled::Config::new().temporary(true).open()?;
        Ok(Self::new(Arc::new(db)))
    }

    pub fn flush(&self) -> Result<()> {
        self.instance.flush()?;
        Ok(())
    }

    /// Runs `f` as one atomic unit. Aborts surface unchanged, storage
    /// failures become `TransactionFailed`.
    pub(crate) fn transact<A, F>(&self, f: F) -> Result<A>
    where
        F: Fn(&Tx<'_>) -> TxResult<A>,
    {
        self.instance
            .transaction(|tree| f(&Tx { tree }))
            .map_err(|err| match err {
                TransactionError::Abort(err) => err,
                TransactionError::Storage(err) => StoreError::TransactionFailed(err.to_string()),
            })
    }

    pub(crate) fn get<T>(&self, key: &[u8]) -> Result<Option<T>>
    where
        T: for<'b> minicbor::Decode<'b, ()>,
    {
        self.instance
            .get(key)?
            .map(|bytes| decode(&bytes))
            .transpose()
    }

    /// Decodes every value under `prefix`, in key order.
    pub(crate) fn scan<T>(&self, prefix: &[u8]) -> Result<Vec<T>>
    where
        T: for<'b> minicbor::Decode<'b, ()>,
    {
        self.instance
            .scan_prefix(prefix)
            .values()
            .map(|value| decode(&value?))
            .collect()
    }
}
