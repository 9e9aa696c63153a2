use std::convert::Infallible;

#[derive(thiserror::Error, Debug)]
pub enum StoreError {
    #[error("{entity} {id} was not found")]
    NotFound { entity: &'static str, id: String },
    #[error("the name '{0}' is already taken")]
    DuplicateName(String),
    #[error("quantity must be greater than zero")]
    InvalidQuantity,
    #[error("price must be greater than zero")]
    InvalidPrice,
    #[error("invalid input: {0}")]
    InvalidInput(String),
    #[error("insufficient stock for {product}: requested {requested}, available {available}")]
    InsufficientStock {
        product: String,
        requested: u64,
        available: i64,
    },
    #[error("order {0} is already complete")]
    AlreadyComplete(String),
    // Raised when a product's ledger moved between the read and the commit of an OUT append.
    // Retried internally, callers only ever see TransactionFailed.
    #[error("ledger of product {0} changed while the operation was in flight")]
    StaleLedger(String),
    #[error("transaction could not commit: {0}")]
    TransactionFailed(String),
    #[error("record encoding failed: {0}")]
    Encoding(String),
    #[error(transparent)]
    Image(#[from] crate::images::ImageError),
    #[error("storage failure: {0}")]
    Storage(#[from] sled::Error),
}

pub type Result<T> = std::result::Result<T, StoreError>;

impl StoreError {
    pub fn not_found(entity: &'static str, id: impl ToString) -> Self {
        StoreError::NotFound {
            entity,
            id: id.to_string(),
        }
    }
}

impl From<minicbor::decode::Error> for StoreError {
    fn from(value: minicbor::decode::Error) -> Self {
        StoreError::Encoding(value.to_string())
    }
}

impl From<minicbor::encode::Error<Infallible>> for StoreError {
    fn from(value: minicbor::encode::Error<Infallible>) -> Self {
        StoreError::Encoding(value.to_string())
    }
}
