//! Stock ledger, order fulfilment and approval-gated catalog mutations for a
//! small storefront, persisted in an embedded sled database.

pub mod approval;
pub mod catalog;
pub mod config;
mod effects;
pub mod error;
pub mod images;
pub mod ledger;
pub mod notify;
pub mod orders;
pub mod report;
pub mod reviews;
pub mod search;
pub mod service;
mod store;
pub mod telemetry;
pub mod types;
pub mod users;
pub mod utils;

pub use approval::{
    ApprovalStatus, Approvals, CategoryProposal, CategoryRequest, CategoryRequestKind,
    DecideOutcome, Decision, ManagerRequest, PendingCounts, RequestRef,
};
pub use catalog::{Catalog, Category, CategoryDraft, CategoryPatch, Product, ProductDraft, ProductPatch};
pub use crate::config::StorefrontConfig;
pub use effects::Collaborators;
pub use error::{Result, StoreError};
pub use images::{FsImageStore, ImageError, ImageRef, ImageStore};
pub use ledger::{Ledger, ShelfLife, StockKind, StockPolicy, StockTransaction};
pub use notify::{LogTransport, Mail, MailOutbox, MailTransport, Notifier, NotifyError};
pub use orders::{LineItem, Order, OrderLine, OrderStatus, Orders};
pub use report::{ActivitySummary, Reports, StockReportRow};
pub use reviews::{Review, Reviews};
pub use search::{IndexError, MemoryIndex, ProductDocument, SearchIndex};
pub use service::Storefront;
pub use store::Store;
pub use types::{
    CalendarDate, CategoryId, OrderId, OrderLineId, ProductId, RequestId, ReviewId, TimeStamp,
    TransactionId, UserId,
};
pub use users::{AccountDetails, Profile, Role, User, Users};
