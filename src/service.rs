//! Service layer wiring every component over one database
use std::sync::Arc;
use std::thread::JoinHandle;

use anyhow::Context;
use tracing::info;

use crate::approval::Approvals;
use crate::catalog::Catalog;
use crate::config::StorefrontConfig;
use crate::effects::Collaborators;
use crate::images::FsImageStore;
use crate::ledger::Ledger;
use crate::notify::{LogTransport, MailOutbox};
use crate::orders::Orders;
use crate::report::Reports;
use crate::reviews::Reviews;
use crate::search::MemoryIndex;
use crate::store::Store;
use crate::users::Users;

/// Entry point for callers. Cheap to clone, every handle shares the same store.
#[derive(Clone)]
pub struct Storefront {
    store: Store,
    ledger: Ledger,
    catalog: Catalog,
    orders: Orders,
    approvals: Approvals,
    users: Users,
    reviews: Reviews,
    reports: Reports,
}

impl Storefront {
    pub fn new(store: Store, config: &StorefrontConfig, collab: Collaborators) -> Self {
        let ledger = Ledger::new(
            store.clone(),
            config.stock_policy,
            config.completion_retries,
        );
        let catalog = Catalog::new(store.clone(), collab.clone());
        let orders = Orders::new(store.clone(), ledger.clone());
        let users = Users::new(store.clone());
        let reports = Reports::new(
            catalog.clone(),
            ledger.clone(),
            orders.clone(),
            users.clone(),
            collab.clone(),
        );

        Self {
            approvals: Approvals::new(store.clone(), collab),
            reviews: Reviews::new(store.clone()),
            store,
            ledger,
            catalog,
            orders,
            users,
            reports,
        }
    }

    /// Opens the database under `config.data_dir` with the default collaborators:
    /// images on disk, a logging mail outbox and an in-memory search index.
    ///
    /// The returned handle is the outbox dispatcher; it finishes once every
    /// `Storefront` clone has been dropped and queued mail is delivered.
    pub fn open(config: &StorefrontConfig) -> anyhow::Result<(Self, JoinHandle<()>)> {
        let store = Store::open(&config.data_dir)
            .with_context(|| format!("failed to open database at {}", config.data_dir.display()))?;
        let images = FsImageStore::new(&config.image_root);
        let (outbox, dispatcher) = MailOutbox::spawn(config.outbox_capacity, LogTransport);
        let collab = Collaborators::new(
            Arc::new(images),
            Arc::new(MemoryIndex::default()),
            Arc::new(outbox),
        );

        let storefront = Self::new(store, config, collab);
        let indexed = storefront.reindex()?;
        info!(
            data_dir = %config.data_dir.display(),
            policy = ?config.stock_policy,
            indexed,
            "storefront opened"
        );
        Ok((storefront, dispatcher))
    }

    /// Pushes every live product into the search index. Returns how many were indexed.
    pub fn reindex(&self) -> anyhow::Result<usize> {
        self.catalog
            .reindex()
            .context("failed to rebuild the search index")
    }

    pub fn ledger(&self) -> &Ledger {
        &self.ledger
    }

    pub fn catalog(&self) -> &Catalog {
        &self.catalog
    }

    pub fn orders(&self) -> &Orders {
        &self.orders
    }

    pub fn approvals(&self) -> &Approvals {
        &self.approvals
    }

    pub fn users(&self) -> &Users {
        &self.users
    }

    pub fn reviews(&self) -> &Reviews {
        &self.reviews
    }

    pub fn reports(&self) -> &Reports {
        &self.reports
    }

    pub fn flush(&self) -> anyhow::Result<()> {
        self.store.flush().context("failed to flush database")
    }
}
