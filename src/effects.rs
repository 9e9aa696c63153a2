//! Side effects owed by a committed transaction.
//!
//! Transaction closures record what must happen outside the database in an
//! [`Effects`] value. It is acted on only after sled reports a commit, and every
//! failure here is logged instead of failing the mutation that caused it.
use std::sync::{Arc, Mutex, PoisonError};

use tracing::warn;

use crate::catalog::{Product, product_key};
use crate::error::Result;
use crate::images::{ImageRef, ImageStore};
use crate::notify::{Mail, Notifier};
use crate::search::SearchIndex;
use crate::store::{Store, Tx, TxResult};
use crate::types::ProductId;

#[derive(Debug, Default)]
pub(crate) struct Effects {
    released: Vec<ImageRef>,
    reindexed: Vec<ProductId>,
    mail: Vec<Mail>,
}

impl Effects {
    pub fn release(&mut self, image: Option<ImageRef>) {
        self.released.extend(image);
    }
    /// The search entry of `id` is refreshed from the committed row.
    pub fn reindex(&mut self, id: ProductId) {
        self.reindexed.push(id);
    }
    pub fn send(&mut self, mail: Mail) {
        self.mail.push(mail);
    }
}

/// External services the core calls into.
#[derive(Clone)]
pub struct Collaborators {
    pub images: Arc<dyn ImageStore>,
    pub index: Arc<dyn SearchIndex>,
    pub notifier: Arc<dyn Notifier>,
    // held from reading a product row until its index entry is written
    index_lock: Arc<Mutex<()>>,
}

impl Collaborators {
    pub fn new(
        images: Arc<dyn ImageStore>,
        index: Arc<dyn SearchIndex>,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        Self {
            images,
            index,
            notifier,
            index_lock: Arc::default(),
        }
    }

    /// Runs `f` as one transaction and carries out its effects once it commits.
    pub(crate) fn commit<A, F>(&self, store: &Store, f: F) -> Result<A>
    where
        F: Fn(&Tx<'_>, &mut Effects) -> TxResult<A>,
    {
        let (value, effects) = store.transact(|tx| {
            let mut effects = Effects::default();
            let value = f(tx, &mut effects)?;
            Ok((value, effects))
        })?;

        self.apply(store, effects);
        Ok(value)
    }

    /// Writes the current state of product `id` to the search index: live rows are
    /// upserted, deleted or missing ones removed. Returns whether the index took it.
    pub(crate) fn refresh_index(&self, store: &Store, id: ProductId) -> bool {
        let _guard = self.index_lock.lock().unwrap_or_else(PoisonError::into_inner);
        let updated = match store.get::<Product>(&product_key(id)) {
            Ok(Some(product)) if !product.is_deleted => self.index.upsert(product.document()),
            Ok(_) => self.index.remove(id),
            Err(err) => {
                warn!(product_id = %id, error = %err, "product unreadable, index left as is");
                return false;
            }
        };
        if let Err(err) = updated {
            warn!(product_id = %id, error = %err, "search index update failed");
            return false;
        }
        true
    }

    pub(crate) fn apply(&self, store: &Store, effects: Effects) {
        for image in effects.released {
            if let Err(err) = self.images.release(&image) {
                warn!(image = %image, error = %err, "image release failed");
            }
        }
        for id in effects.reindexed {
            self.refresh_index(store, id);
        }
        for mail in effects.mail {
            if let Err(err) = self.notifier.enqueue(mail.clone()) {
                warn!(to = %mail.to, subject = %mail.subject, error = %err, "mail not queued");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::{Catalog, CategoryDraft, ProductDraft, ProductPatch};
    use crate::images::FsImageStore;
    use crate::notify::{LogTransport, MailOutbox};
    use crate::search::MemoryIndex;

    #[test]
    fn late_index_effects_never_regress_to_an_older_row() {
        let dir = tempfile::tempdir().unwrap();
        let store = Store::temporary().unwrap();
        let index = Arc::new(MemoryIndex::default());
        let (outbox, _dispatcher) = MailOutbox::spawn(4, LogTransport);
        let collab = Collaborators::new(
            Arc::new(FsImageStore::new(dir.path())),
            index.clone(),
            Arc::new(outbox),
        );
        let catalog = Catalog::new(store.clone(), collab.clone());
        let dairy = catalog
            .create_category(CategoryDraft {
                name: "Dairy".into(),
                description: String::new(),
                image: None,
            })
            .unwrap();
        let product = catalog
            .create_product(ProductDraft {
                name: "Milk".into(),
                description: String::new(),
                price: 2700,
                brand: "Amul".into(),
                unit: "pack".into(),
                category_id: dairy.id,
                image: None,
            })
            .unwrap();
        catalog
            .update_product(
                product.id,
                ProductPatch {
                    name: Some("Paneer".into()),
                    ..Default::default()
                },
            )
            .unwrap();

        // the effects of the first commit arrive after those of the rename
        let mut stale = Effects::default();
        stale.reindex(product.id);
        collab.apply(&store, stale);

        assert_eq!(index.search("paneer").unwrap(), vec![product.id]);
        assert!(index.search("milk").unwrap().is_empty());

        catalog.delete_product(product.id).unwrap();
        assert!(collab.refresh_index(&store, product.id));
        assert!(index.search("paneer").unwrap().is_empty());
    }
}
