//! Soft-deletable categories and products.
//!
//! Names are unique among live rows only, enforced through a name index that is
//! updated in the same transaction as the row. Deleting a category cascades to
//! every live product it owns. Rows are never removed so ledger entries and
//! order lines keep pointing at something.
use chrono::Utc;
use tracing::{info, warn};

use crate::effects::{Collaborators, Effects};
use crate::error::{Result, StoreError};
use crate::images::ImageRef;
use crate::search::ProductDocument;
use crate::store::{Store, Tx, TxResult, abort, key, tables};
use crate::types::{CategoryId, ProductId, TimeStamp};

#[derive(Debug, Clone, PartialEq, Eq, minicbor::Encode, minicbor::Decode)]
pub struct Category {
    #[n(0)]
    pub id: CategoryId,
    #[n(1)]
    pub name: String,
    #[n(2)]
    pub description: String,
    #[n(3)]
    pub image: Option<ImageRef>,
    #[n(4)]
    pub created_on: TimeStamp<Utc>,
    #[n(5)]
    pub is_deleted: bool,
    #[n(6)]
    pub deleted_on: Option<TimeStamp<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Eq, minicbor::Encode, minicbor::Decode)]
pub struct Product {
    #[n(0)]
    pub id: ProductId,
    #[n(1)]
    pub name: String,
    #[n(2)]
    pub description: String,
    #[n(3)]
    pub price: u64, // minor currency units
    #[n(4)]
    pub brand: String,
    #[n(5)]
    pub unit: String,
    #[n(6)]
    pub category_id: CategoryId,
    #[n(7)]
    pub image: Option<ImageRef>,
    #[n(8)]
    pub created_on: TimeStamp<Utc>,
    #[n(9)]
    pub is_deleted: bool,
    #[n(10)]
    pub deleted_on: Option<TimeStamp<Utc>>,
    // bumped on every ledger append, lets stock checks detect concurrent movement
    #[n(11)]
    pub(crate) ledger_seq: u64,
}

impl Product {
    pub(crate) fn document(&self) -> ProductDocument {
        ProductDocument {
            id: self.id,
            name: self.name.clone(),
            description: self.description.clone(),
            brand: self.brand.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CategoryDraft {
    pub name: String,
    pub description: String,
    pub image: Option<ImageRef>,
}

/// Fields left as `None` are unchanged.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CategoryPatch {
    pub name: Option<String>,
    pub description: Option<String>,
    pub image: Option<ImageRef>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProductDraft {
    pub name: String,
    pub description: String,
    pub price: u64,
    pub brand: String,
    pub unit: String,
    pub category_id: CategoryId,
    pub image: Option<ImageRef>,
}

/// Fields left as `None` are unchanged.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProductPatch {
    pub name: Option<String>,
    pub description: Option<String>,
    pub price: Option<u64>,
    pub brand: Option<String>,
    pub unit: Option<String>,
    pub image: Option<ImageRef>,
}

// Owned product ids of one category, the explicit form of the ownership edge.
#[derive(Debug, Clone, Default, minicbor::Encode, minicbor::Decode)]
struct ProductIds {
    #[n(0)]
    ids: Vec<ProductId>,
}

pub(crate) fn category_key(id: CategoryId) -> Vec<u8> {
    key(tables::CATEGORY, &[id.as_bytes()])
}

pub(crate) fn product_key(id: ProductId) -> Vec<u8> {
    key(tables::PRODUCT, &[id.as_bytes()])
}

fn category_name_key(name: &str) -> Vec<u8> {
    key(tables::CATEGORY_NAME, &[name.as_bytes()])
}

fn product_name_key(name: &str) -> Vec<u8> {
    key(tables::PRODUCT_NAME, &[name.as_bytes()])
}

fn owned_key(id: CategoryId) -> Vec<u8> {
    key(tables::CATEGORY_PRODUCTS, &[id.as_bytes()])
}

fn require_name(name: &str) -> TxResult<()> {
    if name.trim().is_empty() {
        return abort(StoreError::InvalidInput("name must not be empty".into()));
    }
    Ok(())
}

// Moves a name index entry, failing if the new name belongs to another live row.
fn rename<Id>(tx: &Tx<'_>, old: &[u8], new: &[u8], new_name: &str, id: &Id) -> TxResult<()>
where
    Id: minicbor::Encode<()>,
{
    if tx.contains(new)? {
        return abort(StoreError::DuplicateName(new_name.to_string()));
    }
    tx.remove(old)?;
    tx.put(new, id)
}

pub(crate) fn load_live_category(tx: &Tx<'_>, id: CategoryId) -> TxResult<Category> {
    match tx.get::<Category>(&category_key(id))? {
        Some(category) if !category.is_deleted => Ok(category),
        _ => abort(StoreError::not_found("category", id)),
    }
}

pub(crate) fn load_live_product(tx: &Tx<'_>, id: ProductId) -> TxResult<Product> {
    match tx.get::<Product>(&product_key(id))? {
        Some(product) if !product.is_deleted => Ok(product),
        _ => abort(StoreError::not_found("product", id)),
    }
}

pub(crate) fn create_category_in(tx: &Tx<'_>, draft: &CategoryDraft) -> TxResult<Category> {
    require_name(&draft.name)?;
    let name_key = category_name_key(&draft.name);
    if tx.contains(&name_key)? {
        return abort(StoreError::DuplicateName(draft.name.clone()));
    }

    let category = Category {
        id: CategoryId::new(),
        name: draft.name.clone(),
        description: draft.description.clone(),
        image: draft.image.clone(),
        created_on: TimeStamp::new(),
        is_deleted: false,
        deleted_on: None,
    };
    tx.put(&category_key(category.id), &category)?;
    tx.put(&name_key, &category.id)?;
    Ok(category)
}

pub(crate) fn update_category_in(
    tx: &Tx<'_>,
    id: CategoryId,
    patch: &CategoryPatch,
    fx: &mut Effects,
) -> TxResult<Category> {
    let mut category = load_live_category(tx, id)?;

    if let Some(name) = patch.name.as_ref().filter(|n| **n != category.name) {
        require_name(name)?;
        rename(
            tx,
            &category_name_key(&category.name),
            &category_name_key(name),
            name,
            &id,
        )?;
        category.name = name.clone();
    }
    if let Some(description) = &patch.description {
        category.description = description.clone();
    }
    // the old image goes only once the new reference has committed
    if let Some(image) = patch.image.as_ref().filter(|i| Some(*i) != category.image.as_ref()) {
        fx.release(category.image.replace(image.clone()));
    }

    tx.put(&category_key(id), &category)?;
    Ok(category)
}

pub(crate) fn delete_category_in(
    tx: &Tx<'_>,
    id: CategoryId,
    fx: &mut Effects,
) -> TxResult<Category> {
    let mut category = load_live_category(tx, id)?;
    let now = TimeStamp::new();

    category.is_deleted = true;
    category.deleted_on = Some(now);
    tx.put(&category_key(id), &category)?;
    tx.remove(&category_name_key(&category.name))?;

    let owned: ProductIds = tx.get(&owned_key(id))?.unwrap_or_default();
    for product_id in owned.ids {
        if let Some(product) = tx.get::<Product>(&product_key(product_id))? {
            if !product.is_deleted {
                soft_delete_product(tx, product, now, fx)?;
            }
        }
    }

    fx.release(category.image.clone());
    Ok(category)
}

pub(crate) fn create_product_in(
    tx: &Tx<'_>,
    draft: &ProductDraft,
    fx: &mut Effects,
) -> TxResult<Product> {
    require_name(&draft.name)?;
    if draft.price == 0 {
        return abort(StoreError::InvalidPrice);
    }
    load_live_category(tx, draft.category_id)?;
    let name_key = product_name_key(&draft.name);
    if tx.contains(&name_key)? {
        return abort(StoreError::DuplicateName(draft.name.clone()));
    }

    let product = Product {
        id: ProductId::new(),
        name: draft.name.clone(),
        description: draft.description.clone(),
        price: draft.price,
        brand: draft.brand.clone(),
        unit: draft.unit.clone(),
        category_id: draft.category_id,
        image: draft.image.clone(),
        created_on: TimeStamp::new(),
        is_deleted: false,
        deleted_on: None,
        ledger_seq: 0,
    };
    tx.put(&product_key(product.id), &product)?;
    tx.put(&name_key, &product.id)?;

    let mut owned: ProductIds = tx.get(&owned_key(draft.category_id))?.unwrap_or_default();
    owned.ids.push(product.id);
    tx.put(&owned_key(draft.category_id), &owned)?;

    fx.reindex(product.id);
    Ok(product)
}

pub(crate) fn update_product_in(
    tx: &Tx<'_>,
    id: ProductId,
    patch: &ProductPatch,
    fx: &mut Effects,
) -> TxResult<Product> {
    let mut product = load_live_product(tx, id)?;

    if let Some(name) = patch.name.as_ref().filter(|n| **n != product.name) {
        require_name(name)?;
        rename(
            tx,
            &product_name_key(&product.name),
            &product_name_key(name),
            name,
            &id,
        )?;
        product.name = name.clone();
    }
    if let Some(price) = patch.price {
        if price == 0 {
            return abort(StoreError::InvalidPrice);
        }
        product.price = price;
    }
    if let Some(description) = &patch.description {
        product.description = description.clone();
    }
    if let Some(brand) = &patch.brand {
        product.brand = brand.clone();
    }
    if let Some(unit) = &patch.unit {
        product.unit = unit.clone();
    }
    if let Some(image) = patch.image.as_ref().filter(|i| Some(*i) != product.image.as_ref()) {
        fx.release(product.image.replace(image.clone()));
    }

    tx.put(&product_key(id), &product)?;
    fx.reindex(product.id);
    Ok(product)
}

fn soft_delete_product(
    tx: &Tx<'_>,
    mut product: Product,
    now: TimeStamp<Utc>,
    fx: &mut Effects,
) -> TxResult<Product> {
    product.is_deleted = true;
    product.deleted_on = Some(now);
    tx.put(&product_key(product.id), &product)?;
    tx.remove(&product_name_key(&product.name))?;

    fx.release(product.image.clone());
    fx.reindex(product.id);
    Ok(product)
}

pub(crate) fn delete_product_in(
    tx: &Tx<'_>,
    id: ProductId,
    fx: &mut Effects,
) -> TxResult<Product> {
    let product = load_live_product(tx, id)?;
    soft_delete_product(tx, product, TimeStamp::new(), fx)
}

#[derive(Clone)]
pub struct Catalog {
    store: Store,
    collab: Collaborators,
}

impl Catalog {
    pub fn new(store: Store, collab: Collaborators) -> Self {
        Self { store, collab }
    }

    pub fn create_category(&self, draft: CategoryDraft) -> Result<Category> {
        let category = self
            .collab
            .commit(&self.store, |tx, _| create_category_in(tx, &draft))?;

        info!(category_id = %category.id, name = %category.name, "category created");
        Ok(category)
    }

    pub fn update_category(&self, id: CategoryId, patch: CategoryPatch) -> Result<Category> {
        let category = self
            .collab
            .commit(&self.store, |tx, fx| update_category_in(tx, id, &patch, fx))?;

        info!(category_id = %id, "category updated");
        Ok(category)
    }

    /// Soft-deletes the category and every live product it owns.
    pub fn delete_category(&self, id: CategoryId) -> Result<Category> {
        let category = self
            .collab
            .commit(&self.store, |tx, fx| delete_category_in(tx, id, fx))?;

        info!(category_id = %id, "category deleted with its products");
        Ok(category)
    }

    pub fn create_product(&self, draft: ProductDraft) -> Result<Product> {
        let product = self
            .collab
            .commit(&self.store, |tx, fx| create_product_in(tx, &draft, fx))?;

        info!(product_id = %product.id, name = %product.name, "product created");
        Ok(product)
    }

    pub fn update_product(&self, id: ProductId, patch: ProductPatch) -> Result<Product> {
        let product = self
            .collab
            .commit(&self.store, |tx, fx| update_product_in(tx, id, &patch, fx))?;

        info!(product_id = %id, "product updated");
        Ok(product)
    }

    pub fn delete_product(&self, id: ProductId) -> Result<Product> {
        let product = self
            .collab
            .commit(&self.store, |tx, fx| delete_product_in(tx, id, fx))?;

        info!(product_id = %id, "product deleted");
        Ok(product)
    }

    pub fn get_category(&self, id: CategoryId) -> Result<Category> {
        match self.store.get::<Category>(&category_key(id))? {
            Some(category) if !category.is_deleted => Ok(category),
            _ => Err(StoreError::not_found("category", id)),
        }
    }

    pub fn list_categories(&self) -> Result<Vec<Category>> {
        Ok(self
            .store
            .scan::<Category>(tables::CATEGORY)?
            .into_iter()
            .filter(|c| !c.is_deleted)
            .collect())
    }

    /// Live products owned by a live category.
    pub fn product_ids_in(&self, id: CategoryId) -> Result<Vec<ProductId>> {
        self.get_category(id)?;
        let owned: ProductIds = self.store.get(&owned_key(id))?.unwrap_or_default();

        let mut live = Vec::with_capacity(owned.ids.len());
        for product_id in owned.ids {
            if self.live_product(product_id)?.is_some() {
                live.push(product_id);
            }
        }
        Ok(live)
    }

    pub fn get_product(&self, id: ProductId) -> Result<Product> {
        self.live_product(id)?
            .ok_or_else(|| StoreError::not_found("product", id))
    }

    fn live_product(&self, id: ProductId) -> Result<Option<Product>> {
        Ok(self
            .store
            .get::<Product>(&product_key(id))?
            .filter(|p| !p.is_deleted))
    }

    /// Live products, newest first.
    pub fn list_products(&self) -> Result<Vec<Product>> {
        let mut products: Vec<Product> = self
            .store
            .scan::<Product>(tables::PRODUCT)?
            .into_iter()
            .filter(|p| !p.is_deleted)
            .collect();
        products.sort_by(|a, b| b.created_on.cmp(&a.created_on));
        Ok(products)
    }

    pub fn top_products(&self, n: usize) -> Result<Vec<Product>> {
        let mut products = self.list_products()?;
        products.truncate(n);
        Ok(products)
    }

    /// Stages an image binary for a later create or update. The caller owns the
    /// reference until a committed row points at it.
    pub fn upload_image(&self, bytes: &[u8], logical_path: &str) -> Result<ImageRef> {
        Ok(self.collab.images.store(bytes, logical_path)?)
    }

    /// Rebuilds the search index from the store, e.g. after a restart.
    pub fn reindex(&self) -> Result<usize> {
        let mut indexed = 0;
        for product in self.list_products()? {
            if self.collab.refresh_index(&self.store, product.id) {
                indexed += 1;
            }
        }
        Ok(indexed)
    }

    /// Live products matching `query` in the search index. An unavailable index yields nothing.
    pub fn search(&self, query: &str) -> Result<Vec<Product>> {
        let ids = match self.collab.index.search(query) {
            Ok(ids) => ids,
            Err(err) => {
                warn!(error = %err, "search index unavailable");
                return Ok(vec![]);
            }
        };
        // the index lags behind deletes, so filter against the store
        let mut products = Vec::with_capacity(ids.len());
        for id in ids {
            products.extend(self.live_product(id)?);
        }
        Ok(products)
    }
}
