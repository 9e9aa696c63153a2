//! Shared fixtures: a storefront over a throwaway database with recording collaborators.
#![allow(dead_code)]

use std::sync::{Arc, Mutex};

use storefront::{
    Category, CategoryDraft, Collaborators, ImageError, ImageRef, ImageStore, IndexError,
    LineItem, Mail, MemoryIndex, Notifier, NotifyError, Product, ProductDocument, ProductDraft,
    ProductId, Profile, Role, SearchIndex, ShelfLife, StockKind, StockPolicy, Store,
    Storefront, StorefrontConfig, User,
};
use tempfile::{TempDir, tempdir};

/// Image store that only remembers what it was asked to do.
#[derive(Default)]
pub struct RecordingImages {
    pub stored: Mutex<Vec<ImageRef>>,
    pub released: Mutex<Vec<ImageRef>>,
    pub fail_release: bool,
}

impl RecordingImages {
    pub fn released(&self) -> Vec<ImageRef> {
        self.released.lock().unwrap().clone()
    }
}

impl ImageStore for RecordingImages {
    fn store(&self, _bytes: &[u8], logical_path: &str) -> Result<ImageRef, ImageError> {
        let image = ImageRef::new(logical_path);
        self.stored.lock().unwrap().push(image.clone());
        Ok(image)
    }

    fn release(&self, image: &ImageRef) -> Result<(), ImageError> {
        if self.fail_release {
            return Err(ImageError::InvalidPath(image.to_string()));
        }
        self.released.lock().unwrap().push(image.clone());
        Ok(())
    }
}

#[derive(Default)]
pub struct RecordingMailer {
    pub sent: Mutex<Vec<Mail>>,
}

impl RecordingMailer {
    pub fn sent(&self) -> Vec<Mail> {
        self.sent.lock().unwrap().clone()
    }
}

impl Notifier for RecordingMailer {
    fn enqueue(&self, mail: Mail) -> Result<(), NotifyError> {
        self.sent.lock().unwrap().push(mail);
        Ok(())
    }
}

/// Index that is always down.
pub struct UnavailableIndex;

impl SearchIndex for UnavailableIndex {
    fn upsert(&self, _document: ProductDocument) -> Result<(), IndexError> {
        Err(IndexError::Unavailable("offline".into()))
    }
    fn remove(&self, _id: ProductId) -> Result<(), IndexError> {
        Err(IndexError::Unavailable("offline".into()))
    }
    fn search(&self, _query: &str) -> Result<Vec<ProductId>, IndexError> {
        Err(IndexError::Unavailable("offline".into()))
    }
}

pub struct Harness {
    // keeps the database directory alive for the test
    _dir: TempDir,
    pub storefront: Storefront,
    pub images: Arc<RecordingImages>,
    pub mailer: Arc<RecordingMailer>,
}

pub struct Setup {
    pub config: StorefrontConfig,
    pub images: RecordingImages,
    pub index: Option<Arc<dyn SearchIndex>>,
}

impl Default for Setup {
    fn default() -> Self {
        Self {
            config: StorefrontConfig::default(),
            images: RecordingImages::default(),
            index: None,
        }
    }
}

impl Setup {
    pub fn policy(mut self, policy: StockPolicy) -> Self {
        self.config.stock_policy = policy;
        self
    }

    pub fn retries(mut self, retries: u32) -> Self {
        self.config.completion_retries = retries;
        self
    }

    pub fn failing_image_release(mut self) -> Self {
        self.images.fail_release = true;
        self
    }

    pub fn index(mut self, index: Arc<dyn SearchIndex>) -> Self {
        self.index = Some(index);
        self
    }

    // Sled locks its files, so every test gets its own database in a temp dir.
    pub fn build(self) -> anyhow::Result<Harness> {
        let dir = tempdir()?;
        let store = Store::open(dir.path().join("storefront.db"))?;
        let images = Arc::new(self.images);
        let mailer = Arc::new(RecordingMailer::default());
        let index = self
            .index
            .unwrap_or_else(|| Arc::new(MemoryIndex::default()) as Arc<dyn SearchIndex>);
        let collab = Collaborators::new(images.clone(), index, mailer.clone());

        Ok(Harness {
            _dir: dir,
            storefront: Storefront::new(store, &self.config, collab),
            images,
            mailer,
        })
    }
}

pub fn harness() -> anyhow::Result<Harness> {
    Setup::default().build()
}

pub fn profile(username: &str) -> Profile {
    Profile {
        username: username.into(),
        password: format!("{username}-secret"),
        contact: "555-0100".into(),
        address: "1 Market Street".into(),
        name: username.to_uppercase(),
        email: format!("{username}@shop.test"),
    }
}

impl Harness {
    pub fn customer(&self, username: &str) -> anyhow::Result<User> {
        Ok(self
            .storefront
            .users()
            .register(profile(username), Role::Customer)?)
    }

    pub fn category(&self, name: &str) -> anyhow::Result<Category> {
        Ok(self.storefront.catalog().create_category(CategoryDraft {
            name: name.into(),
            description: format!("all things {name}"),
            image: Some(ImageRef::new(format!("categories/{name}.png"))),
        })?)
    }

    pub fn product(&self, category: &Category, name: &str, price: u64) -> anyhow::Result<Product> {
        Ok(self.storefront.catalog().create_product(ProductDraft {
            name: name.into(),
            description: format!("{name} from the farm"),
            price,
            brand: "Amul".into(),
            unit: "pack".into(),
            category_id: category.id,
            image: Some(ImageRef::new(format!("products/{name}.png"))),
        })?)
    }

    pub fn stock_in(&self, product: &Product, quantity: u32) -> anyhow::Result<()> {
        self.storefront.ledger().append(
            product.id,
            StockKind::In,
            quantity,
            ShelfLife::default(),
        )?;
        Ok(())
    }

    pub fn available(&self, product: &Product) -> anyhow::Result<i64> {
        Ok(self.storefront.ledger().available_stock(product.id)?)
    }
}

pub fn line(product: &Product, quantity: u32) -> LineItem {
    LineItem {
        product_id: product.id,
        quantity,
        unit_price: product.price,
    }
}
