use std::path::{Path, PathBuf};

use anyhow::Context;
use config::{Config, Environment, File};
use serde::Deserialize;

use crate::ledger::StockPolicy;

pub const DEFAULT_CONFIG_PATH: &str = "config/storefront.toml";

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct StorefrontConfig {
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,
    #[serde(default = "default_image_root")]
    pub image_root: PathBuf,
    #[serde(default)]
    pub stock_policy: StockPolicy,
    /// Extra attempts when a product's ledger moves under a stock check.
    #[serde(default = "default_completion_retries")]
    pub completion_retries: u32,
    #[serde(default = "default_outbox_capacity")]
    pub outbox_capacity: usize,
}

fn default_data_dir() -> PathBuf {
    PathBuf::from("data/storefront.db")
}

fn default_image_root() -> PathBuf {
    PathBuf::from("data/images")
}

fn default_completion_retries() -> u32 {
    5
}

fn default_outbox_capacity() -> usize {
    1024
}

impl Default for StorefrontConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            image_root: default_image_root(),
            stock_policy: StockPolicy::default(),
            completion_retries: default_completion_retries(),
            outbox_capacity: default_outbox_capacity(),
        }
    }
}

impl StorefrontConfig {
    /// Loads `config/storefront.toml` if present, then `STOREFRONT__*` environment variables.
    pub fn load() -> anyhow::Result<Self> {
        Self::load_from(DEFAULT_CONFIG_PATH)
    }

    pub fn load_from(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let settings = Config::builder()
            .add_source(File::from(path).required(false))
            .add_source(
                Environment::with_prefix("STOREFRONT")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .with_context(|| format!("failed to read configuration from {}", path.display()))?;

        let config: StorefrontConfig = settings
            .try_deserialize()
            .context("storefront configuration is invalid")?;
        if config.outbox_capacity == 0 {
            anyhow::bail!("outbox_capacity must be at least 1");
        }
        Ok(config)
    }
}
