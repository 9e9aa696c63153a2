//! File storage for category and product images.
use std::fmt;
use std::fs;
use std::io;
use std::path::{Component, Path, PathBuf};

use tracing::debug;

use crate::utils;

/// Logical path of a stored image, relative to the storage root.
#[derive(Debug, Clone, PartialEq, Eq, Hash, minicbor::Encode, minicbor::Decode)]
#[cbor(array)]
pub struct ImageRef(#[n(0)] String);

impl ImageRef {
    pub fn new(path: impl Into<String>) -> Self {
        Self(path.into())
    }
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ImageRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(thiserror::Error, Debug)]
pub enum ImageError {
    #[error("image path '{0}' must be relative and stay inside the storage root")]
    InvalidPath(String),
    #[error("image io failed for {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: io::Error,
    },
}

/// Where image binaries live. Releases are best effort from the caller's point of view.
pub trait ImageStore: Send + Sync {
    /// Stores `bytes` under a unique name derived from `logical_path` (e.g. `categories/milk.png`).
    fn store(&self, bytes: &[u8], logical_path: &str) -> Result<ImageRef, ImageError>;
    fn release(&self, image: &ImageRef) -> Result<(), ImageError>;
}

pub struct FsImageStore {
    root: PathBuf,
}

impl FsImageStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn resolve(&self, logical: &str) -> Result<PathBuf, ImageError> {
        let relative = Path::new(logical);
        let escapes = relative
            .components()
            .any(|c| !matches!(c, Component::Normal(_)));
        if logical.is_empty() || escapes {
            return Err(ImageError::InvalidPath(logical.to_string()));
        }
        Ok(self.root.join(relative))
    }
}

impl ImageStore for FsImageStore {
    fn store(&self, bytes: &[u8], logical_path: &str) -> Result<ImageRef, ImageError> {
        let (dir, file_name) = match logical_path.rsplit_once('/') {
            Some((dir, name)) => (Some(dir), name),
            None => (None, logical_path),
        };
        let unique = utils::unique_file_name(file_name);
        let logical = match dir {
            Some(dir) => format!("{dir}/{unique}"),
            None => unique,
        };

        let path = self.resolve(&logical)?;
        let io_err = |source| ImageError::Io {
            path: logical.clone(),
            source,
        };
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(io_err)?;
        }
        fs::write(&path, bytes).map_err(io_err)?;

        debug!(image = %logical, size = bytes.len(), "image stored");
        Ok(ImageRef(logical))
    }

    fn release(&self, image: &ImageRef) -> Result<(), ImageError> {
        let path = self.resolve(image.as_str())?;
        match fs::remove_file(&path) {
            Ok(()) => {
                debug!(image = %image, "image released");
                Ok(())
            }
            // already gone is as good as released
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(source) => Err(ImageError::Io {
                path: image.to_string(),
                source,
            }),
        }
    }
}
