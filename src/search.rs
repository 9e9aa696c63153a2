//! Eventually consistent full-text lookup over product name, description and brand.
use std::collections::{BTreeMap, BTreeSet};
use std::sync::RwLock;

use crate::types::ProductId;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProductDocument {
    pub id: ProductId,
    pub name: String,
    pub description: String,
    pub brand: String,
}

#[derive(thiserror::Error, Debug)]
pub enum IndexError {
    #[error("search index unavailable: {0}")]
    Unavailable(String),
}

pub trait SearchIndex: Send + Sync {
    fn upsert(&self, document: ProductDocument) -> Result<(), IndexError>;
    fn remove(&self, id: ProductId) -> Result<(), IndexError>;
    /// Ids of documents containing every term of `query` (prefix match per term).
    fn search(&self, query: &str) -> Result<Vec<ProductId>, IndexError>;
}

fn tokenize(text: &str) -> impl Iterator<Item = String> + '_ {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .map(str::to_lowercase)
}

/// In-process index keeping a token set per product.
#[derive(Default)]
pub struct MemoryIndex {
    documents: RwLock<BTreeMap<ProductId, BTreeSet<String>>>,
}

impl SearchIndex for MemoryIndex {
    fn upsert(&self, document: ProductDocument) -> Result<(), IndexError> {
        let tokens = tokenize(&document.name)
            .chain(tokenize(&document.description))
            .chain(tokenize(&document.brand))
            .collect();
        self.documents
            .write()
            .map_err(|_| IndexError::Unavailable("index lock poisoned".into()))?
            .insert(document.id, tokens);
        Ok(())
    }

    fn remove(&self, id: ProductId) -> Result<(), IndexError> {
        self.documents
            .write()
            .map_err(|_| IndexError::Unavailable("index lock poisoned".into()))?
            .remove(&id);
        Ok(())
    }

    fn search(&self, query: &str) -> Result<Vec<ProductId>, IndexError> {
        let terms: Vec<String> = tokenize(query).collect();
        if terms.is_empty() {
            return Ok(vec![]);
        }
        let documents = self
            .documents
            .read()
            .map_err(|_| IndexError::Unavailable("index lock poisoned".into()))?;

        Ok(documents
            .iter()
            .filter(|(_, tokens)| {
                terms
                    .iter()
                    .all(|term| tokens.iter().any(|token| token.starts_with(term.as_str())))
            })
            .map(|(id, _)| *id)
            .collect())
    }
}
